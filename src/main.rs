//! Entry point for `confundo`.
//!
//! Parses CLI arguments and dispatches into either **send** or **receive**
//! mode.  All protocol work is delegated to library modules; `main.rs` owns
//! only process setup (logging, argument parsing, file handling) and the
//! `ERROR: ...` / exit-status convention.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::fs::File;

use confundo::config::{Config, DEFAULT_MTU, DEFAULT_SSTHRESH};
use confundo::timer::TimerConfig;
use confundo::{Receiver, Sender};

/// Reliable, congestion-controlled file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,

    #[command(flatten)]
    tuning: Tuning,
}

#[derive(Subcommand)]
enum Mode {
    /// Send a file to a listening receiver.
    Send {
        /// Receiver host name or address.
        host: String,
        /// Receiver UDP port.
        port: u16,
        /// File to transfer.
        file: PathBuf,
    },
    /// Accept one transfer and write it to a file.
    Receive {
        /// Local address to bind (e.g. 0.0.0.0).
        host: String,
        /// Local UDP port.
        port: u16,
        /// Where to write the received bytes.
        output_file: PathBuf,
    },
}

#[derive(Args)]
struct Tuning {
    /// Retransmission timeout in milliseconds.
    #[arg(long, global = true, default_value_t = 500)]
    rto_ms: u64,

    /// Seconds of peer silence before the connection is declared dead.
    #[arg(long, global = true, default_value_t = 10.0)]
    idle_timeout: f64,

    /// Seconds to linger for the peer's FIN during teardown.
    #[arg(long, global = true, default_value_t = 2.0)]
    close_wait: f64,

    /// Give up if no SYN arrives within this many seconds (receive only).
    #[arg(long, global = true)]
    listen_timeout: Option<f64>,

    /// Base congestion window in bytes.
    #[arg(long, global = true, default_value_t = DEFAULT_MTU)]
    mtu: u32,

    /// Initial slow-start threshold in bytes.
    #[arg(long, global = true, default_value_t = DEFAULT_SSTHRESH)]
    ssthresh: u32,
}

impl Tuning {
    fn config(&self) -> Result<Config> {
        let secs = |name: &str, v: f64| {
            Duration::try_from_secs_f64(v).with_context(|| format!("invalid --{name} value {v}"))
        };
        let config = Config {
            mtu: self.mtu,
            initial_ssthresh: self.ssthresh,
            timers: TimerConfig {
                rto: Duration::from_millis(self.rto_ms),
                idle_timeout: secs("idle-timeout", self.idle_timeout)?,
                close_wait: secs("close-wait", self.close_wait)?,
                listen_timeout: self
                    .listen_timeout
                    .map(|v| secs("listen-timeout", v))
                    .transpose()?,
            },
            ..Config::default()
        };
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("ERROR: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.tuning.config()?;

    match cli.mode {
        Mode::Send { host, port, file } => {
            let peer = resolve(&host, port).await?;
            let mut source = File::open(&file)
                .await
                .with_context(|| format!("cannot open {}", file.display()))?;
            log::info!("Sending {} to {peer}", file.display());

            let sender = Sender::bind(peer, config).await?;
            let stats = sender.transfer(&mut source).await?;
            log::info!(
                "Sent {} bytes in {} packets ({} retransmissions, final cwnd {})",
                stats.bytes_sent,
                stats.data_packets,
                stats.retransmissions,
                stats.final_cwnd
            );
        }
        Mode::Receive {
            host,
            port,
            output_file,
        } => {
            let local = resolve(&host, port).await?;
            let receiver = Receiver::bind(local, config).await?;
            let mut sink = File::create(&output_file)
                .await
                .with_context(|| format!("cannot create {}", output_file.display()))?;
            log::info!("Receiving into {} on {local}", output_file.display());

            let n = receiver.transfer(&mut sink).await?;
            sink.sync_all().await?;
            log::info!("Received {n} bytes");
        }
    }
    Ok(())
}

/// Resolve `host:port`, taking the first address returned.
async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("cannot resolve {host}:{port}"))?
        .next()
        .ok_or_else(|| anyhow!("no address found for {host}:{port}"))
}
