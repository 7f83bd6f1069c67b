//! End-to-end transfers over loopback without injected faults.
//!
//! The sender and receiver run as separate tokio tasks; the byte source is an
//! in-memory slice and the sink a `Vec<u8>`, so every test checks the exact
//! bytes that came out the other side.

use std::net::SocketAddr;
use std::time::Duration;

use confundo::{
    config::{Config, DEFAULT_MTU},
    socket::Socket,
    timer::TimerConfig,
    ConfundoError, Receiver, Sender, TransferStats,
};

fn fast_config() -> Config {
    Config {
        timers: TimerConfig {
            rto: Duration::from_millis(200),
            idle_timeout: Duration::from_secs(5),
            close_wait: Duration::from_millis(300),
            listen_timeout: Some(Duration::from_secs(10)),
        },
        ..Config::default()
    }
}

/// Deterministic, non-repeating-ish test payload.
fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Run one full transfer of `data` and return what the receiver wrote along
/// with the sender's statistics.
async fn round_trip(data: &[u8], config: Config) -> (Vec<u8>, TransferStats) {
    let receiver = Receiver::bind("127.0.0.1:0".parse().unwrap(), config.clone())
        .await
        .expect("bind receiver");
    let addr: SocketAddr = receiver.local_addr();

    let server = tokio::spawn(async move {
        let mut out: Vec<u8> = Vec::new();
        let n = receiver.transfer(&mut out).await?;
        assert_eq!(n as usize, out.len());
        Ok::<_, ConfundoError>(out)
    });

    let socket = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let sender = Sender::with_socket(socket, addr, config).expect("valid config");
    let stats = tokio::time::timeout(Duration::from_secs(30), sender.transfer(&mut &data[..]))
        .await
        .expect("sender timed out")
        .expect("sender failed");

    let out = tokio::time::timeout(Duration::from_secs(10), server)
        .await
        .expect("receiver timed out")
        .expect("receiver panicked")
        .expect("receiver failed");
    (out, stats)
}

#[tokio::test]
async fn empty_file() {
    let (out, stats) = round_trip(&[], fast_config()).await;
    assert!(out.is_empty());
    assert_eq!(stats.data_packets, 0);
    assert_eq!(stats.bytes_sent, 0);
}

#[tokio::test]
async fn single_byte() {
    let (out, stats) = round_trip(b"x", fast_config()).await;
    assert_eq!(out, b"x");
    assert_eq!(stats.data_packets, 1);
}

#[tokio::test]
async fn exactly_one_mtu() {
    let data = payload(DEFAULT_MTU as usize);
    let (out, stats) = round_trip(&data, fast_config()).await;
    assert_eq!(out, data);
    assert_eq!(stats.data_packets, 1);
    assert_eq!(stats.final_cwnd, 2 * DEFAULT_MTU);
}

/// Windows of 412, 824 and then a 100-byte remainder.
#[tokio::test]
async fn several_windows_with_remainder() {
    let data = payload(412 + 824 + 100);
    let (out, stats) = round_trip(&data, fast_config()).await;
    assert_eq!(out, data);
    assert_eq!(stats.data_packets, 3);
    assert_eq!(stats.bytes_sent, data.len() as u64);
    assert_eq!(stats.retransmissions, 0);
    assert_eq!(stats.final_cwnd, 4 * DEFAULT_MTU);
}

/// More than twice the sequence space: numbers wrap at least twice.
#[tokio::test]
async fn large_transfer_wraps_sequence_space() {
    let data = payload(120_000);
    let (out, stats) = round_trip(&data, fast_config()).await;
    assert_eq!(out.len(), data.len());
    assert_eq!(out, data);
    assert_eq!(stats.bytes_sent, 120_000);
    assert!(stats.final_cwnd <= fast_config().max_cwnd);
}

/// Starting just below the modulus forces a wrap on the very first window.
#[tokio::test]
async fn wrap_on_first_window() {
    let config = Config {
        initial_seq: 49_900,
        ..fast_config()
    };
    let data = payload(3_000);
    let (out, _) = round_trip(&data, config).await;
    assert_eq!(out, data);
}

/// The window leaves slow start once it passes ssthresh.
#[tokio::test]
async fn small_ssthresh_switches_to_congestion_avoidance() {
    let config = Config {
        mtu: 100,
        initial_ssthresh: 400,
        ..fast_config()
    };
    // Windows: 100, 200, 300, 400, 425.
    let data = payload(100 + 200 + 300 + 400 + 425);
    let (out, stats) = round_trip(&data, config).await;
    assert_eq!(out, data);
    assert_eq!(stats.data_packets, 5);
    assert_eq!(stats.final_cwnd, 448);
    assert_eq!(stats.final_ssthresh, 400);
}
