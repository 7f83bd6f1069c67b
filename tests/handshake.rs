//! Integration tests for the 3-way handshake.
//!
//! Each test binds real `tokio::net::UdpSocket`s on loopback, runs the
//! receiver half in a background task, and checks the numbers both sides
//! agree on once they reach `Established`.

use std::net::SocketAddr;
use std::time::Duration;

use confundo::{
    config::Config,
    error::{ConfundoError, Phase},
    packet::flags,
    simulator::{Direction, DropRule, FaultPlan, Matcher, Relay},
    socket::Socket,
    state::{ReceiverState, SenderState},
    timer::TimerConfig,
    Receiver, Sender,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fast_config() -> Config {
    Config {
        timers: TimerConfig {
            rto: Duration::from_millis(150),
            idle_timeout: Duration::from_secs(3),
            close_wait: Duration::from_millis(300),
            listen_timeout: Some(Duration::from_secs(5)),
        },
        ..Config::default()
    }
}

async fn bind_receiver(config: Config) -> (Receiver, SocketAddr) {
    let receiver = Receiver::bind("127.0.0.1:0".parse().unwrap(), config)
        .await
        .expect("bind receiver");
    let addr = receiver.local_addr();
    (receiver, addr)
}

async fn sender_to(peer: SocketAddr, config: Config) -> Sender {
    let socket = Socket::bind("127.0.0.1:0".parse().unwrap())
        .await
        .expect("bind sender socket");
    Sender::with_socket(socket, peer, config).expect("valid config")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Both sides reach `Established` and agree on the connection id and the
/// first data sequence number.
#[tokio::test]
async fn both_sides_reach_established() {
    let (mut receiver, addr) = bind_receiver(fast_config()).await;
    let server = tokio::spawn(async move {
        receiver.listen().await.map(|()| receiver)
    });

    let mut sender = sender_to(addr, fast_config()).await;
    tokio::time::timeout(Duration::from_secs(5), sender.connect())
        .await
        .expect("connect timed out")
        .expect("connect failed");

    let receiver = server.await.unwrap().expect("listen failed");

    assert_eq!(sender.state(), SenderState::Established);
    assert_eq!(receiver.state(), ReceiverState::Established);

    let id = sender.connection_id().expect("id chosen on connect");
    assert_ne!(id, 0);
    assert_eq!(receiver.connection_id(), Some(id));

    // The SYN carried 50000 ≡ 0 and consumed one sequence number.
    assert_eq!(sender.seq_num(), 1);
    assert_eq!(receiver.ack_num(), 1);
    assert_eq!(receiver.peer(), Some(sender.local_addr()));
}

/// A configured id and initial sequence number flow through unchanged.
#[tokio::test]
async fn configured_id_and_isn_are_used() {
    let (mut receiver, addr) = bind_receiver(fast_config()).await;
    let server = tokio::spawn(async move {
        receiver.listen().await.map(|()| receiver)
    });

    let config = Config {
        connection_id: Some(4242),
        initial_seq: 49_999,
        ..fast_config()
    };
    let mut sender = sender_to(addr, config).await;
    sender.connect().await.expect("connect failed");
    let receiver = server.await.unwrap().expect("listen failed");

    assert_eq!(receiver.connection_id(), Some(4242));
    assert_eq!(sender.seq_num(), 0, "ISN 49999 + SYN wraps to 0");
    assert_eq!(receiver.ack_num(), 0);
}

/// Losing the SYN|ACK makes the sender retransmit its SYN; the receiver
/// answers it again from the data phase.
#[tokio::test]
async fn lost_syn_ack_is_recovered() {
    let (receiver, addr) = bind_receiver(fast_config()).await;
    let plan = FaultPlan::default().with_drop(DropRule {
        direction: Direction::Backward,
        matcher: Matcher::Flags(flags::SYN | flags::ACK),
        nth: 1,
    });
    let relay = Relay::start(addr, plan).await.unwrap();

    let server = tokio::spawn(async move {
        let mut out: Vec<u8> = Vec::new();
        receiver.transfer(&mut out).await.map(|_| out)
    });

    let sender = sender_to(relay.local_addr, fast_config()).await;
    let stats = sender
        .transfer(&mut &b"hello"[..])
        .await
        .expect("transfer failed");
    let out = server.await.unwrap().expect("receiver failed");

    assert_eq!(out, b"hello");
    assert!(stats.retransmissions >= 1);
    assert_eq!(
        relay.trace().count(Direction::Forward, Matcher::Flags(flags::SYN)),
        2,
        "exactly one SYN retransmission"
    );
}

/// Nobody answers: the sender gives up once the idle ceiling is reached.
#[tokio::test]
async fn connect_to_silent_peer_fails() {
    let silent = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let config = Config {
        timers: TimerConfig {
            idle_timeout: Duration::from_millis(800),
            ..fast_config().timers
        },
        ..fast_config()
    };
    let mut sender = sender_to(silent.local_addr, config).await;

    let result = sender.connect().await;
    assert!(
        matches!(
            result,
            Err(ConfundoError::ConnectionDead {
                phase: Phase::Handshake
            })
        ),
        "expected handshake failure, got: {result:?}"
    );
    assert!(sender.stats().retransmissions >= 1);
}
