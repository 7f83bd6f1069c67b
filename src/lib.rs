//! `confundo` — a reliable, congestion-controlled byte transfer over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐   one window per datagram   ┌──────────┐
//!  │  Sender  │────────────────────────────▶│ Receiver │
//!  └────┬─────┘                             └─────┬────┘
//!       │        cumulative ACKs                  │
//!       │◀────────────────────────────────────────┘
//!       │
//!  ┌────▼──────────────────────────────┐
//!  │           Connection              │
//!  │  (seq/ack numbers, id, filtering) │
//!  └────┬──────────────────────────────┘
//!       │ raw UDP datagrams
//!  ┌────▼──────┐
//!  │  Socket   │  (thin async wrapper around tokio UdpSocket)
//!  └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]      — 12-byte wire header (serialise / deserialise)
//! - [`seq`]         — modular sequence-number arithmetic
//! - [`config`]      — protocol parameters handed to each engine
//! - [`timer`]       — retransmission and idle timers
//! - [`congestion`]  — cwnd / ssthresh bookkeeping
//! - [`connection`]  — per-connection state shared by both roles
//! - [`sender`]      — initiator: handshake, data transfer, teardown
//! - [`receiver`]    — responder: handshake, in-order delivery, teardown
//! - [`state`]       — finite-state-machine types
//! - [`simulator`]   — lossy relay for exercising retransmission in tests
//! - [`socket`]      — async UDP socket abstraction
//! - [`error`]       — fatal error type

pub mod config;
pub mod congestion;
pub mod connection;
pub mod error;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod seq;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;

pub use config::Config;
pub use error::ConfundoError;
pub use receiver::Receiver;
pub use sender::{Sender, TransferStats};
