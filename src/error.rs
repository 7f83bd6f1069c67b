//! Engine error type.
//!
//! Only fatal conditions are represented here.  Recoverable ones (a datagram
//! too short to decode, an RTO expiry, a packet that makes no sense in the
//! current state) are absorbed inside the engine loops and logged.

use std::fmt;

use thiserror::Error;

use crate::packet::PacketError;
use crate::socket::SocketError;

/// Protocol phase in which the idle ceiling was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Handshake,
    Transfer,
    Close,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Handshake => f.write_str("handshake"),
            Phase::Transfer => f.write_str("data transfer"),
            Phase::Close => f.write_str("connection close"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfundoError {
    /// Socket, source or sink I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A datagram could not be decoded.  Engines discard these; the variant
    /// exists for callers that decode datagrams themselves.
    #[error(transparent)]
    MalformedPacket(#[from] PacketError),

    /// Nothing was heard from the peer for the whole idle ceiling.
    #[error("connection dead: no response from peer during {phase}")]
    ConnectionDead { phase: Phase },

    /// No SYN arrived within the configured listen timeout.
    #[error("no connection request received")]
    ListenTimeout,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<SocketError> for ConfundoError {
    fn from(e: SocketError) -> Self {
        match e {
            SocketError::Io(e) => ConfundoError::Io(e),
            SocketError::Packet { source, .. } => ConfundoError::MalformedPacket(source),
        }
    }
}
