//! Connection finite-state machine (FSM) types.
//!
//! The two roles run independent machines, mirroring the protocol's
//! asymmetric shutdown: the sender half-closes first and then waits for the
//! receiver's own FIN, while the receiver acknowledges and half-closes in turn.
//!
//! ```text
//!  Sender:   CLOSED ─SYN─▶ SYN_SENT ─SYN|ACK─▶ ESTABLISHED ─FIN─▶ FIN_SENT
//!                                                                   │ ACK
//!            CLOSED ◀──────────── read timeout ─────────────── FIN_WAIT
//!
//!  Receiver: CLOSED ─bind─▶ LISTENING ─SYN─▶ ESTABLISHED ─FIN─▶ LAST_ACK
//!                                                                   │ ACK / timeout
//!            CLOSED ◀───────────────────────────────────────────────┘
//! ```
//!
//! Transitions live in [`crate::sender`] and [`crate::receiver`].

use std::fmt;

/// States of the initiating (sending) side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenderState {
    /// No connection exists; initial and final state.
    #[default]
    Closed,
    /// SYN has been sent; waiting for SYN|ACK.
    SynSent,
    /// Handshake complete; data transfer in progress.
    Established,
    /// FIN sent; waiting for its ACK.
    FinSent,
    /// Our FIN is acknowledged; acknowledging the peer's FIN until it goes quiet.
    FinWait,
}

/// States of the responding (receiving) side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiverState {
    #[default]
    Closed,
    /// Socket bound; waiting for a SYN.
    Listening,
    /// SYN|ACK sent; accepting data.
    Established,
    /// Peer FIN acknowledged and our FIN sent; lingering for retransmissions.
    LastAck,
}

impl fmt::Display for SenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Closed => "CLOSED",
            Self::SynSent => "SYN_SENT",
            Self::Established => "ESTABLISHED",
            Self::FinSent => "FIN_SENT",
            Self::FinWait => "FIN_WAIT",
        };
        f.write_str(s)
    }
}

impl fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Closed => "CLOSED",
            Self::Listening => "LISTENING",
            Self::Established => "ESTABLISHED",
            Self::LastAck => "LAST_ACK",
        };
        f.write_str(s)
    }
}
