//! Retransmission and idle timers.
//!
//! Reliable delivery requires that unacknowledged packets are re-sent if no
//! ACK arrives within a bounded time.  Confundo layers three waits:
//! - the retransmission timeout (RTO), measured from the most recent
//!   transmission of the packet awaiting acknowledgement;
//! - the idle ceiling, measured from the last datagram heard from the peer,
//!   after which the connection is declared dead;
//! - the close wait, a shorter read timeout used while tearing down.
//!
//! [`RetransmitTimer`] combines the first two into a single decision per loop
//! iteration (see [`RetransmitTimer::poll`]), so every retry loop in the
//! engines is one bounded loop rather than nested unbounded ones.  It reads
//! `tokio::time::Instant`, which keeps it deterministic under paused test
//! clocks.

use std::time::Duration;

use tokio::time::Instant;

/// Adjustable timeout parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    /// Wait for an ACK before retransmitting.
    pub rto: Duration,
    /// Longest silence from the peer before the connection is dead.
    pub idle_timeout: Duration,
    /// Read timeout used while waiting for the peer's FIN during teardown.
    pub close_wait: Duration,
    /// Optional bound on how long a receiver waits for the first SYN.
    pub listen_timeout: Option<Duration>,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            rto: Duration::from_millis(500),
            idle_timeout: Duration::from_secs(10),
            close_wait: Duration::from_secs(2),
            listen_timeout: None,
        }
    }
}

/// What the owning loop should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    /// Keep reading for at most this long.
    Wait(Duration),
    /// The RTO elapsed: retransmit, then call [`RetransmitTimer::on_transmit`].
    Retransmit,
    /// The idle ceiling elapsed with nothing heard from the peer.
    Dead,
}

/// Timer state for one retransmittable packet.
#[derive(Debug, Clone)]
pub struct RetransmitTimer {
    rto: Duration,
    idle_timeout: Duration,
    sent_at: Instant,
    last_heard: Instant,
    tx_count: u32,
}

impl RetransmitTimer {
    /// Start timing a packet that has just been sent for the first time.
    ///
    /// `last_heard` is when the peer was last heard from; the idle ceiling
    /// keeps counting across packets until the peer says something.
    pub fn start(config: &TimerConfig, last_heard: Instant) -> Self {
        Self {
            rto: config.rto,
            idle_timeout: config.idle_timeout,
            sent_at: Instant::now(),
            last_heard,
            tx_count: 1,
        }
    }

    /// Record a retransmission of the same packet.
    pub fn on_transmit(&mut self) {
        self.sent_at = Instant::now();
        self.tx_count += 1;
    }

    /// Record that a datagram arrived from the peer (matching or not).
    pub fn on_heard(&mut self) {
        self.last_heard = Instant::now();
    }

    /// Number of transmissions so far (1 = sent once, never retransmitted).
    pub fn tx_count(&self) -> u32 {
        self.tx_count
    }

    /// Decide between reading again, retransmitting, or giving up.
    pub fn poll(&self) -> TimerAction {
        self.poll_at(Instant::now())
    }

    fn poll_at(&self, now: Instant) -> TimerAction {
        let idle_deadline = self.last_heard + self.idle_timeout;
        if now >= idle_deadline {
            return TimerAction::Dead;
        }
        let rto_deadline = self.sent_at + self.rto;
        if now >= rto_deadline {
            return TimerAction::Retransmit;
        }
        TimerAction::Wait(rto_deadline.min(idle_deadline) - now)
    }
}
