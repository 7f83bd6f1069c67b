//! Sender-side congestion window.
//!
//! Confundo's "window" bounds the size of the *next single payload*, not the
//! number of packets in flight.  Growth happens once per acknowledged window:
//!
//! - slow start (`cwnd < ssthresh`): `cwnd += mtu`
//! - congestion avoidance: `cwnd += mtu² / cwnd`
//! - on a retransmission timeout: `ssthresh = max(cwnd / 2, mtu)`,
//!   `cwnd = mtu`
//!
//! `cwnd` never drops below `mtu` and never grows past `max_cwnd`.
//! This module only tracks numbers; the sender loop decides when to call it.

use crate::config::Config;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CongestionControl {
    mtu: u32,
    max_cwnd: u32,
    cwnd: u32,
    ssthresh: u32,
}

impl CongestionControl {
    pub fn new(config: &Config) -> Self {
        Self {
            mtu: config.mtu,
            max_cwnd: config.max_cwnd.max(config.mtu),
            cwnd: config.mtu,
            ssthresh: config.initial_ssthresh.max(config.mtu),
        }
    }

    /// Size limit of the next payload, in bytes.
    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    /// `true` while the window grows by a whole `mtu` per ACK.
    pub fn in_slow_start(&self) -> bool {
        self.cwnd < self.ssthresh
    }

    /// Grow the window after an ACK for a packet that was sent only once.
    pub fn on_ack(&mut self) {
        let inc = if self.in_slow_start() {
            self.mtu
        } else {
            let mtu = u64::from(self.mtu);
            (mtu * mtu / u64::from(self.cwnd)) as u32
        };
        self.cwnd = self.cwnd.saturating_add(inc).min(self.max_cwnd);
    }

    /// React to a retransmission timeout.
    pub fn on_timeout(&mut self) {
        self.ssthresh = (self.cwnd / 2).max(self.mtu);
        self.cwnd = self.mtu;
    }
}
