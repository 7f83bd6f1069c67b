//! Engine configuration.
//!
//! Every tunable of the protocol lives in [`Config`], which is handed to the
//! [`crate::sender::Sender`] and [`crate::receiver::Receiver`] constructors.
//! [`Config::default`] uses the standard Confundo constants.

use crate::error::ConfundoError;
use crate::packet::HEADER_LEN;
use crate::seq::{SeqSpace, DEFAULT_MODULUS};
use crate::socket::MAX_DATAGRAM;
use crate::timer::TimerConfig;

/// Base window and growth unit, in bytes.
pub const DEFAULT_MTU: u32 = 412;
/// Initial slow-start threshold, in bytes.
pub const DEFAULT_SSTHRESH: u32 = 12_000;
/// Upper bound on the congestion window, in bytes.
///
/// Each window travels as a single datagram, so the clamp has to fit one UDP
/// payload and stay below half the sequence space.
pub const DEFAULT_MAX_CWND: u32 = 16_384;
/// Initial sequence number used by the sender (normalised into the space).
pub const DEFAULT_INITIAL_SEQ: u32 = 50_000;

/// Largest payload that fits in a single UDP datagram after our header.
pub const MAX_PAYLOAD: u32 = (MAX_DATAGRAM - 28 - HEADER_LEN) as u32;

/// Protocol parameters for one engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base congestion window; also the growth unit and the cwnd/ssthresh floor.
    pub mtu: u32,
    /// Slow-start threshold at connection start.
    pub initial_ssthresh: u32,
    /// Clamp applied to cwnd growth.
    pub max_cwnd: u32,
    /// Modulus of the sequence space.
    pub seq_modulus: u32,
    /// Sequence number carried by the SYN.
    pub initial_seq: u32,
    /// Fixed connection id for the initiator; random when `None`.
    pub connection_id: Option<u16>,
    pub timers: TimerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            initial_ssthresh: DEFAULT_SSTHRESH,
            max_cwnd: DEFAULT_MAX_CWND,
            seq_modulus: DEFAULT_MODULUS,
            initial_seq: DEFAULT_INITIAL_SEQ,
            connection_id: None,
            timers: TimerConfig::default(),
        }
    }
}

impl Config {
    /// Reject parameter combinations the engines cannot honour.
    pub fn validate(&self) -> Result<(), ConfundoError> {
        let invalid = |msg: String| Err(ConfundoError::InvalidConfig(msg));
        if self.seq_modulus < 2 {
            return invalid(format!("sequence modulus {} is too small", self.seq_modulus));
        }
        if self.mtu == 0 {
            return invalid("mtu must be non-zero".into());
        }
        if self.initial_ssthresh < self.mtu {
            return invalid(format!(
                "ssthresh {} is below the mtu {}",
                self.initial_ssthresh, self.mtu
            ));
        }
        if self.max_cwnd < self.mtu {
            return invalid(format!("max cwnd {} is below the mtu {}", self.max_cwnd, self.mtu));
        }
        if self.max_cwnd > MAX_PAYLOAD {
            return invalid(format!(
                "max cwnd {} exceeds the largest UDP payload {MAX_PAYLOAD}",
                self.max_cwnd
            ));
        }
        if self.max_cwnd >= self.seq_modulus / 2 {
            return invalid(format!(
                "max cwnd {} must stay below half the sequence modulus {}",
                self.max_cwnd, self.seq_modulus
            ));
        }
        if self.timers.rto.is_zero() || self.timers.idle_timeout < self.timers.rto {
            return invalid("rto must be non-zero and no longer than the idle timeout".into());
        }
        Ok(())
    }

    pub fn seq_space(&self) -> SeqSpace {
        SeqSpace::new(self.seq_modulus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn default_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn ssthresh_below_mtu_rejected() {
        let cfg = Config {
            initial_ssthresh: 100,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfundoError::InvalidConfig(_))));
    }

    #[test]
    fn max_cwnd_must_fit_sequence_space() {
        let cfg = Config {
            max_cwnd: 25_000,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            seq_modulus: 1_000_000,
            max_cwnd: 70_000,
            ..Config::default()
        };
        assert!(cfg.validate().is_err(), "larger than one datagram");
    }

    #[test]
    fn rto_longer_than_idle_rejected() {
        let mut cfg = Config::default();
        cfg.timers.rto = Duration::from_secs(20);
        assert!(cfg.validate().is_err());
    }
}
