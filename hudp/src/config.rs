//! Transport configuration.

use crate::error::{HudpError, Result};
use crate::packet::HEADER_LEN;
use crate::seq::HALF_SPACE;

/// Largest permitted send or receive window. Serial-number comparison is
/// ambiguous once a window spans half the sequence space.
pub const MAX_WINDOW: usize = HALF_SPACE as usize;

/// Tuning knobs for a transport instance. Every field has a usable default;
/// `Config::default()` followed by selective overrides is the expected way
/// to build one.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum total packet size on the wire, header included.
    pub mtu: usize,
    /// Fixed retransmission timeout in milliseconds. Not adaptive.
    pub retx_timeout_ms: u64,
    /// Maximum unacked reliable packets in flight; further sends suspend.
    pub send_window_size: usize,
    /// Maximum out-of-order reliable packets buffered above the delivery
    /// cursor; arrivals beyond it are discarded (their ACKs still go out).
    pub recv_window_size: usize,
    /// Transmissions a reliable packet gets before it is dropped.
    pub max_retx: u32,
    /// How long a missing sequence may stall delivery before the receiver
    /// skips past it.
    pub gap_skip_timeout_ms: u64,
    /// OS receive buffer size in bytes.
    pub socket_rcvbuf: usize,
    /// OS send buffer size in bytes.
    pub socket_sndbuf: usize,
    /// Egress-only drop probability. Testing hook; leave at 0.0 in production.
    pub loss_prob: f64,
    /// Egress-only maximum uniform extra delay in milliseconds. Testing hook.
    pub jitter_ms: u64,
    /// Initial reliable sequence number for both directions. Testing hook
    /// for exercising wraparound without sending 65 000 packets first; both
    /// endpoints must agree on it.
    pub initial_seq: u16,
    /// Reliable data sequences deterministically dropped at egress. Testing
    /// hook for forcing persistent gaps.
    pub drop_data_seqs: Vec<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mtu: 1200,
            retx_timeout_ms: 200,
            send_window_size: 64,
            recv_window_size: 64,
            max_retx: 10,
            gap_skip_timeout_ms: 200,
            socket_rcvbuf: 1024 * 1024,
            socket_sndbuf: 1024 * 1024,
            loss_prob: 0.0,
            jitter_ms: 0,
            initial_seq: 0,
            drop_data_seqs: Vec::new(),
        }
    }
}

impl Config {
    /// Largest payload a single `send` accepts under this configuration.
    pub fn max_payload(&self) -> usize {
        self.mtu.saturating_sub(HEADER_LEN)
    }

    /// Reject configurations the sequence arithmetic or the codec cannot
    /// support. Called by the transport constructors.
    pub fn validate(&self) -> Result<()> {
        if self.send_window_size == 0 || self.send_window_size >= MAX_WINDOW {
            return Err(HudpError::WindowTooLarge {
                name: "send window",
                configured: self.send_window_size,
                max: MAX_WINDOW - 1,
            });
        }
        if self.recv_window_size == 0 || self.recv_window_size >= MAX_WINDOW {
            return Err(HudpError::WindowTooLarge {
                name: "receive window",
                configured: self.recv_window_size,
                max: MAX_WINDOW - 1,
            });
        }
        if self.mtu <= HEADER_LEN {
            return Err(HudpError::MtuTooSmall {
                mtu: self.mtu,
                header: HEADER_LEN,
            });
        }
        if !(0.0..=1.0).contains(&self.loss_prob) {
            return Err(HudpError::InvalidLossProbability(self.loss_prob));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn oversized_windows_rejected() {
        let cfg = Config {
            send_window_size: MAX_WINDOW,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            recv_window_size: MAX_WINDOW + 1,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_window_rejected() {
        let cfg = Config {
            send_window_size: 0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn tiny_mtu_rejected() {
        let cfg = Config {
            mtu: HEADER_LEN,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(HudpError::MtuTooSmall { .. })));
    }

    #[test]
    fn loss_probability_bounds() {
        let cfg = Config {
            loss_prob: 1.5,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            loss_prob: 1.0,
            ..Config::default()
        };
        cfg.validate().unwrap();
    }

    #[test]
    fn max_payload_accounts_for_header() {
        assert_eq!(Config::default().max_payload(), 1200 - HEADER_LEN);
    }
}
