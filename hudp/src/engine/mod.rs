//! Per-channel delivery engines.
//!
//! The engines are pure state machines: the shell owns the socket and the
//! clock, feeds them millisecond readings and decoded packets, and carries
//! out the transmissions and deliveries they hand back. This keeps every
//! ordering and windowing decision synchronously testable without a socket.

pub mod receiver;
pub mod sender;
pub mod unreliable;

use bytes::Bytes;

/// One payload the receiver engine has released toward the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub seq: u16,
    pub ts_ms: u32,
    pub payload: Bytes,
    pub in_order: bool,
    pub skipped: bool,
}
