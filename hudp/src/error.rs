use thiserror::Error;

/// All errors produced by the H-UDP transport.
#[derive(Debug, Error)]
pub enum HudpError {
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    #[error("unknown channel value: 0x{0:02x}")]
    UnknownChannel(u8),

    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("send abandoned while blocked on the send window")]
    BackpressureCancelled,

    #[error("transport is closed")]
    Closed,

    #[error("{name} of {configured} exceeds maximum {max}")]
    WindowTooLarge {
        name: &'static str,
        configured: usize,
        max: usize,
    },

    #[error("mtu {mtu} leaves no room for the {header}-byte header")]
    MtuTooSmall { mtu: usize, header: usize },

    #[error("loss probability {0} outside [0, 1]")]
    InvalidLossProbability(f64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HudpError>;
