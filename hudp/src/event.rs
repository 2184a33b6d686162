//! Observable transport events and the application delivery record.

use std::net::SocketAddr;

use bytes::Bytes;

use crate::packet::Channel;

/// A payload handed to the application.
#[derive(Debug, Clone)]
pub struct Received {
    /// Remote endpoint the datagram came from.
    pub peer: SocketAddr,
    pub channel: Channel,
    pub seq: u16,
    /// Sender wire timestamp (opaque; the sender's clock, mod 2^32).
    pub ts_ms: u32,
    /// Smoothed RTT toward `peer`, when reliable traffic has sampled one.
    /// Always `None` on the unreliable channel.
    pub rtt_ms: Option<u64>,
    pub payload: Bytes,
    /// False only for the first delivery after a gap skip.
    pub in_order: bool,
    /// True when this delivery immediately follows one or more skipped
    /// sequences.
    pub skipped: bool,
}

/// Diagnostic events emitted by the transport, in scheduler order.
///
/// Recording only happens while an event stream has been taken; otherwise
/// the transport skips the bookkeeping entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// First transmission of a data packet.
    TxData {
        peer: SocketAddr,
        channel: Channel,
        seq: u16,
        len: usize,
    },
    /// Arrival of a well-formed data packet.
    RxData {
        peer: SocketAddr,
        channel: Channel,
        seq: u16,
        len: usize,
    },
    /// An acknowledgement left for `peer`.
    AckTx { peer: SocketAddr, seq: u16 },
    /// An acknowledgement arrived and retired an in-flight sequence.
    AckRx {
        peer: SocketAddr,
        seq: u16,
        rtt_ms: u64,
    },
    /// A reliable packet was retransmitted; `count` includes the original.
    Retx {
        peer: SocketAddr,
        seq: u16,
        count: u32,
    },
    /// A payload was released to the application.
    Deliver {
        peer: SocketAddr,
        channel: Channel,
        seq: u16,
        in_order: bool,
        skipped: bool,
    },
    /// The receiver abandoned the range `[from_seq, to_seq)` after waiting
    /// `waited_ms` for the head of it.
    SkipGap {
        peer: SocketAddr,
        from_seq: u16,
        to_seq: u16,
        waited_ms: u64,
    },
    /// A reliable sequence exhausted its transmissions and was dropped.
    DropMaxRetx {
        peer: SocketAddr,
        seq: u16,
        tx_count: u32,
    },
    /// A socket-level send or receive failed transiently.
    SocketError { detail: String },
}
