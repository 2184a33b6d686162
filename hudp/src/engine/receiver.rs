//! Receiver side of the reliable channel: deduplication, reordering and the
//! gap-skip policy.
//!
//! Arrivals at the delivery cursor flush immediately, together with any
//! contiguous run buffered behind them. Arrivals ahead of the cursor wait in
//! the reorder buffer. When the head of the stream stays missing past the
//! configured timeout, the cursor jumps to the oldest buffered sequence and
//! the missing range is abandoned, trading completeness for bounded
//! head-of-line blocking.
//!
//! ACK emission is not handled here: the shell acknowledges every well-formed
//! reliable arrival, duplicates included, before consulting this engine.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::engine::Delivery;
use crate::seq::{seq_in_window, seq_lt};

#[derive(Debug, Clone)]
struct Buffered {
    payload: Bytes,
    ts_ms: u32,
    #[allow(dead_code)]
    arrived_ms: u64,
}

/// The receiver abandoned `[from_seq, to_seq)` and resumed delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapSkip {
    pub from_seq: u16,
    /// First sequence delivered after the skip.
    pub to_seq: u16,
    /// How long the head of the gap had been outstanding.
    pub waited_ms: u64,
    pub deliveries: Vec<Delivery>,
}

/// Reliable-channel receiver engine for one peer.
pub struct ReliableReceiver {
    /// Next sequence to deliver.
    expected: u16,
    /// Out-of-order arrivals, keyed by sequence. Keys always lie strictly
    /// above `expected` and inside the receive window.
    buffer: BTreeMap<u16, Buffered>,
    recv_window: u16,
    gap_skip_timeout_ms: u64,
    /// When `expected` first became a gap; unset while nothing is buffered.
    gap_first_seen_ms: Option<u64>,
}

impl ReliableReceiver {
    pub fn new(recv_window: u16, gap_skip_timeout_ms: u64, initial_seq: u16) -> Self {
        Self {
            expected: initial_seq,
            buffer: BTreeMap::new(),
            recv_window,
            gap_skip_timeout_ms,
            gap_first_seen_ms: None,
        }
    }

    pub fn expected(&self) -> u16 {
        self.expected
    }

    /// Out-of-order packets currently held.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Process one reliable data arrival. Returns the payloads released by
    /// it, oldest first; an empty vector means the packet was buffered,
    /// a duplicate, or outside the receive window.
    pub fn on_data(&mut self, seq: u16, ts_ms: u32, payload: Bytes, now_ms: u64) -> Vec<Delivery> {
        if seq == self.expected {
            let mut out = vec![Delivery {
                seq,
                ts_ms,
                payload,
                in_order: true,
                skipped: false,
            }];
            self.expected = self.expected.wrapping_add(1);
            self.drain_contiguous(&mut out);
            self.note_gap_state(now_ms);
            out
        } else if seq_lt(seq, self.expected) {
            // Duplicate or replay. The shell has already re-ACKed it.
            Vec::new()
        } else if seq_in_window(seq, self.expected, self.recv_window) {
            self.buffer.entry(seq).or_insert(Buffered {
                payload,
                ts_ms,
                arrived_ms: now_ms,
            });
            if self.gap_first_seen_ms.is_none() {
                self.gap_first_seen_ms = Some(now_ms);
            }
            Vec::new()
        } else {
            // Beyond the receive window; discarded.
            Vec::new()
        }
    }

    /// Periodic gap scan. Once the head gap has stalled for the configured
    /// timeout, jump the cursor to the oldest buffered sequence and deliver
    /// from there.
    pub fn poll_gap(&mut self, now_ms: u64) -> Option<GapSkip> {
        let first_seen = self.gap_first_seen_ms?;
        if now_ms.saturating_sub(first_seen) < self.gap_skip_timeout_ms {
            return None;
        }

        let base = self.expected;
        let Some(target) = self
            .buffer
            .keys()
            .copied()
            .min_by_key(|s| s.wrapping_sub(base))
        else {
            self.gap_first_seen_ms = None;
            return None;
        };

        let entry = self.buffer.remove(&target).unwrap();
        self.expected = target.wrapping_add(1);

        let mut deliveries = vec![Delivery {
            seq: target,
            ts_ms: entry.ts_ms,
            payload: entry.payload,
            in_order: false,
            skipped: true,
        }];
        self.drain_contiguous(&mut deliveries);
        self.note_gap_state(now_ms);

        Some(GapSkip {
            from_seq: base,
            to_seq: target,
            waited_ms: now_ms - first_seen,
            deliveries,
        })
    }

    /// Flush the contiguous run now sitting at the cursor.
    fn drain_contiguous(&mut self, out: &mut Vec<Delivery>) {
        while let Some(entry) = self.buffer.remove(&self.expected) {
            out.push(Delivery {
                seq: self.expected,
                ts_ms: entry.ts_ms,
                payload: entry.payload,
                in_order: true,
                skipped: false,
            });
            self.expected = self.expected.wrapping_add(1);
        }
    }

    /// After the cursor moved: a non-empty buffer means `expected` is a gap
    /// again, an empty one means there is no gap to time.
    fn note_gap_state(&mut self, now_ms: u64) {
        if self.buffer.is_empty() {
            self.gap_first_seen_ms = None;
        } else if self.gap_first_seen_ms.is_none() {
            self.gap_first_seen_ms = Some(now_ms);
        }
    }
}
