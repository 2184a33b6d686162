//! Sender side of the reliable channel: Selective Repeat ARQ.
//!
//! Sequence allocation, the in-flight table, retransmission scheduling with
//! a fixed timeout, RTT sampling at ACK arrival, and the max-transmissions
//! drop policy.
//!
//! Deadlines live in a `BinaryHeap` with lazy deletion: an ACKed or
//! rescheduled sequence stays in the heap until its stale entry pops and is
//! skipped. One heap serves every in-flight packet; there is no timer per
//! sequence.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use bytes::Bytes;

use crate::rtt::RttEstimator;

/// State kept per unacked sequence. The payload is held verbatim for
/// retransmission.
#[derive(Debug, Clone)]
struct InFlight {
    payload: Bytes,
    first_send_ms: u64,
    tx_count: u32,
    deadline_ms: u64,
}

/// Heap entry: a scheduled retransmission deadline for one sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Deadline {
    at_ms: u64,
    seq: u16,
}

// BinaryHeap is a max-heap; reverse the ordering so the earliest deadline
// pops first.
impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> Ordering {
        other.at_ms.cmp(&self.at_ms).then(other.seq.cmp(&self.seq))
    }
}

/// A packet whose deadline fired and which gets another transmission.
#[derive(Debug, Clone)]
pub struct Retransmit {
    pub seq: u16,
    pub payload: Bytes,
    /// Transmissions so far, this one included.
    pub tx_count: u32,
}

/// A packet that exhausted its transmissions and left the in-flight table.
#[derive(Debug, Clone, Copy)]
pub struct Dropped {
    pub seq: u16,
    pub tx_count: u32,
}

/// Reliable-channel sender engine for one peer.
pub struct ReliableSender {
    /// Next sequence to allocate.
    next_seq: u16,
    /// Oldest unacked sequence; equals `next_seq` when nothing is in flight.
    send_base: u16,
    in_flight: HashMap<u16, InFlight>,
    deadlines: BinaryHeap<Deadline>,
    window_capacity: usize,
    retx_timeout_ms: u64,
    max_retx: u32,
    rtt: RttEstimator,
}

impl ReliableSender {
    pub fn new(
        window_capacity: usize,
        retx_timeout_ms: u64,
        max_retx: u32,
        initial_seq: u16,
    ) -> Self {
        Self {
            next_seq: initial_seq,
            send_base: initial_seq,
            in_flight: HashMap::new(),
            deadlines: BinaryHeap::new(),
            window_capacity,
            retx_timeout_ms,
            max_retx,
            rtt: RttEstimator::new(),
        }
    }

    /// True when the window admits no further sequences.
    pub fn window_full(&self) -> bool {
        self.in_flight.len() >= self.window_capacity
    }

    /// Count of unacked sequences.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn send_base(&self) -> u16 {
        self.send_base
    }

    pub fn next_seq(&self) -> u16 {
        self.next_seq
    }

    /// Smoothed RTT toward this peer, if sampled.
    pub fn rtt_ms(&self) -> Option<u64> {
        self.rtt.smoothed_ms()
    }

    /// Allocate the next sequence and record its first transmission.
    ///
    /// The caller must have checked `window_full()`; the shell suspends the
    /// application before ever reaching here with a full window.
    pub fn transmit(&mut self, payload: Bytes, now_ms: u64) -> u16 {
        debug_assert!(!self.window_full());
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        let deadline_ms = now_ms + self.retx_timeout_ms;
        self.in_flight.insert(
            seq,
            InFlight {
                payload,
                first_send_ms: now_ms,
                tx_count: 1,
                deadline_ms,
            },
        );
        self.deadlines.push(Deadline {
            at_ms: deadline_ms,
            seq,
        });
        seq
    }

    /// Retire an acknowledged sequence.
    ///
    /// Returns the RTT sample in milliseconds when `seq` was still in
    /// flight; `None` for late or duplicate ACKs, which are ignored. The
    /// sample is measured against this sender's own clock, never the ACK's
    /// timestamp field.
    pub fn on_ack(&mut self, seq: u16, now_ms: u64) -> Option<u64> {
        let entry = self.in_flight.remove(&seq)?;
        let sample = now_ms.saturating_sub(entry.first_send_ms);
        self.rtt.record(sample);
        self.advance_base();
        Some(sample)
    }

    /// Earliest pending deadline, if anything is in flight. Stale heap
    /// entries are pruned here so the shell never arms a timer for a
    /// sequence that was already ACKed.
    pub fn next_deadline_ms(&mut self) -> Option<u64> {
        while let Some(top) = self.deadlines.peek() {
            match self.in_flight.get(&top.seq) {
                Some(entry) if entry.deadline_ms == top.at_ms => return Some(top.at_ms),
                _ => {
                    self.deadlines.pop();
                }
            }
        }
        None
    }

    /// Collect everything whose deadline has passed: packets to put back on
    /// the wire and packets that ran out of transmissions.
    pub fn poll_expired(&mut self, now_ms: u64) -> (Vec<Retransmit>, Vec<Dropped>) {
        let mut retx = Vec::new();
        let mut dropped = Vec::new();

        while let Some(top) = self.deadlines.peek() {
            if top.at_ms > now_ms {
                break;
            }
            let Deadline { at_ms, seq } = self.deadlines.pop().unwrap();

            let Some(entry) = self.in_flight.get_mut(&seq) else {
                continue; // ACKed since scheduling
            };
            if entry.deadline_ms != at_ms {
                continue; // rescheduled by an earlier retransmission
            }

            if entry.tx_count >= self.max_retx {
                let entry = self.in_flight.remove(&seq).unwrap();
                self.advance_base();
                dropped.push(Dropped {
                    seq,
                    tx_count: entry.tx_count,
                });
            } else {
                entry.tx_count += 1;
                entry.deadline_ms = now_ms + self.retx_timeout_ms;
                retx.push(Retransmit {
                    seq,
                    payload: entry.payload.clone(),
                    tx_count: entry.tx_count,
                });
                self.deadlines.push(Deadline {
                    at_ms: entry.deadline_ms,
                    seq,
                });
            }
        }

        (retx, dropped)
    }

    /// Move `send_base` to the oldest surviving sequence, or to `next_seq`
    /// when the table is empty.
    fn advance_base(&mut self) {
        if self.in_flight.is_empty() {
            self.send_base = self.next_seq;
            return;
        }
        let base = self.send_base;
        self.send_base = self
            .in_flight
            .keys()
            .copied()
            .min_by_key(|s| s.wrapping_sub(base))
            .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> ReliableSender {
        ReliableSender::new(4, 100, 3, 0)
    }

    #[test]
    fn allocates_sequences_in_order() {
        let mut tx = sender();
        assert_eq!(tx.transmit(Bytes::from_static(b"a"), 0), 0);
        assert_eq!(tx.transmit(Bytes::from_static(b"b"), 0), 1);
        assert_eq!(tx.next_seq(), 2);
        assert_eq!(tx.send_base(), 0);
        assert_eq!(tx.in_flight(), 2);
    }

    #[test]
    fn window_fills_at_capacity() {
        let mut tx = sender();
        for i in 0..4u64 {
            assert!(!tx.window_full());
            tx.transmit(Bytes::from_static(b"x"), i);
        }
        assert!(tx.window_full());
    }

    #[test]
    fn ack_frees_slot_and_samples_rtt() {
        let mut tx = sender();
        tx.transmit(Bytes::from_static(b"a"), 1000);
        let sample = tx.on_ack(0, 1040).unwrap();
        assert_eq!(sample, 40);
        assert_eq!(tx.rtt_ms(), Some(40));
        assert_eq!(tx.in_flight(), 0);
        assert_eq!(tx.send_base(), 1);
    }

    #[test]
    fn duplicate_ack_ignored() {
        let mut tx = sender();
        tx.transmit(Bytes::from_static(b"a"), 0);
        assert!(tx.on_ack(0, 10).is_some());
        assert!(tx.on_ack(0, 20).is_none());
        assert!(tx.on_ack(9, 20).is_none());
    }

    #[test]
    fn base_advances_past_contiguous_acks() {
        let mut tx = sender();
        for _ in 0..4 {
            tx.transmit(Bytes::from_static(b"x"), 0);
        }
        // ACK out of order: 1 first leaves the base parked at 0.
        tx.on_ack(1, 5);
        assert_eq!(tx.send_base(), 0);
        tx.on_ack(0, 5);
        assert_eq!(tx.send_base(), 2);
    }

    #[test]
    fn no_retransmission_before_deadline() {
        let mut tx = sender();
        tx.transmit(Bytes::from_static(b"a"), 0);
        let (retx, dropped) = tx.poll_expired(99);
        assert!(retx.is_empty());
        assert!(dropped.is_empty());
    }

    #[test]
    fn retransmission_reuses_payload_and_reschedules() {
        let mut tx = sender();
        tx.transmit(Bytes::from_static(b"hold"), 0);

        let (retx, _) = tx.poll_expired(100);
        assert_eq!(retx.len(), 1);
        assert_eq!(&retx[0].payload[..], b"hold");
        assert_eq!(retx[0].tx_count, 2);

        // New deadline is a full timeout away.
        assert_eq!(tx.next_deadline_ms(), Some(200));
    }

    #[test]
    fn fixed_timeout_no_backoff() {
        let mut tx = sender();
        tx.transmit(Bytes::from_static(b"a"), 0);
        tx.poll_expired(100);
        tx.poll_expired(200);
        // Second retransmission schedules exactly one timeout ahead again.
        assert_eq!(tx.next_deadline_ms(), Some(300));
    }

    #[test]
    fn drop_after_max_transmissions() {
        let mut tx = sender();
        tx.transmit(Bytes::from_static(b"a"), 0);

        let (r, d) = tx.poll_expired(100);
        assert_eq!((r.len(), d.len()), (1, 0)); // tx_count 2
        let (r, d) = tx.poll_expired(200);
        assert_eq!((r.len(), d.len()), (1, 0)); // tx_count 3 == max
        let (r, d) = tx.poll_expired(300);
        assert_eq!((r.len(), d.len()), (0, 1));
        assert_eq!(d[0].tx_count, 3);
        assert_eq!(tx.in_flight(), 0);
        assert_eq!(tx.send_base(), tx.next_seq());
    }

    #[test]
    fn ack_cancels_scheduled_retransmission() {
        let mut tx = sender();
        tx.transmit(Bytes::from_static(b"a"), 0);
        tx.on_ack(0, 50);
        assert_eq!(tx.next_deadline_ms(), None);
        let (retx, dropped) = tx.poll_expired(1000);
        assert!(retx.is_empty() && dropped.is_empty());
    }

    #[test]
    fn sequence_space_wraps() {
        let mut tx = ReliableSender::new(8, 100, 3, 65534);
        assert_eq!(tx.transmit(Bytes::from_static(b"a"), 0), 65534);
        assert_eq!(tx.transmit(Bytes::from_static(b"b"), 0), 65535);
        assert_eq!(tx.transmit(Bytes::from_static(b"c"), 0), 0);
        assert_eq!(tx.send_base(), 65534);

        tx.on_ack(65534, 1);
        tx.on_ack(65535, 1);
        assert_eq!(tx.send_base(), 0);
        tx.on_ack(0, 1);
        assert_eq!(tx.send_base(), 1);
        assert_eq!(tx.next_seq(), 1);
    }

    #[test]
    fn next_deadline_prunes_stale_entries() {
        let mut tx = sender();
        tx.transmit(Bytes::from_static(b"a"), 0);
        tx.transmit(Bytes::from_static(b"b"), 10);
        tx.on_ack(0, 20);
        // The earliest heap entry belongs to the ACKed sequence; the next
        // real deadline is seq 1's.
        assert_eq!(tx.next_deadline_ms(), Some(110));
    }
}
