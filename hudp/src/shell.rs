//! Transport shell: owns the UDP socket and drives every engine.
//!
//! One actor task per transport. All engine state lives inside the task, so
//! no locking happens on the packet path; handles talk to it over an mpsc
//! command channel with oneshot completions. Egress from every source
//! (application sends, ACK emission, retransmission) funnels through
//! [`Shell::egress`], which applies the fault-injection hooks and performs
//! the single shared socket write. Ingress is never tampered with.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use bytes::Bytes;
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Duration};

use crate::clock::Clock;
use crate::config::Config;
use crate::engine::Delivery;
use crate::error::{HudpError, Result};
use crate::event::{Event, Received};
use crate::packet::{Channel, Flags, Packet};
use crate::peer::{Peer, PeerTable, Waiter};

/// How often the receiver-side gap scanner runs.
const GAP_SCAN_INTERVAL: Duration = Duration::from_millis(50);
/// Command channel depth between handles and the actor.
const COMMAND_QUEUE: usize = 256;
/// Delivery queue depth toward the application. A full queue back-pressures
/// the scheduler; reliable deliveries are never silently dropped.
const DELIVERY_QUEUE: usize = 1024;
/// Largest datagram a UDP socket can hand us.
const MAX_DATAGRAM: usize = 65_535;

/// Requests from the public handles to the actor.
pub(crate) enum Command {
    Send {
        to: SocketAddr,
        payload: Bytes,
        reliable: bool,
        done: oneshot::Sender<Result<()>>,
    },
    SetFaults {
        loss_prob: f64,
        jitter_ms: u64,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

/// An encoded datagram held back by the jitter hook.
struct DelayedDatagram {
    due_ms: u64,
    to: SocketAddr,
    bytes: Bytes,
}

// BinaryHeap is a max-heap; reverse so the earliest due time pops first.
impl PartialEq for DelayedDatagram {
    fn eq(&self, other: &Self) -> bool {
        self.due_ms == other.due_ms
    }
}

impl Eq for DelayedDatagram {}

impl PartialOrd for DelayedDatagram {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedDatagram {
    fn cmp(&self, other: &Self) -> Ordering {
        other.due_ms.cmp(&self.due_ms)
    }
}

/// Channel ends the actor hands back to the public handle types.
pub(crate) struct ShellHandles {
    pub cmd_tx: mpsc::Sender<Command>,
    pub delivery_rx: mpsc::Receiver<Received>,
    pub events_rx: mpsc::UnboundedReceiver<Event>,
    pub events_active: Arc<AtomicBool>,
}

/// Spawn the actor task for a bound socket. `restrict_to` is set on the
/// client side: datagrams from any other address are discarded on ingress.
pub(crate) fn spawn(
    socket: UdpSocket,
    config: Config,
    restrict_to: Option<SocketAddr>,
) -> ShellHandles {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
    let (delivery_tx, delivery_rx) = mpsc::channel(DELIVERY_QUEUE);
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let events_active = Arc::new(AtomicBool::new(false));

    let shell = Shell {
        socket,
        clock: Clock::new(),
        restrict_to,
        peers: PeerTable::new(),
        cmd_rx,
        delivery_tx,
        events: events_tx,
        events_active: Arc::clone(&events_active),
        loss_prob: config.loss_prob,
        jitter_ms: config.jitter_ms,
        drop_data_seqs: config.drop_data_seqs.iter().copied().collect(),
        delayed: BinaryHeap::new(),
        config,
    };
    tokio::spawn(shell.run());

    ShellHandles {
        cmd_tx,
        delivery_rx,
        events_rx,
        events_active,
    }
}

struct Shell {
    socket: UdpSocket,
    clock: Clock,
    restrict_to: Option<SocketAddr>,
    peers: PeerTable,
    cmd_rx: mpsc::Receiver<Command>,
    delivery_tx: mpsc::Sender<Received>,
    events: mpsc::UnboundedSender<Event>,
    events_active: Arc<AtomicBool>,
    loss_prob: f64,
    jitter_ms: u64,
    drop_data_seqs: HashSet<u16>,
    delayed: BinaryHeap<DelayedDatagram>,
    config: Config,
}

/// Record an event, but only while somebody is listening. A free function so
/// handlers can call it while holding a mutable borrow of the peer table.
fn emit(events: &mpsc::UnboundedSender<Event>, active: &AtomicBool, event: Event) {
    if active.load(AtomicOrdering::Relaxed) {
        let _ = events.send(event);
    }
}

/// Admit as many suspended sends as freed window slots allow. Waiters whose
/// caller has gone away are discarded without consuming a slot.
fn admit_waiters(
    peer: &mut Peer,
    now_ms: u64,
    out: &mut Vec<(Packet, oneshot::Sender<Result<()>>)>,
) {
    while !peer.sender.window_full() {
        let Some(waiter) = peer.waiters.pop_front() else {
            break;
        };
        if waiter.done.is_closed() {
            tracing::trace!("blocked send abandoned by caller; slot not consumed");
            continue;
        }
        let seq = peer.sender.transmit(waiter.payload.clone(), now_ms);
        out.push((
            Packet::data(Channel::Reliable, seq, now_ms as u32, waiter.payload),
            waiter.done,
        ));
    }
}

impl Shell {
    async fn run(mut self) {
        let mut gap_scan = time::interval(GAP_SCAN_INTERVAL);
        gap_scan.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let retx_at = self.next_retx_deadline();
            let delayed_at = self.delayed.peek().map(|d| d.due_ms);

            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Send { to, payload, reliable, done }) => {
                        self.handle_send(to, payload, reliable, done).await;
                    }
                    Some(Command::SetFaults { loss_prob, jitter_ms }) => {
                        self.loss_prob = loss_prob;
                        self.jitter_ms = jitter_ms;
                    }
                    Some(Command::Close { done }) => {
                        self.shutdown(Some(done));
                        return;
                    }
                    None => {
                        self.shutdown(None);
                        return;
                    }
                },
                res = self.socket.recv_from(&mut buf) => match res {
                    Ok((len, from)) => self.handle_ingress(&buf[..len], from).await,
                    Err(err) => {
                        tracing::warn!(%err, "socket receive failed; retrying");
                        emit(&self.events, &self.events_active, Event::SocketError {
                            detail: err.to_string(),
                        });
                    }
                },
                _ = sleep_until_ms(&self.clock, retx_at.unwrap_or(0)), if retx_at.is_some() => {
                    self.handle_retx_due().await;
                }
                _ = sleep_until_ms(&self.clock, delayed_at.unwrap_or(0)), if delayed_at.is_some() => {
                    self.flush_delayed().await;
                }
                _ = gap_scan.tick() => self.handle_gap_scan().await,
            }
        }
    }

    /// Application send, either channel. Reliable sends that meet a full
    /// window are parked; their caller stays suspended on the completion.
    async fn handle_send(
        &mut self,
        to: SocketAddr,
        payload: Bytes,
        reliable: bool,
        done: oneshot::Sender<Result<()>>,
    ) {
        let now_ms = self.clock.now_ms();

        if !reliable {
            let seq = self
                .peers
                .get_or_insert(to, &self.config)
                .unreliable
                .allocate();
            emit(&self.events, &self.events_active, Event::TxData {
                peer: to,
                channel: Channel::Unreliable,
                seq,
                len: payload.len(),
            });
            self.egress(to, Packet::data(Channel::Unreliable, seq, now_ms as u32, payload))
                .await;
            let _ = done.send(Ok(()));
            return;
        }

        let seq = {
            let peer = self.peers.get_or_insert(to, &self.config);
            if peer.sender.window_full() {
                tracing::trace!(%to, "send window full; suspending sender");
                peer.waiters.push_back(Waiter { payload, done });
                return;
            }
            peer.sender.transmit(payload.clone(), now_ms)
        };

        emit(&self.events, &self.events_active, Event::TxData {
            peer: to,
            channel: Channel::Reliable,
            seq,
            len: payload.len(),
        });
        self.egress(to, Packet::data(Channel::Reliable, seq, now_ms as u32, payload))
            .await;
        let _ = done.send(Ok(()));
    }

    /// Decode and dispatch one inbound datagram.
    async fn handle_ingress(&mut self, data: &[u8], from: SocketAddr) {
        let packet = match Packet::decode(data) {
            Ok(packet) => packet,
            Err(err) => {
                tracing::debug!(%from, %err, "discarding malformed datagram");
                return;
            }
        };

        if let Some(remote) = self.restrict_to {
            if from != remote {
                tracing::debug!(%from, "discarding datagram from unexpected peer");
                return;
            }
        }

        let now_ms = self.clock.now_ms();

        if packet.is_ack() {
            if packet.channel != Channel::Reliable {
                tracing::debug!(%from, seq = packet.seq, "discarding ACK on unreliable channel");
                return;
            }
            self.handle_ack(from, packet.seq, now_ms).await;
            return;
        }

        emit(&self.events, &self.events_active, Event::RxData {
            peer: from,
            channel: packet.channel,
            seq: packet.seq,
            len: packet.payload.len(),
        });

        match packet.channel {
            Channel::Reliable => {
                // Every well-formed reliable arrival is acknowledged before
                // any delivery decision, duplicates and out-of-window
                // arrivals included.
                emit(&self.events, &self.events_active, Event::AckTx {
                    peer: from,
                    seq: packet.seq,
                });
                self.egress(from, Packet::ack(packet.seq, now_ms as u32)).await;

                let (rtt_ms, deliveries) = {
                    let peer = self.peers.get_or_insert(from, &self.config);
                    let deliveries =
                        peer.receiver
                            .on_data(packet.seq, packet.ts_ms, packet.payload, now_ms);
                    (peer.sender.rtt_ms(), deliveries)
                };
                for delivery in deliveries {
                    self.deliver(from, Channel::Reliable, rtt_ms, delivery).await;
                }
            }
            Channel::Unreliable => {
                self.peers.get_or_insert(from, &self.config);
                let delivery = Delivery {
                    seq: packet.seq,
                    ts_ms: packet.ts_ms,
                    payload: packet.payload,
                    in_order: false,
                    skipped: false,
                };
                self.deliver(from, Channel::Unreliable, None, delivery).await;
            }
        }
    }

    /// Retire an acknowledged sequence and admit suspended sends into the
    /// freed window slot.
    async fn handle_ack(&mut self, from: SocketAddr, seq: u16, now_ms: u64) {
        let mut admitted = Vec::new();
        {
            let peer = self.peers.get_or_insert(from, &self.config);
            match peer.sender.on_ack(seq, now_ms) {
                Some(rtt_ms) => {
                    emit(&self.events, &self.events_active, Event::AckRx {
                        peer: from,
                        seq,
                        rtt_ms,
                    });
                    admit_waiters(peer, now_ms, &mut admitted);
                }
                None => {
                    tracing::trace!(%from, seq, "ignoring late or duplicate ACK");
                }
            }
        }
        self.transmit_admitted(from, admitted).await;
    }

    /// Fire expired retransmission deadlines across all peers.
    async fn handle_retx_due(&mut self) {
        let now_ms = self.clock.now_ms();
        let mut wire = Vec::new();
        let mut admitted = Vec::new();

        for (&addr, peer) in self.peers.iter_mut() {
            let (retx, dropped) = peer.sender.poll_expired(now_ms);

            for r in retx {
                emit(&self.events, &self.events_active, Event::Retx {
                    peer: addr,
                    seq: r.seq,
                    count: r.tx_count,
                });
                let mut packet = Packet::data(Channel::Reliable, r.seq, now_ms as u32, r.payload);
                packet.flags = packet.flags.with(Flags::RETX);
                wire.push((addr, packet));
            }

            for d in dropped {
                tracing::debug!(
                    peer = %addr,
                    seq = d.seq,
                    tx_count = d.tx_count,
                    "dropping sequence after max retransmissions"
                );
                emit(&self.events, &self.events_active, Event::DropMaxRetx {
                    peer: addr,
                    seq: d.seq,
                    tx_count: d.tx_count,
                });
            }

            // Drops free window slots too.
            let mut batch = Vec::new();
            admit_waiters(peer, now_ms, &mut batch);
            if !batch.is_empty() {
                admitted.push((addr, batch));
            }
        }

        for (to, packet) in wire {
            self.egress(to, packet).await;
        }
        for (to, batch) in admitted {
            self.transmit_admitted(to, batch).await;
        }
    }

    /// Run the gap scanner over every peer's receiver.
    async fn handle_gap_scan(&mut self) {
        let now_ms = self.clock.now_ms();
        let mut skips = Vec::new();

        for (&addr, peer) in self.peers.iter_mut() {
            if let Some(skip) = peer.receiver.poll_gap(now_ms) {
                skips.push((addr, peer.sender.rtt_ms(), skip));
            }
        }

        for (addr, rtt_ms, skip) in skips {
            tracing::debug!(
                peer = %addr,
                from_seq = skip.from_seq,
                to_seq = skip.to_seq,
                waited_ms = skip.waited_ms,
                "skipping gap in reliable stream"
            );
            emit(&self.events, &self.events_active, Event::SkipGap {
                peer: addr,
                from_seq: skip.from_seq,
                to_seq: skip.to_seq,
                waited_ms: skip.waited_ms,
            });
            for delivery in skip.deliveries {
                self.deliver(addr, Channel::Reliable, rtt_ms, delivery).await;
            }
        }
    }

    async fn transmit_admitted(
        &mut self,
        to: SocketAddr,
        admitted: Vec<(Packet, oneshot::Sender<Result<()>>)>,
    ) {
        for (packet, done) in admitted {
            emit(&self.events, &self.events_active, Event::TxData {
                peer: to,
                channel: Channel::Reliable,
                seq: packet.seq,
                len: packet.payload.len(),
            });
            self.egress(to, packet).await;
            let _ = done.send(Ok(()));
        }
    }

    /// Hand one payload to the application and note it on the event stream.
    async fn deliver(
        &self,
        peer: SocketAddr,
        channel: Channel,
        rtt_ms: Option<u64>,
        delivery: Delivery,
    ) {
        emit(&self.events, &self.events_active, Event::Deliver {
            peer,
            channel,
            seq: delivery.seq,
            in_order: delivery.in_order,
            skipped: delivery.skipped,
        });
        let received = Received {
            peer,
            channel,
            seq: delivery.seq,
            ts_ms: delivery.ts_ms,
            rtt_ms,
            payload: delivery.payload,
            in_order: delivery.in_order,
            skipped: delivery.skipped,
        };
        // A closed receiver means the application handle is gone; the actor
        // notices via the command channel and shuts down on its own.
        let _ = self.delivery_tx.send(received).await;
    }

    /// Single egress point: fault hooks first, then the socket write.
    async fn egress(&mut self, to: SocketAddr, packet: Packet) {
        if self.should_drop(&packet) {
            tracing::trace!(%to, seq = packet.seq, "fault injection dropped egress datagram");
            return;
        }
        let bytes = packet.encode();
        if self.jitter_ms > 0 {
            let delay = rand::rng().random_range(0..=self.jitter_ms);
            if delay > 0 {
                self.delayed.push(DelayedDatagram {
                    due_ms: self.clock.now_ms() + delay,
                    to,
                    bytes,
                });
                return;
            }
        }
        self.send_now(to, bytes).await;
    }

    fn should_drop(&self, packet: &Packet) -> bool {
        if packet.channel == Channel::Reliable
            && !packet.is_ack()
            && self.drop_data_seqs.contains(&packet.seq)
        {
            return true;
        }
        self.loss_prob > 0.0 && rand::rng().random_bool(self.loss_prob)
    }

    async fn send_now(&self, to: SocketAddr, bytes: Bytes) {
        if let Err(err) = self.socket.send_to(&bytes, to).await {
            tracing::warn!(%to, %err, "egress send failed; datagram dropped");
            emit(&self.events, &self.events_active, Event::SocketError {
                detail: err.to_string(),
            });
        }
    }

    /// Release jittered datagrams whose delay has elapsed.
    async fn flush_delayed(&mut self) {
        let now_ms = self.clock.now_ms();
        while let Some(top) = self.delayed.peek() {
            if top.due_ms > now_ms {
                break;
            }
            let datagram = self.delayed.pop().unwrap();
            self.send_now(datagram.to, datagram.bytes).await;
        }
    }

    /// Fail every suspended or queued send with `Closed` and stop. Dropping
    /// the shell afterwards closes the socket and discards all scheduled
    /// retransmissions.
    fn shutdown(&mut self, done: Option<oneshot::Sender<()>>) {
        let mut waiters: Vec<Waiter> = Vec::new();
        for (_, mut peer) in self.peers.drain() {
            waiters.extend(peer.waiters.drain(..));
        }
        for waiter in waiters {
            let _ = waiter.done.send(Err(HudpError::Closed));
        }

        self.cmd_rx.close();
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            match cmd {
                Command::Send { done, .. } => {
                    let _ = done.send(Err(HudpError::Closed));
                }
                Command::Close { done } => {
                    let _ = done.send(());
                }
                Command::SetFaults { .. } => {}
            }
        }

        if let Some(done) = done {
            let _ = done.send(());
        }
    }

    /// Earliest retransmission deadline across all peers.
    fn next_retx_deadline(&mut self) -> Option<u64> {
        let mut next: Option<u64> = None;
        for (_, peer) in self.peers.iter_mut() {
            if let Some(at) = peer.sender.next_deadline_ms() {
                next = Some(match next {
                    Some(current) => current.min(at),
                    None => at,
                });
            }
        }
        next
    }
}

async fn sleep_until_ms(clock: &Clock, ms: u64) {
    time::sleep_until(time::Instant::from_std(clock.instant_at(ms))).await
}
