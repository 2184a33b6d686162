//! Per-peer engine state and the peer table.
//!
//! Every remote endpoint gets an independent sender/receiver engine pair and
//! unreliable counter; sequence spaces never collide across peers. Entries
//! appear on first traffic in either direction and live until shutdown.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::config::Config;
use crate::engine::receiver::ReliableReceiver;
use crate::engine::sender::ReliableSender;
use crate::engine::unreliable::UnreliableChannel;
use crate::error::Result;

/// A reliable send suspended on a full window. The completion side is
/// dropped if the caller gives up waiting; such entries are discarded when
/// their turn comes, without consuming a window slot.
pub(crate) struct Waiter {
    pub payload: Bytes,
    pub done: oneshot::Sender<Result<()>>,
}

/// Engine bundle for one remote endpoint.
pub(crate) struct Peer {
    pub sender: ReliableSender,
    pub receiver: ReliableReceiver,
    pub unreliable: UnreliableChannel,
    /// Reliable sends blocked on the send window, oldest first.
    pub waiters: VecDeque<Waiter>,
}

impl Peer {
    pub fn new(config: &Config) -> Self {
        Self {
            sender: ReliableSender::new(
                config.send_window_size,
                config.retx_timeout_ms,
                config.max_retx,
                config.initial_seq,
            ),
            receiver: ReliableReceiver::new(
                config.recv_window_size as u16,
                config.gap_skip_timeout_ms,
                config.initial_seq,
            ),
            unreliable: UnreliableChannel::new(),
            waiters: VecDeque::new(),
        }
    }
}

/// Lazily-populated map from remote address to peer state. The client keeps
/// exactly one entry; the server grows one per distinct remote address.
#[derive(Default)]
pub(crate) struct PeerTable {
    peers: HashMap<SocketAddr, Peer>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_insert(&mut self, addr: SocketAddr, config: &Config) -> &mut Peer {
        self.peers.entry(addr).or_insert_with(|| Peer::new(config))
    }

    pub fn get_mut(&mut self, addr: &SocketAddr) -> Option<&mut Peer> {
        self.peers.get_mut(addr)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&SocketAddr, &mut Peer)> {
        self.peers.iter_mut()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (SocketAddr, Peer)> + '_ {
        self.peers.drain()
    }
}
