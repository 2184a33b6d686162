//! Public transport handles.
//!
//! [`Client`] talks to exactly one remote endpoint; [`Server`] shares one
//! socket across every peer that contacts it. Both are thin fronts over the
//! actor task in `shell`: sends travel as commands with oneshot completions,
//! deliveries arrive on a bounded queue, and diagnostics on a takeable event
//! stream.
//!
//! A reliable `send` suspends while the send window is full. Dropping the
//! suspended future abandons the send without consuming a window slot;
//! `send_timeout` is the variant that turns that abandonment into an
//! observable [`HudpError::BackpressureCancelled`].

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;
use crate::error::{HudpError, Result};
use crate::event::{Event, Received};
use crate::shell::{self, Command};

/// Stream of diagnostic events, in scheduler order.
pub type EventStream = mpsc::UnboundedReceiver<Event>;

/// Bind a UDP socket with the configured OS buffer sizes and register it
/// with the tokio reactor.
fn bind_socket(bind: SocketAddr, config: &Config) -> Result<tokio::net::UdpSocket> {
    let socket = Socket::new(Domain::for_address(bind), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_recv_buffer_size(config.socket_rcvbuf)?;
    socket.set_send_buffer_size(config.socket_sndbuf)?;
    socket.set_nonblocking(true)?;
    socket.bind(&bind.into())?;
    let socket: std::net::UdpSocket = socket.into();
    Ok(tokio::net::UdpSocket::from_std(socket)?)
}

async fn send_via(
    cmd_tx: &mpsc::Sender<Command>,
    max_payload: usize,
    to: SocketAddr,
    payload: Bytes,
    reliable: bool,
) -> Result<()> {
    if payload.len() > max_payload {
        return Err(HudpError::PayloadTooLarge {
            size: payload.len(),
            max: max_payload,
        });
    }
    let (done_tx, done_rx) = oneshot::channel();
    cmd_tx
        .send(Command::Send {
            to,
            payload,
            reliable,
            done: done_tx,
        })
        .await
        .map_err(|_| HudpError::Closed)?;
    done_rx.await.map_err(|_| HudpError::Closed)?
}

async fn send_via_timeout(
    cmd_tx: &mpsc::Sender<Command>,
    max_payload: usize,
    to: SocketAddr,
    payload: Bytes,
    reliable: bool,
    timeout: Duration,
) -> Result<()> {
    match tokio::time::timeout(timeout, send_via(cmd_tx, max_payload, to, payload, reliable)).await
    {
        Ok(result) => result,
        Err(_) => Err(HudpError::BackpressureCancelled),
    }
}

async fn close_via(cmd_tx: &mpsc::Sender<Command>) -> Result<()> {
    let (done_tx, done_rx) = oneshot::channel();
    cmd_tx
        .send(Command::Close { done: done_tx })
        .await
        .map_err(|_| HudpError::Closed)?;
    let _ = done_rx.await;
    Ok(())
}

async fn set_faults_via(
    cmd_tx: &mpsc::Sender<Command>,
    loss_prob: f64,
    jitter_ms: u64,
) -> Result<()> {
    if !(0.0..=1.0).contains(&loss_prob) {
        return Err(HudpError::InvalidLossProbability(loss_prob));
    }
    cmd_tx
        .send(Command::SetFaults {
            loss_prob,
            jitter_ms,
        })
        .await
        .map_err(|_| HudpError::Closed)
}

/// Cloneable sending half of a [`Client`], for issuing sends from several
/// tasks at once.
#[derive(Clone)]
pub struct ClientHandle {
    cmd_tx: mpsc::Sender<Command>,
    max_payload: usize,
    remote: SocketAddr,
}

impl ClientHandle {
    /// Send one payload to the server. Reliable sends suspend while the send
    /// window is full and resolve once the datagram is handed to the socket,
    /// not once it is acknowledged.
    pub async fn send(&self, payload: Bytes, reliable: bool) -> Result<()> {
        send_via(&self.cmd_tx, self.max_payload, self.remote, payload, reliable).await
    }

    /// Like [`send`](Self::send), but gives up on back-pressure after
    /// `timeout` with [`HudpError::BackpressureCancelled`]. The abandoned
    /// send never consumes a window slot and is never transmitted.
    pub async fn send_timeout(
        &self,
        payload: Bytes,
        reliable: bool,
        timeout: Duration,
    ) -> Result<()> {
        send_via_timeout(
            &self.cmd_tx,
            self.max_payload,
            self.remote,
            payload,
            reliable,
            timeout,
        )
        .await
    }
}

/// Cloneable sending half of a [`Server`].
#[derive(Clone)]
pub struct ServerHandle {
    cmd_tx: mpsc::Sender<Command>,
    max_payload: usize,
}

impl ServerHandle {
    /// Send one payload to `to`. Sending to an address the server has not
    /// heard from yet creates its peer state on the spot.
    pub async fn send_to(&self, to: SocketAddr, payload: Bytes, reliable: bool) -> Result<()> {
        send_via(&self.cmd_tx, self.max_payload, to, payload, reliable).await
    }

    /// Like [`send_to`](Self::send_to) with a bound on the back-pressure
    /// suspension.
    pub async fn send_to_timeout(
        &self,
        to: SocketAddr,
        payload: Bytes,
        reliable: bool,
        timeout: Duration,
    ) -> Result<()> {
        send_via_timeout(&self.cmd_tx, self.max_payload, to, payload, reliable, timeout).await
    }
}

/// Client endpoint: one socket, one remote peer.
pub struct Client {
    handle: ClientHandle,
    delivery_rx: mpsc::Receiver<Received>,
    events_rx: Mutex<Option<EventStream>>,
    events_active: Arc<AtomicBool>,
    local_addr: SocketAddr,
}

impl Client {
    /// Bind an ephemeral local socket and address all traffic to `remote`.
    /// Datagrams arriving from any other address are discarded.
    pub async fn connect(remote: SocketAddr, config: Config) -> Result<Client> {
        config.validate()?;
        let bind = match remote {
            SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        let socket = bind_socket(bind, &config)?;
        let local_addr = socket.local_addr()?;
        let max_payload = config.max_payload();
        let handles = shell::spawn(socket, config, Some(remote));

        Ok(Client {
            handle: ClientHandle {
                cmd_tx: handles.cmd_tx,
                max_payload,
                remote,
            },
            delivery_rx: handles.delivery_rx,
            events_rx: Mutex::new(Some(handles.events_rx)),
            events_active: handles.events_active,
            local_addr,
        })
    }

    /// See [`ClientHandle::send`].
    pub async fn send(&self, payload: Bytes, reliable: bool) -> Result<()> {
        self.handle.send(payload, reliable).await
    }

    /// See [`ClientHandle::send_timeout`].
    pub async fn send_timeout(
        &self,
        payload: Bytes,
        reliable: bool,
        timeout: Duration,
    ) -> Result<()> {
        self.handle.send_timeout(payload, reliable, timeout).await
    }

    /// Next delivered payload, in scheduler order across both channels.
    /// Returns `None` once the transport has shut down.
    pub async fn recv(&mut self) -> Option<Received> {
        self.delivery_rx.recv().await
    }

    /// A cloneable sending handle for use from other tasks.
    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }

    /// Take the diagnostic event stream. Events are only recorded from this
    /// point on, and the stream can be taken once.
    pub fn events(&self) -> Option<EventStream> {
        let stream = self.events_rx.lock().take();
        if stream.is_some() {
            self.events_active.store(true, Ordering::Relaxed);
        }
        stream
    }

    /// Adjust the egress fault-injection hooks at runtime. Testing aid.
    pub async fn set_link_faults(&self, loss_prob: f64, jitter_ms: u64) -> Result<()> {
        set_faults_via(&self.handle.cmd_tx, loss_prob, jitter_ms).await
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.handle.remote
    }

    /// Shut the transport down: fail suspended sends with
    /// [`HudpError::Closed`], drop all scheduled retransmissions and close
    /// the socket.
    pub async fn close(&self) -> Result<()> {
        close_via(&self.handle.cmd_tx).await
    }
}

/// Server endpoint: one socket shared by every peer that contacts it.
pub struct Server {
    handle: ServerHandle,
    delivery_rx: mpsc::Receiver<Received>,
    events_rx: Mutex<Option<EventStream>>,
    events_active: Arc<AtomicBool>,
    local_addr: SocketAddr,
}

impl Server {
    /// Bind the shared socket. Peer state is created lazily on first
    /// contact and lives until the transport closes.
    pub async fn bind(local: SocketAddr, config: Config) -> Result<Server> {
        config.validate()?;
        let socket = bind_socket(local, &config)?;
        let local_addr = socket.local_addr()?;
        let max_payload = config.max_payload();
        let handles = shell::spawn(socket, config, None);

        Ok(Server {
            handle: ServerHandle {
                cmd_tx: handles.cmd_tx,
                max_payload,
            },
            delivery_rx: handles.delivery_rx,
            events_rx: Mutex::new(Some(handles.events_rx)),
            events_active: handles.events_active,
            local_addr,
        })
    }

    /// See [`ServerHandle::send_to`].
    pub async fn send_to(&self, to: SocketAddr, payload: Bytes, reliable: bool) -> Result<()> {
        self.handle.send_to(to, payload, reliable).await
    }

    /// See [`ServerHandle::send_to_timeout`].
    pub async fn send_to_timeout(
        &self,
        to: SocketAddr,
        payload: Bytes,
        reliable: bool,
        timeout: Duration,
    ) -> Result<()> {
        self.handle
            .send_to_timeout(to, payload, reliable, timeout)
            .await
    }

    /// Next delivered payload from any peer. Returns `None` once the
    /// transport has shut down.
    pub async fn recv(&mut self) -> Option<Received> {
        self.delivery_rx.recv().await
    }

    /// A cloneable sending handle for use from other tasks.
    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Take the diagnostic event stream. Can be taken once.
    pub fn events(&self) -> Option<EventStream> {
        let stream = self.events_rx.lock().take();
        if stream.is_some() {
            self.events_active.store(true, Ordering::Relaxed);
        }
        stream
    }

    /// Adjust the egress fault-injection hooks at runtime. Testing aid.
    pub async fn set_link_faults(&self, loss_prob: f64, jitter_ms: u64) -> Result<()> {
        set_faults_via(&self.handle.cmd_tx, loss_prob, jitter_ms).await
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shut the transport down.
    pub async fn close(&self) -> Result<()> {
        close_via(&self.handle.cmd_tx).await
    }
}
