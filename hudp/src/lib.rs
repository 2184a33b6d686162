//! H-UDP: a hybrid datagram transport multiplexing two delivery services
//! over a single UDP socket per endpoint.
//!
//! The **unreliable** channel forwards datagrams best-effort, with no
//! ordering and no acknowledgements. The **reliable** channel provides
//! in-order, at-most-once delivery via Selective Repeat ARQ: per-packet
//! acknowledgements and retransmission timers, a sliding send window with
//! suspending back-pressure, a reordering receive buffer, and a bounded
//! gap-skip policy that trades completeness for bounded delivery latency:
//! a sequence that stays missing too long is skipped, never silently lost.
//!
//! ```no_run
//! use bytes::Bytes;
//! use hudp::{Client, Config, Server};
//!
//! # async fn example() -> hudp::Result<()> {
//! let mut server = Server::bind("127.0.0.1:4433".parse().unwrap(), Config::default()).await?;
//! let client = Client::connect(server.local_addr(), Config::default()).await?;
//!
//! client.send(Bytes::from_static(b"ordered"), true).await?;
//! client.send(Bytes::from_static(b"fire-and-forget"), false).await?;
//!
//! while let Some(received) = server.recv().await {
//!     println!("{:?} #{}: {:?}", received.channel, received.seq, received.payload);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The delivery queue is bounded: a consumer that stops calling `recv`
//! eventually back-pressures the transport's scheduler, so drain it from a
//! dedicated task in long-running programs.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod packet;
pub mod rtt;
pub mod seq;

mod peer;
mod shell;
mod transport;

pub use config::Config;
pub use error::{HudpError, Result};
pub use event::{Event, Received};
pub use packet::{Channel, Flags, Packet, HEADER_LEN};
pub use transport::{Client, ClientHandle, EventStream, Server, ServerHandle};
