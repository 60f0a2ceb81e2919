//! `minitcp` — a TCP-like reliable byte transport over an unreliable
//! datagram layer.
//!
//! # Architecture
//!
//! ```text
//!  unreliable network layer (Network trait)
//!       │ (src, dst, raw segment)
//!       ▼
//!  ┌──────────┐  demux by 4-tuple  ┌────────────┐
//!  │ Listener │───────────────────▶│ Connection │──▶ data callback
//!  │ (registry│   SYN → accept     │ (FSM, seq  │     (application)
//!  │  + keys) │                    │  counters) │
//!  └──────────┘                    └─────┬──────┘
//!                                        │ SendBuffer + retransmit timer
//!                                        ▼
//!                          outbound segments → network layer
//! ```
//!
//! Each module has a single responsibility:
//! - [`segment`]  — wire format (serialise / deserialise, checksum)
//! - [`listener`] — connection registry and inbound demultiplexing
//! - [`conn`]     — per-connection state machine and delivery engine
//! - [`state`]    — finite-state-machine types
//! - [`sendbuf`]  — retransmission queue of unacknowledged segments
//! - [`timer`]    — cancelable one-shot retransmit timer
//! - [`net`]      — unreliable-network seam + UDP-backed adapter
//! - [`sim`]      — in-memory and lossy network layers for testing
//!
//! The whole transport is single-threaded and callback-driven: the network
//! layer, the retransmit timers, and the application all run on one tokio
//! current-thread runtime inside a [`tokio::task::LocalSet`].  Connections
//! are cheap `Rc`-backed handles; there are no locks.
//!
//! # Example
//!
//! ```ignore
//! let net = UdpNet::bind("0.0.0.0:9000".parse()?).await?;
//! let listener = Listener::bind(net, 9000);
//! listener.register_accept_callback(|conn| {
//!     conn.register_data_callback(|conn, data| {
//!         // Bare ACKs deliver an empty slice too; echo data only.
//!         if !data.is_empty() {
//!             conn.send(data);
//!         }
//!     });
//! });
//! ```

pub mod conn;
pub mod listener;
pub mod net;
pub mod segment;
pub mod sendbuf;
pub mod sim;
pub mod state;
pub mod timer;

pub use conn::Connection;
pub use listener::{ConnKey, Listener};
pub use net::{Network, UdpNet};
pub use segment::{Segment, SegmentError, MSS};
pub use state::ConnectionState;
