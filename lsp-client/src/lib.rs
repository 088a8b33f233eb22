//! `lsp-client`: client side of LSP, a reliable, ordered, connection-oriented
//! message protocol over UDP.
//!
//! # Architecture
//!
//! ```text
//!   Application
//!       │ connect / read / write / close / join
//!  ┌────▼──────┐   write, close    ┌──────────────────────────┐
//!  │  Client   │ ────────────────▶ │       engine task        │
//!  │ (facade)  │ ◀──────────────── │  Engine (state machine)  │
//!  └───────────┘  read, handshake  │   ├── SendWindow         │
//!                                  │   └── RecvWindow         │
//!  ┌───────────────┐   epoch ticks │                          │
//!  │  epoch timer  │ ────────────▶ │                          │
//!  └───────────────┘               │                          │
//!  ┌───────────────┐   inbound     │                          │
//!  │ receiver task │ ────────────▶ │                          │
//!  └───────▲───────┘               └────────────┬─────────────┘
//!          │ datagrams                          │ datagrams
//!  ┌───────┴────────────────────────────────────▼─────────────┐
//!  │                  Transport (UDP socket)                   │
//!  └───────────────────────────────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`message`]: wire format (serialise / deserialise)
//! - [`transport`]: address resolution and async UDP I/O
//! - [`params`]: window size, epoch length, epoch limit
//! - [`state`]: connection lifecycle states
//! - [`send_window`]: sequence assignment, admission, unacked Data
//! - [`recv_window`]: in-order acceptance, recent Acks
//! - [`engine`]: the I/O-free protocol state machine
//! - [`driver`]: the engine task multiplexing all input queues
//! - [`receiver`]: the receiver task
//! - [`timer`]: the epoch timer task
//! - [`client`]: the public [`Client`] handle
//! - [`error`]: user-visible errors

pub mod client;
pub mod driver;
pub mod engine;
pub mod error;
pub mod message;
pub mod params;
pub mod receiver;
pub mod recv_window;
pub mod send_window;
pub mod state;
pub mod timer;
pub mod transport;

pub use client::Client;
pub use error::LspError;
pub use message::{Message, MsgKind};
pub use params::Params;
pub use state::ConnectionStatus;
