//! Connection lifecycle states.
//!
//! ```text
//!  Connecting ──Ack(0)──▶ Connected ──close()──▶ Closing ──drained──▶ Closed
//!      │                      │                     │
//!      │ epoch limit          │ server silent       │ server silent
//!      ▼                      ▼                     ▼
//!   Failed                 Failed                Failed
//! ```
//!
//! A close requested while still connecting is remembered and takes
//! effect as soon as the handshake completes.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// Connect sent; waiting for the server's Ack with sequence number 0.
    #[default]
    Connecting,
    /// Handshake complete; data flows both ways.
    Connected,
    /// Close requested; pending writes and unacked Data are draining.
    Closing,
    /// Drain finished; all tasks stopped.
    Closed,
    /// Handshake never completed, the server went silent, or the socket failed.
    Failed,
}

impl ConnectionStatus {
    /// `true` once the engine will process no further events.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
