//! User-visible errors of the LSP client.

use thiserror::Error;

use crate::transport::TransportError;

/// Everything a [`crate::client::Client`] caller can observe going wrong.
///
/// Protocol irregularities (duplicate Acks, out-of-order Data, unknown
/// connection ids) are absorbed by the engine and never show up here.
#[derive(Debug, Clone, Error)]
pub enum LspError {
    #[error("invalid parameters: {0}")]
    InvalidParams(&'static str),

    #[error("could not resolve {hostport}: {reason}")]
    Resolve { hostport: String, reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No Ack for the connection request after every retry was spent.
    #[error("no connection ack after {attempts} connect retransmissions")]
    HandshakeFailed { attempts: u32 },

    /// The server stayed silent for `epochs` consecutive epochs.
    #[error("server silent for {epochs} epochs, connection lost")]
    ConnectionLost { epochs: u32 },

    #[error("payload of {0} bytes does not fit in one datagram")]
    PayloadTooLarge(usize),

    #[error("connection is closed")]
    Closed,
}
