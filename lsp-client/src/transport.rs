//! Async UDP transport.
//!
//! [`Transport`] is a thin wrapper around a *connected*
//! `tokio::net::UdpSocket` that speaks [`Message`] instead of raw bytes.
//! All protocol logic lives elsewhere; this module owns only address
//! resolution and datagram I/O.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::UdpSocket;

use crate::error::LspError;
use crate::message::{Message, MessageError};

/// Receive buffer size; holds any UDP datagram.
const RECV_BUFFER: usize = 65_535;

/// Errors that can arise from transport operations.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("socket I/O error: {0}")]
    Io(Arc<io::Error>),
    /// A datagram arrived that is not a valid message (or a message could
    /// not be encoded).
    #[error("malformed message: {0}")]
    Malformed(#[from] MessageError),
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl TransportError {
    /// `true` when the error only means a datagram was lost; retrying (or
    /// relying on the next epoch's retransmission) may succeed.
    ///
    /// On a connected UDP socket an ICMP port-unreachable surfaces as
    /// `ConnectionRefused` on the next call.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Io(e) => is_transient_io_error(e),
            TransportError::Malformed(_) => false,
        }
    }
}

fn is_transient_io_error(e: &io::Error) -> bool {
    use io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::TimedOut
            | ErrorKind::WouldBlock
            | ErrorKind::Interrupted
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
    )
}

/// A UDP socket connected to one server.
///
/// All methods take `&self` so the socket can be shared between the
/// receiver task (reads) and the engine task (writes).
#[derive(Debug)]
pub struct Transport {
    pub local_addr: SocketAddr,
    pub peer: SocketAddr,
    inner: UdpSocket,
}

impl Transport {
    /// Resolve `hostport` (e.g. `"localhost:9999"`) to its first address.
    pub async fn resolve(hostport: &str) -> Result<SocketAddr, LspError> {
        let mut addrs = tokio::net::lookup_host(hostport)
            .await
            .map_err(|e| LspError::Resolve {
                hostport: hostport.to_string(),
                reason: e.to_string(),
            })?;
        addrs.next().ok_or_else(|| LspError::Resolve {
            hostport: hostport.to_string(),
            reason: "no addresses found".into(),
        })
    }

    /// Bind an ephemeral local port of the right address family and connect
    /// it to `peer`.
    pub async fn open(peer: SocketAddr) -> Result<Self, TransportError> {
        let bind_addr: SocketAddr = if peer.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let inner = UdpSocket::bind(bind_addr).await?;
        inner.connect(peer).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self {
            local_addr,
            peer,
            inner,
        })
    }

    /// Encode `msg` and send it as a single datagram.
    pub async fn send(&self, msg: &Message) -> Result<(), TransportError> {
        let bytes = msg.encode()?;
        self.inner.send(&bytes).await?;
        Ok(())
    }

    /// Receive the next datagram and decode it.
    ///
    /// Datagrams that fail to decode come back as
    /// [`TransportError::Malformed`]; the caller decides whether to go on.
    pub async fn recv(&self) -> Result<Message, TransportError> {
        let mut buf = vec![0u8; RECV_BUFFER];
        let n = self.inner.recv(&mut buf).await?;
        Ok(Message::decode(&buf[..n])?)
    }
}
