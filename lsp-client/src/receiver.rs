//! Receiver task.
//!
//! Reads datagrams from the [`Transport`], decodes them and forwards each
//! [`Message`] to the engine's inbound queue. Undecodable datagrams and
//! transient socket errors are logged and skipped; any other socket error
//! is forwarded as [`Inbound::Failed`] and ends the task.

use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::{mpsc, watch};

use crate::message::Message;
use crate::transport::{Transport, TransportError};

/// One event on the engine's inbound queue.
#[derive(Debug)]
pub enum Inbound {
    Message(Message),
    /// The socket can no longer be read.
    Failed(TransportError),
}

/// Run until `stop` flips to `true`, the engine drops its inbound queue,
/// or the socket fails.
pub async fn run(
    transport: Arc<Transport>,
    inbound_tx: mpsc::Sender<Inbound>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let result = tokio::select! {
            _ = stop.changed() => break,
            result = transport.recv() => result,
        };

        let event = match result {
            Ok(msg) => {
                debug!("[lsp:recv] ← {msg}");
                Inbound::Message(msg)
            }
            Err(TransportError::Malformed(e)) => {
                warn!("[lsp:recv] discarding datagram: {e}");
                continue;
            }
            Err(e) if e.is_transient() => {
                debug!("[lsp:recv] transient socket error: {e}");
                continue;
            }
            Err(e) => {
                warn!("[lsp:recv] socket failed: {e}");
                let _ = inbound_tx.send(Inbound::Failed(e)).await;
                break;
            }
        };

        if inbound_tx.send(event).await.is_err() {
            break;
        }
    }
    debug!("[lsp:recv] stopped");
}
