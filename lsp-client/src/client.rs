//! Application-facing API.
//!
//! A [`Client`] never touches protocol state. Every call either enqueues a
//! request for the engine task or dequeues a result it produced.
//!
//! ```ignore
//! let mut client = Client::connect("127.0.0.1:9999", Params::default()).await?;
//! client.write(b"hello").await?;
//! let reply = client.read().await?;
//! client.close()?;
//! client.join().await?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::info;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::driver::{self, Queues, Sinks};
use crate::engine::Engine;
use crate::error::LspError;
use crate::message::MAX_PAYLOAD;
use crate::params::Params;
use crate::receiver;
use crate::state::ConnectionStatus;
use crate::timer;
use crate::transport::Transport;

/// Capacity of the inbound and write queues.
const QUEUE_CAPACITY: usize = 64;

/// One LSP connection to a server.
///
/// Dropping a `Client` without calling [`close`](Self::close) is treated as
/// a close request: the engine task still drains outstanding writes in the
/// background.
pub struct Client {
    conn_id: u32,
    write_tx: mpsc::Sender<Vec<u8>>,
    read_rx: mpsc::UnboundedReceiver<Result<Vec<u8>, LspError>>,
    close_tx: mpsc::Sender<()>,
    close_requested: AtomicBool,
    status_rx: watch::Receiver<ConnectionStatus>,
    engine: JoinHandle<Result<(), LspError>>,
}

impl Client {
    /// Connect to the server at `hostport` (e.g. `"localhost:9999"`).
    ///
    /// Returns once the server acknowledged the connection request, or with
    /// [`LspError::HandshakeFailed`] after `params.epoch_limit` unanswered
    /// retransmissions of it.
    pub async fn connect(hostport: &str, params: Params) -> Result<Self, LspError> {
        params.validate()?;
        let peer = Transport::resolve(hostport).await?;
        let transport = Arc::new(Transport::open(peer).await?);
        info!("[lsp:client] {} connecting to {peer}", transport.local_addr);

        let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (write_tx, write_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (epoch_tx, epoch_rx) = mpsc::channel(1);
        let (close_tx, close_rx) = mpsc::channel(1);
        let (read_tx, read_rx) = mpsc::unbounded_channel();
        let (handshake_tx, handshake_rx) = oneshot::channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);
        let (stop_tx, stop_rx) = watch::channel(false);

        tokio::spawn(receiver::run(transport.clone(), inbound_tx, stop_rx.clone()));
        tokio::spawn(timer::run(params.epoch_duration(), epoch_tx, stop_rx));
        let engine = tokio::spawn(driver::run(
            Engine::new(params),
            transport,
            Queues {
                inbound_rx,
                write_rx,
                epoch_rx,
                close_rx,
            },
            Sinks {
                read_tx,
                handshake_tx: Some(handshake_tx),
                status_tx,
                stop_tx,
            },
        ));

        let conn_id = handshake_rx.await.map_err(|_| LspError::Closed)??;
        info!("[lsp:client] connected to {peer} as conn {conn_id}");

        Ok(Self {
            conn_id,
            write_tx,
            read_rx,
            close_tx,
            close_requested: AtomicBool::new(false),
            status_rx,
            engine,
        })
    }

    /// Connection id assigned by the server.
    pub fn conn_id(&self) -> u32 {
        self.conn_id
    }

    /// Latest lifecycle state published by the engine.
    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// Wait for the next in-order payload from the server.
    ///
    /// Payloads that arrived before a close are still returned; after that
    /// the call fails with [`LspError::Closed`], or with the error that
    /// brought the connection down.
    pub async fn read(&mut self) -> Result<Vec<u8>, LspError> {
        self.read_rx.recv().await.unwrap_or(Err(LspError::Closed))
    }

    /// Queue `payload` for transmission.
    ///
    /// Returns as soon as the engine's write queue accepted it; delivery and
    /// acknowledgement happen in the background.
    pub async fn write(&self, payload: &[u8]) -> Result<(), LspError> {
        if self.close_requested.load(Ordering::Acquire) {
            return Err(LspError::Closed);
        }
        if payload.len() > MAX_PAYLOAD {
            return Err(LspError::PayloadTooLarge(payload.len()));
        }
        self.write_tx
            .send(payload.to_vec())
            .await
            .map_err(|_| LspError::Closed)
    }

    /// Ask the engine to close once every queued write is acknowledged.
    ///
    /// Returns immediately; use [`join`](Self::join) to wait for the drain.
    pub fn close(&self) -> Result<(), LspError> {
        if !self.close_requested.swap(true, Ordering::AcqRel) {
            info!("[lsp:client] close requested for conn {}", self.conn_id);
            // Capacity 1 and sent once; a full or closed queue means the
            // engine already stopped.
            let _ = self.close_tx.try_send(());
        }
        Ok(())
    }

    /// Close (if not already requested) and wait until the engine has
    /// drained and stopped.
    ///
    /// Returns the error that ended the connection, if any.
    pub async fn join(self) -> Result<(), LspError> {
        self.close()?;
        self.engine.await.map_err(|_| LspError::Closed)?
    }
}
