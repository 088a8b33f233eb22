//! The engine task.
//!
//! ```text
//!   receiver task ──Inbound──┐
//!   Client::write ──payload──┤     ┌────────┐   Transmit   ┌───────────┐
//!   epoch timer ────Tick─────┼──▶  │ Engine │ ───────────▶ │ Transport │
//!   Client::close ──()───────┘     └───┬────┘              └───────────┘
//!                                      │ Deliver / Connected / Failed
//!                                      ▼
//!                          read queue, handshake waiter
//! ```
//!
//! [`run`] is the only place the [`Engine`] lives, so protocol state is
//! never shared. It waits on whichever input queue is ready first,
//! hands the event to the engine, and carries out the returned outputs.
//! When the engine finishes (clean close or failure) it publishes the final
//! status and tells the receiver and timer tasks to stop.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot, watch};

use crate::engine::{Engine, Output};
use crate::error::LspError;
use crate::receiver::Inbound;
use crate::state::ConnectionStatus;
use crate::timer::Tick;
use crate::transport::Transport;

/// Everything the engine task consumes.
pub struct Queues {
    pub inbound_rx: mpsc::Receiver<Inbound>,
    pub write_rx: mpsc::Receiver<Vec<u8>>,
    pub epoch_rx: mpsc::Receiver<Tick>,
    /// A message or a dropped sender both mean "close".
    pub close_rx: mpsc::Receiver<()>,
}

/// Everything the engine task produces besides datagrams.
pub struct Sinks {
    pub read_tx: mpsc::UnboundedSender<Result<Vec<u8>, LspError>>,
    pub handshake_tx: Option<oneshot::Sender<Result<u32, LspError>>>,
    pub status_tx: watch::Sender<ConnectionStatus>,
    pub stop_tx: watch::Sender<bool>,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Finished,
}

/// Drive `engine` until the connection closes or fails.
///
/// A failure is reported to the handshake waiter if the handshake is still
/// pending, otherwise as the next item of the read queue; it is also
/// returned so [`crate::client::Client::join`] can observe it.
pub async fn run(
    mut engine: Engine,
    transport: Arc<Transport>,
    mut queues: Queues,
    mut sinks: Sinks,
) -> Result<(), LspError> {
    let mut flow = apply(&transport, &mut sinks, engine.start()).await;
    let mut close_requested = false;
    let mut writes_open = true;

    while matches!(flow, Ok(Flow::Continue)) {
        let outputs = tokio::select! {
            biased;

            _ = queues.close_rx.recv(), if !close_requested => {
                close_requested = true;
                // Payloads already queued are still delivered to the engine.
                queues.write_rx.close();
                engine.on_close()
            }

            event = queues.inbound_rx.recv() => match event {
                Some(Inbound::Message(msg)) => engine.on_message(msg),
                Some(Inbound::Failed(e)) => {
                    flow = Err(e.into());
                    break;
                }
                None => {
                    flow = Err(LspError::Closed);
                    break;
                }
            },

            write = queues.write_rx.recv(),
                if writes_open && engine.parked_len() < engine.window_size() =>
            {
                match write {
                    Some(payload) => engine.on_write(payload),
                    None => {
                        writes_open = false;
                        engine.on_writes_exhausted()
                    }
                }
            }

            Some(Tick) = queues.epoch_rx.recv() => engine.on_epoch(),
        };

        flow = apply(&transport, &mut sinks, outputs).await;
        sinks.status_tx.send_replace(engine.status());
    }

    let result = match flow {
        Ok(_) => {
            info!("[lsp:engine] conn {} closed", engine.conn_id());
            sinks.status_tx.send_replace(ConnectionStatus::Closed);
            Ok(())
        }
        Err(e) => {
            warn!("[lsp:engine] conn {} failed: {e}", engine.conn_id());
            sinks.status_tx.send_replace(ConnectionStatus::Failed);
            match sinks.handshake_tx.take() {
                Some(tx) => {
                    let _ = tx.send(Err(e.clone()));
                }
                None => {
                    let _ = sinks.read_tx.send(Err(e.clone()));
                }
            }
            Err(e)
        }
    };

    sinks.stop_tx.send_replace(true);
    result
}

/// Carry out `outputs` in order.
///
/// Stops at the first fatal condition. Transient send errors count as a
/// lost datagram; the next epoch retransmits it.
async fn apply(
    transport: &Transport,
    sinks: &mut Sinks,
    outputs: Vec<Output>,
) -> Result<Flow, LspError> {
    let mut flow = Flow::Continue;
    for output in outputs {
        match output {
            Output::Transmit(msg) => match transport.send(&msg).await {
                Ok(()) => {}
                Err(e) if e.is_transient() => debug!("[lsp:engine] {msg} lost on send: {e}"),
                Err(e) => return Err(e.into()),
            },
            Output::Deliver(payload) => {
                // The application may have stopped reading; the data was acked anyway.
                let _ = sinks.read_tx.send(Ok(payload));
            }
            Output::Connected(conn_id) => {
                if let Some(tx) = sinks.handshake_tx.take() {
                    let _ = tx.send(Ok(conn_id));
                }
            }
            Output::Failed(failure) => return Err(failure.into()),
            Output::Closed => flow = Flow::Finished,
        }
    }
    Ok(flow)
}
