//! Epoch timer task.
//!
//! Pushes one [`Tick`] into the engine's epoch queue every `period`. The
//! tick carries no data; the engine decides what an epoch means.

use std::time::Duration;

use log::debug;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};

/// One elapsed epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick;

/// Run until `stop` flips to `true` or the engine drops its epoch queue.
///
/// The first tick fires one full `period` after the task starts.
pub async fn run(period: Duration, epoch_tx: mpsc::Sender<Tick>, mut stop: watch::Receiver<bool>) {
    let mut interval = time::interval_at(Instant::now() + period, period);
    // A stalled engine should see one late epoch, not a burst.
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = interval.tick() => {
                if epoch_tx.send(Tick).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!("[lsp:epoch] stopped");
}
