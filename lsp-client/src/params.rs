//! Client configuration.

use std::time::Duration;

use crate::error::LspError;

pub const DEFAULT_WINDOW_SIZE: usize = 1;
pub const DEFAULT_EPOCH_MILLIS: u64 = 2000;
pub const DEFAULT_EPOCH_LIMIT: u32 = 5;

/// Tunables shared by the engine and the epoch timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Params {
    /// Maximum number of unacknowledged Data messages in flight.
    pub window_size: usize,
    /// Period of the epoch timer, in milliseconds.
    pub epoch_millis: u64,
    /// Epochs to retry the handshake, and silent epochs tolerated once
    /// connected, before giving up.
    pub epoch_limit: u32,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            epoch_millis: DEFAULT_EPOCH_MILLIS,
            epoch_limit: DEFAULT_EPOCH_LIMIT,
        }
    }
}

impl Params {
    pub fn epoch_duration(&self) -> Duration {
        Duration::from_millis(self.epoch_millis)
    }

    /// Reject values the protocol cannot run with.
    pub fn validate(&self) -> Result<(), LspError> {
        if self.window_size == 0 {
            return Err(LspError::InvalidParams("window_size must be at least 1"));
        }
        if self.epoch_millis == 0 {
            return Err(LspError::InvalidParams("epoch_millis must be at least 1"));
        }
        if self.epoch_limit == 0 {
            return Err(LspError::InvalidParams("epoch_limit must be at least 1"));
        }
        Ok(())
    }
}
