//! Transfer configuration

use crate::error::{Result, TransferError};
use courier_files::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
use std::time::Duration;

/// Per-transfer configuration
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Copy buffer size; progress is updated once per buffer
    pub buffer_size: usize,

    /// Status polling interval used by `wait()` when no task handle is held
    pub poll_interval: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_CHUNK_SIZE,
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl TransferConfig {
    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidConfig`] if a value is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 || self.buffer_size > MAX_CHUNK_SIZE {
            return Err(TransferError::invalid_config(
                "buffer size must be between 1 byte and 16 MiB",
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(TransferError::invalid_config(
                "poll interval must be non-zero",
            ));
        }

        Ok(())
    }
}
