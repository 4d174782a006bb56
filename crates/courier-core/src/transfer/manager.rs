//! Registry of incoming transfers
//!
//! The messaging layer hands every accepted offer to the manager, which binds
//! it to a new [`IncomingTransfer`] sharing the manager's selector, sink
//! opener and configuration, and keeps it addressable by stream id until it
//! is removed or pruned.

use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::negotiator::NegotiatorSelector;
use crate::request::TransferRequest;
use crate::transfer::incoming::IncomingTransfer;
use courier_files::{FsSinkOpener, SinkOpener};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

/// Creates and tracks incoming transfers
///
/// Thread-safe; transfers may be created and looked up from any task.
pub struct IncomingTransferManager {
    /// Live transfers (stream_id -> transfer)
    transfers: Arc<DashMap<String, Arc<IncomingTransfer>>>,
    selector: Arc<dyn NegotiatorSelector>,
    sink_opener: Arc<dyn SinkOpener>,
    config: TransferConfig,
}

impl IncomingTransferManager {
    /// Create a manager
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidConfig`] if `config` does not validate.
    pub fn new(selector: Arc<dyn NegotiatorSelector>, config: TransferConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transfers: Arc::new(DashMap::new()),
            selector,
            sink_opener: Arc::new(FsSinkOpener),
            config,
        })
    }

    /// Replace the sink opener handed to new transfers
    #[must_use]
    pub fn with_sink_opener(mut self, sink_opener: Arc<dyn SinkOpener>) -> Self {
        self.sink_opener = sink_opener;
        self
    }

    /// Create a transfer for an inbound offer
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::DuplicateStream`] if a transfer with the same
    /// stream id is still registered.
    pub fn create_incoming(&self, request: TransferRequest) -> Result<Arc<IncomingTransfer>> {
        match self.transfers.entry(request.stream_id().to_string()) {
            Entry::Occupied(entry) => Err(TransferError::DuplicateStream(entry.key().clone())),
            Entry::Vacant(entry) => {
                tracing::debug!(
                    "Registered incoming transfer {} from {} ({}, {} bytes)",
                    request.stream_id(),
                    request.requestor(),
                    request.file_name(),
                    request.file_size()
                );

                let transfer = Arc::new(
                    IncomingTransfer::new(Arc::new(request), Arc::clone(&self.selector))
                        .with_sink_opener(Arc::clone(&self.sink_opener))
                        .with_config(self.config.clone()),
                );
                entry.insert(Arc::clone(&transfer));
                Ok(transfer)
            }
        }
    }

    /// Get a transfer by stream id
    pub fn get(&self, stream_id: &str) -> Option<Arc<IncomingTransfer>> {
        self.transfers.get(stream_id).map(|e| Arc::clone(&e))
    }

    /// List registered stream ids
    pub fn active_transfers(&self) -> Vec<String> {
        self.transfers.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Get number of registered transfers
    pub fn transfer_count(&self) -> usize {
        self.transfers.len()
    }

    /// Remove a transfer, whatever its status
    pub fn remove(&self, stream_id: &str) -> Option<Arc<IncomingTransfer>> {
        self.transfers.remove(stream_id).map(|(_, transfer)| transfer)
    }

    /// Drop every transfer that reached a terminal status; returns how many
    ///
    /// Transfers consumed through [`IncomingTransfer::receive_stream`] never
    /// reach a terminal status on their own: they stop at `Negotiated`, or
    /// wherever negotiation failed. Remove those with [`remove`](Self::remove)
    /// once the caller is done with the stream.
    pub fn prune_finished(&self) -> usize {
        let before = self.transfers.len();
        self.transfers.retain(|_, transfer| !transfer.is_done());
        let pruned = before.saturating_sub(self.transfers.len());
        if pruned > 0 {
            tracing::debug!("Pruned {} finished transfers", pruned);
        }
        pruned
    }
}
