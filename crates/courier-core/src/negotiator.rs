//! Stream negotiation seams.
//!
//! The stream-method handshakes themselves (direct socket, relayed, in-band)
//! live outside this crate. The transfer core only sees two capabilities:
//! a [`NegotiatorSelector`] that picks a method for a request, and the chosen
//! [`StreamNegotiator`] that turns the offer into a readable stream.

use crate::error::NegotiationError;
use crate::request::{StreamOffer, TransferRequest};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::AsyncRead;

/// Readable stream positioned at the start of the file data
pub type IncomingStream = Box<dyn AsyncRead + Send + Unpin>;

/// Performs the handshake of one stream method.
#[async_trait]
pub trait StreamNegotiator: Send + Sync {
    /// Namespace identifying the stream method
    fn namespace(&self) -> &str;

    /// Run the incoming side of the handshake for `offer`.
    ///
    /// May block on network I/O for as long as the method's own timeout
    /// policy allows.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError`] if the stream cannot be established.
    async fn negotiate_incoming(
        &self,
        offer: &StreamOffer,
    ) -> Result<IncomingStream, NegotiationError>;
}

/// Chooses the stream negotiator for a request.
#[async_trait]
pub trait NegotiatorSelector: Send + Sync {
    /// Pick a negotiator compatible with `request`.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError`] if no method can be agreed on.
    async fn select_negotiator(
        &self,
        request: &TransferRequest,
    ) -> Result<Arc<dyn StreamNegotiator>, NegotiationError>;
}

/// Selector that picks the first locally preferred method the peer offered
///
/// Negotiators are tried in registration order, so register the fastest
/// method first.
#[derive(Default)]
pub struct PreferenceSelector {
    negotiators: Vec<Arc<dyn StreamNegotiator>>,
}

impl PreferenceSelector {
    /// Create an empty selector
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a negotiator at the lowest preference
    #[must_use]
    pub fn with(mut self, negotiator: Arc<dyn StreamNegotiator>) -> Self {
        self.negotiators.push(negotiator);
        self
    }

    /// Registered namespaces in preference order
    #[must_use]
    pub fn namespaces(&self) -> Vec<&str> {
        self.negotiators.iter().map(|n| n.namespace()).collect()
    }
}

#[async_trait]
impl NegotiatorSelector for PreferenceSelector {
    async fn select_negotiator(
        &self,
        request: &TransferRequest,
    ) -> Result<Arc<dyn StreamNegotiator>, NegotiationError> {
        let offer = request.offer();
        let chosen = self
            .negotiators
            .iter()
            .find(|n| offer.offers(n.namespace()))
            .ok_or(NegotiationError::NoCompatibleMethod)?;

        tracing::debug!(
            "Selected stream method {} for stream {}",
            chosen.namespace(),
            request.stream_id()
        );

        Ok(Arc::clone(chosen))
    }
}
