//! Direct-socket stream method.
//!
//! The sender listens on a TCP port and writes the raw file bytes once a
//! connection arrives. Connecting is the whole handshake, which makes this
//! method handy for local testing and for peers on the same network.

use async_trait::async_trait;
use courier_core::{IncomingStream, NegotiationError, StreamNegotiator, StreamOffer};
use std::time::Duration;
use tokio::net::TcpStream;

/// Namespace advertised for the direct-socket method
pub const DIRECT_NAMESPACE: &str = "urn:courier:direct:0";

/// Connects to the sender's listening socket
pub struct DirectSocketNegotiator {
    addr: String,
    connect_timeout: Duration,
}

impl DirectSocketNegotiator {
    /// Create a negotiator connecting to `addr` (host:port)
    pub fn new(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl StreamNegotiator for DirectSocketNegotiator {
    fn namespace(&self) -> &str {
        DIRECT_NAMESPACE
    }

    async fn negotiate_incoming(
        &self,
        offer: &StreamOffer,
    ) -> Result<IncomingStream, NegotiationError> {
        tracing::debug!(
            "Connecting to {} for stream {}",
            self.addr,
            offer.session_id
        );

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| NegotiationError::Timeout)??;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY: {}", e);
        }

        Ok(Box::new(stream))
    }
}
