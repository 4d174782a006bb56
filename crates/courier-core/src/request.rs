//! Inbound file offer model.

/// Stream-initiation offer carried by a file transfer request
///
/// Holds what the stream negotiators need: the session id shared with the
/// remote side, the stream-method namespaces the remote side offered (in its
/// order), and the raw protocol-specific offer payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOffer {
    /// Stream session id
    pub session_id: String,
    /// Offered stream-method namespaces
    pub methods: Vec<String>,
    /// Opaque protocol-specific offer payload
    pub payload: Vec<u8>,
}

impl StreamOffer {
    /// Create an offer with an empty payload
    pub fn new(session_id: impl Into<String>, methods: Vec<String>) -> Self {
        Self {
            session_id: session_id.into(),
            methods,
            payload: Vec::new(),
        }
    }

    /// Attach the raw offer payload
    #[must_use]
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Check whether the remote side offered `namespace`
    #[must_use]
    pub fn offers(&self, namespace: &str) -> bool {
        self.methods.iter().any(|m| m == namespace)
    }
}

/// Inbound file transfer request
///
/// Immutable description of a file a remote peer wants to send. Created by
/// the messaging layer when an offer arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    requestor: String,
    file_name: String,
    file_size: u64,
    description: Option<String>,
    mime_type: Option<String>,
    offer: StreamOffer,
}

impl TransferRequest {
    /// Create a request for `file_name` of `file_size` bytes from `requestor`
    pub fn new(
        requestor: impl Into<String>,
        file_name: impl Into<String>,
        file_size: u64,
        offer: StreamOffer,
    ) -> Self {
        Self {
            requestor: requestor.into(),
            file_name: file_name.into(),
            file_size,
            description: None,
            mime_type: None,
            offer,
        }
    }

    /// Set the human-readable description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the MIME type
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Identity of the peer offering the file
    #[must_use]
    pub fn requestor(&self) -> &str {
        &self.requestor
    }

    /// Stream id of the offer
    #[must_use]
    pub fn stream_id(&self) -> &str {
        &self.offer.session_id
    }

    /// Offered file name
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Offered file size in bytes
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Offered description
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Offered MIME type
    #[must_use]
    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    /// Stream-initiation offer
    #[must_use]
    pub fn offer(&self) -> &StreamOffer {
        &self.offer
    }
}
