//! Error types for the Courier transfer core.
//!
//! Errors fall into two groups:
//!
//! - **Preconditions**: reuse of a transfer instance or a bad sink. These are
//!   always returned synchronously from the call that violated them.
//! - **Runtime failures**: negotiation, sink open and copy failures. In
//!   synchronous mode they are returned to the caller; in background mode they
//!   are only recorded in the transfer state and must be discovered by polling.

use crate::transfer::ErrorKind;
use courier_files::{CopyError, SinkError};
use std::borrow::Cow;
use std::io;
use thiserror::Error;

/// Stream-method negotiation failures reported by selectors and negotiators
#[derive(Debug, Error)]
pub enum NegotiationError {
    /// None of the offered stream methods is supported locally
    #[error("no compatible stream method offered")]
    NoCompatibleMethod,

    /// The remote side refused the stream
    #[error("stream rejected: {0}")]
    Rejected(Cow<'static, str>),

    /// The handshake did not finish in time
    #[error("stream negotiation timed out")]
    Timeout,

    /// Network failure during the handshake
    #[error("negotiation I/O error: {0}")]
    Io(#[from] io::Error),

    /// The remote side violated the stream-method protocol
    #[error("protocol error: {0}")]
    Protocol(Cow<'static, str>),
}

/// Errors returned by incoming transfer operations
#[derive(Debug, Error)]
pub enum TransferError {
    /// The transfer was already negotiated or handed to a background task
    #[error("transfer already negotiated")]
    AlreadyNegotiated,

    /// The sink path cannot be used
    #[error("invalid sink: {0}")]
    InvalidSink(#[from] SinkError),

    /// Selecting or running the stream negotiator failed
    #[error("stream negotiation failed: {0}")]
    StreamNegotiationFailed(#[from] NegotiationError),

    /// The sink could not be opened for writing
    #[error("could not open sink: {0}")]
    SinkOpenFailed(#[source] io::Error),

    /// Reading from the stream or writing to the sink failed
    #[error("stream I/O failed: {0}")]
    StreamIoFailed(#[from] CopyError),

    /// The stream ended before the offered size was received
    #[error("stream ended after {received} of {expected} bytes")]
    Truncated {
        /// Offered file size
        expected: u64,
        /// Bytes actually received
        received: u64,
    },

    /// The transfer was cancelled
    #[error("transfer cancelled")]
    Cancelled,

    /// A transfer for this stream id is already registered
    #[error("duplicate stream id: {0}")]
    DuplicateStream(String),

    /// Invalid transfer configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),
}

impl TransferError {
    /// Returns true if this error is a synchronous precondition violation
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            TransferError::AlreadyNegotiated
                | TransferError::InvalidSink(_)
                | TransferError::DuplicateStream(_)
                | TransferError::InvalidConfig(_)
        )
    }

    /// State error kind recorded for this failure, if it is a runtime failure
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            TransferError::StreamNegotiationFailed(_) => Some(ErrorKind::StreamNegotiation),
            TransferError::SinkOpenFailed(_) => Some(ErrorKind::BadSink),
            TransferError::StreamIoFailed(_) | TransferError::Truncated { .. } => {
                Some(ErrorKind::StreamIo)
            }
            _ => None,
        }
    }

    /// Create an invalid config error with static context (zero allocation)
    #[must_use]
    pub const fn invalid_config(context: &'static str) -> Self {
        TransferError::InvalidConfig(Cow::Borrowed(context))
    }
}

/// Result type for transfer operations
pub type Result<T> = std::result::Result<T, TransferError>;
