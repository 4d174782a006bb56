//! Transfer status register shared between the caller and the background task.
//!
//! Writes come from one context at a time (the caller during synchronous
//! negotiation, the background task afterwards). Reads may come from anywhere
//! at any time. Status and error kind are packed into a single atomic word so
//! that no reader can ever see `Error` without a kind, or a kind without
//! `Error`.
//!
//! Terminal statuses are sticky: every write is a compare-and-swap against a
//! non-terminal current value, so a late `Complete` or `Error` never replaces
//! `Cancelled`.

use std::fmt;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Transfer status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransferStatus {
    /// Created, nothing started
    Initial = 0,
    /// Choosing a stream method
    NegotiatingTransfer = 1,
    /// Running the stream-method handshake
    NegotiatingStream = 2,
    /// Stream established
    Negotiated = 3,
    /// Copying bytes into the sink
    InProgress = 4,
    /// All bytes received
    Complete = 5,
    /// Transfer failed, see the error kind
    Error = 6,
    /// Transfer cancelled locally
    Cancelled = 7,
}

impl TransferStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Initial,
            1 => Self::NegotiatingTransfer,
            2 => Self::NegotiatingStream,
            3 => Self::Negotiated,
            4 => Self::InProgress,
            5 => Self::Complete,
            6 => Self::Error,
            _ => Self::Cancelled,
        }
    }

    /// Returns true for `Complete`, `Error` and `Cancelled`
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial => write!(f, "Initial"),
            Self::NegotiatingTransfer => write!(f, "Negotiating transfer"),
            Self::NegotiatingStream => write!(f, "Negotiating stream"),
            Self::Negotiated => write!(f, "Negotiated"),
            Self::InProgress => write!(f, "In progress"),
            Self::Complete => write!(f, "Complete"),
            Self::Error => write!(f, "Error"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// What went wrong in a failed transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorKind {
    /// Selecting or running the stream negotiator failed
    StreamNegotiation = 1,
    /// The sink could not be opened
    BadSink = 2,
    /// Reading the stream or writing the sink failed
    StreamIo = 3,
}

impl ErrorKind {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::StreamNegotiation),
            2 => Some(Self::BadSink),
            3 => Some(Self::StreamIo),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StreamNegotiation => write!(f, "stream negotiation"),
            Self::BadSink => write!(f, "bad sink"),
            Self::StreamIo => write!(f, "stream I/O"),
        }
    }
}

/// Captured failure detail, kept for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferFailure {
    /// Failure category
    pub kind: ErrorKind,
    /// Rendered error message, including its source chain
    pub message: String,
}

impl TransferFailure {
    /// Capture `error` under `kind`
    pub fn new(kind: ErrorKind, error: &(dyn std::error::Error + 'static)) -> Self {
        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            let text = cause.to_string();
            if !message.ends_with(&text) {
                message.push_str(": ");
                message.push_str(&text);
            }
            source = cause.source();
        }
        Self { kind, message }
    }
}

impl fmt::Display for TransferFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

fn pack(status: TransferStatus, error: Option<ErrorKind>) -> u16 {
    (u16::from(error.map_or(0, |k| k as u8)) << 8) | u16::from(status as u8)
}

fn unpack(word: u16) -> (TransferStatus, Option<ErrorKind>) {
    (
        TransferStatus::from_u8((word & 0xFF) as u8),
        ErrorKind::from_u8((word >> 8) as u8),
    )
}

/// Status, progress and error register of one transfer
#[derive(Debug)]
pub struct TransferState {
    word: AtomicU16,
    bytes_transferred: AtomicU64,
    last_failure: Mutex<Option<TransferFailure>>,
}

impl Default for TransferState {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferState {
    /// Create a register in `Initial`
    #[must_use]
    pub fn new() -> Self {
        Self {
            word: AtomicU16::new(pack(TransferStatus::Initial, None)),
            bytes_transferred: AtomicU64::new(0),
            last_failure: Mutex::new(None),
        }
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> TransferStatus {
        unpack(self.word.load(Ordering::Acquire)).0
    }

    /// Error kind, present iff the status is `Error`
    #[must_use]
    pub fn error(&self) -> Option<ErrorKind> {
        unpack(self.word.load(Ordering::Acquire)).1
    }

    /// Status and error kind read in one load
    #[must_use]
    pub fn snapshot(&self) -> (TransferStatus, Option<ErrorKind>) {
        unpack(self.word.load(Ordering::Acquire))
    }

    /// Bytes written to the sink so far
    #[must_use]
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Acquire)
    }

    /// Last captured failure, if any
    #[must_use]
    pub fn last_failure(&self) -> Option<TransferFailure> {
        self.failure_slot().clone()
    }

    /// Returns true once a terminal status has been reached
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status().is_terminal()
    }

    /// Move forward along the happy path to `to`.
    ///
    /// Fails with the current status if it is terminal or not behind `to`.
    /// Use [`complete`](Self::complete), [`fail`](Self::fail) and
    /// [`cancel`](Self::cancel) for terminal statuses.
    pub fn advance(&self, to: TransferStatus) -> Result<(), TransferStatus> {
        debug_assert!(!to.is_terminal(), "advance() to terminal status {to}");

        let mut current = self.word.load(Ordering::Acquire);
        loop {
            let (status, _) = unpack(current);
            if status.is_terminal() || status as u8 >= to as u8 {
                return Err(status);
            }
            match self.word.compare_exchange_weak(
                current,
                pack(to, None),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Move from `InProgress` to `Complete`.
    ///
    /// Returns false if the status was anything else.
    pub fn complete(&self) -> bool {
        self.word
            .compare_exchange(
                pack(TransferStatus::InProgress, None),
                pack(TransferStatus::Complete, None),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Set `Error` with `kind`, recording `failure`.
    ///
    /// Returns false, leaving everything untouched, if the status is already
    /// terminal.
    pub fn fail(&self, kind: ErrorKind, failure: TransferFailure) -> bool {
        // Held across the status write so a reader that sees `Error` also sees
        // the failure once it takes the lock.
        let mut slot = self.failure_slot();
        if self.transition_unless_terminal(pack(TransferStatus::Error, Some(kind))) {
            *slot = Some(failure);
            true
        } else {
            false
        }
    }

    /// Record a failure without changing the status
    pub fn record_failure(&self, failure: TransferFailure) {
        *self.failure_slot() = Some(failure);
    }

    /// Set `Cancelled` unless already terminal
    pub fn cancel(&self) -> bool {
        self.transition_unless_terminal(pack(TransferStatus::Cancelled, None))
    }

    /// Add `n` freshly written bytes
    pub fn add_bytes(&self, n: u64) {
        self.bytes_transferred.fetch_add(n, Ordering::AcqRel);
    }

    fn transition_unless_terminal(&self, word: u16) -> bool {
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            if unpack(current).0.is_terminal() {
                return false;
            }
            match self.word.compare_exchange_weak(
                current,
                word,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn failure_slot(&self) -> MutexGuard<'_, Option<TransferFailure>> {
        self.last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
