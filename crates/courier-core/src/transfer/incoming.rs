//! Incoming file transfer orchestration.
//!
//! An [`IncomingTransfer`] is bound to exactly one inbound offer and can be
//! consumed in one of two ways:
//!
//! - [`receive_stream`](IncomingTransfer::receive_stream) negotiates in the
//!   caller's task and hands back the negotiated stream.
//! - [`receive_to_sink`](IncomingTransfer::receive_to_sink) validates a target
//!   file, spawns one background task that negotiates and copies, and returns
//!   right away. Progress and outcome are read from the [`TransferState`].
//!
//! # Background task flow
//!
//! ```text
//! NegotiatingTransfer -> NegotiatingStream -> Negotiated -> InProgress -> Complete
//!        |                     |                  |             |
//!        +------ Error(StreamNegotiation) --------+             |
//!                                                 |             |
//!                              Error(BadSink) <---+             |
//!                                                               |
//!                                          Error(StreamIo) <----+
//! ```
//!
//! Whatever the exit path, the negotiated stream and the sink are released
//! before the task ends, and release failures never replace the outcome.

use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::negotiator::{IncomingStream, NegotiatorSelector};
use crate::request::TransferRequest;
use crate::transfer::state::{ErrorKind, TransferFailure, TransferState, TransferStatus};
use courier_files::{
    CopyError, FsSinkOpener, SinkOpener, SinkStream, copy_with_progress, prepare_sink,
};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// A file being received from a remote peer
pub struct IncomingTransfer {
    request: Arc<TransferRequest>,
    selector: Arc<dyn NegotiatorSelector>,
    sink_opener: Arc<dyn SinkOpener>,
    config: TransferConfig,
    state: Arc<TransferState>,
    /// Set by the first receive call; guarantees a single negotiation
    claimed: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IncomingTransfer {
    /// Create a transfer for `request`, negotiated through `selector`
    pub fn new(request: Arc<TransferRequest>, selector: Arc<dyn NegotiatorSelector>) -> Self {
        Self {
            request,
            selector,
            sink_opener: Arc::new(FsSinkOpener),
            config: TransferConfig::default(),
            state: Arc::new(TransferState::new()),
            claimed: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    /// Replace the sink opener used by [`receive_to_sink`](Self::receive_to_sink)
    #[must_use]
    pub fn with_sink_opener(mut self, sink_opener: Arc<dyn SinkOpener>) -> Self {
        self.sink_opener = sink_opener;
        self
    }

    /// Replace the transfer configuration
    #[must_use]
    pub fn with_config(mut self, config: TransferConfig) -> Self {
        self.config = config;
        self
    }

    /// Negotiate the stream and return it.
    ///
    /// The caller owns the returned stream and releases it by dropping it.
    /// On negotiation failure the failure is recorded as
    /// [`last_failure`](Self::last_failure) and returned, but the status is
    /// left where negotiation stopped: it does not become `Error` in this mode.
    ///
    /// # Errors
    ///
    /// - [`TransferError::AlreadyNegotiated`] if either receive mode was used before
    /// - [`TransferError::StreamNegotiationFailed`] if selection or handshake fails
    /// - [`TransferError::Cancelled`] if the transfer was cancelled first
    pub async fn receive_stream(&self) -> Result<IncomingStream> {
        self.claim()?;

        match negotiate(&self.request, self.selector.as_ref(), &self.state).await {
            Ok(stream) => Ok(stream),
            Err(err) => {
                if let Some(kind) = err.error_kind() {
                    tracing::warn!(
                        "Stream negotiation failed for {}: {}",
                        self.request.stream_id(),
                        err
                    );
                    self.state.record_failure(TransferFailure::new(kind, &err));
                }
                Err(err)
            }
        }
    }

    /// Receive the file into `path` on a background task.
    ///
    /// The file is created if it does not exist. Returns as soon as the task
    /// has been spawned; failures after that point are only visible through
    /// [`status`](Self::status), [`error`](Self::error) and
    /// [`last_failure`](Self::last_failure).
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`TransferError::AlreadyNegotiated`] if either receive mode was used before
    /// - [`TransferError::InvalidSink`] if `path` is empty or cannot be written;
    ///   no task is started and the status stays `Initial`
    pub async fn receive_to_sink(&self, path: impl AsRef<Path>) -> Result<()> {
        if self.claimed.load(Ordering::Acquire) {
            return Err(TransferError::AlreadyNegotiated);
        }

        let path = path.as_ref();
        prepare_sink(path).await?;
        self.claim()?;

        tracing::info!(
            "Receiving {} ({} bytes) from {} into {}",
            self.request.file_name(),
            self.request.file_size(),
            self.request.requestor(),
            path.display()
        );

        let job = SinkJob {
            request: Arc::clone(&self.request),
            selector: Arc::clone(&self.selector),
            sink_opener: Arc::clone(&self.sink_opener),
            state: Arc::clone(&self.state),
            path: path.to_path_buf(),
            buffer_size: self.config.buffer_size,
        };
        *self.task.lock().await = Some(tokio::spawn(job.run()));

        Ok(())
    }

    /// Request cancellation.
    ///
    /// Sets `Cancelled` unless the transfer already reached a terminal
    /// status; returns whether it did. A running copy stops at the next chunk
    /// boundary. An in-flight handshake is not interrupted, but its result is
    /// discarded.
    pub fn cancel(&self) -> bool {
        let cancelled = self.state.cancel();
        if cancelled {
            tracing::info!("Transfer {} cancelled", self.request.stream_id());
        }
        cancelled
    }

    /// Wait for the transfer to reach a terminal status.
    ///
    /// Joins the background task if one was started. Otherwise polls the
    /// status every `poll_interval`; in stream mode that only ends once the
    /// transfer is cancelled.
    pub async fn wait(&self) -> TransferStatus {
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(
                    "Transfer task for {} ended abnormally: {}",
                    self.request.stream_id(),
                    e
                );
            }
            return self.state.status();
        }

        loop {
            let status = self.state.status();
            if status.is_terminal() {
                return status;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> TransferStatus {
        self.state.status()
    }

    /// Error kind, present iff the status is `Error`
    #[must_use]
    pub fn error(&self) -> Option<ErrorKind> {
        self.state.error()
    }

    /// Last captured failure
    #[must_use]
    pub fn last_failure(&self) -> Option<TransferFailure> {
        self.state.last_failure()
    }

    /// Bytes written to the sink so far
    #[must_use]
    pub fn bytes_transferred(&self) -> u64 {
        self.state.bytes_transferred()
    }

    /// Alias for [`bytes_transferred`](Self::bytes_transferred)
    #[must_use]
    pub fn amount_written(&self) -> u64 {
        self.bytes_transferred()
    }

    /// Fraction of the offered size received (0.0 to 1.0)
    #[must_use]
    pub fn progress(&self) -> f64 {
        let total = self.request.file_size();
        if total == 0 {
            return if self.status() == TransferStatus::Complete {
                1.0
            } else {
                0.0
            };
        }
        (self.bytes_transferred() as f64 / total as f64).min(1.0)
    }

    /// Returns true once a terminal status has been reached
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state.is_done()
    }

    /// Shared state register, for observers that outlive this handle
    #[must_use]
    pub fn state(&self) -> Arc<TransferState> {
        Arc::clone(&self.state)
    }

    /// The bound request
    #[must_use]
    pub fn request(&self) -> &TransferRequest {
        &self.request
    }

    /// Identity of the sending peer
    #[must_use]
    pub fn peer(&self) -> &str {
        self.request.requestor()
    }

    /// Stream id of the offer
    #[must_use]
    pub fn stream_id(&self) -> &str {
        self.request.stream_id()
    }

    /// Offered file name
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.request.file_name()
    }

    /// Offered file size in bytes
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.request.file_size()
    }

    fn claim(&self) -> Result<()> {
        if self.claimed.swap(true, Ordering::AcqRel) {
            return Err(TransferError::AlreadyNegotiated);
        }
        Ok(())
    }
}

/// Run the negotiation steps, advancing `state` after each.
///
/// A failed advance means the transfer was cancelled underneath us; any
/// stream obtained so far is dropped.
async fn negotiate(
    request: &TransferRequest,
    selector: &dyn NegotiatorSelector,
    state: &TransferState,
) -> Result<IncomingStream> {
    step(request, state, TransferStatus::NegotiatingTransfer)?;
    let negotiator = selector.select_negotiator(request).await?;

    step(request, state, TransferStatus::NegotiatingStream)?;
    tracing::debug!(
        "Negotiating {} stream for {}",
        negotiator.namespace(),
        request.stream_id()
    );
    let stream = negotiator.negotiate_incoming(request.offer()).await?;

    step(request, state, TransferStatus::Negotiated)?;
    Ok(stream)
}

fn step(request: &TransferRequest, state: &TransferState, to: TransferStatus) -> Result<()> {
    state.advance(to).map_err(|_| TransferError::Cancelled)?;
    tracing::debug!("Transfer {}: {}", request.stream_id(), to);
    Ok(())
}

/// Everything the background task owns
struct SinkJob {
    request: Arc<TransferRequest>,
    selector: Arc<dyn NegotiatorSelector>,
    sink_opener: Arc<dyn SinkOpener>,
    state: Arc<TransferState>,
    path: PathBuf,
    buffer_size: usize,
}

impl SinkJob {
    async fn run(self) {
        let stream_id = self.request.stream_id();

        let input = match negotiate(&self.request, self.selector.as_ref(), &self.state).await {
            Ok(input) => input,
            Err(err) => {
                self.record(&err);
                return;
            }
        };

        let sink = match self.sink_opener.open_sink(&self.path).await {
            Ok(sink) => sink,
            Err(e) => {
                drop(input);
                self.record(&TransferError::SinkOpenFailed(e));
                return;
            }
        };

        let (input, sink) = self.copy(input, sink).await;
        release(stream_id, input, sink).await;
    }

    async fn copy(
        &self,
        mut input: IncomingStream,
        mut sink: SinkStream,
    ) -> (IncomingStream, SinkStream) {
        if step(&self.request, &self.state, TransferStatus::InProgress).is_err() {
            return (input, sink);
        }

        let state = &self.state;
        let copied = copy_with_progress(&mut input, &mut sink, self.buffer_size, |n| {
            state.add_bytes(n);
            if state.status() == TransferStatus::Cancelled {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .await;

        let expected = self.request.file_size();
        match copied {
            Ok(received) if received != expected => {
                self.record(&TransferError::Truncated { expected, received });
            }
            Ok(received) => {
                if self.state.complete() {
                    tracing::info!(
                        "Transfer {} complete ({} bytes)",
                        self.request.stream_id(),
                        received
                    );
                }
            }
            Err(CopyError::Interrupted { copied }) => {
                tracing::info!(
                    "Transfer {} stopped after {} bytes",
                    self.request.stream_id(),
                    copied
                );
            }
            Err(e) => self.record(&TransferError::StreamIoFailed(e)),
        }

        (input, sink)
    }

    /// Publish a runtime failure as the terminal `Error` status.
    fn record(&self, err: &TransferError) {
        let Some(kind) = err.error_kind() else {
            tracing::debug!("Transfer {} ended: {}", self.request.stream_id(), err);
            return;
        };

        tracing::warn!("Transfer {} failed: {}", self.request.stream_id(), err);
        if !self.state.fail(kind, TransferFailure::new(kind, err)) {
            tracing::debug!(
                "Transfer {} already {}, failure not recorded",
                self.request.stream_id(),
                self.state.status()
            );
        }
    }
}

/// Release both ends of the copy; failures are logged, never recorded.
async fn release(stream_id: &str, input: IncomingStream, mut sink: SinkStream) {
    if let Err(e) = sink.shutdown().await {
        tracing::warn!("Failed to release sink for {}: {}", stream_id, e);
    }
    drop(sink);
    drop(input);
}
