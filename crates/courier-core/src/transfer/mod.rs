//! Incoming file transfer layer.
//!
//! Provides the transfer state register, the per-offer orchestrator and the
//! registry that creates transfers for inbound offers.

pub mod incoming;
pub mod manager;
pub mod state;

pub use incoming::IncomingTransfer;
pub use manager::IncomingTransferManager;
pub use state::{ErrorKind, TransferFailure, TransferState, TransferStatus};
