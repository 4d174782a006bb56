//! # Courier Core
//!
//! Incoming file transfer core for instant-messaging file offers.
//!
//! This crate provides:
//! - The inbound offer model (`TransferRequest`, `StreamOffer`)
//! - Stream negotiation seams (`NegotiatorSelector`, `StreamNegotiator`)
//! - A lock-free transfer status register readable from any task
//! - `IncomingTransfer`, with stream handoff and background copy-to-sink modes
//! - `IncomingTransferManager`, a registry keyed by stream id
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   IncomingTransferManager                       │
//! │        (binds inbound offers to transfers, by stream id)        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                      IncomingTransfer                           │
//! │   (negotiation steps, background copy task, cancellation)       │
//! ├────────────────────────────────┬────────────────────────────────┤
//! │        TransferState           │   Selector / Negotiator / Sink │
//! │  (status, progress, failure)   │   (external capabilities)      │
//! └────────────────────────────────┴────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use courier_core::{IncomingTransfer, PreferenceSelector, StreamOffer, TransferRequest};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let offer = StreamOffer::new("sid-1", vec!["http://jabber.org/protocol/ibb".into()]);
//! let request = TransferRequest::new("alice@example.org/home", "notes.txt", 2048, offer);
//! let selector = Arc::new(PreferenceSelector::new());
//!
//! let transfer = IncomingTransfer::new(Arc::new(request), selector);
//! transfer.receive_to_sink("notes.txt").await?;
//!
//! let status = transfer.wait().await;
//! println!("{status}: {} bytes", transfer.bytes_transferred());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod negotiator;
pub mod request;
pub mod transfer;

pub use config::TransferConfig;
pub use error::{NegotiationError, Result, TransferError};
pub use negotiator::{IncomingStream, NegotiatorSelector, PreferenceSelector, StreamNegotiator};
pub use request::{StreamOffer, TransferRequest};
pub use transfer::{
    ErrorKind, IncomingTransfer, IncomingTransferManager, TransferFailure, TransferState,
    TransferStatus,
};
