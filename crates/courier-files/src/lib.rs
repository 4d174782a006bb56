//! # Courier Files
//!
//! Local sink handling for incoming Courier transfers.
//!
//! This crate provides:
//! - Sink path validation (create-if-absent, writability check)
//! - The `SinkOpener` seam and its file-system implementation
//! - Chunked byte copy with per-chunk progress and early stop
//! - Safe resolution of peer-offered file names inside a download directory

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod copy;
pub mod sink;

pub use copy::{CopyError, copy_with_progress};
pub use sink::{FsSinkOpener, SinkError, SinkOpener, SinkStream, prepare_sink, resolve_in_dir};

/// Default copy buffer size (256 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Largest copy buffer accepted by configuration (16 MiB)
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;
