//! Sink validation and opening.
//!
//! A sink is the local destination for the bytes of an incoming transfer.
//! Validation happens up front, in the caller's context, so that a bad path is
//! reported before any negotiation starts. Opening happens later, in the
//! background task, through the [`SinkOpener`] trait so that tests can count
//! and fail opens.

use async_trait::async_trait;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWrite;

/// Writable destination for transfer bytes
pub type SinkStream = Box<dyn AsyncWrite + Send + Unpin>;

/// Sink validation errors
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// No path was supplied
    #[error("sink path is empty")]
    EmptyPath,

    /// Path names a directory
    #[error("sink path is a directory: {}", .0.display())]
    IsDirectory(PathBuf),

    /// Path names a FIFO, socket or device rather than a regular file
    #[error("sink path is not a regular file: {}", .0.display())]
    NotAFile(PathBuf),

    /// Path could not be created or opened for writing
    #[error("cannot write to {}: {source}", path.display())]
    Unwritable {
        /// Offending path
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: io::Error,
    },

    /// Offered file name is not a plain file name
    #[error("unsafe file name: {0:?}")]
    UnsafeName(String),
}

/// Opens sinks for writing.
///
/// Called once per transfer, after the stream has been negotiated.
#[async_trait]
pub trait SinkOpener: Send + Sync {
    /// Open `path` for writing, truncating existing content.
    async fn open_sink(&self, path: &Path) -> io::Result<SinkStream>;
}

/// File-system sink opener backed by `tokio::fs`
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSinkOpener;

#[async_trait]
impl SinkOpener for FsSinkOpener {
    async fn open_sink(&self, path: &Path) -> io::Result<SinkStream> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await?;
        Ok(Box::new(file))
    }
}

/// Validate a sink path.
///
/// Creates the file if it does not exist, then checks that it can be opened
/// for writing. Existing content is left untouched.
///
/// # Errors
///
/// Returns [`SinkError`] if the path is empty, names a directory or any other
/// non-regular file, or cannot be created or written.
pub async fn prepare_sink(path: &Path) -> Result<(), SinkError> {
    if path.as_os_str().is_empty() {
        return Err(SinkError::EmptyPath);
    }

    let existed = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => return Err(SinkError::IsDirectory(path.to_path_buf())),
        Ok(meta) if !meta.is_file() => return Err(SinkError::NotAFile(path.to_path_buf())),
        Ok(_) => true,
        Err(_) => false,
    };

    OpenOptions::new()
        .write(true)
        .create(true)
        .open(path)
        .await
        .map_err(|source| SinkError::Unwritable {
            path: path.to_path_buf(),
            source,
        })?;

    if !existed {
        tracing::debug!("Created sink file {}", path.display());
    }

    Ok(())
}

/// Resolve a peer-offered file name inside `dir`.
///
/// Only a single normal path component is accepted; separators, `..`,
/// absolute paths and NUL bytes are rejected.
///
/// # Errors
///
/// Returns [`SinkError::UnsafeName`] for anything but a plain file name.
pub fn resolve_in_dir(dir: &Path, file_name: &str) -> Result<PathBuf, SinkError> {
    if file_name.is_empty() || file_name.contains('\0') {
        return Err(SinkError::UnsafeName(file_name.to_string()));
    }

    let mut components = Path::new(file_name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => Ok(dir.join(name)),
        _ => Err(SinkError::UnsafeName(file_name.to_string())),
    }
}
