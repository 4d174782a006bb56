//! Chunked byte copy with progress reporting.

use std::io;
use std::ops::ControlFlow;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Copy failures, tagged with the side that failed
#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    /// Reading from the source failed
    #[error("read failed after {copied} bytes: {source}")]
    Read {
        /// Bytes written to the sink before the failure
        copied: u64,
        /// Underlying I/O failure
        #[source]
        source: io::Error,
    },

    /// Writing to the sink failed
    #[error("write failed after {copied} bytes: {source}")]
    Write {
        /// Bytes written to the sink before the failure
        copied: u64,
        /// Underlying I/O failure
        #[source]
        source: io::Error,
    },

    /// The progress callback asked the copy to stop
    #[error("copy interrupted after {copied} bytes")]
    Interrupted {
        /// Bytes written to the sink before the stop
        copied: u64,
    },
}

impl CopyError {
    /// Bytes successfully written before the copy ended
    #[must_use]
    pub fn copied(&self) -> u64 {
        match self {
            Self::Read { copied, .. } | Self::Write { copied, .. } | Self::Interrupted { copied } => {
                *copied
            }
        }
    }
}

/// Copy `reader` into `writer` until end of input.
///
/// `on_chunk` is invoked with the size of every chunk after it has been
/// written. Returning [`ControlFlow::Break`] stops the copy with
/// [`CopyError::Interrupted`]. The writer is flushed on success but not shut
/// down; releasing it is the caller's job.
///
/// # Errors
///
/// Returns [`CopyError`] if either side fails or the callback breaks.
pub async fn copy_with_progress<R, W, F>(
    reader: &mut R,
    writer: &mut W,
    buffer_size: usize,
    mut on_chunk: F,
) -> Result<u64, CopyError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
    F: FnMut(u64) -> ControlFlow<()>,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut copied = 0u64;

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => return Err(CopyError::Read { copied, source }),
        };

        writer
            .write_all(&buf[..n])
            .await
            .map_err(|source| CopyError::Write { copied, source })?;
        copied += n as u64;

        if on_chunk(n as u64).is_break() {
            return Err(CopyError::Interrupted { copied });
        }
    }

    writer
        .flush()
        .await
        .map_err(|source| CopyError::Write { copied, source })?;

    Ok(copied)
}
