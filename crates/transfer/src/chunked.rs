use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use chunkyard_protocol::constants::{COPY_BUFFER_SIZE, DEFAULT_CHUNK_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{RangeDescriptor, TransferError};

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// A chunk of file data read for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Byte offset within the file.
    pub offset: u64,
    /// Raw chunk data.
    pub data: Vec<u8>,
}

impl Chunk {
    /// Returns the range this chunk covers in a file of `total` bytes.
    pub fn range(&self, total: Option<u64>) -> RangeDescriptor {
        RangeDescriptor {
            start: self.offset,
            end: self.offset + self.data.len() as u64 - 1,
            total,
        }
    }
}

/// Reads a local file in fixed-size chunks (client side of an upload).
pub struct ChunkReader {
    file: File,
    chunk_size: usize,
    offset: u64,
    file_size: u64,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] is used.
    pub fn new(path: &Path, chunk_size: usize) -> io::Result<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Ok(Self {
            file,
            chunk_size,
            offset: 0,
            file_size,
        })
    }

    /// Seeks to the given byte offset (for resume).
    pub fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        let offset = offset.min(self.file_size);
        self.file.seek(SeekFrom::Start(offset))?;
        self.offset = offset;
        Ok(())
    }

    /// Reads the next chunk. Returns `None` at EOF.
    pub fn next_chunk(&mut self) -> io::Result<Option<Chunk>> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(None);
        }

        let read_size = remaining.min(self.chunk_size as u64) as usize;
        let mut data = vec![0u8; read_size];
        self.file.read_exact(&mut data)?;

        let chunk = Chunk {
            offset: self.offset,
            data,
        };
        self.offset += read_size as u64;
        Ok(Some(chunk))
    }

    /// Current byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Total file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Bytes remaining to read.
    pub fn remaining(&self) -> u64 {
        self.file_size - self.offset
    }
}

// ---------------------------------------------------------------------------
// ChunkWriter
// ---------------------------------------------------------------------------

/// Streams one chunk's payload to its offset in the destination file.
///
/// The payload is copied in bounded steps, so memory use does not depend on
/// chunk size. Every step is a positional write; no file cursor is shared
/// between chunks, and chunks may arrive in any order.
#[derive(Debug, Clone)]
pub struct ChunkWriter {
    buffer_size: usize,
}

impl Default for ChunkWriter {
    fn default() -> Self {
        Self::new(COPY_BUFFER_SIZE)
    }
}

impl ChunkWriter {
    /// Creates a writer copying at most `buffer_size` bytes per step.
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }

    /// Writes the payload read from `body` at `range.start` of `path`.
    ///
    /// The payload must be exactly `range.len()` bytes; a shorter or longer
    /// body fails with [`TransferError::RangeLengthMismatch`]. Bytes already
    /// written for a failing chunk are left in place. Returns the number of
    /// bytes written, which is only reported once the data is flushed.
    ///
    /// The file is opened and closed within this call, on every path.
    pub async fn write_chunk<R>(
        &self,
        path: &Path,
        range: &RangeDescriptor,
        body: R,
    ) -> Result<u64, TransferError>
    where
        R: AsyncRead + Unpin,
    {
        let write_err = |source| TransferError::ChunkWrite {
            path: path.to_path_buf(),
            source,
        };

        let expected = range.len();
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .await
            .map_err(write_err)?
            .into_std()
            .await;
        let file = Arc::new(file);

        // One byte of slack so an oversized body is detected without reading it all.
        let mut body = body.take(expected.saturating_add(1));
        let mut buf = vec![0u8; self.buffer_size];
        let mut written: u64 = 0;

        loop {
            let filled = fill_buf(&mut body, &mut buf)
                .await
                .map_err(TransferError::PayloadRead)?;
            if filled == 0 {
                break;
            }
            if written + filled as u64 > expected {
                return Err(TransferError::RangeLengthMismatch {
                    expected,
                    actual: written + filled as u64,
                });
            }

            let offset = range.start + written;
            let f = Arc::clone(&file);
            buf = tokio::task::spawn_blocking(move || {
                write_all_at(&f, &buf[..filled], offset).map(|()| buf)
            })
            .await
            .map_err(|e| write_err(io::Error::other(e)))?
            .map_err(write_err)?;
            written += filled as u64;
        }

        if written != expected {
            return Err(TransferError::RangeLengthMismatch {
                expected,
                actual: written,
            });
        }

        tokio::task::spawn_blocking(move || file.sync_data())
            .await
            .map_err(|e| write_err(io::Error::other(e)))?
            .map_err(write_err)?;

        tracing::debug!(path = %path.display(), %range, "chunk written");
        Ok(written)
    }
}

/// Reads until `buf` is full or the body ends.
async fn fill_buf<R: AsyncRead + Unpin>(body: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = body.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ));
            }
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
