//! Chunk reassembly engine.
//!
//! Accepts a file as independently delivered byte ranges, writes each range
//! at its own offset in the destination file and tracks per-file progress
//! until the declared total has been received.

mod chunked;
mod completion;
mod range;
mod receiver;
mod registry;
mod storage;
mod types;
mod validation;

use std::path::PathBuf;

pub use chunked::{Chunk, ChunkReader, ChunkWriter};
pub use completion::is_complete;
pub use range::RangeDescriptor;
pub use receiver::{ChunkOutcome, ChunkReceiver, ChunkRequest};
pub use registry::{Allocation, SessionGuard, SessionRegistry, WriteTicket};
pub use storage::StorageAllocator;
pub use types::UploadSession;
pub use validation::{normalize_identifier, validate_upload_path};

/// How an error should be reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed or inconsistent request metadata. Never mutates state.
    ClientProtocol,
    /// Allocation or write failure. Session state is left as it was.
    Storage,
    /// Registry discipline was violated; should be unreachable.
    InternalInconsistency,
}

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Content-Range header is required")]
    MissingRange,

    #[error("Content-Length header is required")]
    MissingContentLength,

    #[error("invalid Content-Range header: {0}")]
    InvalidRangeFormat(String),

    #[error("invalid range bounds: {start}-{end}/{}", range::format_total(.total))]
    InvalidRangeBounds {
        start: u64,
        end: u64,
        total: Option<u64>,
    },

    #[error("range length mismatch: range declares {expected} bytes, payload has {actual}")]
    RangeLengthMismatch { expected: u64, actual: u64 },

    #[error("total size mismatch: transfer declared {known} bytes, chunk declares {declared}")]
    TotalSizeMismatch { known: u64, declared: u64 },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("failed to read chunk payload: {0}")]
    PayloadRead(#[source] std::io::Error),

    #[error("no upload in progress: {0}")]
    NoActiveUpload(String),

    #[error("upload incomplete: {received} of {total} bytes received")]
    Incomplete { received: u64, total: u64 },

    #[error("failed to prepare {}: {source}", .path.display())]
    StorageInit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write chunk to {}: {source}", .path.display())]
    ChunkWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("upload {0} ended while the chunk was being written")]
    SessionEnded(String),

    #[error("upload {identifier} still has {count} chunk write(s) in progress")]
    WritesInFlight { identifier: String, count: usize },

    #[error("session vanished while recording bytes: {0}")]
    SessionVanished(String),
}

impl TransferError {
    /// Classifies the error for status mapping.
    ///
    /// [`SessionEnded`](Self::SessionEnded) and
    /// [`WritesInFlight`](Self::WritesInFlight) are client errors: they come
    /// from requests racing the end of a transfer.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::StorageInit { .. } | Self::ChunkWrite { .. } => ErrorClass::Storage,
            Self::SessionVanished(_) => ErrorClass::InternalInconsistency,
            _ => ErrorClass::ClientProtocol,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors() {
        assert_eq!(TransferError::MissingRange.class(), ErrorClass::ClientProtocol);
        assert_eq!(
            TransferError::RangeLengthMismatch {
                expected: 5,
                actual: 3
            }
            .class(),
            ErrorClass::ClientProtocol
        );
        let io = std::io::Error::other("disk full");
        assert_eq!(
            TransferError::ChunkWrite {
                path: "a.txt".into(),
                source: io,
            }
            .class(),
            ErrorClass::Storage
        );
        assert_eq!(
            TransferError::SessionEnded("a.txt".into()).class(),
            ErrorClass::ClientProtocol
        );
        assert_eq!(
            TransferError::SessionVanished("a.txt".into()).class(),
            ErrorClass::InternalInconsistency
        );
    }

    #[test]
    fn bounds_error_renders_unknown_total() {
        let err = TransferError::InvalidRangeBounds {
            start: 5,
            end: 2,
            total: None,
        };
        assert_eq!(err.to_string(), "invalid range bounds: 5-2/*");
    }
}
