//! Upload client for the chunkyard agent.
//!
//! Splits a local file into fixed-size chunks and posts them one by one,
//! resuming from the agent's reported progress when a transfer for the same
//! file is already in flight.

mod uploader;

use std::path::PathBuf;

pub use uploader::{ChunkUploader, UploadReport};

/// Errors from the upload client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("agent rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("cannot upload empty file: {}", .0.display())]
    EmptyFile(PathBuf),

    #[error("filename cannot be sent as a header: {0:?}")]
    InvalidFilename(String),
}
