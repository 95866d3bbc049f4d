//! HTTP server for the chunkyard upload agent.
//!
//! Exposes the chunk reassembly engine over three routes: chunk upload,
//! progress query and explicit finalize. Request metadata travels in
//! headers; the chunk payload is streamed straight from the request body
//! to its offset in the destination file.

mod handler;
mod response;
mod server;

pub use response::ApiError;
pub use server::{ServerConfig, UploadServer};

/// Errors produced by the upload server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server already running")]
    AlreadyRunning,
}
