use std::time::Duration;

/// Endpoint accepting one chunk per request.
pub const UPLOAD_PATH: &str = "/upload";

/// Endpoint reporting the in-memory progress of a transfer.
pub const STATUS_PATH: &str = "/upload/status";

/// Endpoint that explicitly finalizes a transfer whose total is unknown.
pub const FINALIZE_PATH: &str = "/upload/complete";

/// Request header carrying the file identifier.
pub const HEADER_FILENAME: &str = "x-filename";

/// Response header carrying the [`ChunkStatus`](crate::ChunkStatus) of an accepted chunk.
pub const HEADER_UPLOAD_STATUS: &str = "x-upload-status";

/// Identifier used when a request carries no `X-Filename` header.
pub const DEFAULT_FILENAME: &str = "uploaded-file";

/// Bounded step used when copying a chunk body to storage (256 KiB).
pub const COPY_BUFFER_SIZE: usize = 256 * 1024;

/// Default chunk size used by the client (4 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Longest pause allowed while reading a chunk body before the request fails.
pub const BODY_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Response message for a chunk that did not finish the transfer.
pub const MSG_CHUNK_ACCEPTED: &str = "Chunk uploaded successfully";

/// Response message for the chunk that finished the transfer.
pub const MSG_UPLOAD_COMPLETE: &str = "File uploaded completely";
