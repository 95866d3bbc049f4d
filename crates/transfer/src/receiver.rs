use std::path::PathBuf;

use chunkyard_protocol::constants::DEFAULT_FILENAME;
use chunkyard_protocol::{ChunkStatus, UploadProgress};
use tokio::io::AsyncRead;

use crate::{
    ChunkWriter, ErrorClass, RangeDescriptor, SessionRegistry, StorageAllocator, TransferError,
    is_complete, normalize_identifier,
};

/// One incoming chunk as delivered by the request boundary.
#[derive(Debug)]
pub struct ChunkRequest<R> {
    /// File identifier; [`DEFAULT_FILENAME`] when absent.
    pub identifier: Option<String>,
    /// Raw `Content-Range` value.
    pub content_range: Option<String>,
    /// Declared payload length.
    pub content_length: Option<u64>,
    /// Payload stream.
    pub body: R,
}

/// Result of an accepted chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Chunk stored; the transfer continues.
    Partial(UploadProgress),
    /// Chunk stored and the declared total reached; the session is gone.
    Complete(UploadProgress),
}

impl ChunkOutcome {
    pub fn status(&self) -> ChunkStatus {
        match self {
            Self::Partial(_) => ChunkStatus::Partial,
            Self::Complete(_) => ChunkStatus::Complete,
        }
    }

    pub fn progress(&self) -> &UploadProgress {
        match self {
            Self::Partial(p) | Self::Complete(p) => p,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }
}

/// Reassembles files from independently delivered chunks.
///
/// Owns the session registry, the storage allocator and the chunk writer.
/// Shared between request handlers behind an `Arc`.
pub struct ChunkReceiver {
    registry: SessionRegistry,
    storage: StorageAllocator,
    writer: ChunkWriter,
}

impl ChunkReceiver {
    /// Creates a receiver storing files under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_writer(root, ChunkWriter::default())
    }

    pub fn with_writer(root: impl Into<PathBuf>, writer: ChunkWriter) -> Self {
        Self {
            registry: SessionRegistry::new(),
            storage: StorageAllocator::new(root),
            writer,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn storage(&self) -> &StorageAllocator {
        &self.storage
    }

    /// Handles one chunk end to end.
    ///
    /// Metadata is validated before any state is touched. The session is
    /// created (and the file allocated) under the identifier's lock, the
    /// payload is written without holding it, and the byte count is only
    /// advanced once the write is flushed. Any error leaves the session's
    /// byte count as it was, so the client can resend the same range.
    pub async fn receive_chunk<R>(
        &self,
        request: ChunkRequest<R>,
    ) -> Result<ChunkOutcome, TransferError>
    where
        R: AsyncRead + Unpin,
    {
        let identifier = request
            .identifier
            .unwrap_or_else(|| DEFAULT_FILENAME.to_string());

        let result = self
            .receive_inner(&identifier, request.content_range, request.content_length, request.body)
            .await;

        if let Err(e) = &result {
            match e.class() {
                ErrorClass::ClientProtocol => {
                    tracing::warn!(%identifier, "chunk rejected: {e}");
                }
                ErrorClass::Storage => {
                    tracing::error!(%identifier, "chunk failed: {e}");
                }
                ErrorClass::InternalInconsistency => {
                    tracing::error!(%identifier, "registry inconsistency: {e}");
                }
            }
        }
        result
    }

    async fn receive_inner<R>(
        &self,
        identifier: &str,
        content_range: Option<String>,
        content_length: Option<u64>,
        body: R,
    ) -> Result<ChunkOutcome, TransferError>
    where
        R: AsyncRead + Unpin,
    {
        // -- Validate metadata: no state touched yet --
        let header = content_range.ok_or(TransferError::MissingRange)?;
        let range = RangeDescriptor::parse(&header)?;
        let declared = content_length.ok_or(TransferError::MissingContentLength)?;
        if declared != range.len() {
            return Err(TransferError::RangeLengthMismatch {
                expected: range.len(),
                actual: declared,
            });
        }
        let key = normalize_identifier(identifier)?;
        let path = self.storage.destination(&key)?;

        // -- Obtain or create the session, allocating storage on first use --
        let ticket = {
            let mut guard = self.registry.lock(&key).await;
            let session = guard
                .get_or_create_with(range.total, |allocation| {
                    self.storage.prepare(&path, allocation)
                })
                .await?;
            if let Some(total) = session.total_size
                && range.end >= total
            {
                return Err(TransferError::InvalidRangeBounds {
                    start: range.start,
                    end: range.end,
                    total: Some(total),
                });
            }
            guard.begin_write()?
        };

        // -- Stream the payload to its offset, outside the lock --
        // An early return drops the ticket, which releases the pending write.
        let written = self.writer.write_chunk(&path, &range, body).await?;

        // -- Record confirmed bytes and decide completion --
        let mut guard = self.registry.lock(&key).await;
        let session = guard.finish_write(ticket, &range, written)?;
        tracing::debug!(
            identifier = %key,
            %range,
            received = session.bytes_received,
            total = ?session.total_size,
            "chunk accepted"
        );

        if is_complete(&session) {
            let done = guard
                .complete()
                .ok_or_else(|| TransferError::SessionVanished(key.clone()))?;
            tracing::info!(identifier = %key, bytes = done.bytes_received, "upload complete");
            Ok(ChunkOutcome::Complete(done.progress()))
        } else {
            Ok(ChunkOutcome::Partial(session.progress()))
        }
    }

    /// Returns progress for an in-flight transfer.
    pub async fn progress(&self, identifier: &str) -> Option<UploadProgress> {
        let key = normalize_identifier(identifier).ok()?;
        self.registry.snapshot(&key).await.map(|s| s.progress())
    }

    /// Explicitly completes a transfer.
    ///
    /// Meant for transfers whose total was never declared. A transfer with a
    /// known total can only be finalized once that total has been received
    /// (which normally completes it on its own). Refused while chunk writes
    /// for the transfer are still in progress.
    pub async fn finalize(&self, identifier: &str) -> Result<UploadProgress, TransferError> {
        let key = normalize_identifier(identifier)?;
        let no_upload = || TransferError::NoActiveUpload(key.clone());

        let mut guard = self
            .registry
            .lock_existing(&key)
            .await
            .ok_or_else(no_upload)?;
        let session = guard.session().ok_or_else(no_upload)?;

        let pending = guard.writes_in_flight();
        if pending > 0 {
            return Err(TransferError::WritesInFlight {
                identifier: key.clone(),
                count: pending,
            });
        }
        if let Some(total) = session.total_size
            && session.bytes_received < total
        {
            return Err(TransferError::Incomplete {
                received: session.bytes_received,
                total,
            });
        }

        let done = guard.complete().ok_or_else(no_upload)?;
        tracing::info!(
            identifier = %key,
            bytes = done.bytes_received,
            "upload finalized by client"
        );
        Ok(done.progress())
    }
}
