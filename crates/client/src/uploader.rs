use std::path::Path;

use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, HeaderValue};

use chunkyard_protocol::constants::{
    DEFAULT_CHUNK_SIZE, FINALIZE_PATH, HEADER_FILENAME, HEADER_UPLOAD_STATUS, STATUS_PATH,
    UPLOAD_PATH,
};
use chunkyard_protocol::{ChunkStatus, UploadProgress};
use chunkyard_transfer::{Chunk, ChunkReader};

use crate::ClientError;

/// Summary of one [`ChunkUploader::upload_file`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    /// Bytes posted during this call.
    pub bytes_sent: u64,
    /// Number of chunk requests posted during this call.
    pub chunks_sent: u32,
    /// Offset the upload started from (non-zero when resuming).
    pub resumed_from: u64,
    /// Whether the agent reported the transfer as complete.
    pub complete: bool,
}

/// Posts files to an agent in fixed-size chunks.
pub struct ChunkUploader {
    http: reqwest::Client,
    base_url: String,
    chunk_size: usize,
}

impl ChunkUploader {
    /// Creates an uploader for the agent at `base_url` (e.g. `http://host:8080`).
    ///
    /// A `chunk_size` of 0 selects [`DEFAULT_CHUNK_SIZE`].
    pub fn new(base_url: impl Into<String>, chunk_size: usize) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().build()?;
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            chunk_size,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Returns the agent's progress for `filename`, or `None` when no
    /// transfer is in flight.
    pub async fn status(&self, filename: &str) -> Result<Option<UploadProgress>, ClientError> {
        let resp = self
            .http
            .get(format!("{}{STATUS_PATH}", self.base_url))
            .header(HEADER_FILENAME, filename_header(filename)?)
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = check(resp).await?;
        Ok(Some(resp.json().await?))
    }

    /// Uploads `path` under the identifier `filename`.
    ///
    /// Resumes from the agent's received byte count when a transfer for
    /// `filename` with the same total is already in progress.
    pub async fn upload_file(
        &self,
        path: &Path,
        filename: &str,
    ) -> Result<UploadReport, ClientError> {
        let owned = path.to_path_buf();
        let chunk_size = self.chunk_size;
        let mut reader =
            tokio::task::spawn_blocking(move || ChunkReader::new(&owned, chunk_size))
                .await
                .map_err(std::io::Error::other)??;

        let total = reader.file_size();
        if total == 0 {
            return Err(ClientError::EmptyFile(path.to_path_buf()));
        }

        let resumed_from = match self.status(filename).await? {
            Some(progress) if progress.total_size.is_none_or(|t| t == total) => {
                progress.bytes_received.min(total)
            }
            _ => 0,
        };
        if resumed_from > 0 {
            tracing::info!(filename, offset = resumed_from, total, "resuming upload");
        }
        reader.seek_to(resumed_from)?;

        let mut report = UploadReport {
            bytes_sent: 0,
            chunks_sent: 0,
            resumed_from,
            complete: false,
        };

        loop {
            let (back, next) = tokio::task::spawn_blocking(move || {
                let next = reader.next_chunk();
                (reader, next)
            })
            .await
            .map_err(std::io::Error::other)?;
            reader = back;

            let Some(chunk) = next? else {
                break;
            };
            let len = chunk.data.len() as u64;
            let status = self.send_chunk(filename, chunk, total).await?;

            report.bytes_sent += len;
            report.chunks_sent += 1;
            if status == Some(ChunkStatus::Complete) {
                report.complete = true;
                break;
            }
        }

        tracing::info!(
            filename,
            bytes = report.bytes_sent,
            chunks = report.chunks_sent,
            complete = report.complete,
            "upload finished"
        );
        Ok(report)
    }

    /// Asks the agent to finalize a transfer whose total it does not know.
    pub async fn finalize(&self, filename: &str) -> Result<UploadProgress, ClientError> {
        let resp = self
            .http
            .post(format!("{}{FINALIZE_PATH}", self.base_url))
            .header(HEADER_FILENAME, filename_header(filename)?)
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn send_chunk(
        &self,
        filename: &str,
        chunk: Chunk,
        total: u64,
    ) -> Result<Option<ChunkStatus>, ClientError> {
        let range = chunk.range(Some(total));
        tracing::debug!(filename, %range, "sending chunk");

        let resp = self
            .http
            .post(format!("{}{UPLOAD_PATH}", self.base_url))
            .header(HEADER_FILENAME, filename_header(filename)?)
            .header(CONTENT_RANGE, range.to_string())
            .body(chunk.data)
            .send()
            .await?;
        let resp = check(resp).await?;

        Ok(resp
            .headers()
            .get(HEADER_UPLOAD_STATUS)
            .and_then(|v| v.to_str().ok())
            .and_then(ChunkStatus::from_header))
    }
}

/// Encodes `filename` as raw UTF-8; `HeaderValue::from_str` only takes ASCII.
fn filename_header(filename: &str) -> Result<HeaderValue, ClientError> {
    HeaderValue::from_bytes(filename.as_bytes())
        .map_err(|_| ClientError::InvalidFilename(filename.to_string()))
}

/// Turns a non-success response into [`ClientError::Rejected`].
async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(ClientError::Rejected {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;
    use std::time::Duration;

    use chunkyard_server::{ServerConfig, UploadServer};
    use chunkyard_transfer::{ChunkReceiver, ChunkRequest};
    use tempfile::TempDir;

    struct Agent {
        dir: TempDir,
        server: Arc<UploadServer>,
        url: String,
    }

    impl Drop for Agent {
        fn drop(&mut self) {
            self.server.shutdown();
        }
    }

    async fn agent() -> Agent {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ..Default::default()
        };
        let server = UploadServer::new(config, ChunkReceiver::new(dir.path().join("uploads")));
        let runner = Arc::clone(&server);
        tokio::spawn(async move {
            let _ = runner.run().await;
        });
        while server.port().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let url = format!("http://127.0.0.1:{}/", server.port().await);
        Agent { dir, server, url }
    }

    fn source(dir: &TempDir, len: usize) -> (std::path::PathBuf, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i * 7 % 251) as u8).collect();
        let path = dir.path().join("source.bin");
        std::fs::write(&path, &data).unwrap();
        (path, data)
    }

    #[tokio::test]
    async fn uploads_file_in_chunks() {
        let agent = agent().await;
        let (path, data) = source(&agent.dir, 100);
        let uploader = ChunkUploader::new(&agent.url, 32).unwrap();

        let report = uploader.upload_file(&path, "copy.bin").await.unwrap();

        assert_eq!(
            report,
            UploadReport {
                bytes_sent: 100,
                chunks_sent: 4,
                resumed_from: 0,
                complete: true,
            }
        );
        let uploaded = std::fs::read(agent.dir.path().join("uploads/copy.bin")).unwrap();
        assert_eq!(uploaded, data);
        assert!(uploader.status("copy.bin").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resumes_from_reported_progress() {
        let agent = agent().await;
        let (path, data) = source(&agent.dir, 100);

        // A previous attempt delivered the first 40 bytes.
        agent
            .server
            .receiver()
            .receive_chunk(ChunkRequest {
                identifier: Some("copy.bin".into()),
                content_range: Some("bytes 0-39/100".into()),
                content_length: Some(40),
                body: &data[..40],
            })
            .await
            .unwrap();

        let uploader = ChunkUploader::new(&agent.url, 32).unwrap();
        let report = uploader.upload_file(&path, "copy.bin").await.unwrap();

        assert_eq!(report.resumed_from, 40);
        assert_eq!(report.bytes_sent, 60);
        assert_eq!(report.chunks_sent, 2);
        assert!(report.complete);
        let uploaded = std::fs::read(agent.dir.path().join("uploads/copy.bin")).unwrap();
        assert_eq!(uploaded, data);
    }

    #[tokio::test]
    async fn rejected_identifier_surfaces_status() {
        let agent = agent().await;
        let (path, _) = source(&agent.dir, 10);
        let uploader = ChunkUploader::new(&agent.url, 0).unwrap();

        let err = uploader.upload_file(&path, "../escape.bin").await.unwrap_err();
        assert!(
            matches!(err, ClientError::Rejected { status: 400, .. }),
            "{err}"
        );
    }

    #[tokio::test]
    async fn empty_file_is_refused() {
        let agent = agent().await;
        let path = agent.dir.path().join("empty.bin");
        std::fs::write(&path, b"").unwrap();
        let uploader = ChunkUploader::new(&agent.url, 0).unwrap();

        let err = uploader.upload_file(&path, "empty.bin").await.unwrap_err();
        assert!(matches!(err, ClientError::EmptyFile(_)));
    }

    #[tokio::test]
    async fn finalize_without_session_is_rejected() {
        let agent = agent().await;
        let uploader = ChunkUploader::new(&agent.url, 0).unwrap();

        let err = uploader.finalize("nothing.bin").await.unwrap_err();
        assert!(matches!(err, ClientError::Rejected { status: 404, .. }));
    }

    #[tokio::test]
    async fn uploads_non_ascii_filename() {
        let agent = agent().await;
        let (path, data) = source(&agent.dir, 50);
        let uploader = ChunkUploader::new(&agent.url, 16).unwrap();

        let report = uploader.upload_file(&path, "résumé.pdf").await.unwrap();

        assert!(report.complete);
        let uploaded = std::fs::read(agent.dir.path().join("uploads/résumé.pdf")).unwrap();
        assert_eq!(uploaded, data);
    }

    #[test]
    fn control_characters_in_filename_are_refused() {
        assert!(matches!(
            filename_header("a\nb.bin"),
            Err(ClientError::InvalidFilename(_))
        ));
    }

    #[test]
    fn zero_chunk_size_selects_default() {
        let uploader = ChunkUploader::new("http://localhost:8080/", 0).unwrap();
        assert_eq!(uploader.chunk_size(), DEFAULT_CHUNK_SIZE);
        assert_eq!(uploader.base_url, "http://localhost:8080");
    }
}
