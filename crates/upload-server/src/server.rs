//! Upload server lifecycle.
//!
//! Binds a TCP listener, serves the axum router until the cancellation
//! token fires, then drains in-flight requests.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use chunkyard_protocol::constants::{BODY_READ_TIMEOUT, FINALIZE_PATH, STATUS_PATH, UPLOAD_PATH};
use chunkyard_transfer::ChunkReceiver;

use crate::ServerError;
use crate::handler::{self, AppState};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind: IpAddr,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
    /// Longest wait for the next piece of a request body.
    pub body_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            body_timeout: BODY_READ_TIMEOUT,
        }
    }
}

/// The upload HTTP server.
pub struct UploadServer {
    config: ServerConfig,
    receiver: Arc<ChunkReceiver>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
    running: AtomicBool,
}

impl UploadServer {
    /// Creates a new server around the given receiver.
    pub fn new(config: ServerConfig, receiver: ChunkReceiver) -> Arc<Self> {
        Arc::new(Self {
            config,
            receiver: Arc::new(receiver),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    /// Returns the receiver shared by all request handlers.
    pub fn receiver(&self) -> &Arc<ChunkReceiver> {
        &self.receiver
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Gracefully shuts down the server.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn router(&self) -> Router {
        let state = AppState {
            receiver: Arc::clone(&self.receiver),
            body_timeout: self.config.body_timeout,
        };
        Router::new()
            .route(UPLOAD_PATH, post(handler::upload_chunk))
            .route(STATUS_PATH, get(handler::upload_status))
            .route(FINALIZE_PATH, post(handler::finalize_upload))
            // Chunk bodies are streamed to disk, never buffered whole.
            .layer(DefaultBodyLimit::disable())
            .with_state(state)
    }

    /// Runs the server until [`shutdown`](Self::shutdown) is called.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(ServerError::AlreadyRunning);
        }

        let result = self.serve().await;
        self.running.store(false, Ordering::Release);
        result
    }

    async fn serve(&self) -> Result<(), ServerError> {
        let addr = SocketAddr::new(self.config.bind, self.config.port);
        let listener = TcpListener::bind(addr).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!(
            upload_root = %self.receiver.storage().root().display(),
            "upload server listening on {local_addr}"
        );

        let cancel = self.cancel.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
                tracing::info!("server shutting down");
            })
            .await?;

        *self.local_addr.lock().await = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn start() -> (TempDir, Arc<UploadServer>, tokio::task::JoinHandle<()>) {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ..Default::default()
        };
        let server = UploadServer::new(config, ChunkReceiver::new(dir.path()));
        let runner = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            runner.run().await.unwrap();
        });
        while server.port().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        (dir, server, handle)
    }

    #[tokio::test]
    async fn binds_ephemeral_port_and_shuts_down() {
        let (_dir, server, handle) = start().await;
        assert_ne!(server.port().await, 0);

        server.shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(server.port().await, 0);
    }

    #[tokio::test]
    async fn second_run_is_rejected() {
        let (_dir, server, _handle) = start().await;
        let err = server.run().await.unwrap_err();
        assert!(matches!(err, ServerError::AlreadyRunning));
        server.shutdown();
    }

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 0);
        assert_eq!(config.body_timeout, BODY_READ_TIMEOUT);
        assert!(config.bind.is_unspecified());
    }
}
