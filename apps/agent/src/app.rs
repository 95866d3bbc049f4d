//! Application orchestrator: builds the upload server from the config and
//! runs it until shutdown.

use std::net::IpAddr;
use std::sync::Arc;

use anyhow::Context;
use chunkyard_server::{ServerConfig, UploadServer};
use chunkyard_transfer::{ChunkReceiver, ChunkWriter};

use crate::config::Config;

/// Runs the agent until shutdown is requested.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let server = build_server(&config)?;
    let server_run = Arc::clone(&server);
    let mut server_task = tokio::spawn(async move { server_run.run().await });

    tracing::info!("agent ready");

    // -- Main loop: wait for shutdown --
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
        }
        result = &mut server_task => {
            result??;
            anyhow::bail!("upload server stopped unexpectedly");
        }
    }

    // -- Graceful shutdown --
    tracing::info!("stopping services...");
    server.shutdown();
    server_task.await??;

    Ok(())
}

/// Creates the upload server described by `config`.
fn build_server(config: &Config) -> anyhow::Result<Arc<UploadServer>> {
    let bind: IpAddr = config
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {:?}", config.bind))?;

    std::fs::create_dir_all(&config.upload_dir).with_context(|| {
        format!(
            "cannot create upload directory {}",
            config.upload_dir.display()
        )
    })?;

    let receiver = ChunkReceiver::with_writer(
        &config.upload_dir,
        ChunkWriter::new(config.copy_buffer_size),
    );
    let server_config = ServerConfig {
        bind,
        port: config.port,
        body_timeout: config.body_timeout(),
    };
    Ok(UploadServer::new(server_config, receiver))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_server_from_config() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            bind: "127.0.0.1".into(),
            port: 0,
            upload_dir: tmp.path().join("uploads"),
            ..Config::default()
        };

        let server = build_server(&config).unwrap();

        assert!(config.upload_dir.is_dir());
        assert_eq!(server.receiver().storage().root(), config.upload_dir);
    }

    #[test]
    fn rejects_invalid_bind_address() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            bind: "not-an-ip".into(),
            upload_dir: tmp.path().to_path_buf(),
            ..Config::default()
        };

        let err = build_server(&config).err().unwrap();
        assert!(err.to_string().contains("invalid bind address"));
    }
}
