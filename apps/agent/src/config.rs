//! Agent configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/chunkyard/agent.toml`
//! - Windows: `%APPDATA%/chunkyard/agent.toml`
//!
//! `CHUNKYARD_CONFIG` overrides the location.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chunkyard_protocol::constants::{BODY_READ_TIMEOUT, COPY_BUFFER_SIZE};
use serde::{Deserialize, Serialize};

/// Environment variable pointing at an alternative config file.
const CONFIG_ENV: &str = "CHUNKYARD_CONFIG";

/// Agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Address the HTTP server binds to.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// HTTP server port (0 = auto-assign).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory uploaded files are written to.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Bytes copied per step when streaming a chunk body to disk.
    #[serde(default = "default_copy_buffer_size")]
    pub copy_buffer_size: usize,

    /// Seconds a chunk body may stall before the request fails.
    #[serde(default = "default_body_timeout_secs")]
    pub body_timeout_secs: u64,
}

fn default_bind() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8080
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./uploads")
}

fn default_copy_buffer_size() -> usize {
    COPY_BUFFER_SIZE
}

fn default_body_timeout_secs() -> u64 {
    BODY_READ_TIMEOUT.as_secs()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            upload_dir: default_upload_dir(),
            copy_buffer_size: default_copy_buffer_size(),
            body_timeout_secs: default_body_timeout_secs(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    /// Loads configuration from `path`, writing defaults there if missing.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn body_timeout(&self) -> Duration {
        Duration::from_secs(self.body_timeout_secs)
    }
}

/// Returns the configuration file path.
fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return PathBuf::from(path);
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("chunkyard").join("agent.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("chunkyard")
            .join("agent.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.upload_dir, PathBuf::from("./uploads"));
        assert_eq!(config.copy_buffer_size, 256 * 1024);
        assert_eq!(config.body_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn config_partial_toml() {
        // Only specify the port, rest should use defaults.
        let config: Config = toml::from_str("port = 9000").unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.body_timeout_secs, 120);
    }

    #[test]
    fn missing_file_writes_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("agent.toml");

        let config = Config::load_from(&path).unwrap();

        assert_eq!(config, Config::default());
        assert!(path.exists());
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn config_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("agent.toml");
        let config = Config {
            bind: "127.0.0.1".into(),
            port: 0,
            upload_dir: "/srv/incoming".into(),
            copy_buffer_size: 4096,
            body_timeout_secs: 5,
        };

        config.save_to(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("agent.toml");
        std::fs::write(&path, "port = \"not a number\"").unwrap();

        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn config_path_not_empty() {
        assert!(!config_path().as_os_str().is_empty());
    }
}
