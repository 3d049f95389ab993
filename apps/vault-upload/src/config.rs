//! Uploader configuration management.
//!
//! Configuration is stored as TOML, at `$CHUNKVAULT_UPLOAD_CONFIG` when set,
//! otherwise:
//! - Linux: `~/.config/chunkvault/upload.toml`
//! - Windows: `%APPDATA%/chunkvault/upload.toml`

use std::path::{Path, PathBuf};

use chunkvault_uploader::UploaderConfig;
use serde::{Deserialize, Serialize};

/// Environment variable overriding the configuration path.
pub const CONFIG_ENV: &str = "CHUNKVAULT_UPLOAD_CONFIG";

/// Upload client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Store address as `host:port`.
    #[serde(default = "default_server")]
    pub server: String,

    /// Chunking, concurrency and retry settings.
    #[serde(default)]
    pub transfer: UploaderConfig,
}

fn default_server() -> String {
    "127.0.0.1:9470".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: default_server(),
            transfer: UploaderConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    /// Loads `path`, writing the default configuration there when absent.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
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
        PathBuf::from(appdata).join("chunkvault").join("upload.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("chunkvault")
            .join("upload.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.server, "127.0.0.1:9470");
        assert_eq!(config.transfer.concurrency, 4);
        assert_eq!(config.transfer.max_attempts, 5);
    }

    #[test]
    fn config_partial_toml() {
        let toml_str = r#"
server = "vault.local:9000"

[transfer]
chunk_size = 1048576
concurrency = 8
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server, "vault.local:9000");
        assert_eq!(config.transfer.chunk_size, 1_048_576);
        assert_eq!(config.transfer.concurrency, 8);
        assert_eq!(config.transfer.max_attempts, 5);
    }

    #[test]
    fn config_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("upload.toml");

        let config = Config {
            server: "10.0.0.2:9470".into(),
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("upload.toml");
        assert_eq!(Config::load_from(&path).unwrap(), Config::default());
        assert!(path.exists());
    }
}
