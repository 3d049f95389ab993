//! Server configuration management.
//!
//! Configuration is stored as TOML, at `$CHUNKVAULT_SERVER_CONFIG` when set,
//! otherwise:
//! - Linux: `~/.config/chunkvault/server.toml`
//! - Windows: `%APPDATA%/chunkvault/server.toml`

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use chunkvault_store::StoreConfig;
use serde::{Deserialize, Serialize};

/// Environment variable overriding the configuration path.
pub const CONFIG_ENV: &str = "CHUNKVAULT_SERVER_CONFIG";

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Address the listener binds to.
    #[serde(default = "default_bind")]
    pub bind: IpAddr,

    /// Store settings (root directory, port, payload limit).
    #[serde(default)]
    pub store: StoreConfig,
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            store: StoreConfig::default(),
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

    /// Socket address the server listens on.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.store.port)
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
        PathBuf::from(appdata).join("chunkvault").join("server.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("chunkvault")
            .join("server.toml")
    }
}
