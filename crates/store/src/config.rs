use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default TCP port of the store.
pub const DEFAULT_PORT: u16 = 9470;

/// Default upper bound for a single chunk or stream payload (64 MiB).
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding finalized artifacts and partial state.
    pub root: PathBuf,
    /// Port the server listens on (0 = OS-assigned).
    pub port: u16,
    /// Largest payload accepted in one PutChunk or stream message.
    pub max_chunk_size: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("vault"),
            port: DEFAULT_PORT,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.max_chunk_size, DEFAULT_MAX_CHUNK_SIZE);
        assert_eq!(cfg.root, PathBuf::from("vault"));
    }

    #[test]
    fn missing_fields_use_defaults() {
        let cfg: StoreConfig = serde_json::from_str(r#"{"port": 7000}"#).unwrap();
        assert_eq!(cfg.port, 7000);
        assert_eq!(cfg.max_chunk_size, DEFAULT_MAX_CHUNK_SIZE);
    }
}
