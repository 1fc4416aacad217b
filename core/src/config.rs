//! Configuration types for Tidepool clients

use crate::error::TidepoolError;
use crate::traits::TidepoolResult;
use crate::types::Address;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Address of the pool program on the development ledger
pub const DEFAULT_POOL_ADDRESS: Address = Address([
    0x0e, 0x22, 0xb5, 0x7c, 0x7e, 0x69, 0xd1, 0xb6, 0x2c, 0x9e, 0x4c, 0x88, 0xbb, 0x63, 0xb0,
    0x35, 0x7a, 0x90, 0x5d, 0x1e,
]);

/// Revision shown when a source location names none
pub const DEFAULT_PROJECT_REVISION: &str = "master";

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the ledger node API
    pub node_url: String,

    /// Address of the pool program
    pub pool_address: Address,

    /// Gas limit attached to top-up transactions
    pub top_up_gas_limit: u64,

    /// How long to wait for a transaction to be included
    pub inclusion_timeout_ms: u64,

    /// Receipt polling interval while waiting for inclusion
    pub poll_interval_ms: u64,

    /// Revision used by source routes without one
    pub default_revision: String,

    /// Logging level
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            node_url: "http://127.0.0.1:8545".to_string(),
            pool_address: DEFAULT_POOL_ADDRESS,
            top_up_gas_limit: 200 * 1000,
            inclusion_timeout_ms: 30_000,
            poll_interval_ms: 250,
            default_revision: DEFAULT_PROJECT_REVISION.to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn from_json(json: &str) -> TidepoolResult<Self> {
        serde_json::from_str(json).map_err(|e| TidepoolError::Config(e.to_string()))
    }

    pub fn to_json(&self) -> TidepoolResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load from a JSON file
    pub fn load(path: &Path) -> TidepoolResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TidepoolError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: &Path) -> TidepoolResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_pool_address() {
        assert_eq!(
            DEFAULT_POOL_ADDRESS.to_hex(),
            "0x0e22b57c7e69d1b62c9e4c88bb63b0357a905d1e"
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = ClientConfig::from_json(r#"{"node_url": "http://node:9000"}"#).unwrap();
        assert_eq!(config.node_url, "http://node:9000");
        assert_eq!(config.top_up_gas_limit, 200_000);
        assert_eq!(config.default_revision, "master");
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let err = ClientConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, TidepoolError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let config = ClientConfig {
            poll_interval_ms: 10,
            ..Default::default()
        };
        file.write_all(config.to_json().unwrap().as_bytes()).unwrap();

        let loaded = ClientConfig::load(file.path()).unwrap();
        assert_eq!(loaded.poll_interval_ms, 10);
        assert_eq!(loaded.pool_address, DEFAULT_POOL_ADDRESS);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::load_or_default(&dir.path().join("missing.json")).unwrap();
        assert_eq!(config.node_url, ClientConfig::default().node_url);
    }
}
