//! Development ledger configuration and genesis

use serde::{Deserialize, Serialize};
use std::path::Path;
use tidepool_core::{Address, Amount, TidepoolError, TidepoolResult, DEFAULT_POOL_ADDRESS};

/// Balance of every generated development account
pub const DEV_ACCOUNT_BALANCE: Amount = Amount(1_000_000_000_000_000_000);

/// Minimum gas a top up must carry to execute
pub const TOP_UP_INTRINSIC_GAS: u64 = 50_000;

/// Genesis account entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub address: Address,
    pub balance: Amount,
}

/// Development ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DevnetConfig {
    /// Chain name
    pub chain_name: String,
    /// API listen address
    pub listen_addr: String,
    /// Funded accounts, in the order the provider exposes them
    pub accounts: Vec<GenesisAccount>,
    /// Address the pool program is deployed at
    pub pool_address: Address,
    /// Mine a block for every submitted transaction
    pub auto_mine: bool,
    /// Background block interval; no timer when unset
    pub block_time_ms: Option<u64>,
    /// Upper bound for `await_inclusion`
    pub inclusion_timeout_ms: u64,
    /// Maximum receivers per pool
    pub max_receivers: usize,
    /// Logging level
    pub log_level: String,
}

impl Default for DevnetConfig {
    fn default() -> Self {
        Self {
            chain_name: "Tidepool Devnet".to_string(),
            listen_addr: "127.0.0.1:8545".to_string(),
            accounts: vec![],
            pool_address: DEFAULT_POOL_ADDRESS,
            auto_mine: true,
            block_time_ms: None,
            inclusion_timeout_ms: 30_000,
            max_receivers: 100,
            log_level: "info".to_string(),
        }
    }
}

impl DevnetConfig {
    /// Development setup with `count` deterministic funded accounts
    pub fn devnet(count: usize) -> Self {
        Self {
            accounts: (0..count)
                .map(|index| GenesisAccount {
                    address: dev_address(index),
                    balance: DEV_ACCOUNT_BALANCE,
                })
                .collect(),
            ..Default::default()
        }
    }

    pub fn with_manual_mining(mut self) -> Self {
        self.auto_mine = false;
        self
    }

    pub fn with_max_receivers(mut self, max: usize) -> Self {
        self.max_receivers = max;
        self
    }

    pub fn with_inclusion_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.inclusion_timeout_ms = timeout_ms;
        self
    }

    /// Sum of all genesis balances
    pub fn total_supply(&self) -> Amount {
        self.accounts
            .iter()
            .fold(Amount::ZERO, |total, account| total.saturating_add(account.balance))
    }

    pub fn to_json(&self) -> TidepoolResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> TidepoolResult<Self> {
        serde_json::from_str(json).map_err(|e| TidepoolError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> TidepoolResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TidepoolError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }
}

/// Deterministic address of development account `index`
pub fn dev_address(index: usize) -> Address {
    let hash = blake3::hash(format!("tidepool-dev-account-{}", index).as_bytes());
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&hash.as_bytes()[..20]);
    Address(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_accounts_are_deterministic() {
        let a = DevnetConfig::devnet(3);
        let b = DevnetConfig::devnet(3);
        assert_eq!(a.accounts, b.accounts);
        assert_ne!(a.accounts[0].address, a.accounts[1].address);
        assert_eq!(a.total_supply(), Amount(3 * DEV_ACCOUNT_BALANCE.0));
    }

    #[test]
    fn test_config_json() {
        let config = DevnetConfig::devnet(2).with_manual_mining();
        let json = config.to_json().unwrap();
        let restored = DevnetConfig::from_json(&json).unwrap();

        assert_eq!(restored.accounts, config.accounts);
        assert!(!restored.auto_mine);
        assert_eq!(restored.pool_address, DEFAULT_POOL_ADDRESS);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = DevnetConfig::from_json(r#"{"chain_name": "local"}"#).unwrap();
        assert_eq!(config.chain_name, "local");
        assert!(config.auto_mine);
        assert!(config.accounts.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devnet.json");
        std::fs::write(&path, DevnetConfig::devnet(1).to_json().unwrap()).unwrap();

        let config = DevnetConfig::load(&path).unwrap();
        assert_eq!(config.accounts.len(), 1);
        assert!(matches!(
            DevnetConfig::load(&dir.path().join("missing.json")),
            Err(TidepoolError::Config(_))
        ));
    }
}
