//! Development ledger server

use crate::api::start_api_server;
use crate::config::DevnetConfig;
use crate::ledger::DevLedger;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

/// Development ledger with its HTTP API
pub struct DevnetServer {
    ledger: Arc<DevLedger>,
}

impl DevnetServer {
    pub fn new(config: DevnetConfig) -> Self {
        Self {
            ledger: Arc::new(DevLedger::new(config)),
        }
    }

    /// Serve until ctrl-c
    pub async fn start(&self) -> anyhow::Result<()> {
        let config = self.ledger.config().clone();
        info!("Starting {}...", config.chain_name);

        let timer = config
            .block_time_ms
            .filter(|ms| *ms > 0)
            .map(|ms| self.ledger.spawn_block_timer(Duration::from_millis(ms)));

        let api_ledger = self.ledger.clone();
        let api_addr = config.listen_addr.clone();
        let api_handle = tokio::spawn(async move {
            if let Err(e) = start_api_server(api_ledger, &api_addr).await {
                error!("API server error: {}", e);
            }
        });

        for account in &config.accounts {
            info!("Account {} ({})", account.address, account.balance);
        }
        info!("Auto mine: {}", config.auto_mine);

        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, stopping devnet...");
            }
            Err(e) => {
                error!("Error waiting for shutdown signal: {}", e);
            }
        }

        api_handle.abort();
        if let Some(timer) = timer {
            timer.abort();
        }

        info!("Devnet stopped at {}", self.ledger.head());

        Ok(())
    }

    pub fn ledger(&self) -> &Arc<DevLedger> {
        &self.ledger
    }
}

/// Builder for a [`DevnetServer`]
pub struct DevnetBuilder {
    config: DevnetConfig,
}

impl DevnetBuilder {
    pub fn new() -> Self {
        Self {
            config: DevnetConfig::devnet(10),
        }
    }

    pub fn config(mut self, config: DevnetConfig) -> Self {
        self.config = config;
        self
    }

    pub fn listen_addr(mut self, addr: &str) -> Self {
        self.config.listen_addr = addr.to_string();
        self
    }

    pub fn block_time_ms(mut self, ms: u64) -> Self {
        self.config.block_time_ms = Some(ms);
        self
    }

    pub fn manual_mining(mut self) -> Self {
        self.config.auto_mine = false;
        self
    }

    pub fn build(self) -> DevnetServer {
        DevnetServer::new(self.config)
    }
}

impl Default for DevnetBuilder {
    fn default() -> Self {
        Self::new()
    }
}
