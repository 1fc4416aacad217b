//! Pool program interface of the development ledger

use async_trait::async_trait;
use std::sync::Arc;
use tidepool_core::{Address, Amount, PoolProgram, ProviderResult, Receiver};

use crate::ledger::DevLedger;

/// [`PoolProgram`] answered straight from a [`DevLedger`]
#[derive(Clone)]
pub struct DevPool {
    ledger: Arc<DevLedger>,
}

impl DevPool {
    pub fn new(ledger: Arc<DevLedger>) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &Arc<DevLedger> {
        &self.ledger
    }
}

#[async_trait]
impl PoolProgram for DevPool {
    fn address(&self) -> Address {
        self.ledger.config().pool_address
    }

    async fn withdrawable(&self, owner: &Address) -> ProviderResult<Amount> {
        self.ledger.withdrawable_of(owner)
    }

    async fn collectable(&self, owner: &Address) -> ProviderResult<Amount> {
        self.ledger.collectable_of(owner)
    }

    async fn amount_per_block(&self, owner: &Address) -> ProviderResult<Amount> {
        self.ledger.amount_per_block_of(owner)
    }

    async fn receivers(&self, owner: &Address) -> ProviderResult<Vec<Receiver>> {
        self.ledger.receivers_of(owner)
    }
}
