//! Provider sessions

use std::fmt;
use std::sync::Arc;
use tidepool_core::{
    Account, Address, LedgerProvider, ProviderResult, Receipt, TransactionRequest, TxHandle,
};

/// Authority to transact as the connected account
///
/// Handed out by [`crate::ConnectionManager::session`]. A session outlives
/// neither a disconnect nor a reconnect: check it with
/// [`crate::ConnectionManager::is_current`] before using it.
#[derive(Clone)]
pub struct Session {
    account: Account,
    provider: Arc<dyn LedgerProvider>,
    epoch: u64,
}

impl Session {
    pub(crate) fn new(account: Account, provider: Arc<dyn LedgerProvider>, epoch: u64) -> Self {
        Self {
            account,
            provider,
            epoch,
        }
    }

    pub(crate) fn with_account(&self, account: Account) -> Self {
        Self {
            account,
            provider: self.provider.clone(),
            epoch: self.epoch,
        }
    }

    pub fn address(&self) -> Address {
        self.account.address
    }

    /// Account as read when the session was established
    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn provider(&self) -> &Arc<dyn LedgerProvider> {
        &self.provider
    }

    /// Submit a transaction signed by the session's account
    pub async fn submit(&self, request: TransactionRequest) -> ProviderResult<TxHandle> {
        self.provider.submit(&self.account.address, request).await
    }

    pub async fn await_inclusion(&self, handle: &TxHandle) -> ProviderResult<Receipt> {
        self.provider.await_inclusion(handle).await
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("account", &self.account)
            .field("epoch", &self.epoch)
            .finish()
    }
}
