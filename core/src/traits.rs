//! Core traits defining Tidepool interfaces
//!
//! These are the contracts the client core needs from the outside world: a
//! provider that owns identity and transaction submission, and the program
//! interface of the pool living on the ledger.

use crate::error::{ProviderError, TidepoolError};
use crate::types::*;
use async_trait::async_trait;

/// Result type for Tidepool operations
pub type TidepoolResult<T> = Result<T, TidepoolError>;

/// Result type for a single provider call
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Wallet/identity provider through which the ledger is reached
#[async_trait]
pub trait LedgerProvider: Send + Sync {
    /// Accounts the provider exposes to this client
    async fn accounts(&self) -> ProviderResult<Vec<Address>>;

    /// Current balance of an account
    async fn balance(&self, address: &Address) -> ProviderResult<Amount>;

    /// Submit a transaction on behalf of `from`
    async fn submit(&self, from: &Address, request: TransactionRequest) -> ProviderResult<TxHandle>;

    /// Suspend until the transaction is included in a block
    ///
    /// Inclusion is not success: the receipt may carry
    /// [`TxStatus::Reverted`].
    async fn await_inclusion(&self, handle: &TxHandle) -> ProviderResult<Receipt>;

    /// Revoke the provider-side session
    async fn disconnect(&self) -> ProviderResult<()>;
}

/// Program interface of a funding pool
///
/// Reads are answered for the pool owned by `owner`. Writes are pure
/// encoders: each returns exactly one transaction to submit through a
/// provider session.
#[async_trait]
pub trait PoolProgram: Send + Sync {
    /// Address of the pool program on the ledger
    fn address(&self) -> Address;

    /// Remaining balance of the owner's pool
    async fn withdrawable(&self, owner: &Address) -> ProviderResult<Amount>;

    /// Funds the owner has received from other pools and can collect
    async fn collectable(&self, owner: &Address) -> ProviderResult<Amount>;

    /// Amount disbursed to all receivers with each block
    async fn amount_per_block(&self, owner: &Address) -> ProviderResult<Amount>;

    /// Receivers of the owner's pool in insertion order
    async fn receivers(&self, owner: &Address) -> ProviderResult<Vec<Receiver>>;

    fn set_amount_per_block(&self, amount: Amount) -> TransactionRequest {
        TransactionRequest::new(self.address(), Call::SetAmountPerBlock { amount })
    }

    fn set_receiver(&self, receiver: Address, weight: u32) -> TransactionRequest {
        TransactionRequest::new(self.address(), Call::SetReceiver { receiver, weight })
    }

    fn top_up(&self, value: Amount) -> TransactionRequest {
        TransactionRequest::new(self.address(), Call::TopUp).with_value(value)
    }

    fn collect(&self) -> TransactionRequest {
        TransactionRequest::new(self.address(), Call::Collect)
    }
}

/// Control surface of a development ledger
#[cfg(feature = "dev-tools")]
#[async_trait]
pub trait DevControl: Send + Sync {
    /// Mine `blocks` blocks, including every pending transaction in the
    /// first one. Returns the new head.
    async fn mine_blocks(&self, blocks: u64) -> ProviderResult<BlockNumber>;
}
