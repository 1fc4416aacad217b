//! In-memory development ledger
//!
//! Hosts accounts and the funding pool program. Submitted transactions wait
//! in a pending list until a block is mined; every mined block executes them
//! in submission order and then disburses each pool to its receivers.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tidepool_core::{
    Address, Amount, BlockNumber, Call, CallKind, DevControl, Hash, LedgerProvider, Nonce,
    ProviderError, ProviderResult, Receipt, Receiver, Timestamp, TransactionRequest, TxHandle,
    TxId, TxStatus,
};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{DevnetConfig, TOP_UP_INTRINSIC_GAS};

const UNKNOWN_ACCOUNT: i64 = 4100;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;
const INJECTED_FAILURE: i64 = -32000;

/// Reads that can be made to fail once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadKind {
    Accounts,
    Balance,
    Withdrawable,
    Collectable,
    AmountPerBlock,
    Receivers,
}

/// Funding pool of one owner
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolState {
    pub balance: Amount,
    pub amount_per_block: Amount,
    /// Receivers in insertion order
    pub receivers: Vec<Receiver>,
}

#[derive(Debug, Default)]
struct Faults {
    revert_next: Vec<CallKind>,
    revert_receivers: HashSet<Address>,
    fail_reads: HashSet<ReadKind>,
    fail_next_submit: bool,
    hide_accounts: bool,
}

#[derive(Debug, Clone)]
struct AccountEntry {
    balance: Amount,
    nonce: Nonce,
}

#[derive(Debug, Clone)]
struct PendingTx {
    tx_id: TxId,
    from: Address,
    request: TransactionRequest,
}

#[derive(Debug, Default)]
struct LedgerState {
    head: BlockNumber,
    order: Vec<Address>,
    accounts: HashMap<Address, AccountEntry>,
    collectable: HashMap<Address, Amount>,
    pools: HashMap<Address, PoolState>,
    pending: Vec<PendingTx>,
    receipts: HashMap<TxId, Receipt>,
    faults: Faults,
    disconnects: u64,
}

impl LedgerState {
    fn mine_block(&mut self, pool_address: Address, max_receivers: usize) -> BlockNumber {
        self.head = self.head.next();
        let block = self.head;

        for tx in std::mem::take(&mut self.pending) {
            let status = match self.execute(&tx, pool_address, max_receivers) {
                Ok(()) => {
                    debug!("{} {} included in {}", tx.request.call.kind(), tx.tx_id, block);
                    TxStatus::Included
                }
                Err(reason) => {
                    warn!("{} {} reverted in {}: {}", tx.request.call.kind(), tx.tx_id, block, reason);
                    TxStatus::Reverted
                }
            };
            self.receipts.insert(
                tx.tx_id,
                Receipt {
                    tx_id: tx.tx_id,
                    status,
                    block,
                },
            );
        }

        self.disburse();
        block
    }

    /// Apply one transaction; on `Err` nothing has been modified.
    fn execute(
        &mut self,
        tx: &PendingTx,
        pool_address: Address,
        max_receivers: usize,
    ) -> Result<(), String> {
        let kind = tx.request.call.kind();

        if let Some(pos) = self.faults.revert_next.iter().position(|k| *k == kind) {
            self.faults.revert_next.remove(pos);
            return Err(format!("injected revert of {}", kind));
        }
        if tx.request.to != pool_address {
            return Err(format!("no program at {}", tx.request.to));
        }
        if !tx.request.value.is_zero() && kind != CallKind::TopUp {
            return Err(format!("{} is not payable", kind));
        }

        match &tx.request.call {
            Call::SetAmountPerBlock { amount } => {
                self.pools.entry(tx.from).or_default().amount_per_block = *amount;
            }
            Call::SetReceiver { receiver, weight } => {
                if self.faults.revert_receivers.contains(receiver) {
                    return Err(format!("receiver {} refused", receiver));
                }
                let pool = self.pools.entry(tx.from).or_default();
                let existing = pool.receivers.iter().position(|r| r.address == *receiver);
                match existing {
                    Some(index) if *weight == 0 => {
                        pool.receivers.remove(index);
                    }
                    Some(index) => pool.receivers[index].weight = *weight,
                    None if *weight == 0 => {}
                    None => {
                        if pool.receivers.len() >= max_receivers {
                            return Err(format!("pool already has {} receivers", max_receivers));
                        }
                        pool.receivers.push(Receiver::new(*receiver, *weight));
                    }
                }
            }
            Call::TopUp => {
                if let Some(gas) = tx.request.gas_limit {
                    if gas < TOP_UP_INTRINSIC_GAS {
                        return Err(format!("out of gas ({} < {})", gas, TOP_UP_INTRINSIC_GAS));
                    }
                }
                let value = tx.request.value;
                let account = self
                    .accounts
                    .get_mut(&tx.from)
                    .ok_or_else(|| format!("unknown sender {}", tx.from))?;
                let Some(remaining) = account.balance.checked_sub(value) else {
                    return Err(format!("insufficient balance: {} < {}", account.balance, value));
                };
                account.balance = remaining;
                let pool = self.pools.entry(tx.from).or_default();
                pool.balance = pool.balance.saturating_add(value);
            }
            Call::Collect => {
                let funds = self.collectable.remove(&tx.from).unwrap_or(Amount::ZERO);
                let account = self
                    .accounts
                    .get_mut(&tx.from)
                    .ok_or_else(|| format!("unknown sender {}", tx.from))?;
                account.balance = account.balance.saturating_add(funds);
            }
        }

        Ok(())
    }

    /// Pay out one block of every pool, pro rata by receiver weight.
    /// Rounding remainders stay in the pool.
    fn disburse(&mut self) {
        let mut owners: Vec<Address> = self.pools.keys().copied().collect();
        owners.sort();

        for owner in owners {
            let Some(pool) = self.pools.get_mut(&owner) else {
                continue;
            };
            let total_weight: u128 = pool.receivers.iter().map(|r| r.weight as u128).sum();
            let budget = pool.amount_per_block.0.min(pool.balance.0);
            if total_weight == 0 || budget == 0 {
                continue;
            }

            let mut paid = 0u128;
            for receiver in &pool.receivers {
                let share = budget.saturating_mul(receiver.weight as u128) / total_weight;
                if share == 0 {
                    continue;
                }
                paid += share;
                let funds = self.collectable.entry(receiver.address).or_default();
                *funds = funds.saturating_add(Amount(share));
            }
            pool.balance = Amount(pool.balance.0 - paid);
        }
    }
}

/// Development ledger
pub struct DevLedger {
    config: DevnetConfig,
    state: RwLock<LedgerState>,
    included: Notify,
    started_at: Timestamp,
}

impl DevLedger {
    pub fn new(config: DevnetConfig) -> Self {
        let mut state = LedgerState::default();
        for account in &config.accounts {
            if !state.accounts.contains_key(&account.address) {
                state.order.push(account.address);
            }
            state.accounts.insert(
                account.address,
                AccountEntry {
                    balance: account.balance,
                    nonce: Nonce::default(),
                },
            );
        }

        info!(
            "Devnet {} with {} accounts, pool program at {}",
            config.chain_name,
            state.order.len(),
            config.pool_address
        );

        Self {
            config,
            state: RwLock::new(state),
            included: Notify::new(),
            started_at: Timestamp::now(),
        }
    }

    pub fn config(&self) -> &DevnetConfig {
        &self.config
    }

    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    pub fn head(&self) -> BlockNumber {
        self.state.read().head
    }

    pub fn pending_count(&self) -> usize {
        self.state.read().pending.len()
    }

    /// Receipt of an included transaction
    pub fn receipt(&self, tx_id: &TxId) -> Option<Receipt> {
        self.state.read().receipts.get(tx_id).cloned()
    }

    /// Whether the transaction is known, pending or included
    pub fn is_known(&self, tx_id: &TxId) -> bool {
        let state = self.state.read();
        state.receipts.contains_key(tx_id) || state.pending.iter().any(|tx| tx.tx_id == *tx_id)
    }

    pub fn pool(&self, owner: &Address) -> PoolState {
        self.state.read().pools.get(owner).cloned().unwrap_or_default()
    }

    pub fn disconnect_count(&self) -> u64 {
        self.state.read().disconnects
    }

    // ============ Fault injection ============

    /// Revert the next executed call of `kind`
    pub fn revert_next(&self, kind: CallKind) {
        self.state.write().faults.revert_next.push(kind);
    }

    /// Revert every `set_receiver` naming `receiver`
    pub fn revert_receiver(&self, receiver: Address) {
        self.state.write().faults.revert_receivers.insert(receiver);
    }

    /// Fail the next read of `kind`
    pub fn fail_next_read(&self, kind: ReadKind) {
        self.state.write().faults.fail_reads.insert(kind);
    }

    /// Reject the next submission before it reaches the pending list
    pub fn fail_next_submit(&self) {
        self.state.write().faults.fail_next_submit = true;
    }

    /// Expose no accounts to providers
    pub fn hide_accounts(&self, hidden: bool) {
        self.state.write().faults.hide_accounts = hidden;
    }

    fn check_read(&self, kind: ReadKind) -> ProviderResult<()> {
        if self.state.write().faults.fail_reads.remove(&kind) {
            return Err(ProviderError::rejected(
                INJECTED_FAILURE,
                format!("injected failure reading {:?}", kind),
            ));
        }
        Ok(())
    }

    // ============ Pool program reads ============

    pub fn withdrawable_of(&self, owner: &Address) -> ProviderResult<Amount> {
        self.check_read(ReadKind::Withdrawable)?;
        Ok(self.pool(owner).balance)
    }

    pub fn collectable_of(&self, owner: &Address) -> ProviderResult<Amount> {
        self.check_read(ReadKind::Collectable)?;
        Ok(self
            .state
            .read()
            .collectable
            .get(owner)
            .copied()
            .unwrap_or_default())
    }

    pub fn amount_per_block_of(&self, owner: &Address) -> ProviderResult<Amount> {
        self.check_read(ReadKind::AmountPerBlock)?;
        Ok(self.pool(owner).amount_per_block)
    }

    pub fn receivers_of(&self, owner: &Address) -> ProviderResult<Vec<Receiver>> {
        self.check_read(ReadKind::Receivers)?;
        Ok(self.pool(owner).receivers)
    }

    // ============ Blocks ============

    /// Mine `blocks` blocks; pending transactions land in the first one
    pub fn mine(&self, blocks: u64) -> BlockNumber {
        let head = {
            let mut state = self.state.write();
            for _ in 0..blocks {
                state.mine_block(self.config.pool_address, self.config.max_receivers);
            }
            state.head
        };
        if blocks > 0 {
            debug!("Mined {} block(s), head {}", blocks, head);
            self.included.notify_waiters();
        }
        head
    }

    /// Mine one block every `interval` until the handle is aborted
    pub fn spawn_block_timer(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let ledger = self.clone();
        info!("Block timer started ({:?})", interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                ledger.mine(1);
            }
        })
    }
}

fn transaction_id(from: &Address, nonce: Nonce, request: &TransactionRequest) -> ProviderResult<TxId> {
    let bytes = bincode::serialize(&(from, nonce, request))
        .map_err(|e| ProviderError::rejected(INTERNAL_ERROR, e.to_string()))?;
    Ok(Hash(*blake3::hash(&bytes).as_bytes()))
}

#[async_trait]
impl LedgerProvider for DevLedger {
    async fn accounts(&self) -> ProviderResult<Vec<Address>> {
        self.check_read(ReadKind::Accounts)?;
        let state = self.state.read();
        if state.faults.hide_accounts {
            return Ok(vec![]);
        }
        Ok(state.order.clone())
    }

    async fn balance(&self, address: &Address) -> ProviderResult<Amount> {
        self.check_read(ReadKind::Balance)?;
        Ok(self
            .state
            .read()
            .accounts
            .get(address)
            .map(|account| account.balance)
            .unwrap_or_default())
    }

    async fn submit(&self, from: &Address, request: TransactionRequest) -> ProviderResult<TxHandle> {
        let tx_id = {
            let mut state = self.state.write();
            if std::mem::take(&mut state.faults.fail_next_submit) {
                return Err(ProviderError::rejected(
                    INJECTED_FAILURE,
                    "injected submission failure",
                ));
            }
            let account = state.accounts.get_mut(from).ok_or_else(|| {
                ProviderError::rejected(UNKNOWN_ACCOUNT, format!("unknown account {}", from))
            })?;
            let nonce = account.nonce;
            account.nonce = nonce.next();

            let tx_id = transaction_id(from, nonce, &request)?;
            debug!("Accepted {} {} from {}", request.call.kind(), tx_id, from);
            state.pending.push(PendingTx {
                tx_id,
                from: *from,
                request,
            });
            tx_id
        };

        if self.config.auto_mine {
            self.mine(1);
        }

        Ok(TxHandle { tx_id })
    }

    async fn await_inclusion(&self, handle: &TxHandle) -> ProviderResult<Receipt> {
        let deadline = tokio::time::Instant::now()
            + Duration::from_millis(self.config.inclusion_timeout_ms);

        loop {
            let notified = self.included.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.state.read();
                if let Some(receipt) = state.receipts.get(&handle.tx_id) {
                    return Ok(receipt.clone());
                }
                if !state.pending.iter().any(|tx| tx.tx_id == handle.tx_id) {
                    return Err(ProviderError::rejected(
                        INVALID_PARAMS,
                        format!("unknown transaction {}", handle.tx_id),
                    ));
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(ProviderError::Timeout(format!(
                    "transaction {} not included after {}ms",
                    handle.tx_id, self.config.inclusion_timeout_ms
                )));
            }
        }
    }

    async fn disconnect(&self) -> ProviderResult<()> {
        self.state.write().disconnects += 1;
        debug!("Provider session closed");
        Ok(())
    }
}

#[async_trait]
impl DevControl for DevLedger {
    async fn mine_blocks(&self, blocks: u64) -> ProviderResult<BlockNumber> {
        Ok(self.mine(blocks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{dev_address, DEV_ACCOUNT_BALANCE};

    fn ledger(config: DevnetConfig) -> (DevLedger, Address, Address) {
        let ledger = DevLedger::new(config);
        (ledger, dev_address(0), dev_address(1))
    }

    fn call(ledger: &DevLedger, call: Call) -> TransactionRequest {
        TransactionRequest::new(ledger.config().pool_address, call)
    }

    async fn execute(ledger: &DevLedger, from: &Address, request: TransactionRequest) -> Receipt {
        let handle = ledger.submit(from, request).await.unwrap();
        ledger.await_inclusion(&handle).await.unwrap()
    }

    #[tokio::test]
    async fn test_accounts_in_genesis_order() {
        let (ledger, alice, bob) = ledger(DevnetConfig::devnet(2));
        assert_eq!(ledger.accounts().await.unwrap(), vec![alice, bob]);
        assert_eq!(ledger.balance(&alice).await.unwrap(), DEV_ACCOUNT_BALANCE);

        ledger.hide_accounts(true);
        assert!(ledger.accounts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_top_up_moves_value_into_pool() {
        let (ledger, alice, _) = ledger(DevnetConfig::devnet(1));
        let request = call(&ledger, Call::TopUp).with_value(Amount(500));

        let receipt = execute(&ledger, &alice, request).await;

        assert_eq!(receipt.status, TxStatus::Included);
        assert_eq!(ledger.pool(&alice).balance, Amount(500));
        assert_eq!(
            ledger.balance(&alice).await.unwrap(),
            Amount(DEV_ACCOUNT_BALANCE.0 - 500)
        );
    }

    #[tokio::test]
    async fn test_top_up_reverts_without_funds_or_gas() {
        let (ledger, alice, _) = ledger(DevnetConfig::devnet(1));

        let too_much = call(&ledger, Call::TopUp).with_value(Amount(DEV_ACCOUNT_BALANCE.0 + 1));
        assert!(execute(&ledger, &alice, too_much).await.is_reverted());

        let no_gas = call(&ledger, Call::TopUp)
            .with_value(Amount(1))
            .with_gas_limit(TOP_UP_INTRINSIC_GAS - 1);
        assert!(execute(&ledger, &alice, no_gas).await.is_reverted());

        assert_eq!(ledger.pool(&alice), PoolState::default());
        assert_eq!(ledger.balance(&alice).await.unwrap(), DEV_ACCOUNT_BALANCE);
    }

    #[tokio::test]
    async fn test_value_on_non_payable_call_reverts() {
        let (ledger, alice, _) = ledger(DevnetConfig::devnet(1));
        let request = call(&ledger, Call::Collect).with_value(Amount(1));
        assert!(execute(&ledger, &alice, request).await.is_reverted());
    }

    #[tokio::test]
    async fn test_set_receiver_replaces_and_removes() {
        let (ledger, alice, bob) = ledger(DevnetConfig::devnet(2));
        let carol = dev_address(7);

        for (receiver, weight) in [(bob, 1), (carol, 1), (bob, 3)] {
            let request = call(&ledger, Call::SetReceiver { receiver, weight });
            execute(&ledger, &alice, request).await;
        }
        assert_eq!(
            ledger.pool(&alice).receivers,
            vec![Receiver::new(bob, 3), Receiver::new(carol, 1)]
        );

        let remove = call(&ledger, Call::SetReceiver { receiver: bob, weight: 0 });
        execute(&ledger, &alice, remove).await;
        assert_eq!(ledger.pool(&alice).receivers, vec![Receiver::new(carol, 1)]);
    }

    #[tokio::test]
    async fn test_receiver_cap() {
        let (ledger, alice, _) = ledger(DevnetConfig::devnet(1).with_max_receivers(1));

        let first = call(&ledger, Call::SetReceiver { receiver: dev_address(5), weight: 1 });
        let second = call(&ledger, Call::SetReceiver { receiver: dev_address(6), weight: 1 });

        assert!(!execute(&ledger, &alice, first).await.is_reverted());
        assert!(execute(&ledger, &alice, second).await.is_reverted());
        assert_eq!(ledger.pool(&alice).receivers.len(), 1);
    }

    #[tokio::test]
    async fn test_blocks_disburse_pro_rata_and_collect() {
        let (ledger, alice, bob) = ledger(DevnetConfig::devnet(2));
        let carol = dev_address(7);

        execute(&ledger, &alice, call(&ledger, Call::TopUp).with_value(Amount(1_000))).await;
        execute(&ledger, &alice, call(&ledger, Call::SetReceiver { receiver: bob, weight: 2 })).await;
        execute(&ledger, &alice, call(&ledger, Call::SetReceiver { receiver: carol, weight: 1 })).await;
        execute(&ledger, &alice, call(&ledger, Call::SetAmountPerBlock { amount: Amount(10) })).await;

        // the rate is active from the block that set it
        assert_eq!(ledger.collectable_of(&bob).unwrap(), Amount(6));
        assert_eq!(ledger.collectable_of(&carol).unwrap(), Amount(3));
        assert_eq!(ledger.pool(&alice).balance, Amount(991));

        ledger.mine_blocks(2).await.unwrap();
        assert_eq!(ledger.collectable_of(&bob).unwrap(), Amount(18));
        assert_eq!(ledger.pool(&alice).balance, Amount(973));

        let before = ledger.balance(&bob).await.unwrap();
        execute(&ledger, &bob, call(&ledger, Call::Collect)).await;
        // collect lands before this block's payout
        assert_eq!(ledger.balance(&bob).await.unwrap(), Amount(before.0 + 18));
        assert_eq!(ledger.collectable_of(&bob).unwrap(), Amount(6));
    }

    #[tokio::test]
    async fn test_disbursement_limited_by_balance() {
        let (ledger, alice, bob) = ledger(DevnetConfig::devnet(2));

        execute(&ledger, &alice, call(&ledger, Call::SetAmountPerBlock { amount: Amount(100) })).await;
        execute(&ledger, &alice, call(&ledger, Call::SetReceiver { receiver: bob, weight: 1 })).await;
        execute(&ledger, &alice, call(&ledger, Call::TopUp).with_value(Amount(150))).await;

        assert_eq!(ledger.pool(&alice).balance, Amount(50));
        ledger.mine(3);
        assert_eq!(ledger.pool(&alice).balance, Amount::ZERO);
        assert_eq!(ledger.collectable_of(&bob).unwrap(), Amount(150));
    }

    #[tokio::test]
    async fn test_manual_mining_and_inclusion_wait() {
        let (ledger, alice, _) = ledger(DevnetConfig::devnet(1).with_manual_mining());
        let ledger = Arc::new(ledger);

        let handle = ledger.submit(&alice, call(&ledger, Call::Collect)).await.unwrap();
        assert_eq!(ledger.pending_count(), 1);
        assert!(ledger.receipt(&handle.tx_id).is_none());

        let waiter = {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.await_inclusion(&handle).await })
        };
        tokio::task::yield_now().await;
        let head = ledger.mine_blocks(1).await.unwrap();

        let receipt = waiter.await.unwrap().unwrap();
        assert_eq!(receipt.block, head);
        assert_eq!(ledger.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_inclusion_times_out() {
        let config = DevnetConfig::devnet(1)
            .with_manual_mining()
            .with_inclusion_timeout_ms(20);
        let (ledger, alice, _) = ledger(config);

        let handle = ledger.submit(&alice, call(&ledger, Call::Collect)).await.unwrap();
        let err = ledger.await_inclusion(&handle).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_unknown_transaction_and_sender() {
        let (ledger, _, _) = ledger(DevnetConfig::devnet(1));

        let unknown = TxHandle { tx_id: Hash([9; 32]) };
        assert!(matches!(
            ledger.await_inclusion(&unknown).await,
            Err(ProviderError::Rejected { code: INVALID_PARAMS, .. })
        ));

        let stranger = dev_address(42);
        let err = ledger.submit(&stranger, call(&ledger, Call::Collect)).await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected { code: UNKNOWN_ACCOUNT, .. }));
    }

    #[tokio::test]
    async fn test_transaction_ids_are_unique_per_nonce() {
        let (ledger, alice, _) = ledger(DevnetConfig::devnet(1));
        let a = ledger.submit(&alice, call(&ledger, Call::Collect)).await.unwrap();
        let b = ledger.submit(&alice, call(&ledger, Call::Collect)).await.unwrap();
        assert_ne!(a.tx_id, b.tx_id);
    }

    #[tokio::test]
    async fn test_injected_faults_fire_once() {
        let (ledger, alice, bob) = ledger(DevnetConfig::devnet(2));

        ledger.fail_next_submit();
        assert!(ledger.submit(&alice, call(&ledger, Call::Collect)).await.is_err());
        assert!(ledger.submit(&alice, call(&ledger, Call::Collect)).await.is_ok());

        ledger.revert_next(CallKind::Collect);
        assert!(execute(&ledger, &alice, call(&ledger, Call::Collect)).await.is_reverted());
        assert!(!execute(&ledger, &alice, call(&ledger, Call::Collect)).await.is_reverted());

        ledger.fail_next_read(ReadKind::Receivers);
        assert!(ledger.receivers_of(&alice).is_err());
        assert!(ledger.receivers_of(&alice).is_ok());

        ledger.revert_receiver(bob);
        let request = call(&ledger, Call::SetReceiver { receiver: bob, weight: 1 });
        assert!(execute(&ledger, &alice, request).await.is_reverted());
    }

    #[tokio::test]
    async fn test_disconnect_is_counted() {
        let (ledger, _, _) = ledger(DevnetConfig::devnet(1));
        ledger.disconnect().await.unwrap();
        assert_eq!(ledger.disconnect_count(), 1);
    }
}
