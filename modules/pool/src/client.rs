//! Funding pool client
//!
//! Mutations follow a confirm-then-refresh protocol: every write is submitted
//! through the active session, every submitted write is awaited until it is
//! included, and the pool is re-read afterwards whether the writes
//! succeeded or not. The snapshot store therefore always ends up showing
//! ledger truth, even after a partial failure.

use futures::future::join_all;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tidepool_core::{
    Address, Amount, ClientConfig, PoolProgram, ProviderError, TidepoolError, TidepoolResult,
    TransactionRequest, TxHandle,
};
use tidepool_state::{RemoteData, RemoteReader, RemoteStore, Subscription};
use tidepool_wallet::ConnectionManager;
use tracing::{debug, info, warn};

use crate::data::{PoolData, PoolSettings};

/// Default gas limit attached to top ups
pub const DEFAULT_TOP_UP_GAS_LIMIT: u64 = 200 * 1000;

/// Snapshot store of a [`PoolClient`]
pub type PoolStore = RemoteStore<PoolData, TidepoolError>;

fn read_failed(field: &'static str) -> impl FnOnce(ProviderError) -> TidepoolError {
    move |source| TidepoolError::ReadFailed { field, source }
}

/// Client bound to the connected account's funding pool
pub struct PoolClient {
    program: Arc<dyn PoolProgram>,
    connection: Arc<ConnectionManager>,
    store: PoolStore,
    /// Generation of the most recently started refresh
    generation: Mutex<u64>,
    top_up_gas_limit: u64,
}

impl PoolClient {
    pub fn new(program: Arc<dyn PoolProgram>, connection: Arc<ConnectionManager>) -> Self {
        Self {
            program,
            connection,
            store: PoolStore::new(),
            generation: Mutex::new(0),
            top_up_gas_limit: DEFAULT_TOP_UP_GAS_LIMIT,
        }
    }

    pub fn from_config(
        program: Arc<dyn PoolProgram>,
        connection: Arc<ConnectionManager>,
        config: &ClientConfig,
    ) -> Self {
        Self::new(program, connection).with_top_up_gas_limit(config.top_up_gas_limit)
    }

    pub fn with_top_up_gas_limit(mut self, gas_limit: u64) -> Self {
        self.top_up_gas_limit = gas_limit;
        self
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Read-only view of the pool snapshot
    pub fn reader(&self) -> RemoteReader<PoolData, TidepoolError> {
        self.store.reader()
    }

    pub fn current(&self) -> RemoteData<PoolData, TidepoolError> {
        self.store.get()
    }

    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&RemoteData<PoolData, TidepoolError>) + Send + Sync + 'static,
    {
        self.store.subscribe(observer)
    }

    /// Re-read the pool and publish the result
    ///
    /// Only the most recently started refresh publishes; an older one that
    /// completes later still returns its result but leaves the store alone.
    pub async fn refresh(&self) -> TidepoolResult<PoolData> {
        let generation = {
            let mut latest = self.generation.lock();
            *latest += 1;
            self.store.set_loading();
            *latest
        };

        let result = match self.connection.session() {
            Ok(session) => self.read(session.address()).await,
            Err(e) => Err(e),
        };

        let latest = self.generation.lock();
        if *latest != generation {
            info!(
                "Discarding pool refresh {} superseded by refresh {}",
                generation, *latest
            );
            return result;
        }
        match &result {
            Ok(data) => {
                debug!("Pool refreshed: balance {}", data.balance);
                self.store.set_success(data.clone());
            }
            Err(e) => {
                warn!("Pool refresh failed: {}", e);
                self.store.set_error(e.clone());
            }
        }
        drop(latest);

        result
    }

    async fn read(&self, owner: Address) -> TidepoolResult<PoolData> {
        let program = &self.program;
        let (balance, collectable, amount_per_block, receivers) = tokio::try_join!(
            async { program.withdrawable(&owner).await.map_err(read_failed("balance")) },
            async { program.collectable(&owner).await.map_err(read_failed("collectable_funds")) },
            async {
                program
                    .amount_per_block(&owner)
                    .await
                    .map_err(read_failed("amount_per_block"))
            },
            async { program.receivers(&owner).await.map_err(read_failed("receivers")) },
        )?;

        Ok(PoolData::compose(balance, collectable, amount_per_block, receivers))
    }

    // ============ Mutations ============

    pub async fn update_amount_per_block(&self, amount: Amount) -> TidepoolResult<()> {
        let request = self.program.set_amount_per_block(amount);
        self.transact("update amount per block", vec![request]).await
    }

    /// Add every address as a receiver with weight 1, one write each
    pub async fn update_receivers(&self, addresses: &[Address]) -> TidepoolResult<()> {
        let requests = addresses
            .iter()
            .map(|address| self.program.set_receiver(*address, 1))
            .collect();
        self.transact("update receivers", requests).await
    }

    pub async fn top_up(&self, amount: Amount) -> TidepoolResult<()> {
        let request = self
            .program
            .top_up(amount)
            .with_gas_limit(self.top_up_gas_limit);
        self.transact("top up", vec![request]).await
    }

    pub async fn collect(&self) -> TidepoolResult<()> {
        let request = self.program.collect();
        self.transact("collect", vec![request]).await
    }

    /// Write whatever differs between `settings` and the last published
    /// snapshot; returns the number of writes submitted
    ///
    /// Refreshes first when no snapshot has been published yet.
    pub async fn apply_settings(&self, settings: &PoolSettings) -> TidepoolResult<usize> {
        let current = match self.store.get() {
            RemoteData::Success(data) => data,
            _ => self.refresh().await?,
        };

        let mut requests = Vec::new();
        if settings.amount_per_block != current.amount_per_block {
            requests.push(self.program.set_amount_per_block(settings.amount_per_block));
        }
        let (added, removed) = settings.receiver_changes(&current);
        requests.extend(added.iter().map(|a| self.program.set_receiver(*a, 1)));
        requests.extend(removed.iter().map(|a| self.program.set_receiver(*a, 0)));

        if requests.is_empty() {
            debug!("Pool settings unchanged");
            return Ok(0);
        }

        let count = requests.len();
        self.transact("apply settings", requests).await?;
        Ok(count)
    }

    /// Submit `requests` in order, await every inclusion, then refresh.
    ///
    /// Returns the first failure in request order.
    async fn transact(&self, action: &str, requests: Vec<TransactionRequest>) -> TidepoolResult<()> {
        let session = self.connection.session()?;
        info!("{}: submitting {} transaction(s)", action, requests.len());

        let mut submitted: Vec<TidepoolResult<TxHandle>> = Vec::with_capacity(requests.len());
        for request in requests {
            if !self.connection.is_current(&session) {
                submitted.push(Err(TidepoolError::NotConnected));
                continue;
            }
            let kind = request.call.kind();
            match session.submit(request).await {
                Ok(handle) => {
                    debug!("Submitted {} {}", kind, handle.tx_id);
                    submitted.push(Ok(handle));
                }
                Err(e) => {
                    warn!("Submitting {} failed: {}", kind, e);
                    submitted.push(Err(TidepoolError::SubmissionFailed(e)));
                }
            }
        }

        let outcomes = join_all(submitted.into_iter().map(|submission| {
            let session = &session;
            async move {
                let handle = submission?;
                let receipt = session
                    .await_inclusion(&handle)
                    .await
                    .map_err(TidepoolError::SubmissionFailed)?;
                if receipt.is_reverted() {
                    warn!("Transaction {} reverted in {}", receipt.tx_id, receipt.block);
                    return Err(TidepoolError::TransactionReverted {
                        tx_id: receipt.tx_id,
                    });
                }
                debug!("Transaction {} included in {}", receipt.tx_id, receipt.block);
                Ok::<(), TidepoolError>(())
            }
        }))
        .await;

        let outcome = outcomes.into_iter().collect::<TidepoolResult<Vec<()>>>();

        if let Err(e) = self.refresh().await {
            warn!("{}: refresh after mutation failed: {}", action, e);
        }

        match outcome {
            Ok(_) => {
                info!("{}: done", action);
                Ok(())
            }
            Err(e) => {
                warn!("{}: {}", action, e);
                Err(e)
            }
        }
    }
}

impl fmt::Debug for PoolClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolClient")
            .field("program", &self.program.address())
            .field("store", &self.store.get().status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tidepool_core::{CallKind, LedgerProvider, ProviderResult, Receipt, Receiver};
    use tidepool_devnet::{dev_address, DevLedger, DevPool, DevnetConfig, ReadKind};
    use tokio::sync::Notify;

    struct Fixture {
        ledger: Arc<DevLedger>,
        client: PoolClient,
    }

    async fn connected(config: DevnetConfig) -> Fixture {
        let ledger = Arc::new(DevLedger::new(config));
        let connection = Arc::new(ConnectionManager::new(ledger.clone()));
        connection.connect().await.unwrap();
        let client = PoolClient::new(Arc::new(DevPool::new(ledger.clone())), connection);
        Fixture { ledger, client }
    }

    fn statuses(client: &PoolClient) -> (Arc<Mutex<Vec<&'static str>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = client.subscribe(move |state| sink.lock().push(state.status()));
        (seen, sub)
    }

    fn snapshot(client: &PoolClient) -> PoolData {
        client.current().success().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_refresh_publishes_composed_snapshot() {
        let Fixture { client, .. } = connected(DevnetConfig::devnet(2)).await;
        let (seen, _sub) = statuses(&client);

        let data = client.refresh().await.unwrap();

        assert_eq!(data, PoolData::default());
        assert_eq!(*seen.lock(), vec!["not_asked", "loading", "success"]);
    }

    #[tokio::test]
    async fn test_read_failure_publishes_error() {
        let Fixture { ledger, client } = connected(DevnetConfig::devnet(1)).await;
        ledger.fail_next_read(ReadKind::AmountPerBlock);

        let err = client.refresh().await.unwrap_err();

        assert!(matches!(
            err,
            TidepoolError::ReadFailed {
                field: "amount_per_block",
                ..
            }
        ));
        assert!(err.is_retryable());
        assert_eq!(client.current().error(), Some(&err));

        client.refresh().await.unwrap();
        assert!(client.current().is_success());
    }

    #[tokio::test]
    async fn test_top_up_reflected_after_refresh() {
        let Fixture { client, .. } = connected(DevnetConfig::devnet(1)).await;
        let (seen, _sub) = statuses(&client);

        client.top_up(Amount(1_000)).await.unwrap();

        assert_eq!(snapshot(&client).balance, Amount(1_000));
        assert_eq!(*seen.lock(), vec!["not_asked", "loading", "success"]);
    }

    #[tokio::test]
    async fn test_reverted_top_up_leaves_snapshot_unchanged() {
        let Fixture { ledger, client } = connected(DevnetConfig::devnet(1)).await;
        client.top_up(Amount(300)).await.unwrap();
        let before = snapshot(&client);

        ledger.revert_next(CallKind::TopUp);
        let err = client.top_up(Amount(200)).await.unwrap_err();

        let TidepoolError::TransactionReverted { tx_id } = err else {
            panic!("expected a revert, got {err:?}");
        };
        assert!(ledger.receipt(&tx_id).unwrap().is_reverted());
        assert!(!TidepoolError::TransactionReverted { tx_id }.is_retryable());
        assert_eq!(snapshot(&client), before);
    }

    #[tokio::test]
    async fn test_top_up_carries_gas_limit() {
        let Fixture { ledger, client } = connected(DevnetConfig::devnet(1)).await;
        let client = client.with_top_up_gas_limit(1);

        let err = client.top_up(Amount(10)).await.unwrap_err();

        assert!(matches!(err, TidepoolError::TransactionReverted { .. }));
        assert_eq!(ledger.pool(&dev_address(0)).balance, Amount::ZERO);
    }

    #[tokio::test]
    async fn test_partial_receiver_update_reconciled_by_refresh() {
        let Fixture { ledger, client } = connected(DevnetConfig::devnet(1)).await;
        let (a, b, c) = (dev_address(11), dev_address(12), dev_address(13));
        ledger.revert_receiver(b);

        let err = client.update_receivers(&[a, b, c]).await.unwrap_err();

        let TidepoolError::TransactionReverted { tx_id } = err else {
            panic!("expected a revert, got {err:?}");
        };
        let receipt = ledger.receipt(&tx_id).unwrap();
        assert!(receipt.is_reverted());
        assert_eq!(snapshot(&client).receiver_addresses, vec![a, c]);
    }

    #[tokio::test]
    async fn test_first_failure_in_request_order_wins() {
        let Fixture { ledger, client } = connected(DevnetConfig::devnet(1)).await;
        let (a, b) = (dev_address(11), dev_address(12));
        ledger.revert_receiver(a);
        ledger.revert_receiver(b);

        let err = client.update_receivers(&[a, b]).await.unwrap_err();

        let TidepoolError::TransactionReverted { tx_id } = err else {
            panic!("expected a revert, got {err:?}");
        };
        // auto mining includes each write in its own block
        assert_eq!(ledger.receipt(&tx_id).unwrap().block.0, 1);
    }

    #[tokio::test]
    async fn test_submission_failure_still_refreshes() {
        let Fixture { ledger, client } = connected(DevnetConfig::devnet(1)).await;
        ledger.fail_next_submit();

        let err = client.update_amount_per_block(Amount(5)).await.unwrap_err();

        assert!(matches!(err, TidepoolError::SubmissionFailed(_)));
        assert!(err.is_retryable());
        assert_eq!(snapshot(&client).amount_per_block, Amount::ZERO);

        client.update_amount_per_block(Amount(5)).await.unwrap();
        assert_eq!(snapshot(&client).amount_per_block, Amount(5));
    }

    #[tokio::test]
    async fn test_mutation_requires_connection() {
        let ledger = Arc::new(DevLedger::new(DevnetConfig::devnet(1)));
        let connection = Arc::new(ConnectionManager::new(ledger.clone()));
        let client = PoolClient::new(Arc::new(DevPool::new(ledger.clone())), connection);

        assert_eq!(client.collect().await.unwrap_err(), TidepoolError::NotConnected);
        assert!(client.current().is_not_asked());
        assert_eq!(ledger.pending_count(), 0);
        assert_eq!(ledger.head().0, 0);
    }

    #[tokio::test]
    async fn test_refresh_without_connection_publishes_error() {
        let ledger = Arc::new(DevLedger::new(DevnetConfig::devnet(1)));
        let connection = Arc::new(ConnectionManager::new(ledger.clone()));
        let client = PoolClient::new(Arc::new(DevPool::new(ledger)), connection);

        assert_eq!(client.refresh().await.unwrap_err(), TidepoolError::NotConnected);
        assert_eq!(client.current().error(), Some(&TidepoolError::NotConnected));
    }

    #[tokio::test]
    async fn test_collect_moves_funds_out_of_snapshot() {
        let config = DevnetConfig::devnet(2);
        let ledger = Arc::new(DevLedger::new(config));
        let (payer, payee) = (dev_address(0), dev_address(1));

        // pool of the first account pays the second one
        for call in [
            DevPool::new(ledger.clone()).set_receiver(payee, 1),
            DevPool::new(ledger.clone()).set_amount_per_block(Amount(7)),
            DevPool::new(ledger.clone()).top_up(Amount(100)),
        ] {
            let handle = ledger.submit(&payer, call).await.unwrap();
            ledger.await_inclusion(&handle).await.unwrap();
        }

        let connection = Arc::new(ConnectionManager::new(Arc::new(SecondAccount(ledger.clone()))));
        connection.connect().await.unwrap();
        let client = PoolClient::new(Arc::new(DevPool::new(ledger.clone())), connection);

        let before = client.refresh().await.unwrap();
        assert_eq!(before.collectable_funds, Amount(7));

        client.collect().await.unwrap();

        // the collect block pays out again after collecting
        assert_eq!(snapshot(&client).collectable_funds, Amount(7));
        assert_eq!(ledger.pool(&payer).balance, Amount(100 - 14));
    }

    /// Exposes the ledger's second account as the only one
    struct SecondAccount(Arc<DevLedger>);

    #[async_trait]
    impl LedgerProvider for SecondAccount {
        async fn accounts(&self) -> ProviderResult<Vec<Address>> {
            Ok(self.0.accounts().await?.into_iter().skip(1).collect())
        }

        async fn balance(&self, address: &Address) -> ProviderResult<Amount> {
            self.0.balance(address).await
        }

        async fn submit(&self, from: &Address, request: TransactionRequest) -> ProviderResult<TxHandle> {
            self.0.submit(from, request).await
        }

        async fn await_inclusion(&self, handle: &TxHandle) -> ProviderResult<Receipt> {
            self.0.await_inclusion(handle).await
        }

        async fn disconnect(&self) -> ProviderResult<()> {
            self.0.disconnect().await
        }
    }

    /// Holds the first withdrawable read until released and answers it with
    /// a fixed balance
    struct GatedPool {
        inner: DevPool,
        gate: Mutex<bool>,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl PoolProgram for GatedPool {
        fn address(&self) -> Address {
            self.inner.address()
        }

        async fn withdrawable(&self, owner: &Address) -> ProviderResult<Amount> {
            let gated = std::mem::take(&mut *self.gate.lock());
            if gated {
                self.entered.notify_one();
                self.release.notified().await;
                return Ok(Amount(1));
            }
            self.inner.withdrawable(owner).await
        }

        async fn collectable(&self, owner: &Address) -> ProviderResult<Amount> {
            self.inner.collectable(owner).await
        }

        async fn amount_per_block(&self, owner: &Address) -> ProviderResult<Amount> {
            self.inner.amount_per_block(owner).await
        }

        async fn receivers(&self, owner: &Address) -> ProviderResult<Vec<Receiver>> {
            self.inner.receivers(owner).await
        }
    }

    #[tokio::test]
    async fn test_stale_refresh_is_discarded() {
        let ledger = Arc::new(DevLedger::new(DevnetConfig::devnet(1)));
        let connection = Arc::new(ConnectionManager::new(ledger.clone()));
        connection.connect().await.unwrap();
        let program = Arc::new(GatedPool {
            inner: DevPool::new(ledger.clone()),
            gate: Mutex::new(true),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let client = Arc::new(PoolClient::new(program.clone(), connection));

        let stale = {
            let client = client.clone();
            tokio::spawn(async move { client.refresh().await })
        };
        program.entered.notified().await;

        let fresh = client.refresh().await.unwrap();
        assert_eq!(fresh.balance, Amount::ZERO);

        program.release.notify_one();
        let stale = stale.await.unwrap().unwrap();

        assert_eq!(stale.balance, Amount(1));
        assert_eq!(snapshot(&client), fresh);
    }

    #[tokio::test]
    async fn test_apply_settings_writes_only_differences() {
        let Fixture { ledger, client } = connected(DevnetConfig::devnet(1)).await;
        let (a, b, c) = (dev_address(11), dev_address(12), dev_address(13));
        client.update_receivers(&[a, b]).await.unwrap();
        client.update_amount_per_block(Amount(3)).await.unwrap();
        let head = ledger.head().0;

        let writes = client
            .apply_settings(&PoolSettings::new(Amount(3), vec![b, c]))
            .await
            .unwrap();

        assert_eq!(writes, 2);
        assert_eq!(ledger.head().0, head + 2);
        assert_eq!(snapshot(&client).receiver_addresses, vec![b, c]);

        let unchanged = client
            .apply_settings(&PoolSettings::new(Amount(3), vec![b, c]))
            .await
            .unwrap();
        assert_eq!(unchanged, 0);
    }

    #[tokio::test]
    async fn test_apply_settings_refreshes_first_without_snapshot() {
        let Fixture { client, .. } = connected(DevnetConfig::devnet(1)).await;

        let writes = client
            .apply_settings(&PoolSettings::new(Amount(9), vec![]))
            .await
            .unwrap();

        assert_eq!(writes, 1);
        assert_eq!(snapshot(&client).amount_per_block, Amount(9));
    }

    #[tokio::test]
    async fn test_remove_receiver_from_current_settings() {
        let Fixture { client, .. } = connected(DevnetConfig::devnet(1)).await;
        let (a, b) = (dev_address(11), dev_address(12));
        client.update_receivers(&[a, b]).await.unwrap();

        let settings = snapshot(&client).settings().without_receivers(&[a]);
        let writes = client.apply_settings(&settings).await.unwrap();

        assert_eq!(writes, 1);
        assert_eq!(snapshot(&client).receiver_addresses, vec![b]);
    }

    #[tokio::test]
    async fn test_mutation_after_disconnect() {
        let Fixture { client, .. } = connected(DevnetConfig::devnet(1)).await;
        let stale_session = client.connection().session().unwrap();
        client.connection().disconnect().await.unwrap();

        assert!(!client.connection().is_current(&stale_session));
        assert_eq!(
            client.top_up(Amount(1)).await.unwrap_err(),
            TidepoolError::NotConnected
        );
    }
}
