//! HTTP provider and pool program for a Tidepool ledger node

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tidepool_core::{
    Address, Amount, ClientConfig, LedgerProvider, PoolProgram, ProviderError, ProviderResult,
    Receipt, Receiver, TransactionRequest, TxHandle,
};
use tracing::{debug, trace};

#[cfg(feature = "dev-tools")]
use tidepool_core::{BlockNumber, DevControl};

/// Request timeout of a single API call
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// API response wrapper
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
    #[serde(default)]
    code: Option<i64>,
}

/// Ledger node status
#[derive(Debug, Deserialize)]
pub struct NodeStatus {
    pub chain_name: String,
    pub head: u64,
    pub pending: usize,
    pub accounts: usize,
    pub pool_address: Address,
    pub auto_mine: bool,
    pub started_at: u64,
}

#[derive(Debug, Deserialize)]
struct BalanceInfo {
    balance: Amount,
}

#[derive(Serialize)]
struct SubmitRequest<'a> {
    from: &'a Address,
    request: &'a TransactionRequest,
}

#[cfg(feature = "dev-tools")]
#[derive(Serialize)]
struct MineRequest {
    blocks: u64,
}

#[cfg(feature = "dev-tools")]
#[derive(Deserialize)]
struct MineResponse {
    head: u64,
}

fn transport(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(err.to_string())
    } else {
        ProviderError::Transport(err.to_string())
    }
}

/// API client for a ledger node
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    client: Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(transport)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ProviderResult<Option<T>> {
        let url = format!("{}{}", self.base_url, path);
        trace!("GET {}", url);
        let resp = self.client.get(&url).send().await.map_err(transport)?;
        Self::into_result(resp).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ProviderResult<Option<T>> {
        let url = format!("{}{}", self.base_url, path);
        trace!("POST {}", url);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        Self::into_result(resp).await
    }

    async fn into_result<T: DeserializeOwned>(resp: reqwest::Response) -> ProviderResult<Option<T>> {
        let status = resp.status();
        let body: ApiResponse<T> = resp.json().await.map_err(transport)?;

        if body.success {
            return Ok(body.data);
        }

        let message = body.error.unwrap_or_else(|| status.to_string());
        Err(match (body.code, status) {
            (Some(code), _) => ProviderError::Rejected { code, message },
            (None, status) if status == StatusCode::GATEWAY_TIMEOUT => ProviderError::Timeout(message),
            (None, _) => ProviderError::Transport(message),
        })
    }

    fn required<T>(data: Option<T>) -> ProviderResult<T> {
        data.ok_or_else(|| ProviderError::Transport("Empty response".to_string()))
    }

    /// Node status
    pub async fn status(&self) -> ProviderResult<NodeStatus> {
        Self::required(self.get("/status").await?)
    }
}

/// [`LedgerProvider`] backed by a ledger node's HTTP API
#[derive(Debug, Clone)]
pub struct HttpProvider {
    api: ApiClient,
    poll_interval: Duration,
    inclusion_timeout: Duration,
}

impl HttpProvider {
    pub fn new(api: ApiClient) -> Self {
        let defaults = ClientConfig::default();
        Self {
            api,
            poll_interval: Duration::from_millis(defaults.poll_interval_ms),
            inclusion_timeout: Duration::from_millis(defaults.inclusion_timeout_ms),
        }
    }

    pub fn from_config(config: &ClientConfig) -> ProviderResult<Self> {
        Ok(Self::new(ApiClient::new(&config.node_url)?)
            .with_poll_interval(Duration::from_millis(config.poll_interval_ms))
            .with_inclusion_timeout(Duration::from_millis(config.inclusion_timeout_ms)))
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_inclusion_timeout(mut self, timeout: Duration) -> Self {
        self.inclusion_timeout = timeout;
        self
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }
}

#[async_trait]
impl LedgerProvider for HttpProvider {
    async fn accounts(&self) -> ProviderResult<Vec<Address>> {
        Ok(self.api.get("/accounts").await?.unwrap_or_default())
    }

    async fn balance(&self, address: &Address) -> ProviderResult<Amount> {
        let info: BalanceInfo = ApiClient::required(
            self.api.get(&format!("/balance/{}", address.to_hex())).await?,
        )?;
        Ok(info.balance)
    }

    async fn submit(&self, from: &Address, request: TransactionRequest) -> ProviderResult<TxHandle> {
        let body = SubmitRequest {
            from,
            request: &request,
        };
        let handle: TxHandle = ApiClient::required(self.api.post("/transaction", &body).await?)?;
        debug!("Submitted {} as {}", request.call.kind(), handle.tx_id);
        Ok(handle)
    }

    /// Poll the receipt until the transaction is included or the inclusion
    /// timeout passes
    async fn await_inclusion(&self, handle: &TxHandle) -> ProviderResult<Receipt> {
        let path = format!("/receipt/{}", handle.tx_id.to_hex());
        let deadline = tokio::time::Instant::now() + self.inclusion_timeout;

        loop {
            if let Some(receipt) = self.api.get::<Receipt>(&path).await? {
                return Ok(receipt);
            }
            if tokio::time::Instant::now() + self.poll_interval > deadline {
                return Err(ProviderError::Timeout(format!(
                    "transaction {} not included after {:?}",
                    handle.tx_id, self.inclusion_timeout
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn disconnect(&self) -> ProviderResult<()> {
        self.api
            .post::<_, serde_json::Value>("/session/disconnect", &serde_json::json!({}))
            .await?;
        Ok(())
    }
}

#[cfg(feature = "dev-tools")]
#[async_trait]
impl DevControl for HttpProvider {
    async fn mine_blocks(&self, blocks: u64) -> ProviderResult<BlockNumber> {
        let resp: MineResponse =
            ApiClient::required(self.api.post("/mine", &MineRequest { blocks }).await?)?;
        Ok(BlockNumber(resp.head))
    }
}

/// [`PoolProgram`] reads served by a ledger node's HTTP API
#[derive(Debug, Clone)]
pub struct HttpPool {
    api: ApiClient,
    address: Address,
}

impl HttpPool {
    pub fn new(api: ApiClient, address: Address) -> Self {
        Self { api, address }
    }

    async fn read<T: DeserializeOwned>(&self, owner: &Address, field: &str) -> ProviderResult<T> {
        let path = format!("/pool/{}/{}", owner.to_hex(), field);
        ApiClient::required(self.api.get(&path).await?)
    }
}

#[async_trait]
impl PoolProgram for HttpPool {
    fn address(&self) -> Address {
        self.address
    }

    async fn withdrawable(&self, owner: &Address) -> ProviderResult<Amount> {
        self.read(owner, "withdrawable").await
    }

    async fn collectable(&self, owner: &Address) -> ProviderResult<Amount> {
        self.read(owner, "collectable").await
    }

    async fn amount_per_block(&self, owner: &Address) -> ProviderResult<Amount> {
        self.read(owner, "amount_per_block").await
    }

    async fn receivers(&self, owner: &Address) -> ProviderResult<Vec<Receiver>> {
        self.read(owner, "receivers").await
    }
}
