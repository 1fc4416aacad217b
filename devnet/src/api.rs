//! HTTP API for the development ledger

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tidepool_core::{
    Address, Amount, DevControl, Hash, LedgerProvider, PoolProgram, ProviderError,
    ProviderResult, Receipt, Receiver, TransactionRequest, TxHandle,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::ledger::DevLedger;
use crate::program::DevPool;

/// API state containing the ledger
pub type ApiState = Arc<DevLedger>;

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    /// Provider error code of a rejected request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn err(error: impl ToString) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            code: None,
        }
    }

    pub fn rejected(code: i64, message: impl ToString) -> Self {
        Self {
            code: Some(code),
            ..Self::err(message)
        }
    }
}

/// Ledger status response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub chain_name: String,
    pub head: u64,
    pub pending: usize,
    pub accounts: usize,
    pub pool_address: Address,
    pub auto_mine: bool,
    pub started_at: u64,
}

/// Balance response
#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub address: Address,
    pub balance: Amount,
}

/// Transaction submission
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub from: Address,
    pub request: TransactionRequest,
}

/// Mining request
#[derive(Debug, Serialize, Deserialize)]
pub struct MineRequest {
    #[serde(default = "default_blocks")]
    pub blocks: u64,
}

fn default_blocks() -> u64 {
    1
}

/// Mining response
#[derive(Debug, Serialize, Deserialize)]
pub struct MineResponse {
    pub head: u64,
}

type ApiResult<T> = (StatusCode, Json<ApiResponse<T>>);

fn respond<T>(result: ProviderResult<T>, ok: StatusCode) -> ApiResult<T> {
    match result {
        Ok(data) => (ok, Json(ApiResponse::ok(data))),
        Err(ProviderError::Rejected { code, message }) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::rejected(code, message)),
        ),
        Err(e @ ProviderError::Timeout(_)) => {
            (StatusCode::GATEWAY_TIMEOUT, Json(ApiResponse::err(e)))
        }
        Err(e @ ProviderError::Transport(_)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ApiResponse::err(e)))
        }
    }
}

fn parse_address<T>(raw: &str) -> Result<Address, ApiResult<T>> {
    Address::from_hex(raw).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::err(format!("Invalid address: {}", raw))),
        )
    })
}

/// Create API router
pub fn create_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(health))
        .route("/status", get(status))
        // Provider
        .route("/accounts", get(get_accounts))
        .route("/balance/:address", get(get_balance))
        .route("/transaction", post(submit_transaction))
        .route("/receipt/:tx_id", get(get_receipt))
        .route("/session/disconnect", post(disconnect))
        // Pool program
        .route("/pool/:owner/withdrawable", get(get_withdrawable))
        .route("/pool/:owner/collectable", get(get_collectable))
        .route("/pool/:owner/amount_per_block", get(get_amount_per_block))
        .route("/pool/:owner/receivers", get(get_receivers))
        // Development
        .route("/mine", post(mine))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Health check
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// Ledger status
async fn status(State(ledger): State<ApiState>) -> impl IntoResponse {
    let config = ledger.config();
    let status = StatusResponse {
        chain_name: config.chain_name.clone(),
        head: ledger.head().0,
        pending: ledger.pending_count(),
        accounts: config.accounts.len(),
        pool_address: config.pool_address,
        auto_mine: config.auto_mine,
        started_at: ledger.started_at().as_millis(),
    };

    Json(ApiResponse::ok(status))
}

async fn get_accounts(State(ledger): State<ApiState>) -> ApiResult<Vec<Address>> {
    respond(ledger.accounts().await, StatusCode::OK)
}

async fn get_balance(
    State(ledger): State<ApiState>,
    Path(address): Path<String>,
) -> ApiResult<BalanceResponse> {
    let address = match parse_address(&address) {
        Ok(address) => address,
        Err(response) => return response,
    };
    let result = ledger
        .balance(&address)
        .await
        .map(|balance| BalanceResponse { address, balance });
    respond(result, StatusCode::OK)
}

async fn submit_transaction(
    State(ledger): State<ApiState>,
    Json(req): Json<SubmitRequest>,
) -> ApiResult<TxHandle> {
    respond(ledger.submit(&req.from, req.request).await, StatusCode::ACCEPTED)
}

/// Receipt of an included transaction; `data` is null while pending
async fn get_receipt(
    State(ledger): State<ApiState>,
    Path(tx_id): Path<String>,
) -> ApiResult<Option<Receipt>> {
    let Ok(tx_id) = Hash::from_hex(&tx_id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::err("Invalid transaction ID")),
        );
    };
    if !ledger.is_known(&tx_id) {
        return (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::rejected(-32602, format!("unknown transaction {}", tx_id))),
        );
    }
    (StatusCode::OK, Json(ApiResponse::ok(ledger.receipt(&tx_id))))
}

async fn disconnect(State(ledger): State<ApiState>) -> ApiResult<()> {
    respond(ledger.disconnect().await, StatusCode::OK)
}

async fn get_withdrawable(
    State(ledger): State<ApiState>,
    Path(owner): Path<String>,
) -> ApiResult<Amount> {
    match parse_address(&owner) {
        Ok(owner) => respond(DevPool::new(ledger).withdrawable(&owner).await, StatusCode::OK),
        Err(response) => response,
    }
}

async fn get_collectable(
    State(ledger): State<ApiState>,
    Path(owner): Path<String>,
) -> ApiResult<Amount> {
    match parse_address(&owner) {
        Ok(owner) => respond(DevPool::new(ledger).collectable(&owner).await, StatusCode::OK),
        Err(response) => response,
    }
}

async fn get_amount_per_block(
    State(ledger): State<ApiState>,
    Path(owner): Path<String>,
) -> ApiResult<Amount> {
    match parse_address(&owner) {
        Ok(owner) => respond(
            DevPool::new(ledger).amount_per_block(&owner).await,
            StatusCode::OK,
        ),
        Err(response) => response,
    }
}

async fn get_receivers(
    State(ledger): State<ApiState>,
    Path(owner): Path<String>,
) -> ApiResult<Vec<Receiver>> {
    match parse_address(&owner) {
        Ok(owner) => respond(DevPool::new(ledger).receivers(&owner).await, StatusCode::OK),
        Err(response) => response,
    }
}

async fn mine(
    State(ledger): State<ApiState>,
    Json(req): Json<MineRequest>,
) -> ApiResult<MineResponse> {
    let result = ledger
        .mine_blocks(req.blocks)
        .await
        .map(|head| MineResponse { head: head.0 });
    respond(result, StatusCode::OK)
}

/// Start API server
pub async fn start_api_server(ledger: Arc<DevLedger>, listen_addr: &str) -> anyhow::Result<()> {
    let router = create_router(ledger);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!("API server listening on {}", listen_addr);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{dev_address, DevnetConfig};
    use axum::body::Body;
    use axum::http::{header, Request};
    use serde_json::Value;
    use tidepool_core::{Call, DEFAULT_POOL_ADDRESS};
    use tower::ServiceExt;

    fn router() -> (Router, Arc<DevLedger>) {
        let ledger = Arc::new(DevLedger::new(DevnetConfig::devnet(2)));
        (create_router(ledger.clone()), ledger)
    }

    async fn call(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_accounts_envelope() {
        let (router, _) = router();
        let (status, body) = call(router, get("/accounts")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"][0], dev_address(0).to_hex());
        assert!(body.get("code").is_none());
    }

    #[tokio::test]
    async fn test_invalid_address_is_bad_request() {
        let (router, _) = router();
        let (status, body) = call(router, get("/balance/0x12")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_submit_and_receipt() {
        let (router, _) = router();
        let submit = SubmitRequest {
            from: dev_address(0),
            request: TransactionRequest::new(DEFAULT_POOL_ADDRESS, Call::Collect),
        };
        let (status, body) = call(
            router.clone(),
            post_json("/transaction", serde_json::to_value(&submit).unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let tx_id = body["data"]["tx_id"].as_str().unwrap().to_string();
        let (status, body) = call(router, get(&format!("/receipt/{}", tx_id))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "included");
    }

    #[tokio::test]
    async fn test_rejection_carries_code() {
        let (router, _) = router();
        let submit = SubmitRequest {
            from: dev_address(9),
            request: TransactionRequest::new(DEFAULT_POOL_ADDRESS, Call::Collect),
        };
        let (status, body) = call(
            router,
            post_json("/transaction", serde_json::to_value(&submit).unwrap()),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], 4100);
    }

    #[tokio::test]
    async fn test_pool_reads_and_mining() {
        let (router, ledger) = router();
        let owner = dev_address(0).to_hex();

        let (_, body) = call(router.clone(), post_json("/mine", serde_json::json!({"blocks": 3}))).await;
        assert_eq!(body["data"]["head"], 3);
        assert_eq!(ledger.head().0, 3);

        let (status, body) = call(router, get(&format!("/pool/{}/receivers", owner))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], serde_json::json!([]));
    }
}
