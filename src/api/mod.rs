//! HTTP API for submitting, approving and inspecting wallet transactions

use crate::config::ApiConfig;
use crate::error::{WalletError, WalletResult};
use crate::state::{InMemoryStateManager, TxMeta, TxMetaId, TxStatus};
use crate::tx::{parse_address, EthTransaction, TransactionController};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<TransactionController>,
    pub state_manager: Arc<InMemoryStateManager>,
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))
        .route("/nonce/:address", post(allocate_nonce))
        .route("/transactions", post(add_transaction))
        .route("/transactions/:id", get(get_transaction))
        .route("/transactions/:id/approve", post(approve_transaction))
        .route("/transactions/:id/reject", post(reject_transaction))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> WalletResult<()> {
    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| WalletError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
    axum::serve(listener, router(state))
        .await
        .map_err(|e| WalletError::Internal(e.to_string()))
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Record counts per status
async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.state_manager.stats())
}

/// Allocate the next nonce for an address. Allocation consumes the cached
/// network count, exactly like an approval does, so this is a POST.
async fn allocate_nonce(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<NonceResponse>, ApiError> {
    let address = parse_address(&address)?;
    let nonce = state.controller.get_next_nonce(address)?;
    Ok(Json(NonceResponse { address, nonce }))
}

async fn add_transaction(
    State(state): State<AppState>,
    Json(request): Json<AddTransactionRequest>,
) -> Result<(StatusCode, Json<TransactionIdResponse>), ApiError> {
    let from = parse_address(&request.from)?;
    let id = state.controller.add_unapproved_transaction(from, request.tx)?;
    Ok((StatusCode::CREATED, Json(TransactionIdResponse { id })))
}

async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TxMeta>, ApiError> {
    let id: TxMetaId = id.parse()?;
    let meta = state
        .controller
        .get_transaction(&id)?
        .ok_or_else(|| WalletError::TransactionNotFound { tx_id: id.to_string() })?;
    Ok(Json(meta))
}

async fn approve_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApprovalResponse>, ApiError> {
    let id: TxMetaId = id.parse()?;
    let nonce = state.controller.try_approve_transaction(&id)?;
    Ok(Json(ApprovalResponse { id, nonce }))
}

async fn reject_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id: TxMetaId = id.parse()?;
    if state.controller.reject_transaction(&id) {
        return Ok(StatusCode::NO_CONTENT);
    }
    // distinguish unknown ids from wrong-state records
    match state.controller.get_transaction(&id)? {
        Some(meta) => Err(WalletError::InvalidStateTransition {
            from: meta.status.to_string(),
            to: TxStatus::Rejected.to_string(),
        }
        .into()),
        None => Err(WalletError::TransactionNotFound { tx_id: id.to_string() }.into()),
    }
}

/// Error body with the status code chosen per error kind
pub struct ApiError(WalletError);

impl From<WalletError> for ApiError {
    fn from(err: WalletError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            WalletError::NoncePending { .. } => StatusCode::ACCEPTED,
            WalletError::TransactionNotFound { .. } => StatusCode::NOT_FOUND,
            WalletError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
            WalletError::Transaction(_) => StatusCode::BAD_REQUEST,
            WalletError::ChainConnection { .. } | WalletError::Timeout { .. } => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                retryable: self.0.is_retryable(),
            }),
        )
            .into_response()
    }
}

// Request/Response types

#[derive(Deserialize)]
struct AddTransactionRequest {
    from: String,
    tx: EthTransaction,
}

#[derive(Serialize, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize, Deserialize)]
struct NonceResponse {
    address: Address,
    nonce: U256,
}

#[derive(Serialize, Deserialize)]
struct TransactionIdResponse {
    id: TxMetaId,
}

#[derive(Serialize, Deserialize)]
struct ApprovalResponse {
    id: TxMetaId,
    nonce: U256,
}

#[derive(Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
    retryable: bool,
}
