//! # Admin HTTP API
//!
//! Builds the axum router that exposes the node's administrative
//! interface. All endpoints share application state through axum's
//! `State` extractor and talk to the [`Node`] only through its public
//! operations.
//!
//! ## Endpoints
//!
//! | Method | Path                        | Description                              |
//! |--------|-----------------------------|------------------------------------------|
//! | GET    | `/health`                   | Liveness probe                           |
//! | GET    | `/status`                   | Identity and pool/chain counters         |
//! | GET    | `/api/v1/nodes`             | Routing table                            |
//! | GET    | `/api/v1/transactions`      | Transaction pool                         |
//! | GET    | `/api/v1/pendings`          | Pending pool                             |
//! | POST   | `/api/v1/confirm`           | Confirm or reject a pending transaction  |
//! | POST   | `/api/v1/send_transaction`  | Send a transaction, or our genesis       |
//! | POST   | `/api/v1/ping`              | Ping a peer by address                   |
//! | POST   | `/api/v1/join`              | Join the network through a peer          |
//! | GET    | `/api/v1/blocks`            | Local blockchain                         |
//! | POST   | `/api/v1/blocks`            | Seal the transaction pool into a block   |

use axum::{
    extract::State,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use microchain_protocol::crypto::to_base58;
use microchain_protocol::network::{BroadcastReport, Node, NodeError, NodeStatus, RemoteNode};
use microchain_protocol::storage::Block;
use microchain_protocol::transaction::Transaction;

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone, everything sits behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub node: Arc<Node>,
    pub metrics: SharedMetrics,
    /// Reported by `/status`.
    pub version: String,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/api/v1/nodes", get(nodes_handler))
        .route("/api/v1/transactions", get(transactions_handler))
        .route("/api/v1/pendings", get(pendings_handler))
        .route("/api/v1/confirm", post(confirm_handler))
        .route("/api/v1/send_transaction", post(send_transaction_handler))
        .route("/api/v1/ping", post(ping_handler))
        .route("/api/v1/join", post(join_handler))
        .route("/api/v1/blocks", get(blocks_handler).post(seal_block_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    #[serde(flatten)]
    pub node: NodeStatus,
    /// RFC 3339 time of the response.
    pub timestamp: String,
}

/// JSON rendering of a transaction. Keys and IDs are Base58, `meta` is
/// decoded as lossy UTF-8.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct TransactionView {
    pub id: String,
    pub timestamp: u32,
    pub prev: String,
    pub requester: String,
    pub requestee: String,
    pub meta: String,
    pub accepted: u64,
    pub rejected: u64,
    pub confirmed: bool,
}

impl From<&Transaction> for TransactionView {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id_base58(),
            timestamp: tx.timestamp(),
            prev: to_base58(tx.prev_id()),
            requester: tx.requester().to_base58(),
            requestee: tx.requestee().to_base58(),
            meta: String::from_utf8_lossy(&tx.meta).into_owned(),
            accepted: tx.accepted(),
            rejected: tx.rejected(),
            confirmed: tx.is_confirmed(),
        }
    }
}

fn views(txs: &[Transaction]) -> Vec<TransactionView> {
    txs.iter().map(TransactionView::from).collect()
}

#[derive(Debug, Serialize)]
pub struct BlockView {
    pub id: String,
    pub prev: String,
    pub generator: String,
    pub merkle_root: String,
    pub timestamp: u32,
    pub transactions: Vec<TransactionView>,
}

impl From<&Block> for BlockView {
    fn from(block: &Block) -> Self {
        Self {
            id: block.id_base58(),
            prev: to_base58(&block.header.prev_block_id),
            generator: block.header.generator_id.to_base58(),
            merkle_root: to_base58(&block.header.merkle_root),
            timestamp: block.header.timestamp,
            transactions: views(&block.transactions),
        }
    }
}

/// Result of an operation that produced a transaction. `broadcast` is
/// present when the transaction was fanned out to every peer.
#[derive(Debug, Serialize)]
pub struct TransactionOutcome {
    pub transaction: TransactionView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broadcast: Option<BroadcastReport>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub pending_id: String,
    pub confirm: bool,
}

#[derive(Debug, Deserialize)]
pub struct SendTransactionRequest {
    /// Base58 public key of the requestee. Our own key sends our genesis.
    pub node_id: String,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct AddressRequest {
    pub address: String,
}

/// Generic error body returned by REST endpoints on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A [`NodeError`] on its way out as an HTTP response.
pub struct ApiError(NodeError);

impl From<NodeError> for ApiError {
    fn from(e: NodeError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            NodeError::UnknownPeer(_) | NodeError::PendingNotFound(_) => StatusCode::NOT_FOUND,
            NodeError::GenesisAlreadySet | NodeError::MissingChainTip | NodeError::EmptyPool => {
                StatusCode::CONFLICT
            }
            NodeError::Network(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: 200 while the process is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: state.version.clone(),
        node: state.node.status(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

async fn nodes_handler(State(state): State<AppState>) -> Json<Vec<RemoteNode>> {
    Json(state.node.get_nodes_of_routing_table())
}

async fn transactions_handler(State(state): State<AppState>) -> Json<Vec<TransactionView>> {
    Json(views(&state.node.get_transactions_of_pool()))
}

async fn pendings_handler(State(state): State<AppState>) -> Json<Vec<TransactionView>> {
    Json(views(&state.node.get_pending_transactions()))
}

/// `POST /api/v1/confirm`: counter-sign and broadcast a pending
/// transaction, or reject it.
async fn confirm_handler(
    State(state): State<AppState>,
    Json(req): Json<ConfirmRequest>,
) -> ApiResult<TransactionOutcome> {
    if req.confirm {
        let (tx, report) = state.node.confirm_pending_transaction(&req.pending_id).await?;
        state.metrics.confirmations_total.inc();
        Ok(Json(TransactionOutcome {
            transaction: TransactionView::from(&tx),
            broadcast: Some(report),
        }))
    } else {
        let tx = state.node.reject_pending_transaction(&req.pending_id)?;
        state.metrics.rejections_total.inc();
        Ok(Json(TransactionOutcome {
            transaction: TransactionView::from(&tx),
            broadcast: None,
        }))
    }
}

/// `POST /api/v1/send_transaction`: a pending transaction to the peer
/// `node_id`. Naming ourselves creates and broadcasts our genesis instead.
async fn send_transaction_handler(
    State(state): State<AppState>,
    Json(req): Json<SendTransactionRequest>,
) -> ApiResult<TransactionOutcome> {
    let meta = req.data.into_bytes();
    let outcome = if req.node_id == state.node.public_key_string() {
        let (tx, report) = state.node.broadcast_genesis_transaction(meta).await?;
        TransactionOutcome {
            transaction: TransactionView::from(&tx),
            broadcast: Some(report),
        }
    } else {
        let tx = state.node.send_pending_transaction(&req.node_id, meta).await?;
        TransactionOutcome {
            transaction: TransactionView::from(&tx),
            broadcast: None,
        }
    };
    state.metrics.transactions_sent_total.inc();
    Ok(Json(outcome))
}

async fn ping_handler(
    State(state): State<AppState>,
    Json(req): Json<AddressRequest>,
) -> ApiResult<serde_json::Value> {
    state.node.ping(&req.address).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

async fn join_handler(
    State(state): State<AppState>,
    Json(req): Json<AddressRequest>,
) -> ApiResult<serde_json::Value> {
    state.node.join(&req.address).await?;
    info!(peer = %req.address, "joined through admin api");
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

async fn blocks_handler(State(state): State<AppState>) -> Json<Vec<BlockView>> {
    let blocks = state.node.get_blocks();
    Json(blocks.iter().map(BlockView::from).collect())
}

/// `POST /api/v1/blocks`: seals the whole transaction pool. 409 when the
/// pool is empty.
async fn seal_block_handler(State(state): State<AppState>) -> ApiResult<BlockView> {
    let block = state.node.seal_block()?;
    state.metrics.blocks_sealed_total.inc();
    Ok(Json(BlockView::from(&block)))
}
