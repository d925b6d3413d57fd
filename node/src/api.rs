//! # HTTP API
//!
//! The axum router for the node's public interface.
//!
//! ## Endpoints
//!
//! | Method | Path                 | Description                              |
//! |--------|----------------------|------------------------------------------|
//! | GET    | `/health`            | Liveness probe                           |
//! | GET    | `/status`            | Chain length, tip, peers                 |
//! | GET    | `/blocks`            | The whole chain                          |
//! | GET    | `/blocks/:index`     | One block                                |
//! | GET    | `/posts`             | Blocks that carry a post                 |
//! | POST   | `/newPost`           | Sign, append and announce a post         |
//! | GET    | `/balance/:pub_key`  | Token balance of an author, base units   |

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use quill_protocol::config::{HASH_ENCODING_VERSION, POST_REWARD, PROTOCOL_VERSION};
use quill_protocol::crypto::Wallet;
use quill_protocol::network::ReplicationEngine;
use quill_protocol::storage::{Block, Payload};
use quill_protocol::vault::BalanceLedger;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared state for every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub version: String,
    pub engine: Arc<ReplicationEngine>,
    pub wallet: Arc<Wallet>,
    pub balances: BalanceLedger,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/blocks", get(blocks_handler))
        .route("/blocks/:index", get(block_by_index_handler))
        .route("/posts", get(posts_handler))
        .route("/newPost", post(new_post_handler))
        .route("/balance/:pub_key", get(balance_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub protocol_version: String,
    pub hash_encoding_version: u16,
    pub chain_length: usize,
    pub tip_hash: String,
    pub peer_count: usize,
    /// RFC 3339 time of the response.
    pub timestamp: String,
}

/// One post as listed by `/posts` and returned by `/newPost`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostResponse {
    pub message: String,
    pub from: Option<String>,
    pub timestamp: String,
    pub hash: String,
}

impl PostResponse {
    /// The post carried by `block`, if its payload has a non-empty string
    /// `message`.
    fn from_block(block: &Block) -> Option<Self> {
        let payload = block.payload();
        let message = payload.str_field("message").filter(|m| !m.is_empty())?;
        Some(Self {
            message: message.to_string(),
            from: payload.str_field("from").map(str::to_string),
            timestamp: block.timestamp().to_string(),
            hash: block.hash().to_string(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub balance: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status`
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let ledger = state.engine.ledger();
    let tip = ledger.tip();

    Json(StatusResponse {
        version: state.version.clone(),
        protocol_version: PROTOCOL_VERSION.to_string(),
        hash_encoding_version: HASH_ENCODING_VERSION,
        chain_length: ledger.len(),
        tip_hash: tip.hash().to_string(),
        peer_count: state.engine.peer_count(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// `GET /blocks`: the chain in wire form.
async fn blocks_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.ledger().snapshot())
}

/// `GET /blocks/:index`
async fn block_by_index_handler(
    Path(index): Path<u64>,
    State(state): State<AppState>,
) -> Response {
    match state.engine.ledger().get(index) {
        Some(block) => (StatusCode::OK, Json(block)).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("Block not found at index {index}"),
        ),
    }
}

/// `GET /posts`
async fn posts_handler(State(state): State<AppState>) -> impl IntoResponse {
    let posts: Vec<PostResponse> = state
        .engine
        .ledger()
        .snapshot()
        .iter()
        .filter_map(PostResponse::from_block)
        .collect();
    Json(posts)
}

/// `POST /newPost`
///
/// Body `{"message": "..."}`. The message is signed with the node wallet,
/// stored as `{message, from, signature}` at the current time, and
/// announced to peers. The author is credited [`POST_REWARD`] tokens.
async fn new_post_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let message = serde_json::from_slice::<Value>(&body)
        .ok()
        .and_then(|value| value.get("message").and_then(Value::as_str).map(str::to_string))
        .filter(|message| !message.is_empty());
    let Some(message) = message else {
        return error_response(StatusCode::BAD_REQUEST, "Message is required");
    };

    let from = state.wallet.public_key_hex();
    let signature = state.wallet.sign(message.as_bytes());
    let payload = Payload::new(serde_json::json!({
        "message": message,
        "from": from,
        "signature": signature,
    }));

    let timestamp = chrono::Utc::now().timestamp_millis().to_string();
    let block = state.engine.ledger().submit(timestamp, payload);

    let credited = state.balances.credit(&from, POST_REWARD);

    // The block is on the chain either way, so peers hear about it.
    // Concurrent posts may be announced out of order; gossip fixes that.
    let peers = state.engine.broadcast_block(&block);
    tracing::info!(index = block.index(), hash = %block.short_hash(), peers, "new post");

    if let Err(err) = credited {
        tracing::error!(%err, from = %from, "failed to credit post reward");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to credit post reward: {err}"),
        );
    }

    let response = PostResponse {
        message,
        from: Some(from),
        timestamp: block.timestamp().to_string(),
        hash: block.hash().to_string(),
    };
    (StatusCode::CREATED, Json(response)).into_response()
}

/// `GET /balance/:pub_key`
async fn balance_handler(Path(pub_key): Path<String>, State(state): State<AppState>) -> Response {
    match state.balances.balance(&pub_key) {
        Ok(amount) => Json(BalanceResponse {
            balance: amount.to_string(),
        })
        .into_response(),
        Err(err) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Balance lookup failed: {err}"),
        ),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
