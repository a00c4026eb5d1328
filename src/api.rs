//! HTTP ingestion API.
//!
//! Submissions are validated, queued and answered with 202 without waiting
//! for classification.
//!
//! | Method | Path                  | Description                             |
//! |--------|-----------------------|-----------------------------------------|
//! | POST   | `/transactions/`      | Validate and queue a transaction        |
//! | GET    | `/transactions`       | Page of persisted HIGH-priority records |
//! | GET    | `/transactions/stats` | Aggregate statistics                    |
//! | GET    | `/healthz`            | Broker and database reachability        |

use crate::producer::{PublishError, TransactionPublisher};
use crate::store::{StoreError, TransactionStore};
use crate::types::{RawTransaction, TransactionInput, TransactionRecord, TransactionStats};
use crate::validation::ValidationError;
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 500;

/// Request body cap; matches the default NATS `max_payload`
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub publisher: Arc<dyn TransactionPublisher>,
    pub store: Arc<dyn TransactionStore>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/transactions", post(submit_handler).get(list_handler))
        .route("/transactions/", post(submit_handler))
        .route("/transactions/stats", get(stats_handler))
        .route("/healthz", get(health_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Errors surfaced to HTTP clients
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("malformed request body: {0}")]
    Body(#[from] JsonRejection),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to queue transaction: {0}")]
    Publish(#[from] PublishError),

    #[error("failed to read transactions: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            ApiError::Body(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => (
                StatusCode::PAYLOAD_TOO_LARGE,
                json!(rejection.body_text()),
            ),
            ApiError::Body(rejection) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!([{ "field": "body", "message": rejection.body_text() }]),
            ),
            ApiError::Validation(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!(err.violations),
            ),
            ApiError::Publish(PublishError::PayloadTooLarge { .. }) => {
                (StatusCode::PAYLOAD_TOO_LARGE, json!(self.to_string()))
            }
            ApiError::Publish(_) | ApiError::Store(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, json!(self.to_string()))
            }
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub status: String,
    pub tx_hash: String,
    pub message: String,
}

async fn submit_handler(
    State(state): State<AppState>,
    body: Result<Json<RawTransaction>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let Json(raw) = body?;
    let tx = TransactionInput::try_from(raw).inspect_err(|e| {
        info!(error = %e, "Rejected invalid transaction");
    })?;

    if let Err(e) = state.publisher.publish(&tx).await {
        warn!(tx_hash = %tx.tx_hash(), error = %e, "Failed to queue transaction");
        return Err(e.into());
    }
    info!(tx_hash = %tx.tx_hash(), "Transaction accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            status: "accepted".to_string(),
            tx_hash: tx.tx_hash().to_string(),
            message: "Transaction queued for processing".to_string(),
        }),
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

async fn list_handler(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<TransactionRecord>>, ApiError> {
    let offset = params.offset.unwrap_or(0).max(0);
    let limit = params
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    Ok(Json(state.store.list(offset, limit).await?))
}

async fn stats_handler(
    State(state): State<AppState>,
) -> Result<Json<TransactionStats>, ApiError> {
    Ok(Json(state.store.stats().await?))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub nats: String,
    pub postgres: String,
}

fn component_status(healthy: bool) -> String {
    let status = if healthy { "ok" } else { "error" };
    status.to_string()
}

/// Checks the broker and the database independently; either failing
/// degrades the service.
async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (nats, postgres) = tokio::join!(
        tokio::time::timeout(HEALTH_CHECK_TIMEOUT, state.publisher.check()),
        tokio::time::timeout(HEALTH_CHECK_TIMEOUT, state.store.ping()),
    );

    let nats_ok = match nats {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(error = %e, "NATS health check failed");
            false
        }
        Err(_) => {
            warn!("NATS health check timed out");
            false
        }
    };
    let postgres_ok = match postgres {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(error = %e, "PostgreSQL health check failed");
            false
        }
        Err(_) => {
            warn!("PostgreSQL health check timed out");
            false
        }
    };

    let healthy = nats_ok && postgres_ok;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if healthy { "ok" } else { "degraded" }.to_string(),
            nats: component_status(nats_ok),
            postgres: component_status(postgres_ok),
        }),
    )
}
