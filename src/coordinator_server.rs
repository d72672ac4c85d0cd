//! HTTP API for the coordinator process
//!
//! Clients submit transactions and poll outcomes here; participants are
//! admitted through `/register`. The final reply of `/execute` is only ever
//! a COMMITTED or ABORTED transaction view, never a partial outcome.

use crate::coordinator::{CoordinatorEngine, CoordinatorStats};
use crate::error::TxnError;
use crate::protocol::{ExecuteRequest, OkResponse, ParticipantView, RegisterRequest, TransactionView};
use crate::registry::ParticipantRegistry;
use crate::types::TxId;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state for the coordinator router
#[derive(Clone)]
pub struct CoordinatorState {
    pub engine: Arc<CoordinatorEngine>,
    pub registry: Arc<ParticipantRegistry>,
    pub started_at: Instant,
}

impl CoordinatorState {
    pub fn new(engine: Arc<CoordinatorEngine>, registry: Arc<ParticipantRegistry>) -> Self {
        CoordinatorState { engine, registry, started_at: Instant::now() }
    }
}

/// Build the coordinator router
pub fn router(state: CoordinatorState) -> Router {
    Router::new()
        .route("/execute", post(execute_handler))
        .route("/status/:tx_id", get(status_handler))
        .route("/transactions", get(transactions_handler))
        .route("/register", post(register_handler))
        .route("/participants", get(participants_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn execute_handler(
    State(state): State<CoordinatorState>,
    Json(req): Json<ExecuteRequest>,
) -> Result<Json<TransactionView>, TxnError> {
    let view = state.engine.execute(req).await?;
    Ok(Json(view))
}

async fn status_handler(
    State(state): State<CoordinatorState>,
    Path(tx_id): Path<TxId>,
) -> Result<Json<TransactionView>, TxnError> {
    Ok(Json(state.engine.status(&tx_id)?))
}

async fn transactions_handler(State(state): State<CoordinatorState>) -> Json<Vec<TransactionView>> {
    Json(state.engine.list())
}

async fn register_handler(
    State(state): State<CoordinatorState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<OkResponse>, TxnError> {
    if req.participant_id.is_empty() {
        return Err(TxnError::InvalidRequest("empty participant id".to_string()));
    }
    if req.endpoint.is_empty() {
        return Err(TxnError::InvalidRequest("empty endpoint".to_string()));
    }

    info!(participant_id = %req.participant_id, endpoint = %req.endpoint, "participant registered");
    state.registry.register(req.participant_id, req.endpoint);
    Ok(Json(OkResponse::ok()))
}

async fn participants_handler(State(state): State<CoordinatorState>) -> Json<Vec<ParticipantView>> {
    Json(state.registry.list())
}

#[derive(Debug, Serialize)]
struct CoordinatorHealth {
    ok: bool,
    uptime_s: u64,
    stats: CoordinatorStats,
}

async fn health_handler(State(state): State<CoordinatorState>) -> Json<CoordinatorHealth> {
    Json(CoordinatorHealth {
        ok: true,
        uptime_s: state.started_at.elapsed().as_secs(),
        stats: state.engine.stats(),
    })
}
