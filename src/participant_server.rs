//! HTTP API for a participant process
//!
//! Exposes the resource-manager operations over JSON. Handled results come
//! back with status 200 (including NO votes); unknown transactions and keys
//! are 404, illegal transitions 409, malformed input 400.

use crate::error::TxnError;
use crate::participant::ParticipantEngine;
use crate::protocol::{
    BeginRequest, DecisionRequest, ErrorResponse, HealthResponse, LocalStatusResponse, OkResponse,
    PrepareReply, PrepareRequest, ResourceResponse,
};
use crate::types::{LocalTxnState, ParticipantId, TxId};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared state for the participant router
#[derive(Clone)]
pub struct ParticipantState {
    pub engine: Arc<ParticipantEngine>,
    pub participant_id: ParticipantId,
    pub started_at: Instant,
}

impl ParticipantState {
    pub fn new(engine: Arc<ParticipantEngine>, participant_id: ParticipantId) -> Self {
        ParticipantState { engine, participant_id, started_at: Instant::now() }
    }
}

/// Build the participant router
pub fn router(state: ParticipantState) -> Router {
    Router::new()
        .route("/begin", post(begin_handler))
        .route("/prepare", post(prepare_handler))
        .route("/commit", post(commit_handler))
        .route("/abort", post(abort_handler))
        .route("/status/:tx_id", get(status_handler))
        .route("/resource/:key", get(resource_handler))
        .route("/transactions", get(transactions_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn begin_handler(
    State(state): State<ParticipantState>,
    Json(req): Json<BeginRequest>,
) -> Result<Json<OkResponse>, TxnError> {
    state.engine.begin(req.tx_id)?;
    Ok(Json(OkResponse::ok()))
}

async fn prepare_handler(
    State(state): State<ParticipantState>,
    Json(req): Json<PrepareRequest>,
) -> Result<Json<PrepareReply>, TxnError> {
    let reply = state.engine.prepare(req.tx_id, req.ops)?;
    Ok(Json(reply))
}

async fn commit_handler(
    State(state): State<ParticipantState>,
    Json(req): Json<DecisionRequest>,
) -> Result<Json<OkResponse>, TxnError> {
    state.engine.commit(&req.tx_id)?;
    Ok(Json(OkResponse::ok()))
}

async fn abort_handler(
    State(state): State<ParticipantState>,
    Json(req): Json<DecisionRequest>,
) -> Result<Json<OkResponse>, TxnError> {
    state.engine.abort(&req.tx_id)?;
    Ok(Json(OkResponse::ok()))
}

async fn status_handler(
    State(state): State<ParticipantState>,
    Path(tx_id): Path<TxId>,
) -> Result<Json<LocalStatusResponse>, TxnError> {
    let local_state = state.engine.status(&tx_id)?;
    Ok(Json(LocalStatusResponse { state: local_state }))
}

async fn resource_handler(
    State(state): State<ParticipantState>,
    Path(key): Path<String>,
) -> Response {
    match state.engine.get(&key) {
        Ok(Some(value)) => {
            (StatusCode::OK, Json(ResourceResponse { key, value: Some(value) })).into_response()
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                code: "UNKNOWN_KEY".to_string(),
                message: format!("no value for key '{}'", key),
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Serialize)]
struct LocalTxnView {
    tx_id: TxId,
    state: LocalTxnState,
}

async fn transactions_handler(State(state): State<ParticipantState>) -> Json<Vec<LocalTxnView>> {
    let views = state
        .engine
        .list_transactions()
        .into_iter()
        .map(|(tx_id, state)| LocalTxnView { tx_id, state })
        .collect();
    Json(views)
}

async fn health_handler(State(state): State<ParticipantState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        uptime_s: state.started_at.elapsed().as_secs(),
        participant_id: Some(state.participant_id.clone()),
    })
}
