//! Wire protocol types for the coordinator and participant HTTP APIs
//!
//! All request/response bodies are JSON. Participants reply with a
//! structured error code on failure so the coordinator never has to guess.

use crate::types::{Decision, LocalTxnState, Operation, ParticipantId, TxId, TxnState, Vote};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One participant's slice of a transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub participant_id: ParticipantId,
    pub ops: Vec<Operation>,
}

/// `POST /execute` request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<TxId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    pub assignments: Vec<Assignment>,
}

/// Coordinator view of a transaction, returned by `/execute` and `/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionView {
    pub tx_id: TxId,
    pub state: TxnState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    pub votes: HashMap<ParticipantId, Vote>,
    pub created_at: String,
}

/// `POST /register` request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub participant_id: ParticipantId,
    pub endpoint: String,
}

/// Registry listing entry for `GET /participants`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantView {
    pub participant_id: ParticipantId,
    pub endpoint: String,
    pub last_seen: u64,
}

/// Generic acknowledgment body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    pub fn ok() -> Self {
        OkResponse { ok: true }
    }
}

/// `GET /health` response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub uptime_s: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<ParticipantId>,
}

/// `POST /begin` request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeginRequest {
    pub tx_id: TxId,
}

/// `POST /prepare` request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareRequest {
    pub tx_id: TxId,
    pub ops: Vec<Operation>,
}

/// `POST /prepare` response body: the participant's vote
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareReply {
    pub vote: Vote,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PrepareReply {
    pub fn yes() -> Self {
        PrepareReply { vote: Vote::Yes, reason: None }
    }

    pub fn no(reason: impl Into<String>) -> Self {
        PrepareReply { vote: Vote::No, reason: Some(reason.into()) }
    }
}

/// `POST /commit` and `POST /abort` request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub tx_id: TxId,
}

/// Participant `GET /status/{tx_id}` response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalStatusResponse {
    pub state: LocalTxnState,
}

/// `GET /resource/{key}` response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceResponse {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Structured error body carried on non-200 responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}
