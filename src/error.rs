//! Error types for the atomic-commit engine
//!
//! Every error kind maps to a distinguishable wire signal so that the
//! coordinator and clients can react to each one differently.

use crate::types::TxId;
use thiserror::Error;

/// Result alias used throughout the engine
pub type TxnResult<T> = Result<T, TxnError>;

/// Errors surfaced by the coordinator and participant engines
#[derive(Debug, Clone, Error)]
pub enum TxnError {
    /// Malformed input: missing value, unknown kind, empty key. Not retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Operation references a transaction this process has no record of
    #[error("unknown transaction '{0}'")]
    UnknownTransaction(TxId),

    /// Operation is not legal in the transaction's current state
    #[error("illegal state for transaction '{tx_id}': {detail}")]
    IllegalState { tx_id: TxId, detail: String },

    /// No-wait lock acquisition failed; surfaces as a NO vote
    #[error("lock conflict on '{key}': held by transaction '{owner}'")]
    LockConflict { key: String, owner: TxId },

    /// A deadline elapsed while waiting for a peer
    #[error("timed out: {0}")]
    Timeout(String),

    /// Peer unreachable or returned a malformed response
    #[error("transport error: {0}")]
    Transport(String),

    /// Durable store failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Unexpected internal failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl TxnError {
    /// Stable wire code for this error kind
    pub fn code(&self) -> &'static str {
        match self {
            TxnError::InvalidRequest(_) => "INVALID_REQUEST",
            TxnError::UnknownTransaction(_) => "UNKNOWN_TRANSACTION",
            TxnError::IllegalState { .. } => "ILLEGAL_STATE",
            TxnError::LockConflict { .. } => "LOCK_CONFLICT",
            TxnError::Timeout(_) => "TIMEOUT",
            TxnError::Transport(_) => "TRANSPORT_ERROR",
            TxnError::Storage(_) => "STORAGE_ERROR",
            TxnError::Internal(_) => "INTERNAL",
        }
    }
}

impl axum::response::IntoResponse for TxnError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match &self {
            TxnError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            TxnError::UnknownTransaction(_) => StatusCode::NOT_FOUND,
            TxnError::IllegalState { .. } => StatusCode::CONFLICT,
            TxnError::LockConflict { .. } => StatusCode::CONFLICT,
            TxnError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            TxnError::Transport(_) => StatusCode::BAD_GATEWAY,
            TxnError::Storage(_) | TxnError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = crate::protocol::ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<rocksdb::Error> for TxnError {
    fn from(e: rocksdb::Error) -> Self {
        TxnError::Storage(e.to_string())
    }
}

impl From<std::io::Error> for TxnError {
    fn from(e: std::io::Error) -> Self {
        TxnError::Storage(e.to_string())
    }
}

impl From<bincode::Error> for TxnError {
    fn from(e: bincode::Error) -> Self {
        TxnError::Storage(e.to_string())
    }
}
