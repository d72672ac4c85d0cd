//! Transport adapter between the coordinator and participants
//!
//! One synchronous call per protocol operation, each with a caller-supplied
//! timeout. Callers must be able to tell three outcomes apart: a structured
//! response, an application-level rejection (the participant answered with a
//! well-formed error), and a transport failure (timeout, connection refused,
//! malformed body). The engines react to each differently.

use crate::protocol::{DecisionRequest, ErrorResponse, LocalStatusResponse, PrepareReply, PrepareRequest, TransactionView};
use crate::types::{Decision, LocalTxnState, Operation, TxId};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single protocol call
#[derive(Debug, Clone, Error)]
pub enum CallError {
    /// The participant processed the call and refused it
    #[error("participant rejected call ({code}): {message}")]
    Rejected { code: String, message: String },

    /// The participant could not be reached or answered garbage
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Protocol operations the coordinator invokes against one participant
#[async_trait]
pub trait ParticipantTransport: Send + Sync {
    async fn prepare(
        &self,
        endpoint: &str,
        tx_id: &TxId,
        ops: &[Operation],
        timeout: Duration,
    ) -> Result<PrepareReply, CallError>;

    async fn commit(&self, endpoint: &str, tx_id: &TxId, timeout: Duration) -> Result<(), CallError>;

    async fn abort(&self, endpoint: &str, tx_id: &TxId, timeout: Duration) -> Result<(), CallError>;

    async fn status(
        &self,
        endpoint: &str,
        tx_id: &TxId,
        timeout: Duration,
    ) -> Result<LocalTxnState, CallError>;
}

/// HTTP/JSON transport over the participant API
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        HttpTransport { client: reqwest::Client::new() }
    }

    async fn post_json<B, R>(&self, url: String, body: &B, timeout: Duration) -> Result<R, CallError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let response = self
            .client
            .post(&url)
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(to_transport_error)?;

        let status = response.status();
        if status.is_success() {
            response
                .json::<R>()
                .await
                .map_err(|e| CallError::Transport(format!("malformed response from {}: {}", url, e)))
        } else {
            match response.json::<ErrorResponse>().await {
                Ok(err) => Err(CallError::Rejected { code: err.code, message: err.message }),
                Err(e) => Err(CallError::Transport(format!("http {} from {}: {}", status, url, e))),
            }
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ParticipantTransport for HttpTransport {
    async fn prepare(
        &self,
        endpoint: &str,
        tx_id: &TxId,
        ops: &[Operation],
        timeout: Duration,
    ) -> Result<PrepareReply, CallError> {
        let body = PrepareRequest { tx_id: tx_id.clone(), ops: ops.to_vec() };
        self.post_json(format!("{}/prepare", endpoint), &body, timeout).await
    }

    async fn commit(&self, endpoint: &str, tx_id: &TxId, timeout: Duration) -> Result<(), CallError> {
        let body = DecisionRequest { tx_id: tx_id.clone() };
        let _: crate::protocol::OkResponse =
            self.post_json(format!("{}/commit", endpoint), &body, timeout).await?;
        Ok(())
    }

    async fn abort(&self, endpoint: &str, tx_id: &TxId, timeout: Duration) -> Result<(), CallError> {
        let body = DecisionRequest { tx_id: tx_id.clone() };
        let _: crate::protocol::OkResponse =
            self.post_json(format!("{}/abort", endpoint), &body, timeout).await?;
        Ok(())
    }

    async fn status(
        &self,
        endpoint: &str,
        tx_id: &TxId,
        timeout: Duration,
    ) -> Result<LocalTxnState, CallError> {
        let url = format!("{}/status/{}", endpoint, tx_id);
        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(to_transport_error)?;

        let status = response.status();
        if status.is_success() {
            let body: LocalStatusResponse = response
                .json()
                .await
                .map_err(|e| CallError::Transport(format!("malformed response from {}: {}", url, e)))?;
            Ok(body.state)
        } else {
            match response.json::<ErrorResponse>().await {
                Ok(err) => Err(CallError::Rejected { code: err.code, message: err.message }),
                Err(e) => Err(CallError::Transport(format!("http {} from {}: {}", status, url, e))),
            }
        }
    }
}

/// Ask the coordinator whether it has decided `tx_id`.
///
/// Used by a recovering participant stuck in PREPARED. Returns `Ok(None)`
/// when the coordinator is reachable but has not (or no longer) recorded a
/// decision; the participant must keep blocking in that case.
pub async fn fetch_decision(
    client: &reqwest::Client,
    coordinator: &str,
    tx_id: &TxId,
    timeout: Duration,
) -> Result<Option<Decision>, CallError> {
    let url = format!("{}/status/{}", coordinator, tx_id);
    let response = client
        .get(&url)
        .timeout(timeout)
        .send()
        .await
        .map_err(to_transport_error)?;

    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !response.status().is_success() {
        return Err(CallError::Transport(format!("http {} from {}", response.status(), url)));
    }

    let view: TransactionView = response
        .json()
        .await
        .map_err(|e| CallError::Transport(format!("malformed response from {}: {}", url, e)))?;
    Ok(view.decision)
}

fn to_transport_error(e: reqwest::Error) -> CallError {
    if e.is_timeout() {
        CallError::Transport(format!("timeout: {}", e))
    } else {
        CallError::Transport(e.to_string())
    }
}
