//! Core type definitions for the atomic-commit engine

use crate::error::{TxnError, TxnResult};
use serde::{Deserialize, Serialize};

/// Globally unique transaction identifier, assigned by the coordinator
pub type TxId = String;

/// Identifier of a participant process in the commit group
pub type ParticipantId = String;

/// Maximum size of a WRITE value in bytes (64 KiB)
pub const MAX_VALUE_BYTES: usize = 64 * 1024;

/// Kind of operation inside a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OpKind {
    /// Takes part in locking only; no durable effect at commit
    Read,
    /// Sets `key` to `value` at commit
    Write,
    /// Removes `key` at commit
    Delete,
}

/// A single operation addressed to one participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OpKind,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Operation {
    pub fn read(key: impl Into<String>) -> Self {
        Operation { kind: OpKind::Read, key: key.into(), value: None }
    }

    pub fn write(key: impl Into<String>, value: impl Into<String>) -> Self {
        Operation { kind: OpKind::Write, key: key.into(), value: Some(value.into()) }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Operation { kind: OpKind::Delete, key: key.into(), value: None }
    }

    /// True for operations that contribute to the commit batch
    pub fn is_durable(&self) -> bool {
        matches!(self.kind, OpKind::Write | OpKind::Delete)
    }

    /// Check well-formedness: non-empty key, WRITE carries a bounded value
    pub fn validate(&self) -> TxnResult<()> {
        if self.key.is_empty() {
            return Err(TxnError::InvalidRequest("empty key".to_string()));
        }

        match self.kind {
            OpKind::Write => match &self.value {
                None => Err(TxnError::InvalidRequest(format!(
                    "WRITE to '{}' is missing a value",
                    self.key
                ))),
                Some(v) if v.len() > MAX_VALUE_BYTES => Err(TxnError::InvalidRequest(format!(
                    "value for '{}' exceeds {} bytes",
                    self.key, MAX_VALUE_BYTES
                ))),
                Some(_) => Ok(()),
            },
            OpKind::Read | OpKind::Delete => Ok(()),
        }
    }
}

/// Vote returned by a participant during the prepare phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Vote {
    Yes,
    No,
}

/// Final outcome of a transaction, immutable once recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Committed,
    Aborted,
}

/// Coordinator-side transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TxnState {
    /// Created, prepare not yet dispatched
    Init,
    /// Waiting for votes
    Preparing,
    /// Decision COMMITTED logged, dispatching commits
    Committing,
    /// All participants acknowledged commit
    Committed,
    /// Dispatching aborts
    Aborting,
    /// Aborted
    Aborted,
}

impl TxnState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxnState::Committed | TxnState::Aborted)
    }
}

/// Participant-side transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LocalTxnState {
    /// Created by begin or first prepare, locks may be held
    Active,
    /// Voted YES; journal entry durable, locks held until the decision
    Prepared,
    /// Buffered writes applied
    Committed,
    /// Buffered writes discarded
    Aborted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_requires_value() {
        let op = Operation { kind: OpKind::Write, key: "x".to_string(), value: None };
        assert!(op.validate().is_err());

        let op = Operation::write("x", "1");
        assert!(op.validate().is_ok());
    }

    #[test]
    fn test_empty_key_rejected() {
        let op = Operation::read("");
        assert!(op.validate().is_err());
    }

    #[test]
    fn test_value_size_bound() {
        let op = Operation::write("x", "v".repeat(MAX_VALUE_BYTES));
        assert!(op.validate().is_ok());

        let op = Operation::write("x", "v".repeat(MAX_VALUE_BYTES + 1));
        assert!(op.validate().is_err());
    }

    #[test]
    fn test_kind_wire_casing() {
        assert_eq!(serde_json::to_string(&OpKind::Write).unwrap(), "\"WRITE\"");
        assert_eq!(serde_json::to_string(&Vote::No).unwrap(), "\"NO\"");
        let kind: OpKind = serde_json::from_str("\"DELETE\"").unwrap();
        assert_eq!(kind, OpKind::Delete);
    }

    #[test]
    fn test_durable_ops() {
        assert!(!Operation::read("k").is_durable());
        assert!(Operation::write("k", "v").is_durable());
        assert!(Operation::delete("k").is_durable());
    }
}
