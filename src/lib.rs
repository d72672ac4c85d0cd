//! Pact - Distributed Atomic-Commit Engine
//!
//! A coordinator drives a set of participants through the Two-Phase Commit
//! protocol so that a multi-key update either applies at every participant
//! or at none. Clients submit transactions over HTTP/JSON; the coordinator
//! returns a single COMMITTED or ABORTED outcome.
//!
//! # Architecture
//!
//! - Lock Table: per-participant exclusive locks with no-wait conflicts
//! - Store: RocksDB-backed key-value data plus the prepared journal
//! - Participant Engine: local transaction state machine and recovery
//! - Coordinator Engine: prepare/decide fan-out with a durable decision log
//! - Registry: participant id to endpoint directory
//! - Transport: HTTP/JSON adapter with per-call timeouts
//! - Servers: axum routers for the coordinator and participant APIs

pub mod error;
pub mod types;
pub mod protocol;

// Participant side
pub mod lock_table;
pub mod store;
pub mod participant;

// Coordinator side
pub mod decision_log;
pub mod registry;
pub mod transport;
pub mod coordinator;

// HTTP surfaces
pub mod coordinator_server;
pub mod participant_server;

pub use error::{TxnError, TxnResult};
pub use types::{Decision, LocalTxnState, OpKind, Operation, ParticipantId, TxId, TxnState, Vote};

// Participant exports
pub use lock_table::{LockAttempt, LockTable};
pub use participant::{LocalTransaction, ParticipantConfig, ParticipantEngine};
pub use store::{JournalRecord, ParticipantStore};

// Coordinator exports
pub use coordinator::{CoordinatorConfig, CoordinatorEngine, CoordinatorStats, TxRecord};
pub use decision_log::{DecisionLog, DecisionRecord, LogRecovery};
pub use registry::{ParticipantEntry, ParticipantRegistry};
pub use transport::{CallError, HttpTransport, ParticipantTransport};
