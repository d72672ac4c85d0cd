//! Participant-side transaction engine
//!
//! Owns one lock table, one durable store, and the map of local
//! transactions. Implements the resource-manager half of Two-Phase Commit:
//! prepare locks and journals the buffered operations, commit applies them
//! as one atomic batch, abort discards them. Once a transaction has voted
//! YES it holds its locks and journal entry until the coordinator's
//! decision arrives, surviving crashes in between.

use crate::error::{TxnError, TxnResult};
use crate::lock_table::{LockAttempt, LockTable};
use crate::protocol::PrepareReply;
use crate::store::{JournalRecord, ParticipantStore};
use crate::types::{LocalTxnState, Operation, TxId};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Participant tuning knobs
#[derive(Debug, Clone)]
pub struct ParticipantConfig {
    /// ACTIVE transactions older than this are aborted autonomously.
    /// PREPARED transactions are never expired.
    pub prepare_timeout: Duration,
    /// How long a recovered PREPARED transaction waits before asking the
    /// coordinator for the decision
    pub recovery_inquiry_timeout: Duration,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        ParticipantConfig {
            prepare_timeout: Duration::from_secs(30),
            recovery_inquiry_timeout: Duration::from_secs(30),
        }
    }
}

/// One transaction as seen by this participant
#[derive(Debug, Clone)]
pub struct LocalTransaction {
    pub tx_id: TxId,
    pub state: LocalTxnState,
    pub locked_keys: Vec<String>,
    pub ops: Vec<Operation>,
    pub updated_at: Instant,
}

impl LocalTransaction {
    fn new(tx_id: TxId, state: LocalTxnState) -> Self {
        LocalTransaction {
            tx_id,
            state,
            locked_keys: Vec::new(),
            ops: Vec::new(),
            updated_at: Instant::now(),
        }
    }
}

/// Local resource manager for one participant process
pub struct ParticipantEngine {
    locks: LockTable,
    store: ParticipantStore,
    txns: RwLock<HashMap<TxId, LocalTransaction>>,
    config: ParticipantConfig,
}

impl ParticipantEngine {
    /// Open the durable store and restore every prepared-but-undecided
    /// transaction from the journal: locks re-acquired, state PREPARED.
    /// Recovered transactions are never decided here; they wait for the
    /// coordinator.
    pub fn open<P: AsRef<Path>>(path: P, config: ParticipantConfig) -> TxnResult<Self> {
        let store = ParticipantStore::open(path)?;
        let locks = LockTable::new();
        let mut txns = HashMap::new();

        for record in store.journal_scan()? {
            let mut locked_keys = Vec::new();
            for op in &record.ops {
                match locks.acquire(&record.tx_id, &op.key) {
                    LockAttempt::Acquired => {
                        if !locked_keys.contains(&op.key) {
                            locked_keys.push(op.key.clone());
                        }
                    }
                    LockAttempt::Conflict { owner } => {
                        return Err(TxnError::Storage(format!(
                            "journal entries for '{}' and '{}' overlap on key '{}'",
                            record.tx_id, owner, op.key
                        )));
                    }
                }
            }

            info!(tx_id = %record.tx_id, keys = locked_keys.len(), "restored prepared transaction");

            let mut txn = LocalTransaction::new(record.tx_id.clone(), LocalTxnState::Prepared);
            txn.locked_keys = locked_keys;
            txn.ops = record.ops;
            txns.insert(record.tx_id, txn);
        }

        Ok(ParticipantEngine {
            locks,
            store,
            txns: RwLock::new(txns),
            config,
        })
    }

    /// Create an ACTIVE transaction entry. Fails if the id is taken.
    pub fn begin(&self, tx_id: TxId) -> TxnResult<()> {
        let mut txns = self.txns.write().unwrap();

        if txns.contains_key(&tx_id) {
            return Err(TxnError::IllegalState {
                tx_id,
                detail: "begin on existing transaction".to_string(),
            });
        }

        txns.insert(tx_id.clone(), LocalTransaction::new(tx_id, LocalTxnState::Active));
        Ok(())
    }

    /// Vote on a transaction: lock every key in submission order, journal
    /// the buffer durably, answer YES. Any conflict or validation failure
    /// releases the locks, aborts locally, and answers NO with a reason.
    /// Repeated prepare on a PREPARED transaction answers YES again.
    pub fn prepare(&self, tx_id: TxId, ops: Vec<Operation>) -> TxnResult<PrepareReply> {
        let mut txns = self.txns.write().unwrap();

        match txns.get(&tx_id).map(|t| t.state) {
            Some(LocalTxnState::Prepared) => return Ok(PrepareReply::yes()),
            Some(LocalTxnState::Aborted) => {
                return Ok(PrepareReply::no("transaction already aborted"));
            }
            Some(LocalTxnState::Committed) => {
                return Err(TxnError::IllegalState {
                    tx_id,
                    detail: "prepare on COMMITTED transaction".to_string(),
                });
            }
            Some(LocalTxnState::Active) | None => {}
        }

        for op in &ops {
            if let Err(e) = op.validate() {
                txns.insert(tx_id.clone(), LocalTransaction::new(tx_id.clone(), LocalTxnState::Aborted));
                return Ok(PrepareReply::no(e.to_string()));
            }
        }

        let mut locked_keys = Vec::new();
        for op in &ops {
            match self.locks.acquire(&tx_id, &op.key) {
                LockAttempt::Acquired => {
                    if !locked_keys.contains(&op.key) {
                        locked_keys.push(op.key.clone());
                    }
                }
                LockAttempt::Conflict { owner } => {
                    self.locks.release_all(&tx_id);
                    txns.insert(tx_id.clone(), LocalTransaction::new(tx_id.clone(), LocalTxnState::Aborted));
                    warn!(tx_id = %tx_id, key = %op.key, owner = %owner, "prepare lost lock race, voting NO");
                    let conflict = TxnError::LockConflict { key: op.key.clone(), owner };
                    return Ok(PrepareReply::no(conflict.to_string()));
                }
            }
        }

        // Journal must be durable before the YES vote leaves this process
        let record = JournalRecord::new(tx_id.clone(), ops.clone());
        if let Err(e) = self.store.journal_put(&record) {
            self.locks.release_all(&tx_id);
            txns.insert(tx_id.clone(), LocalTransaction::new(tx_id.clone(), LocalTxnState::Aborted));
            return Err(e);
        }

        let mut txn = LocalTransaction::new(tx_id.clone(), LocalTxnState::Prepared);
        txn.locked_keys = locked_keys;
        txn.ops = ops;
        txns.insert(tx_id.clone(), txn);

        info!(tx_id = %tx_id, "prepared, voting YES");
        Ok(PrepareReply::yes())
    }

    /// Apply a PREPARED transaction's buffered operations as one atomic
    /// batch, then release its locks. Idempotent on COMMITTED. Commit of
    /// an ABORTED transaction is an illegal-state error, distinguishable
    /// from an unknown transaction.
    pub fn commit(&self, tx_id: &TxId) -> TxnResult<()> {
        let mut txns = self.txns.write().unwrap();
        let txn = txns
            .get_mut(tx_id)
            .ok_or_else(|| TxnError::UnknownTransaction(tx_id.clone()))?;

        match txn.state {
            LocalTxnState::Committed => Ok(()),
            LocalTxnState::Aborted => Err(TxnError::IllegalState {
                tx_id: tx_id.clone(),
                detail: "commit on ABORTED transaction".to_string(),
            }),
            LocalTxnState::Active => Err(TxnError::IllegalState {
                tx_id: tx_id.clone(),
                detail: "commit before prepare".to_string(),
            }),
            LocalTxnState::Prepared => {
                // On failure the transaction stays PREPARED and the
                // coordinator retries the commit.
                self.store.apply_commit(tx_id, &txn.ops)?;
                self.locks.release_all(tx_id);

                txn.state = LocalTxnState::Committed;
                txn.ops.clear();
                txn.locked_keys.clear();
                txn.updated_at = Instant::now();

                info!(tx_id = %tx_id, "committed");
                Ok(())
            }
        }
    }

    /// Discard a transaction's buffered operations and release its locks.
    /// Safe to call on an ABORTED or absent transaction.
    pub fn abort(&self, tx_id: &TxId) -> TxnResult<()> {
        let mut txns = self.txns.write().unwrap();

        let txn = match txns.get_mut(tx_id) {
            Some(txn) => txn,
            None => return Ok(()),
        };

        match txn.state {
            LocalTxnState::Aborted => Ok(()),
            LocalTxnState::Committed => Err(TxnError::IllegalState {
                tx_id: tx_id.clone(),
                detail: "abort on COMMITTED transaction".to_string(),
            }),
            LocalTxnState::Active | LocalTxnState::Prepared => {
                self.store.journal_remove(tx_id)?;
                self.locks.release_all(tx_id);

                txn.state = LocalTxnState::Aborted;
                txn.ops.clear();
                txn.locked_keys.clear();
                txn.updated_at = Instant::now();

                info!(tx_id = %tx_id, "aborted");
                Ok(())
            }
        }
    }

    /// Current state of a transaction
    pub fn status(&self, tx_id: &TxId) -> TxnResult<LocalTxnState> {
        self.txns
            .read()
            .unwrap()
            .get(tx_id)
            .map(|t| t.state)
            .ok_or_else(|| TxnError::UnknownTransaction(tx_id.clone()))
    }

    /// Last committed value for `key`. Reads bypass the lock table.
    pub fn get(&self, key: &str) -> TxnResult<Option<String>> {
        self.store.get(key)
    }

    /// Abort ACTIVE transactions that never reached a vote within the
    /// prepare timeout. PREPARED transactions are left alone: after a YES
    /// the participant must honor either decision, however late.
    pub fn expire_stale(&self) -> usize {
        let stale: Vec<TxId> = {
            let txns = self.txns.read().unwrap();
            txns.values()
                .filter(|t| {
                    t.state == LocalTxnState::Active
                        && t.updated_at.elapsed() > self.config.prepare_timeout
                })
                .map(|t| t.tx_id.clone())
                .collect()
        };

        for tx_id in &stale {
            warn!(tx_id = %tx_id, "no prepare within timeout, aborting");
            let _ = self.abort(tx_id);
        }

        stale.len()
    }

    /// Ids of transactions currently blocked in PREPARED
    pub fn prepared_ids(&self) -> Vec<TxId> {
        self.txns
            .read()
            .unwrap()
            .values()
            .filter(|t| t.state == LocalTxnState::Prepared)
            .map(|t| t.tx_id.clone())
            .collect()
    }

    /// Snapshot of all known transactions and their states
    pub fn list_transactions(&self) -> Vec<(TxId, LocalTxnState)> {
        self.txns
            .read()
            .unwrap()
            .values()
            .map(|t| (t.tx_id.clone(), t.state))
            .collect()
    }

    pub fn config(&self) -> &ParticipantConfig {
        &self.config
    }

    /// Inspection hook for tests and diagnostics
    pub fn is_locked(&self, key: &str) -> bool {
        self.locks.is_locked(key)
    }
}
