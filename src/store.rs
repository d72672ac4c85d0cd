//! Durable participant store backed by RocksDB
//!
//! Two column families hold all participant state:
//! - `data`: the committed key-value pairs
//! - `journal`: one record per prepared-but-undecided transaction, written
//!   with a synced put before the participant acknowledges YES
//!
//! Commit applies the buffered writes and the journal-entry removal in a
//! single synced `WriteBatch`. Before that batch is durable a crash leaves
//! the transaction PREPARED; after it, COMMITTED.

use crate::error::{TxnError, TxnResult};
use crate::types::{OpKind, Operation, TxId};
use rocksdb::{IteratorMode, Options, WriteBatch, WriteOptions, DB};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

const CF_DATA: &str = "data";
const CF_JOURNAL: &str = "journal";

/// Durable record of a prepared transaction's buffered operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRecord {
    pub tx_id: TxId,
    pub ops: Vec<Operation>,
    pub prepared_at: u64,
}

impl JournalRecord {
    pub fn new(tx_id: TxId, ops: Vec<Operation>) -> Self {
        JournalRecord { tx_id, ops, prepared_at: current_timestamp() }
    }
}

/// Participant storage engine
pub struct ParticipantStore {
    db: Arc<DB>,
}

impl ParticipantStore {
    /// Open or create the store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> TxnResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.increase_parallelism(num_cpus::get() as i32);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let cfs = vec![CF_DATA, CF_JOURNAL];
        let db = DB::open_cf(&opts, path, cfs)?;

        Ok(ParticipantStore { db: Arc::new(db) })
    }

    /// Last committed value for `key`, if any
    pub fn get(&self, key: &str) -> TxnResult<Option<String>> {
        let cf = self.data_cf()?;

        match self.db.get_cf(&cf, key.as_bytes())? {
            Some(bytes) => {
                let value = String::from_utf8(bytes)
                    .map_err(|e| TxnError::Storage(format!("non-utf8 value for '{}': {}", key, e)))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Durably record a prepared transaction before the YES vote leaves
    pub fn journal_put(&self, record: &JournalRecord) -> TxnResult<()> {
        let cf = self.journal_cf()?;
        let bytes = bincode::serialize(record)?;

        self.db
            .put_cf_opt(&cf, record.tx_id.as_bytes(), bytes, &synced_writes())?;
        Ok(())
    }

    /// Drop a journal entry on abort; no-op for unknown ids
    pub fn journal_remove(&self, tx_id: &TxId) -> TxnResult<()> {
        let cf = self.journal_cf()?;
        self.db
            .delete_cf_opt(&cf, tx_id.as_bytes(), &synced_writes())?;
        Ok(())
    }

    /// All prepared-but-undecided transactions, for startup recovery
    pub fn journal_scan(&self) -> TxnResult<Vec<JournalRecord>> {
        let cf = self.journal_cf()?;
        let mut records = Vec::new();

        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_key, value) = item?;
            let record: JournalRecord = bincode::deserialize(&value)?;
            records.push(record);
        }

        Ok(records)
    }

    /// Apply a transaction's durable operations and remove its journal
    /// entry as one atomic, synced batch. READs are discarded here.
    pub fn apply_commit(&self, tx_id: &TxId, ops: &[Operation]) -> TxnResult<()> {
        let data = self.data_cf()?;
        let journal = self.journal_cf()?;

        let mut batch = WriteBatch::default();
        for op in ops {
            match op.kind {
                OpKind::Write => {
                    let value = op.value.as_deref().ok_or_else(|| {
                        TxnError::Internal(format!("prepared WRITE to '{}' lost its value", op.key))
                    })?;
                    batch.put_cf(&data, op.key.as_bytes(), value.as_bytes());
                }
                OpKind::Delete => {
                    batch.delete_cf(&data, op.key.as_bytes());
                }
                OpKind::Read => {}
            }
        }
        batch.delete_cf(&journal, tx_id.as_bytes());

        self.db.write_opt(batch, &synced_writes())?;
        Ok(())
    }

    fn data_cf(&self) -> TxnResult<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(CF_DATA)
            .ok_or_else(|| TxnError::Storage("data column family not found".to_string()))
    }

    fn journal_cf(&self) -> TxnResult<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(CF_JOURNAL)
            .ok_or_else(|| TxnError::Storage("journal column family not found".to_string()))
    }
}

fn synced_writes() -> WriteOptions {
    let mut opts = WriteOptions::default();
    opts.set_sync(true);
    opts
}

fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_apply_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let store = ParticipantStore::open(temp_dir.path()).unwrap();

        let tx = "t1".to_string();
        let ops = vec![Operation::write("x", "1"), Operation::read("y")];

        store.apply_commit(&tx, &ops).unwrap();

        assert_eq!(store.get("x").unwrap().as_deref(), Some("1"));
        assert_eq!(store.get("y").unwrap(), None);
    }

    #[test]
    fn test_delete_removes_key() {
        let temp_dir = TempDir::new().unwrap();
        let store = ParticipantStore::open(temp_dir.path()).unwrap();

        store
            .apply_commit(&"t1".to_string(), &[Operation::write("x", "1")])
            .unwrap();
        store
            .apply_commit(&"t2".to_string(), &[Operation::delete("x")])
            .unwrap();

        assert_eq!(store.get("x").unwrap(), None);
    }

    #[test]
    fn test_journal_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = ParticipantStore::open(temp_dir.path()).unwrap();

        let record = JournalRecord::new("t1".to_string(), vec![Operation::write("x", "1")]);
        store.journal_put(&record).unwrap();

        let scanned = store.journal_scan().unwrap();
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].tx_id, "t1");
        assert_eq!(scanned[0].ops, record.ops);
    }

    #[test]
    fn test_commit_clears_journal_entry() {
        let temp_dir = TempDir::new().unwrap();
        let store = ParticipantStore::open(temp_dir.path()).unwrap();

        let tx = "t1".to_string();
        let ops = vec![Operation::write("x", "1")];
        store.journal_put(&JournalRecord::new(tx.clone(), ops.clone())).unwrap();

        store.apply_commit(&tx, &ops).unwrap();

        assert!(store.journal_scan().unwrap().is_empty());
        assert_eq!(store.get("x").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_journal_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();

        {
            let store = ParticipantStore::open(temp_dir.path()).unwrap();
            let record = JournalRecord::new("t1".to_string(), vec![Operation::write("x", "1")]);
            store.journal_put(&record).unwrap();
        }

        let store = ParticipantStore::open(temp_dir.path()).unwrap();
        let scanned = store.journal_scan().unwrap();
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].tx_id, "t1");
    }

    #[test]
    fn test_journal_remove_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = ParticipantStore::open(temp_dir.path()).unwrap();

        store.journal_remove(&"missing".to_string()).unwrap();
    }
}
