//! Coordinator decision log
//!
//! Append-only journal of transaction outcomes. A COMMITTED decision is
//! written and synced here before the first commit message leaves the
//! coordinator, so a restart can resume dispatching the recorded decision
//! instead of inventing a new one.

use crate::error::{TxnError, TxnResult};
use crate::types::{Decision, ParticipantId, TxId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Log file magic number
const LOG_MAGIC: u32 = 0x9AC7_0001;

/// Log format version
const LOG_VERSION: u32 = 1;

/// Decision log entry types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DecisionRecord {
    /// Transaction accepted, prepare fan-out about to start
    Begin {
        tx_id: TxId,
        participants: Vec<ParticipantId>,
        timestamp: u64,
    },

    /// Outcome fixed; immutable from here on
    Outcome {
        tx_id: TxId,
        decision: Decision,
        timestamp: u64,
    },

    /// Every participant acknowledged the outcome
    Finished {
        tx_id: TxId,
        timestamp: u64,
    },
}

impl DecisionRecord {
    pub fn tx_id(&self) -> &TxId {
        match self {
            DecisionRecord::Begin { tx_id, .. } => tx_id,
            DecisionRecord::Outcome { tx_id, .. } => tx_id,
            DecisionRecord::Finished { tx_id, .. } => tx_id,
        }
    }
}

/// Log file header
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogHeader {
    magic: u32,
    version: u32,
    created_at: u64,
}

impl LogHeader {
    fn new() -> Self {
        LogHeader {
            magic: LOG_MAGIC,
            version: LOG_VERSION,
            created_at: current_timestamp(),
        }
    }

    fn is_valid(&self) -> bool {
        self.magic == LOG_MAGIC && self.version == LOG_VERSION
    }
}

/// What a restarted coordinator owes its participants
#[derive(Debug, Default)]
pub struct LogRecovery {
    /// Begin logged, no outcome: treat as ABORTED and notify participants
    pub undecided: Vec<(TxId, Vec<ParticipantId>)>,
    /// Outcome logged but not finished: resume dispatching it
    pub unfinished: Vec<(TxId, Decision, Vec<ParticipantId>)>,
    /// Fully acknowledged transactions
    pub finished: Vec<(TxId, Decision)>,
}

/// Append-only, synced decision journal
pub struct DecisionLog {
    file: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl DecisionLog {
    /// Create or open the log at `path`, writing the header if new
    pub fn open<P: AsRef<Path>>(path: P) -> TxnResult<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = BufWriter::new(file);

        if writer.get_ref().metadata()?.len() == 0 {
            let header = LogHeader::new();
            let header_bytes = bincode::serialize(&header)?;
            writer.write_all(&header_bytes)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        Ok(DecisionLog { file: Mutex::new(writer), path })
    }

    /// Append a record and fsync before returning
    pub fn append(&self, record: &DecisionRecord) -> TxnResult<()> {
        let mut file = self.file.lock().unwrap();

        let record_bytes = bincode::serialize(record)?;
        let len = record_bytes.len() as u32;

        file.write_all(&len.to_le_bytes())?;
        file.write_all(&record_bytes)?;
        file.flush()?;
        file.get_ref().sync_all()?;

        Ok(())
    }

    pub fn log_begin(&self, tx_id: &TxId, participants: Vec<ParticipantId>) -> TxnResult<()> {
        self.append(&DecisionRecord::Begin {
            tx_id: tx_id.clone(),
            participants,
            timestamp: current_timestamp(),
        })
    }

    pub fn log_outcome(&self, tx_id: &TxId, decision: Decision) -> TxnResult<()> {
        self.append(&DecisionRecord::Outcome {
            tx_id: tx_id.clone(),
            decision,
            timestamp: current_timestamp(),
        })
    }

    pub fn log_finished(&self, tx_id: &TxId) -> TxnResult<()> {
        self.append(&DecisionRecord::Finished { tx_id: tx_id.clone(), timestamp: current_timestamp() })
    }

    /// Read every record back, oldest first
    pub fn read_all(&self) -> TxnResult<Vec<DecisionRecord>> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let mut header_bytes = vec![0u8; std::mem::size_of::<LogHeader>()];
        reader.read_exact(&mut header_bytes)?;
        let header: LogHeader = bincode::deserialize(&header_bytes)?;
        if !header.is_valid() {
            return Err(TxnError::Storage("invalid decision log header".to_string()));
        }

        let mut records = Vec::new();
        loop {
            let mut len_bytes = [0u8; 4];
            match reader.read_exact(&mut len_bytes) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_le_bytes(len_bytes) as usize;
            let mut record_bytes = vec![0u8; len];
            reader.read_exact(&mut record_bytes)?;

            records.push(bincode::deserialize(&record_bytes)?);
        }

        Ok(records)
    }

    /// Classify every logged transaction for restart recovery
    pub fn recover(&self) -> TxnResult<LogRecovery> {
        let mut participants: HashMap<TxId, Vec<ParticipantId>> = HashMap::new();
        let mut outcomes: HashMap<TxId, Decision> = HashMap::new();
        let mut finished: Vec<TxId> = Vec::new();
        let mut order: Vec<TxId> = Vec::new();

        for record in self.read_all()? {
            match record {
                DecisionRecord::Begin { tx_id, participants: p, .. } => {
                    if !participants.contains_key(&tx_id) {
                        order.push(tx_id.clone());
                    }
                    participants.insert(tx_id, p);
                }
                DecisionRecord::Outcome { tx_id, decision, .. } => {
                    outcomes.insert(tx_id, decision);
                }
                DecisionRecord::Finished { tx_id, .. } => {
                    finished.push(tx_id);
                }
            }
        }

        let mut recovery = LogRecovery::default();
        for tx_id in order {
            let group = participants.remove(&tx_id).unwrap_or_default();
            match outcomes.get(&tx_id) {
                None => recovery.undecided.push((tx_id, group)),
                Some(decision) if finished.contains(&tx_id) => {
                    recovery.finished.push((tx_id, *decision));
                }
                Some(decision) => recovery.unfinished.push((tx_id, *decision, group)),
            }
        }

        Ok(recovery)
    }
}

fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}
