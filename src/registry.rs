//! Participant registry
//!
//! Process-wide directory mapping participant id to its HTTP endpoint,
//! updated by the admission API and consulted by the coordinator when it
//! resolves a transaction's assignments. No ownership relation to
//! transactions; purely a directory.

use crate::protocol::ParticipantView;
use crate::types::ParticipantId;
use std::collections::HashMap;
use std::sync::RwLock;

/// A registered participant endpoint
#[derive(Debug, Clone)]
pub struct ParticipantEntry {
    pub endpoint: String,
    pub last_seen: u64,
}

/// In-memory participant directory
pub struct ParticipantRegistry {
    entries: RwLock<HashMap<ParticipantId, ParticipantEntry>>,
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        ParticipantRegistry { entries: RwLock::new(HashMap::new()) }
    }

    /// Add or refresh a participant. Re-registration updates the endpoint
    /// and the last-seen timestamp.
    pub fn register(&self, id: ParticipantId, endpoint: String) {
        let mut entries = self.entries.write().unwrap();
        entries.insert(id, ParticipantEntry { endpoint, last_seen: current_timestamp() });
    }

    /// Endpoint for `id`, if registered
    pub fn resolve(&self, id: &str) -> Option<String> {
        self.entries.read().unwrap().get(id).map(|e| e.endpoint.clone())
    }

    /// Snapshot of all registered participants
    pub fn list(&self) -> Vec<ParticipantView> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .map(|(id, entry)| ParticipantView {
                participant_id: id.clone(),
                endpoint: entry.endpoint.clone(),
                last_seen: entry.last_seen,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }
}

impl Default for ParticipantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}
