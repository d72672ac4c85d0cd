//! Exclusive lock table with no-wait conflict resolution
//!
//! Mediates conflicts between concurrent local transactions at one
//! participant. A resource key is either unlocked or owned by exactly one
//! transaction; there is no shared mode and no queueing. A conflicting
//! acquire is reported immediately, which surfaces as a NO vote during
//! prepare. Because waiting is never introduced, deadlock cannot form.

use crate::types::TxId;
use std::collections::HashMap;
use std::sync::Mutex;

/// Outcome of a lock acquisition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAttempt {
    /// Lock granted, or already owned by the requesting transaction
    Acquired,
    /// Lock held by another transaction; caller decides policy
    Conflict { owner: TxId },
}

/// Per-participant table of exclusive locks, keyed by resource name
pub struct LockTable {
    entries: Mutex<HashMap<String, TxId>>,
}

impl LockTable {
    pub fn new() -> Self {
        LockTable { entries: Mutex::new(HashMap::new()) }
    }

    /// Try to lock `key` for `tx`. Re-acquisition by the owner succeeds.
    pub fn acquire(&self, tx: &TxId, key: &str) -> LockAttempt {
        let mut entries = self.entries.lock().unwrap();

        match entries.get(key) {
            Some(owner) if owner == tx => LockAttempt::Acquired,
            Some(owner) => LockAttempt::Conflict { owner: owner.clone() },
            None => {
                entries.insert(key.to_string(), tx.clone());
                LockAttempt::Acquired
            }
        }
    }

    /// Release every lock owned by `tx`; idempotent. Returns the count released.
    pub fn release_all(&self, tx: &TxId) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, owner| owner != tx);
        before - entries.len()
    }

    /// Inspection only
    pub fn is_locked(&self, key: &str) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }

    /// Current owner of `key`, if locked
    pub fn owner_of(&self, key: &str) -> Option<TxId> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    /// Number of held locks across all transactions
    pub fn lock_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_acquire_free_lock() {
        let table = LockTable::new();
        assert_eq!(table.acquire(&"t1".to_string(), "x"), LockAttempt::Acquired);
        assert!(table.is_locked("x"));
    }

    #[test]
    fn test_reacquire_by_owner() {
        let table = LockTable::new();
        let t1 = "t1".to_string();

        assert_eq!(table.acquire(&t1, "x"), LockAttempt::Acquired);
        assert_eq!(table.acquire(&t1, "x"), LockAttempt::Acquired);
        assert_eq!(table.lock_count(), 1);
    }

    #[test]
    fn test_conflict_reported_immediately() {
        let table = LockTable::new();
        let t1 = "t1".to_string();
        let t2 = "t2".to_string();

        table.acquire(&t1, "x");
        assert_eq!(
            table.acquire(&t2, "x"),
            LockAttempt::Conflict { owner: t1.clone() }
        );
        // The conflicting transaction did not queue
        assert_eq!(table.owner_of("x"), Some(t1));
    }

    #[test]
    fn test_release_all_is_idempotent() {
        let table = LockTable::new();
        let t1 = "t1".to_string();

        table.acquire(&t1, "x");
        table.acquire(&t1, "y");

        assert_eq!(table.release_all(&t1), 2);
        assert_eq!(table.release_all(&t1), 0);
        assert!(!table.is_locked("x"));
        assert!(!table.is_locked("y"));
    }

    #[test]
    fn test_release_frees_lock_for_others() {
        let table = LockTable::new();
        let t1 = "t1".to_string();
        let t2 = "t2".to_string();

        table.acquire(&t1, "x");
        table.release_all(&t1);
        assert_eq!(table.acquire(&t2, "x"), LockAttempt::Acquired);
    }

    proptest! {
        /// Lock exclusivity: after any interleaving of acquires and
        /// releases, each key has at most one owner, and that owner
        /// actually acquired it.
        #[test]
        fn prop_lock_exclusivity(
            steps in prop::collection::vec(
                (0u8..2, 0usize..4, 0usize..6),
                1..64,
            )
        ) {
            let table = LockTable::new();
            let txs: Vec<TxId> = (0..4).map(|i| format!("t{}", i)).collect();
            let keys: Vec<String> = (0..6).map(|i| format!("k{}", i)).collect();

            // Shadow model of expected ownership
            let mut model: HashMap<String, TxId> = HashMap::new();

            for (action, tx_idx, key_idx) in steps {
                let tx = &txs[tx_idx];
                let key = &keys[key_idx];

                if action == 0 {
                    let attempt = table.acquire(tx, key);
                    match model.get(key) {
                        Some(owner) if owner != tx => {
                            prop_assert_eq!(attempt, LockAttempt::Conflict { owner: owner.clone() });
                        }
                        _ => {
                            prop_assert_eq!(attempt, LockAttempt::Acquired);
                            model.insert(key.clone(), tx.clone());
                        }
                    }
                } else {
                    table.release_all(tx);
                    model.retain(|_, owner| owner != tx);
                }
            }

            for key in &keys {
                prop_assert_eq!(table.owner_of(key), model.get(key).cloned());
            }
        }
    }
}
