//! Crash Recovery and Durability Tests
//!
//! A participant that voted YES must be able to honor either decision
//! after a restart: the prepared journal restores its buffered operations
//! and locks, and the commit batch applies exactly once.

use pact_core::participant::{ParticipantConfig, ParticipantEngine};
use pact_core::types::{LocalTxnState, Operation, Vote};
use tempfile::TempDir;

fn open(dir: &TempDir) -> ParticipantEngine {
    ParticipantEngine::open(dir.path(), ParticipantConfig::default()).unwrap()
}

/// Crash immediately after the YES vote: restart restores PREPARED state
/// with locks held
#[test]
fn test_prepared_state_survives_restart() {
    let dir = TempDir::new().unwrap();

    {
        let p = open(&dir);
        let reply = p
            .prepare("T1".to_string(), vec![Operation::write("x", "5"), Operation::read("y")])
            .unwrap();
        assert_eq!(reply.vote, Vote::Yes);
        // Crash: dropped without a decision
    }

    let p = open(&dir);
    assert_eq!(p.status(&"T1".to_string()).unwrap(), LocalTxnState::Prepared);
    assert!(p.is_locked("x"));
    assert!(p.is_locked("y"));
    // Nothing applied yet
    assert_eq!(p.get("x").unwrap(), None);
}

/// Crash between prepare and commit: the late commit applies the buffered
/// writes exactly once
#[test]
fn test_commit_after_restart_applies_once() {
    let dir = TempDir::new().unwrap();

    {
        let p = open(&dir);
        p.prepare("T1".to_string(), vec![Operation::write("x", "5")]).unwrap();
    }

    let p = open(&dir);
    p.commit(&"T1".to_string()).unwrap();
    assert_eq!(p.get("x").unwrap().as_deref(), Some("5"));
    assert!(!p.is_locked("x"));

    // The coordinator may retry the commit it never saw acknowledged
    p.commit(&"T1".to_string()).unwrap();
    assert_eq!(p.get("x").unwrap().as_deref(), Some("5"));
}

/// The coordinator decided ABORTED while we were down: rollback discards
/// the buffer and releases the locks
#[test]
fn test_abort_after_restart_discards_buffer() {
    let dir = TempDir::new().unwrap();

    {
        let p = open(&dir);
        p.prepare("T1".to_string(), vec![Operation::write("x", "5")]).unwrap();
    }

    let p = open(&dir);
    p.abort(&"T1".to_string()).unwrap();

    assert_eq!(p.get("x").unwrap(), None);
    assert!(!p.is_locked("x"));
    assert_eq!(p.status(&"T1".to_string()).unwrap(), LocalTxnState::Aborted);
}

/// A recovered PREPARED transaction still conflicts with new arrivals
#[test]
fn test_recovered_transaction_still_holds_its_locks() {
    let dir = TempDir::new().unwrap();

    {
        let p = open(&dir);
        p.prepare("T1".to_string(), vec![Operation::write("x", "5")]).unwrap();
    }

    let p = open(&dir);
    let reply = p.prepare("T2".to_string(), vec![Operation::write("x", "7")]).unwrap();
    assert_eq!(reply.vote, Vote::No);

    // The blocked transaction resolves once the decision arrives
    p.commit(&"T1".to_string()).unwrap();
    assert_eq!(p.get("x").unwrap().as_deref(), Some("5"));
}

/// Committed data is durable; the journal does not resurrect decided
/// transactions
#[test]
fn test_committed_data_survives_restart() {
    let dir = TempDir::new().unwrap();

    {
        let p = open(&dir);
        p.prepare("T1".to_string(), vec![Operation::write("x", "5")]).unwrap();
        p.commit(&"T1".to_string()).unwrap();
    }

    let p = open(&dir);
    assert_eq!(p.get("x").unwrap().as_deref(), Some("5"));
    // No prepared transactions left behind
    assert!(p.prepared_ids().is_empty());
    assert!(!p.is_locked("x"));
}

/// ACTIVE transactions are not journaled; a restart forgets them entirely
#[test]
fn test_active_transactions_do_not_survive_restart() {
    let dir = TempDir::new().unwrap();

    {
        let p = open(&dir);
        p.begin("T1".to_string()).unwrap();
    }

    let p = open(&dir);
    assert!(p.status(&"T1".to_string()).is_err());
}

/// Several prepared transactions on disjoint keys all come back
#[test]
fn test_multiple_prepared_transactions_recovered() {
    let dir = TempDir::new().unwrap();

    {
        let p = open(&dir);
        p.prepare("T1".to_string(), vec![Operation::write("x", "1")]).unwrap();
        p.prepare("T2".to_string(), vec![Operation::write("y", "2")]).unwrap();
        p.prepare("T3".to_string(), vec![Operation::delete("z")]).unwrap();
    }

    let p = open(&dir);
    let mut prepared = p.prepared_ids();
    prepared.sort();
    assert_eq!(prepared, vec!["T1", "T2", "T3"]);

    p.commit(&"T1".to_string()).unwrap();
    p.abort(&"T2".to_string()).unwrap();

    assert_eq!(p.get("x").unwrap().as_deref(), Some("1"));
    assert_eq!(p.get("y").unwrap(), None);
    assert!(p.is_locked("z"));
}
