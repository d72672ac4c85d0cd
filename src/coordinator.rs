//! Coordinator-side transaction engine
//!
//! Drives each transaction through the two rounds of Two-Phase Commit:
//! a parallel prepare fan-out with a deadline, then dispatch of the
//! decision. Votes combine with AND; a missing, timed-out, or errored vote
//! counts as NO. A COMMITTED decision is synced to the decision log before
//! the first commit message leaves, and commit dispatch retries with capped
//! backoff until every voter acknowledges. Abort dispatch is best-effort:
//! participants also abort on their own prepare timeouts.

use crate::decision_log::DecisionLog;
use crate::error::{TxnError, TxnResult};
use crate::protocol::{Assignment, ExecuteRequest, TransactionView};
use crate::registry::ParticipantRegistry;
use crate::transport::{CallError, ParticipantTransport};
use crate::types::{Decision, Operation, ParticipantId, TxId, TxnState, Vote};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Coordinator tuning knobs
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Deadline for the whole prepare phase when the client gives none
    pub default_tx_timeout: Duration,
    /// Per-call timeout for prepare and decision RPCs
    pub prepare_rpc_timeout: Duration,
    /// Commit retry backoff, doubled per attempt up to the cap
    pub commit_retry_base: Duration,
    pub commit_retry_cap: Duration,
    /// Abort dispatch attempts per participant before giving up
    pub abort_attempts: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            default_tx_timeout: Duration::from_secs(30),
            prepare_rpc_timeout: Duration::from_secs(10),
            commit_retry_base: Duration::from_millis(100),
            commit_retry_cap: Duration::from_secs(5),
            abort_attempts: 3,
        }
    }
}

/// Coordinator record of one transaction
#[derive(Debug, Clone)]
pub struct TxRecord {
    pub tx_id: TxId,
    pub state: TxnState,
    pub created_at: DateTime<Utc>,
    pub assignments: Vec<Assignment>,
    pub votes: HashMap<ParticipantId, Vote>,
    pub decision: Option<Decision>,
}

impl TxRecord {
    fn new(tx_id: TxId, assignments: Vec<Assignment>) -> Self {
        TxRecord {
            tx_id,
            state: TxnState::Init,
            created_at: Utc::now(),
            assignments,
            votes: HashMap::new(),
            decision: None,
        }
    }

    fn recovered(tx_id: TxId, state: TxnState, decision: Decision) -> Self {
        TxRecord {
            tx_id,
            state,
            created_at: Utc::now(),
            assignments: Vec::new(),
            votes: HashMap::new(),
            decision: Some(decision),
        }
    }

    pub fn view(&self) -> TransactionView {
        TransactionView {
            tx_id: self.tx_id.clone(),
            state: self.state,
            decision: self.decision,
            votes: self.votes.clone(),
            created_at: self.created_at.to_rfc3339(),
        }
    }
}

/// Aggregate counters for the health surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub total_transactions: usize,
    pub committed_transactions: usize,
    pub aborted_transactions: usize,
    pub in_flight_transactions: usize,
}

/// Global transaction state machine
pub struct CoordinatorEngine {
    registry: Arc<ParticipantRegistry>,
    transport: Arc<dyn ParticipantTransport>,
    txns: RwLock<HashMap<TxId, TxRecord>>,
    log: DecisionLog,
    config: CoordinatorConfig,
}

impl CoordinatorEngine {
    pub fn new(
        registry: Arc<ParticipantRegistry>,
        transport: Arc<dyn ParticipantTransport>,
        log: DecisionLog,
        config: CoordinatorConfig,
    ) -> Self {
        CoordinatorEngine {
            registry,
            transport,
            txns: RwLock::new(HashMap::new()),
            log,
            config,
        }
    }

    /// Run a transaction to its decision. On return, every assigned
    /// participant has durably passed its local decision point.
    pub async fn execute(&self, request: ExecuteRequest) -> TxnResult<TransactionView> {
        if request.assignments.is_empty() {
            return Err(TxnError::InvalidRequest("empty assignment list".to_string()));
        }
        for assignment in &request.assignments {
            if assignment.ops.is_empty() {
                return Err(TxnError::InvalidRequest(format!(
                    "no operations for participant '{}'",
                    assignment.participant_id
                )));
            }
            for op in &assignment.ops {
                op.validate()?;
            }
        }

        // Aggregate by participant identity; duplicate assignments merge
        // in submission order.
        let mut order: Vec<ParticipantId> = Vec::new();
        let mut grouped: HashMap<ParticipantId, Vec<Operation>> = HashMap::new();
        for assignment in &request.assignments {
            let slot = grouped.entry(assignment.participant_id.clone()).or_insert_with(|| {
                order.push(assignment.participant_id.clone());
                Vec::new()
            });
            slot.extend(assignment.ops.iter().cloned());
        }

        let mut endpoints: HashMap<ParticipantId, String> = HashMap::new();
        for pid in &order {
            let endpoint = self.registry.resolve(pid).ok_or_else(|| {
                TxnError::InvalidRequest(format!("unknown participant '{}'", pid))
            })?;
            endpoints.insert(pid.clone(), endpoint);
        }

        let tx_id = match request.tx_id {
            Some(id) if id.is_empty() => {
                return Err(TxnError::InvalidRequest("empty transaction id".to_string()))
            }
            Some(id) => id,
            None => generate_tx_id(),
        };
        let deadline = request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.default_tx_timeout);

        let assignments: Vec<Assignment> = order
            .iter()
            .map(|pid| Assignment { participant_id: pid.clone(), ops: grouped[pid].clone() })
            .collect();

        {
            let mut txns = self.txns.write().unwrap();
            if txns.contains_key(&tx_id) {
                return Err(TxnError::IllegalState {
                    tx_id,
                    detail: "transaction id already in use".to_string(),
                });
            }
            let mut record = TxRecord::new(tx_id.clone(), assignments.clone());
            record.state = TxnState::Preparing;
            txns.insert(tx_id.clone(), record);
        }
        self.log.log_begin(&tx_id, order.clone())?;

        info!(tx_id = %tx_id, participants = order.len(), "prepare phase starting");
        let mut votes = self
            .run_prepare_phase(&tx_id, &assignments, &endpoints, deadline)
            .await;

        let all_yes = order.iter().all(|pid| votes.get(pid) == Some(&Vote::Yes));
        for pid in &order {
            votes.entry(pid.clone()).or_insert(Vote::No);
        }
        self.update_record(&tx_id, |record| record.votes = votes.clone());

        if all_yes {
            // The decision must be durable before the first commit leaves
            self.log.log_outcome(&tx_id, Decision::Committed)?;
            self.update_record(&tx_id, |record| {
                record.state = TxnState::Committing;
                record.decision = Some(Decision::Committed);
            });
            info!(tx_id = %tx_id, "unanimous YES, committing");

            self.dispatch_commit(&tx_id, &order).await;
            self.update_record(&tx_id, |record| record.state = TxnState::Committed);
            self.log.log_finished(&tx_id)?;
        } else {
            self.log.log_outcome(&tx_id, Decision::Aborted)?;
            self.update_record(&tx_id, |record| {
                record.state = TxnState::Aborting;
                record.decision = Some(Decision::Aborted);
            });
            info!(tx_id = %tx_id, "aborting");

            self.dispatch_abort(&tx_id, &order).await;
            self.update_record(&tx_id, |record| record.state = TxnState::Aborted);
            self.log.log_finished(&tx_id)?;
        }

        self.status(&tx_id)
    }

    /// Pure read of one transaction
    pub fn status(&self, tx_id: &TxId) -> TxnResult<TransactionView> {
        self.txns
            .read()
            .unwrap()
            .get(tx_id)
            .map(TxRecord::view)
            .ok_or_else(|| TxnError::UnknownTransaction(tx_id.clone()))
    }

    /// Snapshot of every known transaction
    pub fn list(&self) -> Vec<TransactionView> {
        let mut views: Vec<TransactionView> =
            self.txns.read().unwrap().values().map(TxRecord::view).collect();
        views.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        views
    }

    /// Aggregate counters
    pub fn stats(&self) -> CoordinatorStats {
        let txns = self.txns.read().unwrap();

        let committed = txns.values().filter(|t| t.state == TxnState::Committed).count();
        let aborted = txns.values().filter(|t| t.state == TxnState::Aborted).count();

        CoordinatorStats {
            total_transactions: txns.len(),
            committed_transactions: committed,
            aborted_transactions: aborted,
            in_flight_transactions: txns.len() - committed - aborted,
        }
    }

    /// Replay the decision log after a restart. Transactions that never
    /// reached a decision are aborted; recorded decisions are re-dispatched
    /// until acknowledged.
    pub async fn recover(self: &Arc<Self>) -> TxnResult<()> {
        let recovery = self.log.recover()?;

        {
            let mut txns = self.txns.write().unwrap();
            for (tx_id, decision) in &recovery.finished {
                let state = match decision {
                    Decision::Committed => TxnState::Committed,
                    Decision::Aborted => TxnState::Aborted,
                };
                txns.insert(tx_id.clone(), TxRecord::recovered(tx_id.clone(), state, *decision));
            }
        }

        for (tx_id, participants) in recovery.undecided {
            warn!(tx_id = %tx_id, "in flight at crash time, aborting");
            self.log.log_outcome(&tx_id, Decision::Aborted)?;
            {
                let mut txns = self.txns.write().unwrap();
                txns.insert(
                    tx_id.clone(),
                    TxRecord::recovered(tx_id.clone(), TxnState::Aborting, Decision::Aborted),
                );
            }

            self.dispatch_abort(&tx_id, &participants).await;
            self.update_record(&tx_id, |record| record.state = TxnState::Aborted);
            self.log.log_finished(&tx_id)?;
        }

        for (tx_id, decision, participants) in recovery.unfinished {
            match decision {
                Decision::Committed => {
                    info!(tx_id = %tx_id, "resuming commit dispatch");
                    {
                        let mut txns = self.txns.write().unwrap();
                        txns.insert(
                            tx_id.clone(),
                            TxRecord::recovered(tx_id.clone(), TxnState::Committing, decision),
                        );
                    }

                    // Commit retries indefinitely; run each transaction's
                    // dispatch on its own task so one unreachable
                    // participant cannot stall the rest of recovery.
                    let engine = Arc::clone(self);
                    tokio::spawn(async move {
                        engine.dispatch_commit(&tx_id, &participants).await;
                        engine.update_record(&tx_id, |record| record.state = TxnState::Committed);
                        if let Err(e) = engine.log.log_finished(&tx_id) {
                            error!(tx_id = %tx_id, error = %e, "failed to log finish");
                        }
                    });
                }
                Decision::Aborted => {
                    {
                        let mut txns = self.txns.write().unwrap();
                        txns.insert(
                            tx_id.clone(),
                            TxRecord::recovered(tx_id.clone(), TxnState::Aborting, decision),
                        );
                    }

                    self.dispatch_abort(&tx_id, &participants).await;
                    self.update_record(&tx_id, |record| record.state = TxnState::Aborted);
                    self.log.log_finished(&tx_id)?;
                }
            }
        }

        Ok(())
    }

    /// Send prepare to every assigned participant in parallel and collect
    /// votes until all answer, the deadline passes, or anything says NO.
    async fn run_prepare_phase(
        &self,
        tx_id: &TxId,
        assignments: &[Assignment],
        endpoints: &HashMap<ParticipantId, String>,
        deadline: Duration,
    ) -> HashMap<ParticipantId, Vote> {
        let mut set = JoinSet::new();
        for assignment in assignments {
            let pid = assignment.participant_id.clone();
            let ops = assignment.ops.clone();
            let endpoint = endpoints[&pid].clone();
            let transport = Arc::clone(&self.transport);
            let tx = tx_id.clone();
            let rpc_timeout = self.config.prepare_rpc_timeout.min(deadline);

            set.spawn(async move {
                let result = transport.prepare(&endpoint, &tx, &ops, rpc_timeout).await;
                (pid, result)
            });
        }

        let deadline_at = tokio::time::Instant::now() + deadline;
        let mut votes = HashMap::new();

        while !set.is_empty() {
            match tokio::time::timeout_at(deadline_at, set.join_next()).await {
                Err(_) => {
                    warn!(tx_id = %tx_id, "prepare deadline elapsed");
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    error!(tx_id = %tx_id, error = %e, "prepare task failed");
                    break;
                }
                Ok(Some(Ok((pid, Ok(reply))))) => {
                    if reply.vote == Vote::No {
                        info!(
                            tx_id = %tx_id,
                            participant = %pid,
                            reason = reply.reason.as_deref().unwrap_or("unspecified"),
                            "vote NO"
                        );
                        votes.insert(pid, Vote::No);
                        break;
                    }
                    votes.insert(pid, Vote::Yes);
                }
                Ok(Some(Ok((pid, Err(e))))) => {
                    warn!(tx_id = %tx_id, participant = %pid, error = %e, "prepare call failed");
                    votes.insert(pid, Vote::No);
                    break;
                }
            }
        }

        set.abort_all();
        votes
    }

    /// Commit is not revocable: retry each participant with capped backoff
    /// until it acknowledges.
    async fn dispatch_commit(&self, tx_id: &TxId, participants: &[ParticipantId]) {
        let mut set = JoinSet::new();

        for pid in participants {
            let pid = pid.clone();
            let tx = tx_id.clone();
            let transport = Arc::clone(&self.transport);
            let registry = Arc::clone(&self.registry);
            let rpc_timeout = self.config.prepare_rpc_timeout;
            let base = self.config.commit_retry_base;
            let cap = self.config.commit_retry_cap;

            set.spawn(async move {
                let mut delay = base;
                let mut attempt: u32 = 0;

                loop {
                    attempt += 1;
                    let endpoint = match registry.resolve(&pid) {
                        Some(endpoint) => endpoint,
                        None => {
                            warn!(tx_id = %tx, participant = %pid, attempt, "participant not registered, will retry");
                            tokio::time::sleep(delay).await;
                            delay = (delay * 2).min(cap);
                            continue;
                        }
                    };

                    match transport.commit(&endpoint, &tx, rpc_timeout).await {
                        Ok(()) => {
                            info!(tx_id = %tx, participant = %pid, "commit acknowledged");
                            break;
                        }
                        Err(CallError::Rejected { code, message }) => {
                            // The decision stands; a structured rejection
                            // will not change on retry.
                            error!(tx_id = %tx, participant = %pid, code = %code, message = %message, "commit rejected");
                            break;
                        }
                        Err(CallError::Transport(e)) => {
                            warn!(tx_id = %tx, participant = %pid, attempt, error = %e, "commit not acknowledged, retrying");
                            tokio::time::sleep(delay).await;
                            delay = (delay * 2).min(cap);
                        }
                    }
                }
            });
        }

        while set.join_next().await.is_some() {}
    }

    /// Abort is idempotent and participants expire stale transactions on
    /// their own, so a bounded number of attempts is enough.
    async fn dispatch_abort(&self, tx_id: &TxId, participants: &[ParticipantId]) {
        let mut set = JoinSet::new();

        for pid in participants {
            let pid = pid.clone();
            let tx = tx_id.clone();
            let transport = Arc::clone(&self.transport);
            let registry = Arc::clone(&self.registry);
            let rpc_timeout = self.config.prepare_rpc_timeout;
            let base = self.config.commit_retry_base;
            let cap = self.config.commit_retry_cap;
            let attempts = self.config.abort_attempts;

            set.spawn(async move {
                let mut delay = base;

                for attempt in 1..=attempts {
                    let endpoint = match registry.resolve(&pid) {
                        Some(endpoint) => endpoint,
                        None => break,
                    };

                    match transport.abort(&endpoint, &tx, rpc_timeout).await {
                        Ok(()) => return,
                        Err(CallError::Rejected { code, message }) => {
                            error!(tx_id = %tx, participant = %pid, code = %code, message = %message, "abort rejected");
                            return;
                        }
                        Err(CallError::Transport(e)) => {
                            warn!(tx_id = %tx, participant = %pid, attempt, error = %e, "abort not acknowledged");
                            tokio::time::sleep(delay).await;
                            delay = (delay * 2).min(cap);
                        }
                    }
                }

                warn!(tx_id = %tx, participant = %pid, "giving up on abort dispatch");
            });
        }

        while set.join_next().await.is_some() {}
    }

    fn update_record<F: FnOnce(&mut TxRecord)>(&self, tx_id: &TxId, f: F) {
        let mut txns = self.txns.write().unwrap();
        if let Some(record) = txns.get_mut(tx_id) {
            f(record);
        }
    }
}

fn generate_tx_id() -> TxId {
    format!("tx-{:016x}", rand::random::<u64>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PrepareReply;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    enum MockBehavior {
        VoteYes,
        VoteNo(String),
        Delay(Duration),
        Unreachable,
        /// Fail this many commit calls with a transport error, then succeed
        FlakyCommit(u32),
    }

    struct MockTransport {
        behaviors: Mutex<HashMap<String, MockBehavior>>,
        calls: Mutex<Vec<String>>,
    }

    impl MockTransport {
        fn new() -> Self {
            MockTransport { behaviors: Mutex::new(HashMap::new()), calls: Mutex::new(Vec::new()) }
        }

        fn set(&self, endpoint: &str, behavior: MockBehavior) {
            self.behaviors.lock().unwrap().insert(endpoint.to_string(), behavior);
        }

        fn behavior(&self, endpoint: &str) -> MockBehavior {
            self.behaviors
                .lock()
                .unwrap()
                .get(endpoint)
                .cloned()
                .unwrap_or(MockBehavior::VoteYes)
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl ParticipantTransport for MockTransport {
        async fn prepare(
            &self,
            endpoint: &str,
            _tx_id: &TxId,
            _ops: &[Operation],
            _timeout: Duration,
        ) -> Result<PrepareReply, CallError> {
            self.record(format!("prepare {}", endpoint));
            match self.behavior(endpoint) {
                MockBehavior::VoteYes | MockBehavior::FlakyCommit(_) => Ok(PrepareReply::yes()),
                MockBehavior::VoteNo(reason) => Ok(PrepareReply::no(reason)),
                MockBehavior::Delay(d) => {
                    tokio::time::sleep(d).await;
                    Ok(PrepareReply::yes())
                }
                MockBehavior::Unreachable => Err(CallError::Transport("connection refused".to_string())),
            }
        }

        async fn commit(
            &self,
            endpoint: &str,
            _tx_id: &TxId,
            _timeout: Duration,
        ) -> Result<(), CallError> {
            self.record(format!("commit {}", endpoint));
            match self.behavior(endpoint) {
                MockBehavior::Unreachable => Err(CallError::Transport("connection refused".to_string())),
                MockBehavior::FlakyCommit(0) => Ok(()),
                MockBehavior::FlakyCommit(n) => {
                    self.set(endpoint, MockBehavior::FlakyCommit(n - 1));
                    Err(CallError::Transport("connection reset".to_string()))
                }
                _ => Ok(()),
            }
        }

        async fn abort(
            &self,
            endpoint: &str,
            _tx_id: &TxId,
            _timeout: Duration,
        ) -> Result<(), CallError> {
            self.record(format!("abort {}", endpoint));
            match self.behavior(endpoint) {
                MockBehavior::Unreachable => Err(CallError::Transport("connection refused".to_string())),
                _ => Ok(()),
            }
        }

        async fn status(
            &self,
            endpoint: &str,
            _tx_id: &TxId,
            _timeout: Duration,
        ) -> Result<crate::types::LocalTxnState, CallError> {
            self.record(format!("status {}", endpoint));
            Ok(crate::types::LocalTxnState::Prepared)
        }
    }

    fn test_config() -> CoordinatorConfig {
        CoordinatorConfig {
            default_tx_timeout: Duration::from_secs(5),
            prepare_rpc_timeout: Duration::from_secs(1),
            commit_retry_base: Duration::from_millis(5),
            commit_retry_cap: Duration::from_millis(20),
            abort_attempts: 2,
        }
    }

    fn setup(participants: &[&str]) -> (Arc<CoordinatorEngine>, Arc<MockTransport>, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let registry = Arc::new(ParticipantRegistry::new());
        for pid in participants {
            registry.register(pid.to_string(), format!("http://{}", pid));
        }

        let transport = Arc::new(MockTransport::new());
        let log = DecisionLog::open(dir.path().join("decisions.log")).unwrap();
        let engine = Arc::new(CoordinatorEngine::new(
            registry,
            transport.clone(),
            log,
            test_config(),
        ));

        (engine, transport, dir)
    }

    fn request(tx_id: &str, assignments: Vec<(&str, Vec<Operation>)>) -> ExecuteRequest {
        ExecuteRequest {
            tx_id: Some(tx_id.to_string()),
            timeout_ms: None,
            assignments: assignments
                .into_iter()
                .map(|(pid, ops)| Assignment { participant_id: pid.to_string(), ops })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_unanimous_yes_commits() {
        let (engine, transport, _dir) = setup(&["p1", "p2"]);

        let view = engine
            .execute(request(
                "t1",
                vec![
                    ("p1", vec![Operation::write("x", "1")]),
                    ("p2", vec![Operation::write("y", "2")]),
                ],
            ))
            .await
            .unwrap();

        assert_eq!(view.state, TxnState::Committed);
        assert_eq!(view.decision, Some(Decision::Committed));
        assert_eq!(view.votes.len(), 2);
        assert!(view.votes.values().all(|v| *v == Vote::Yes));

        let calls = transport.calls();
        assert!(calls.contains(&"commit http://p1".to_string()));
        assert!(calls.contains(&"commit http://p2".to_string()));
    }

    #[tokio::test]
    async fn test_one_no_aborts_everyone() {
        let (engine, transport, _dir) = setup(&["p1", "p2"]);
        transport.set("http://p2", MockBehavior::VoteNo("lock conflict on 'x'".to_string()));

        let view = engine
            .execute(request(
                "t1",
                vec![
                    ("p1", vec![Operation::write("x", "1")]),
                    ("p2", vec![Operation::write("x", "2")]),
                ],
            ))
            .await
            .unwrap();

        assert_eq!(view.state, TxnState::Aborted);
        assert_eq!(view.decision, Some(Decision::Aborted));
        assert_eq!(view.votes.get("p2"), Some(&Vote::No));

        let calls = transport.calls();
        assert!(calls.contains(&"abort http://p1".to_string()));
        assert!(calls.contains(&"abort http://p2".to_string()));
        assert!(!calls.iter().any(|c| c.starts_with("commit")));
    }

    #[tokio::test]
    async fn test_unreachable_participant_counts_as_no() {
        let (engine, transport, _dir) = setup(&["p1", "p2"]);
        transport.set("http://p2", MockBehavior::Unreachable);

        let view = engine
            .execute(request(
                "t1",
                vec![
                    ("p1", vec![Operation::write("x", "1")]),
                    ("p2", vec![Operation::write("y", "2")]),
                ],
            ))
            .await
            .unwrap();

        assert_eq!(view.decision, Some(Decision::Aborted));
        assert_eq!(view.votes.get("p2"), Some(&Vote::No));
    }

    #[tokio::test]
    async fn test_deadline_elapsed_aborts() {
        let (engine, transport, _dir) = setup(&["p1", "p2"]);
        transport.set("http://p2", MockBehavior::Delay(Duration::from_secs(2)));

        let mut req = request(
            "t1",
            vec![
                ("p1", vec![Operation::write("x", "1")]),
                ("p2", vec![Operation::write("y", "2")]),
            ],
        );
        req.timeout_ms = Some(50);

        let view = engine.execute(req).await.unwrap();

        assert_eq!(view.decision, Some(Decision::Aborted));
        assert_eq!(view.votes.get("p2"), Some(&Vote::No));
    }

    #[tokio::test]
    async fn test_commit_retries_until_acknowledged() {
        let (engine, transport, _dir) = setup(&["p1"]);
        transport.set("http://p1", MockBehavior::FlakyCommit(3));

        let view = engine
            .execute(request("t1", vec![("p1", vec![Operation::write("x", "1")])]))
            .await
            .unwrap();

        assert_eq!(view.state, TxnState::Committed);

        let commit_calls =
            transport.calls().iter().filter(|c| c.starts_with("commit")).count();
        assert_eq!(commit_calls, 4);
    }

    #[tokio::test]
    async fn test_unknown_participant_rejected() {
        let (engine, _transport, _dir) = setup(&["p1"]);

        let err = engine
            .execute(request("t1", vec![("ghost", vec![Operation::write("x", "1")])]))
            .await
            .unwrap_err();

        assert!(matches!(err, TxnError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_invalid_op_rejected_before_prepare() {
        let (engine, transport, _dir) = setup(&["p1"]);

        let err = engine
            .execute(request(
                "t1",
                vec![(
                    "p1",
                    vec![Operation { kind: crate::types::OpKind::Write, key: "x".to_string(), value: None }],
                )],
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, TxnError::InvalidRequest(_)));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_tx_id_rejected() {
        let (engine, _transport, _dir) = setup(&["p1"]);

        let req = request("t1", vec![("p1", vec![Operation::write("x", "1")])]);
        engine.execute(req.clone()).await.unwrap();

        let err = engine.execute(req).await.unwrap_err();
        assert!(matches!(err, TxnError::IllegalState { .. }));
    }

    #[tokio::test]
    async fn test_status_unknown_transaction() {
        let (engine, _transport, _dir) = setup(&["p1"]);
        let err = engine.status(&"nope".to_string()).unwrap_err();
        assert!(matches!(err, TxnError::UnknownTransaction(_)));
    }

    #[tokio::test]
    async fn test_decision_immutable_across_restart() {
        let dir = tempfile::TempDir::new().unwrap();
        let log_path = dir.path().join("decisions.log");

        let registry = Arc::new(ParticipantRegistry::new());
        registry.register("p1".to_string(), "http://p1".to_string());

        {
            let transport = Arc::new(MockTransport::new());
            let log = DecisionLog::open(&log_path).unwrap();
            let engine = Arc::new(CoordinatorEngine::new(
                registry.clone(),
                transport,
                log,
                test_config(),
            ));

            let view = engine
                .execute(request("t1", vec![("p1", vec![Operation::write("x", "1")])]))
                .await
                .unwrap();
            assert_eq!(view.decision, Some(Decision::Committed));
        }

        // Restart: the recorded decision must survive
        let transport = Arc::new(MockTransport::new());
        let log = DecisionLog::open(&log_path).unwrap();
        let engine = Arc::new(CoordinatorEngine::new(
            registry,
            transport,
            log,
            test_config(),
        ));
        engine.recover().await.unwrap();

        let view = engine.status(&"t1".to_string()).unwrap();
        assert_eq!(view.decision, Some(Decision::Committed));
        assert_eq!(view.state, TxnState::Committed);
    }

    #[tokio::test]
    async fn test_recovery_resumes_unfinished_commit() {
        let dir = tempfile::TempDir::new().unwrap();
        let log_path = dir.path().join("decisions.log");

        // Simulate a crash between logging COMMITTED and dispatching
        {
            let log = DecisionLog::open(&log_path).unwrap();
            log.log_begin(&"t1".to_string(), vec!["p1".to_string()]).unwrap();
            log.log_outcome(&"t1".to_string(), Decision::Committed).unwrap();
        }

        let registry = Arc::new(ParticipantRegistry::new());
        registry.register("p1".to_string(), "http://p1".to_string());
        let transport = Arc::new(MockTransport::new());
        let log = DecisionLog::open(&log_path).unwrap();
        let engine = Arc::new(CoordinatorEngine::new(
            registry,
            transport.clone(),
            log,
            test_config(),
        ));

        engine.recover().await.unwrap();

        // Commit dispatch runs on a background task
        let mut waited = Duration::ZERO;
        while !transport.calls().contains(&"commit http://p1".to_string()) {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += Duration::from_millis(10);
            assert!(waited < Duration::from_secs(2), "commit never dispatched");
        }
    }

    #[tokio::test]
    async fn test_recovery_aborts_undecided() {
        let dir = tempfile::TempDir::new().unwrap();
        let log_path = dir.path().join("decisions.log");

        {
            let log = DecisionLog::open(&log_path).unwrap();
            log.log_begin(&"t1".to_string(), vec!["p1".to_string()]).unwrap();
        }

        let registry = Arc::new(ParticipantRegistry::new());
        registry.register("p1".to_string(), "http://p1".to_string());
        let transport = Arc::new(MockTransport::new());
        let log = DecisionLog::open(&log_path).unwrap();
        let engine = Arc::new(CoordinatorEngine::new(
            registry,
            transport.clone(),
            log,
            test_config(),
        ));

        engine.recover().await.unwrap();

        assert!(transport.calls().contains(&"abort http://p1".to_string()));
        let view = engine.status(&"t1".to_string()).unwrap();
        assert_eq!(view.decision, Some(Decision::Aborted));
    }
}
