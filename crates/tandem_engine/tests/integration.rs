//! Integration tests for replicators talking to endpoints in-process.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tandem_engine::{
    CancelHandle, ConsistencyMode, Direction, LocalTransport, ReplicaEndpoint,
    ReplicationConfig, ReplicationError, ReplicationResult, ReplicationTransport, Replicator,
    RetryConfig, SessionState,
};
use tandem_protocol::{
    AllowAll, AuthorizationGate, CallerIdentity, ConflictResolution, HandshakeRequest,
    HandshakeResponse, OwnerPolicy, PullRequest, PullResponse, PushRequest, PushResponse, Record, RecordId,
    ReplicaId,
};
use tandem_store::{MemoryRecordStore, Replica};
use tandem_testkit::prelude::*;

fn connect(
    client: &Arc<Replica>,
    server: &Arc<Replica>,
    gate: Arc<dyn AuthorizationGate>,
) -> Replicator<LocalTransport> {
    connect_with(ReplicationConfig::new(), client, server, gate)
}

fn connect_with(
    config: ReplicationConfig,
    client: &Arc<Replica>,
    server: &Arc<Replica>,
    gate: Arc<dyn AuthorizationGate>,
) -> Replicator<LocalTransport> {
    let endpoint = Arc::new(ReplicaEndpoint::new(Arc::clone(server), gate));
    Replicator::new(config, Arc::clone(client), LocalTransport::new(endpoint))
}

fn open(scenario: &UsersScenario) -> Replicator<LocalTransport> {
    connect(&scenario.client, &scenario.server, Arc::new(AllowAll))
}

fn fullname(replica: &Replica, id: &str) -> Option<String> {
    replica
        .get(USERS, &RecordId::from(id))
        .unwrap()
        .and_then(|r| r.text("fullname").map(str::to_string))
}

fn renamed(id: &str, name: &str) -> Record {
    Record::new(id).with_field("fullname", name)
}

/// Transport wrapper that fails the first handshakes with a retryable error.
struct FlakyTransport {
    inner: LocalTransport,
    failures_left: AtomicUsize,
    handshakes: AtomicUsize,
}

impl FlakyTransport {
    fn new(inner: LocalTransport, failures: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(failures),
            handshakes: AtomicUsize::new(0),
        }
    }
}

impl ReplicationTransport for FlakyTransport {
    fn handshake(
        &self,
        caller: &CallerIdentity,
        request: &HandshakeRequest,
    ) -> ReplicationResult<HandshakeResponse> {
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(ReplicationError::transport_retryable("connection reset"));
        }
        self.inner.handshake(caller, request)
    }

    fn pull(&self, caller: &CallerIdentity, request: &PullRequest) -> ReplicationResult<PullResponse> {
        self.inner.pull(caller, request)
    }

    fn push(&self, caller: &CallerIdentity, request: &PushRequest) -> ReplicationResult<PushResponse> {
        self.inner.push(caller, request)
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn close(&self) -> ReplicationResult<()> {
        self.inner.close()
    }
}

/// Transport wrapper that cancels the session once the pull response is in.
struct CancellingTransport {
    inner: LocalTransport,
    handle: OnceLock<CancelHandle>,
}

impl ReplicationTransport for CancellingTransport {
    fn handshake(
        &self,
        caller: &CallerIdentity,
        request: &HandshakeRequest,
    ) -> ReplicationResult<HandshakeResponse> {
        self.inner.handshake(caller, request)
    }

    fn pull(&self, caller: &CallerIdentity, request: &PullRequest) -> ReplicationResult<PullResponse> {
        let response = self.inner.pull(caller, request)?;
        if let Some(handle) = self.handle.get() {
            handle.cancel();
        }
        Ok(response)
    }

    fn push(&self, caller: &CallerIdentity, request: &PushRequest) -> ReplicationResult<PushResponse> {
        self.inner.push(caller, request)
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn close(&self) -> ReplicationResult<()> {
        self.inner.close()
    }
}

#[test]
fn initial_pull_copies_everything() {
    init_tracing();
    let scenario = UsersScenario::new();
    let replicator = open(&scenario);

    let report = replicator.pull(USERS, &CallerIdentity::anonymous()).unwrap();

    assert_eq!(report.direction, Direction::Pull);
    assert_eq!(report.applied, 2);
    assert!(report.conflicts.is_empty());
    assert_eq!(report.checkpoint.source, scenario.server_id());
    assert_eq!(report.checkpoint.sequence, 2);
    assert_eq!(scenario.client_ids(), vec!["alice", "peter"]);
    assert_eq!(scenario.client.checkpoint(USERS, &scenario.server_id()), 2);
    assert_eq!(replicator.state(), SessionState::Committed);
}

#[test]
fn pull_leaves_out_records_the_caller_may_not_read() {
    init_tracing();
    let scenario = UsersScenario::new();
    let replicator = connect(
        &scenario.client,
        &scenario.server,
        Arc::new(OwnerPolicy::by_record_id()),
    );

    let report = replicator
        .pull(USERS, &CallerIdentity::principal("alice"))
        .unwrap();

    assert_eq!(scenario.client_ids(), vec!["alice"]);
    assert_eq!(report.filtered, 1);
    assert!(report.conflicts.is_empty());
    assert_eq!(report.checkpoint.sequence, 2);
}

#[test]
fn unauthenticated_pull_fails_without_changes() {
    init_tracing();
    let scenario = UsersScenario::new();
    let replicator = connect(
        &scenario.client,
        &scenario.server,
        Arc::new(OwnerPolicy::by_record_id()),
    );

    let err = replicator
        .pull(USERS, &CallerIdentity::anonymous())
        .unwrap_err();

    assert!(matches!(err, ReplicationError::Authentication(_)));
    assert!(!err.is_retryable());
    assert!(scenario.client_ids().is_empty());
    assert_eq!(scenario.client.checkpoint(USERS, &scenario.server_id()), 0);
    assert_eq!(replicator.state(), SessionState::Aborted);
    assert_eq!(replicator.stats().sessions_aborted, 1);
}

#[test]
fn owner_pushes_a_rename() {
    init_tracing();
    let scenario = UsersScenario::new();
    let replicator = connect(
        &scenario.client,
        &scenario.server,
        Arc::new(OwnerPolicy::by_record_id()),
    );
    let alice = CallerIdentity::principal("alice");
    replicator.pull(USERS, &alice).unwrap();

    scenario
        .client
        .upsert(USERS, renamed("alice", "Alice Liddell"))
        .unwrap();
    let report = replicator.push(USERS, &alice).unwrap();

    assert_eq!(report.direction, Direction::Push);
    assert_eq!(report.applied, 1);
    assert!(report.conflicts.is_empty());
    assert_eq!(report.checkpoint.source, scenario.client_id());
    assert_eq!(report.checkpoint.sequence, 2);
    assert_eq!(
        fullname(&scenario.server, "alice").as_deref(),
        Some("Alice Liddell")
    );
    assert_eq!(scenario.server.checkpoint(USERS, &scenario.client_id()), 2);
}

#[test]
fn push_of_someone_elses_record_is_denied() {
    init_tracing();
    let scenario = UsersScenario::new();
    let replicator = connect(&scenario.client, &scenario.server, Arc::new(AllowAll));
    replicator.pull(USERS, &CallerIdentity::anonymous()).unwrap();
    scenario.client.upsert(USERS, renamed("peter", "Pan")).unwrap();

    let guarded = connect(
        &scenario.client,
        &scenario.server,
        Arc::new(OwnerPolicy::by_record_id()),
    );
    let err = guarded
        .push(USERS, &CallerIdentity::principal("alice"))
        .unwrap_err();

    assert!(matches!(err, ReplicationError::Authorization(_)));
    assert_eq!(fullname(&scenario.server, "peter").as_deref(), Some("Peter"));
    assert_eq!(scenario.server.checkpoint(USERS, &scenario.client_id()), 0);
}

#[test]
fn pull_reports_conflict_and_keeps_local_value() {
    init_tracing();
    let scenario = UsersScenario::new();
    let replicator = open(&scenario);
    let caller = CallerIdentity::anonymous();
    replicator.pull(USERS, &caller).unwrap();

    scenario.client.upsert(USERS, renamed("alice", "Client Alice")).unwrap();
    scenario.server.upsert(USERS, renamed("alice", "Server Alice")).unwrap();

    let report = replicator.pull(USERS, &caller).unwrap();

    assert_eq!(report.conflicts.len(), 1);
    let conflict = &report.conflicts[0];
    assert_eq!(conflict.record_id.as_str(), "alice");
    assert_eq!(conflict.source.origin, scenario.server_id());
    assert_eq!(conflict.target.origin, scenario.client_id());
    assert_eq!(report.applied, 0);
    assert_eq!(
        fullname(&scenario.client, "alice").as_deref(),
        Some("Client Alice")
    );
    assert_eq!(report.checkpoint.sequence, 2);
}

#[test]
fn push_reports_conflict_and_keeps_remote_value() {
    init_tracing();
    let scenario = UsersScenario::new();
    let replicator = open(&scenario);
    let caller = CallerIdentity::anonymous();
    replicator.pull(USERS, &caller).unwrap();

    scenario.client.upsert(USERS, renamed("alice", "Client Alice")).unwrap();
    scenario.server.upsert(USERS, renamed("alice", "Server Alice")).unwrap();

    let report = replicator.push(USERS, &caller).unwrap();

    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].record_id.as_str(), "alice");
    assert_eq!(
        fullname(&scenario.server, "alice").as_deref(),
        Some("Server Alice")
    );
    assert_eq!(
        fullname(&scenario.client, "alice").as_deref(),
        Some("Client Alice")
    );
}

#[test]
fn clean_changes_apply_alongside_conflicts() {
    init_tracing();
    let scenario = UsersScenario::new();
    let replicator = open(&scenario);
    let caller = CallerIdentity::anonymous();
    replicator.pull(USERS, &caller).unwrap();

    scenario.client.upsert(USERS, renamed("alice", "Client Alice")).unwrap();
    scenario.server.upsert(USERS, renamed("peter", "Peter Parker")).unwrap();
    scenario.server.upsert(USERS, renamed("alice", "Server Alice")).unwrap();

    let report = replicator.pull(USERS, &caller).unwrap();

    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.applied, 1);
    assert_eq!(report.deferred, 0);
    assert_eq!(report.checkpoint.sequence, 3);
    assert_eq!(
        fullname(&scenario.client, "peter").as_deref(),
        Some("Peter Parker")
    );
}

#[test]
fn changes_after_a_conflict_wait_for_its_resolution() {
    init_tracing();
    let scenario = UsersScenario::new();
    let replicator = open(&scenario);
    let caller = CallerIdentity::anonymous();
    replicator.pull(USERS, &caller).unwrap();

    scenario.client.upsert(USERS, renamed("alice", "Client Alice")).unwrap();
    scenario.server.upsert(USERS, renamed("alice", "Server Alice")).unwrap();
    scenario.server.upsert(USERS, renamed("peter", "Peter Parker")).unwrap();

    let report = replicator.pull(USERS, &caller).unwrap();
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.applied, 0);
    assert_eq!(report.deferred, 1);
    assert_eq!(report.checkpoint.sequence, 2);
    assert_eq!(fullname(&scenario.client, "peter").as_deref(), Some("Peter"));

    scenario
        .client
        .resolve_conflict(&report.conflicts[0], ConflictResolution::KeepTarget)
        .unwrap();
    let report = replicator.pull(USERS, &caller).unwrap();

    assert!(report.conflicts.is_empty());
    assert_eq!(report.applied, 1);
    assert_eq!(report.checkpoint.sequence, 4);
    assert_eq!(
        fullname(&scenario.client, "alice").as_deref(),
        Some("Client Alice")
    );
    assert_eq!(
        fullname(&scenario.client, "peter").as_deref(),
        Some("Peter Parker")
    );
}

#[test]
fn unresolved_conflict_survives_repeated_syncs() {
    init_tracing();
    let scenario = UsersScenario::new();
    let replicator = open(&scenario);
    let caller = CallerIdentity::anonymous();
    replicator.pull(USERS, &caller).unwrap();

    scenario.client.upsert(USERS, renamed("alice", "Client Alice")).unwrap();
    scenario.server.upsert(USERS, renamed("alice", "Server Alice")).unwrap();

    for _ in 0..2 {
        let report = replicator.sync(USERS, &caller).unwrap();
        assert_eq!(report.pull.conflicts.len(), 1);
        assert_eq!(report.push.conflicts.len(), 1);
        assert_eq!(report.pull.applied, 0);
        assert_eq!(report.push.applied, 0);
        assert_eq!(
            fullname(&scenario.client, "alice").as_deref(),
            Some("Client Alice")
        );
        assert_eq!(
            fullname(&scenario.server, "alice").as_deref(),
            Some("Server Alice")
        );
    }
    assert_eq!(scenario.client.checkpoint(USERS, &scenario.server_id()), 2);
    assert_eq!(scenario.server.checkpoint(USERS, &scenario.client_id()), 2);
}

#[test]
fn conflict_reported_on_push_is_still_reported_on_pull() {
    init_tracing();
    let scenario = UsersScenario::new();
    let replicator = open(&scenario);
    let caller = CallerIdentity::anonymous();
    replicator.pull(USERS, &caller).unwrap();

    scenario.client.upsert(USERS, renamed("alice", "Client Alice")).unwrap();
    scenario.server.upsert(USERS, renamed("alice", "Server Alice")).unwrap();

    let pushed = replicator.push(USERS, &caller).unwrap();
    assert_eq!(pushed.conflicts.len(), 1);
    let pulled = replicator.pull(USERS, &caller).unwrap();

    assert_eq!(pulled.conflicts.len(), 1);
    assert_eq!(pulled.applied, 0);
    assert_eq!(
        fullname(&scenario.client, "alice").as_deref(),
        Some("Client Alice")
    );
    assert_eq!(
        fullname(&scenario.server, "alice").as_deref(),
        Some("Server Alice")
    );
}

#[test]
fn kept_local_value_reaches_the_server() {
    init_tracing();
    let scenario = UsersScenario::new();
    let replicator = open(&scenario);
    let caller = CallerIdentity::anonymous();
    replicator.pull(USERS, &caller).unwrap();

    scenario.client.upsert(USERS, renamed("alice", "Client Alice")).unwrap();
    scenario.server.upsert(USERS, renamed("alice", "Server Alice")).unwrap();
    let report = replicator.pull(USERS, &caller).unwrap();
    scenario
        .client
        .resolve_conflict(&report.conflicts[0], ConflictResolution::KeepTarget)
        .unwrap();

    let report = replicator.sync(USERS, &caller).unwrap();
    assert_eq!(report.conflicts().count(), 0);
    assert_eq!(report.push.applied, 1);
    assert_eq!(
        fullname(&scenario.server, "alice").as_deref(),
        Some("Client Alice")
    );

    let again = replicator.sync(USERS, &caller).unwrap();
    assert_eq!(again.conflicts().count(), 0);
    assert_eq!(again.pull.applied + again.push.applied, 0);
}

#[test]
fn accepted_remote_value_settles_both_sides() {
    init_tracing();
    let scenario = UsersScenario::new();
    let replicator = open(&scenario);
    let caller = CallerIdentity::anonymous();
    replicator.pull(USERS, &caller).unwrap();

    scenario.client.upsert(USERS, renamed("alice", "Client Alice")).unwrap();
    scenario.server.upsert(USERS, renamed("alice", "Server Alice")).unwrap();
    let report = replicator.pull(USERS, &caller).unwrap();
    scenario
        .client
        .resolve_conflict(&report.conflicts[0], ConflictResolution::AcceptSource)
        .unwrap();

    let report = replicator.sync(USERS, &caller).unwrap();
    assert_eq!(report.conflicts().count(), 0);
    assert_eq!(report.pull.checkpoint.sequence, 3);
    assert_eq!(
        fullname(&scenario.client, "alice").as_deref(),
        Some("Server Alice")
    );
    assert_eq!(
        fullname(&scenario.server, "alice").as_deref(),
        Some("Server Alice")
    );
}

#[test]
fn strict_mode_rejects_the_whole_batch() {
    init_tracing();
    let scenario = UsersScenario::new();
    let caller = CallerIdentity::anonymous();
    open(&scenario).pull(USERS, &caller).unwrap();

    scenario.client.upsert(USERS, renamed("alice", "Client Alice")).unwrap();
    scenario.server.upsert(USERS, renamed("alice", "Server Alice")).unwrap();
    scenario.server.upsert(USERS, renamed("peter", "Peter Parker")).unwrap();

    let strict = connect_with(
        ReplicationConfig::new().with_consistency(ConsistencyMode::Strict),
        &scenario.client,
        &scenario.server,
        Arc::new(AllowAll),
    );
    let err = strict.pull(USERS, &caller).unwrap_err();

    match err {
        ReplicationError::Conflict { conflicts } => assert_eq!(conflicts.len(), 1),
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(fullname(&scenario.client, "peter").as_deref(), Some("Peter"));
    assert_eq!(scenario.client.checkpoint(USERS, &scenario.server_id()), 2);

    let err = strict.push(USERS, &caller).unwrap_err();
    assert!(matches!(err, ReplicationError::Conflict { .. }));
    assert_eq!(
        fullname(&scenario.server, "alice").as_deref(),
        Some("Server Alice")
    );
    assert_eq!(scenario.server.checkpoint(USERS, &scenario.client_id()), 0);
}

#[test]
fn repeated_pull_is_a_no_op() {
    init_tracing();
    let scenario = UsersScenario::new();
    let replicator = open(&scenario);
    let caller = CallerIdentity::anonymous();
    replicator.pull(USERS, &caller).unwrap();
    let sequence = scenario.client.current_sequence(USERS).unwrap();

    let report = replicator.pull(USERS, &caller).unwrap();

    assert_eq!(report.applied, 0);
    assert!(report.conflicts.is_empty());
    assert_eq!(scenario.client.current_sequence(USERS).unwrap(), sequence);
    assert_eq!(report.checkpoint.sequence, 2);
}

#[test]
fn replicas_that_already_agree_report_unchanged() {
    init_tracing();
    let scenario = UsersScenario::new();
    scenario.client.upsert(USERS, alice()).unwrap();

    let report = open(&scenario)
        .pull(USERS, &CallerIdentity::anonymous())
        .unwrap();

    assert!(report.conflicts.is_empty());
    assert_eq!(report.applied, 1);
    assert_eq!(report.unchanged, 1);
    assert_eq!(scenario.client.current_sequence(USERS).unwrap(), 2);
}

#[test]
fn pushed_changes_are_not_echoed_back() {
    init_tracing();
    let scenario = UsersScenario::new();
    let replicator = open(&scenario);
    let caller = CallerIdentity::anonymous();
    replicator.pull(USERS, &caller).unwrap();
    scenario.client.upsert(USERS, renamed("alice", "Alicia")).unwrap();
    replicator.push(USERS, &caller).unwrap();
    let sequence = scenario.client.current_sequence(USERS).unwrap();

    let report = replicator.pull(USERS, &caller).unwrap();

    assert_eq!(report.applied, 0);
    assert!(report.conflicts.is_empty());
    assert_eq!(report.checkpoint.sequence, 3);
    assert_eq!(scenario.client.current_sequence(USERS).unwrap(), sequence);

    let report = replicator.push(USERS, &caller).unwrap();
    assert_eq!(report.applied, 0);
}

#[test]
fn deletes_replicate() {
    init_tracing();
    let scenario = UsersScenario::new();
    let replicator = open(&scenario);
    let caller = CallerIdentity::anonymous();
    replicator.pull(USERS, &caller).unwrap();

    scenario.server.delete(USERS, &RecordId::from("peter")).unwrap();
    let report = replicator.pull(USERS, &caller).unwrap();

    assert_eq!(report.applied, 1);
    assert_eq!(scenario.client_ids(), vec!["alice"]);
}

#[test]
fn owner_learns_of_deletes_under_a_field_rule() {
    init_tracing();
    let server = memory_replica("server");
    server
        .upsert("notes", Record::new("n1").with_field("owner", "alice"))
        .unwrap();
    let gate: Arc<dyn AuthorizationGate> = Arc::new(OwnerPolicy::by_field("owner"));
    let alice_client = memory_replica("alice-laptop");
    let peter_client = memory_replica("peter-laptop");
    let alice_sync = connect(&alice_client, &server, Arc::clone(&gate));
    let peter_sync = connect(&peter_client, &server, gate);
    let alice = CallerIdentity::principal("alice");
    let peter = CallerIdentity::principal("peter");

    assert_eq!(alice_sync.pull("notes", &alice).unwrap().applied, 1);
    assert_eq!(peter_sync.pull("notes", &peter).unwrap().filtered, 1);

    server.delete("notes", &RecordId::from("n1")).unwrap();

    let report = alice_sync.pull("notes", &alice).unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(report.filtered, 0);
    assert!(alice_client.records("notes").unwrap().is_empty());

    let report = peter_sync.pull("notes", &peter).unwrap();
    assert_eq!(report.applied, 0);
    assert_eq!(report.filtered, 1);
}

#[test]
fn store_failure_aborts_without_advancing() {
    init_tracing();
    let store = Arc::new(FaultyStore::new(Arc::new(MemoryRecordStore::new(
        ReplicaId::new("client"),
    ))));
    let scenario = UsersScenario::with_client(replica_over(store.clone()));
    let replicator = open(&scenario);
    let caller = CallerIdentity::anonymous();

    store.set_fail_apply(true);
    let err = replicator.pull(USERS, &caller).unwrap_err();

    assert!(matches!(err, ReplicationError::StoreWrite(_)));
    assert_eq!(replicator.state(), SessionState::Aborted);
    assert!(scenario.client_ids().is_empty());
    assert_eq!(scenario.client.checkpoint(USERS, &scenario.server_id()), 0);

    store.set_fail_apply(false);
    let report = replicator.pull(USERS, &caller).unwrap();
    assert_eq!(report.applied, 2);
    assert_eq!(store.apply_calls(), 2);
}

#[test]
fn cancellation_leaves_no_partial_state() {
    init_tracing();
    let scenario = UsersScenario::new();
    let endpoint = Arc::new(ReplicaEndpoint::open(Arc::clone(&scenario.server)));
    let replicator = Replicator::new(
        ReplicationConfig::new(),
        Arc::clone(&scenario.client),
        CancellingTransport {
            inner: LocalTransport::new(endpoint),
            handle: OnceLock::new(),
        },
    );
    let _ = replicator.transport().handle.set(replicator.cancel_handle());

    let err = replicator
        .pull(USERS, &CallerIdentity::anonymous())
        .unwrap_err();

    assert!(matches!(err, ReplicationError::Cancelled));
    assert!(scenario.client_ids().is_empty());
    assert_eq!(scenario.client.checkpoint(USERS, &scenario.server_id()), 0);
    assert_eq!(replicator.state(), SessionState::Aborted);
}

#[test]
fn transient_failures_are_retried() {
    init_tracing();
    let scenario = UsersScenario::new();
    let endpoint = Arc::new(ReplicaEndpoint::open(Arc::clone(&scenario.server)));
    let config = ReplicationConfig::new().with_retry(
        RetryConfig::new(3)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false),
    );
    let replicator = Replicator::new(
        config,
        Arc::clone(&scenario.client),
        FlakyTransport::new(LocalTransport::new(endpoint), 2),
    );

    let report = replicator
        .replicate_with_retry(Direction::Pull, USERS, &CallerIdentity::anonymous())
        .unwrap();

    assert_eq!(report.applied, 2);
    assert_eq!(replicator.stats().retries, 2);
    assert_eq!(replicator.transport().handshakes.load(Ordering::SeqCst), 3);
}

#[test]
fn retries_give_up_after_max_attempts() {
    init_tracing();
    let scenario = UsersScenario::new();
    let endpoint = Arc::new(ReplicaEndpoint::open(Arc::clone(&scenario.server)));
    let config = ReplicationConfig::new().with_retry(
        RetryConfig::new(2)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false),
    );
    let replicator = Replicator::new(
        config,
        Arc::clone(&scenario.client),
        FlakyTransport::new(LocalTransport::new(endpoint), 5),
    );

    let err = replicator
        .replicate_with_retry(Direction::Pull, USERS, &CallerIdentity::anonymous())
        .unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(replicator.transport().handshakes.load(Ordering::SeqCst), 2);
    assert!(scenario.client_ids().is_empty());
}

#[test]
fn authentication_errors_are_not_retried() {
    init_tracing();
    let scenario = UsersScenario::new();
    let config = ReplicationConfig::new().with_retry(
        RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false),
    );
    let replicator = connect_with(
        config,
        &scenario.client,
        &scenario.server,
        Arc::new(OwnerPolicy::by_record_id()),
    );

    let err = replicator
        .replicate_with_retry(Direction::Pull, USERS, &CallerIdentity::anonymous())
        .unwrap_err();

    assert!(matches!(err, ReplicationError::Authentication(_)));
    assert_eq!(replicator.stats().retries, 0);
}

#[test]
fn sync_converges_both_replicas() {
    init_tracing();
    let scenario = UsersScenario::new();
    scenario
        .client
        .upsert(USERS, renamed("carol", "Carol"))
        .unwrap();
    let replicator = open(&scenario);
    let caller = CallerIdentity::anonymous();

    let report = replicator.sync(USERS, &caller).unwrap();

    assert_eq!(report.pull.applied, 2);
    assert_eq!(report.push.applied, 1);
    assert_eq!(report.conflicts().count(), 0);
    assert_eq!(scenario.client_ids(), vec!["alice", "carol", "peter"]);
    assert_eq!(scenario.server_ids(), vec!["alice", "carol", "peter"]);

    let again = replicator.sync(USERS, &caller).unwrap();
    assert_eq!(again.pull.applied, 0);
    assert_eq!(again.push.applied, 0);
    assert_eq!(replicator.stats().sessions_committed, 4);
}

#[test]
fn checkpoints_survive_a_restart() {
    init_tracing();
    let persistent = PersistentReplica::new("client");
    let scenario = UsersScenario::with_client(Arc::clone(&persistent.replica));
    open(&scenario)
        .pull(USERS, &CallerIdentity::anonymous())
        .unwrap();

    let reopened = persistent.reopen();
    assert_eq!(reopened.checkpoint(USERS, &scenario.server_id()), 2);

    let replicator = connect(&reopened, &scenario.server, Arc::new(AllowAll));
    let report = replicator
        .pull(USERS, &CallerIdentity::anonymous())
        .unwrap();
    assert_eq!(report.applied, 0);
}

#[test]
fn concurrent_pushes_from_two_clients_serialize() {
    init_tracing();
    let server = UsersScenario::new().server;
    let clients: Vec<_> = ["north", "south"]
        .into_iter()
        .map(|name| {
            let replica = memory_replica(name);
            replica.upsert(USERS, renamed(name, name)).unwrap();
            replica
        })
        .collect();

    std::thread::scope(|scope| {
        for client in &clients {
            let server = &server;
            scope.spawn(move || {
                let replicator = connect(client, server, Arc::new(AllowAll));
                replicator
                    .push(USERS, &CallerIdentity::anonymous())
                    .unwrap()
            });
        }
    });

    let ids: Vec<_> = server
        .records(USERS)
        .unwrap()
        .into_iter()
        .map(|r| r.id().to_string())
        .collect();
    assert_eq!(ids, vec!["alice", "north", "peter", "south"]);
    assert_eq!(server.current_sequence(USERS).unwrap(), 4);
}
