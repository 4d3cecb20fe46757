//! End-to-end replication over the REST routes with bearer tokens.

use std::sync::Arc;
use tandem_engine::{
    ConsistencyMode, HttpTransport, LoopbackClient, ReplicationConfig, ReplicationError,
    ReplicationTransport, Replicator,
};
use tandem_protocol::{
    CallerIdentity, ChangeEntry, OwnerPolicy, PushRequest, Record, RecordId, ReplicaId,
};
use tandem_server::{ReplicationServer, ServerConfig};
use tandem_testkit::prelude::*;

type RestTransport = HttpTransport<LoopbackClient<Arc<ReplicationServer>>>;

struct Deployment {
    scenario: UsersScenario,
    server: Arc<ReplicationServer>,
}

impl Deployment {
    fn new() -> Self {
        init_tracing();
        let scenario = UsersScenario::new();
        let server = Arc::new(ReplicationServer::new(
            ServerConfig::default().with_auth(b"rest-test-secret".to_vec()),
            Arc::clone(&scenario.server),
            Arc::new(OwnerPolicy::by_record_id()),
        ));
        Self { scenario, server }
    }

    fn transport(&self) -> RestTransport {
        HttpTransport::new(
            "http://localhost:8080",
            LoopbackClient::new(Arc::clone(&self.server)),
        )
    }

    fn replicator(&self, config: ReplicationConfig) -> Replicator<RestTransport> {
        Replicator::new(config, Arc::clone(&self.scenario.client), self.transport())
    }

    fn login(&self, principal: &str) -> CallerIdentity {
        CallerIdentity::bearer(self.server.issue_token(principal).unwrap())
    }

    fn server_fullname(&self, id: &str) -> Option<String> {
        self.scenario
            .server
            .get(USERS, &RecordId::from(id))
            .unwrap()
            .and_then(|r| r.text("fullname").map(str::to_string))
    }
}

#[test]
fn pull_returns_only_the_callers_records() {
    let deployment = Deployment::new();
    let replicator = deployment.replicator(ReplicationConfig::new());

    let report = replicator.pull(USERS, &deployment.login("alice")).unwrap();

    assert_eq!(deployment.scenario.client_ids(), vec!["alice"]);
    assert!(report.conflicts.is_empty());
    assert_eq!(report.filtered, 1);
    assert_eq!(
        report.checkpoint.sequence,
        deployment.scenario.server.current_sequence(USERS).unwrap()
    );
}

#[test]
fn owner_push_updates_the_server() {
    let deployment = Deployment::new();
    let replicator = deployment.replicator(ReplicationConfig::new());
    let alice = deployment.login("alice");
    replicator.pull(USERS, &alice).unwrap();

    deployment
        .scenario
        .client
        .upsert(USERS, alice_renamed())
        .unwrap();
    let report = replicator.push(USERS, &alice).unwrap();

    assert!(report.conflicts.is_empty());
    assert_eq!(report.applied, 1);
    assert_eq!(
        deployment.server_fullname("alice").as_deref(),
        Some("Alice Liddell")
    );
    assert_eq!(
        deployment
            .scenario
            .server
            .checkpoint(USERS, &deployment.scenario.client_id()),
        report.checkpoint.sequence
    );
}

#[test]
fn push_by_another_user_is_forbidden() {
    let deployment = Deployment::new();
    let replicator = deployment.replicator(ReplicationConfig::new());
    replicator.pull(USERS, &deployment.login("alice")).unwrap();
    deployment
        .scenario
        .client
        .upsert(USERS, alice_renamed())
        .unwrap();
    let client_checkpoint = deployment
        .scenario
        .client
        .checkpoint(USERS, &deployment.scenario.server_id());

    let err = replicator
        .push(USERS, &deployment.login("peter"))
        .unwrap_err();

    assert!(matches!(err, ReplicationError::Authorization(_)));
    assert_eq!(deployment.server_fullname("alice").as_deref(), Some("Alice"));
    assert_eq!(
        deployment
            .scenario
            .server
            .checkpoint(USERS, &deployment.scenario.client_id()),
        0
    );
    assert_eq!(
        deployment
            .scenario
            .client
            .checkpoint(USERS, &deployment.scenario.server_id()),
        client_checkpoint
    );
}

#[test]
fn missing_or_forged_tokens_are_unauthenticated() {
    let deployment = Deployment::new();
    let replicator = deployment.replicator(ReplicationConfig::new());

    let err = replicator
        .pull(USERS, &CallerIdentity::anonymous())
        .unwrap_err();
    assert!(matches!(err, ReplicationError::Authentication(_)));

    let err = replicator
        .pull(USERS, &CallerIdentity::bearer("Zm9yZ2Vk"))
        .unwrap_err();
    assert!(matches!(err, ReplicationError::Authentication(_)));
    assert!(deployment.scenario.client_ids().is_empty());
}

#[test]
fn stale_push_is_a_retryable_conflict() {
    let deployment = Deployment::new();
    let transport = deployment.transport();
    let client = ReplicaId::new("client");
    let request = PushRequest {
        collection: USERS.into(),
        source: client.clone(),
        since: 7,
        source_sequence: 8,
        seen_sequence: 2,
        deltas: vec![ChangeEntry::update(USERS, alice_renamed(), 8, client)],
        strict: false,
    };

    let err = transport
        .push(&deployment.login("alice"), &request)
        .unwrap_err();

    assert!(matches!(err, ReplicationError::CheckpointConflict(_)));
    assert!(err.is_retryable());
    assert!(transport.last_error().is_some());
}

#[test]
fn strict_push_conflict_crosses_the_wire() {
    let deployment = Deployment::new();
    let alice = deployment.login("alice");
    deployment
        .replicator(ReplicationConfig::new())
        .pull(USERS, &alice)
        .unwrap();

    deployment
        .scenario
        .client
        .upsert(USERS, alice_renamed())
        .unwrap();
    deployment
        .scenario
        .server
        .upsert(USERS, Record::new("alice").with_field("fullname", "Alice Kingsleigh"))
        .unwrap();

    let strict =
        deployment.replicator(ReplicationConfig::new().with_consistency(ConsistencyMode::Strict));
    match strict.push(USERS, &alice).unwrap_err() {
        ReplicationError::Conflict { conflicts } => {
            assert_eq!(conflicts.len(), 1);
            assert_eq!(conflicts[0].record_id.as_str(), "alice");
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(
        deployment.server_fullname("alice").as_deref(),
        Some("Alice Kingsleigh")
    );
}

#[test]
fn sync_round_trip_for_one_user() {
    let deployment = Deployment::new();
    let replicator = deployment.replicator(ReplicationConfig::new());
    let alice = deployment.login("alice");

    let first = replicator.sync(USERS, &alice).unwrap();
    assert_eq!(first.pull.applied, 1);
    assert_eq!(first.push.applied, 0);

    deployment
        .scenario
        .client
        .upsert(USERS, alice_renamed())
        .unwrap();
    let second = replicator.sync(USERS, &alice).unwrap();
    assert_eq!(second.pull.applied, 0);
    assert_eq!(second.push.applied, 1);
    assert_eq!(second.conflicts().count(), 0);
    assert_eq!(
        deployment.server_fullname("alice").as_deref(),
        Some("Alice Liddell")
    );
}

fn alice_renamed() -> Record {
    let mut alice = alice();
    alice.set("fullname", "Alice Liddell");
    alice
}
