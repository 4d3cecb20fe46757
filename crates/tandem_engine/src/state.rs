//! Replication orchestrator state machine.

use crate::config::ReplicationConfig;
use crate::error::{ReplicationError, ReplicationResult};
use crate::transport::ReplicationTransport;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tandem_protocol::{
    filter_authorized, Access, AllowAll, Authentication, AuthorizationGate, Authorized,
    CallerIdentity, ChangeEntry, Checkpoint, ConflictRecord, HandshakeRequest, HandshakeResponse,
    PullRequest, PushRequest, Record, RecordId, ReplicaId,
};
use tandem_store::{CommitStage, CommitStatus, InboundBatch, Replica};
use tracing::{debug, info, warn};

/// The current state of a replication session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session running.
    Idle,
    /// Handshaking and fetching deltas.
    FetchingDeltas,
    /// Consulting the authorization gate.
    Authorizing,
    /// Reconciling against the target's local changes.
    DetectingConflicts,
    /// Writing approved deltas to the target.
    Applying,
    /// The last session committed.
    Committed,
    /// The last session aborted with no state change.
    Aborted,
}

impl SessionState {
    /// Returns true if a session is running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::FetchingDeltas
                | SessionState::Authorizing
                | SessionState::DetectingConflicts
                | SessionState::Applying
        )
    }

    /// Returns true if a new session can start.
    pub fn can_start(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Which way records flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Remote is the source, this replica the target.
    Pull,
    /// This replica is the source, the remote the target.
    Push,
}

/// Cumulative statistics.
#[derive(Debug, Clone, Default)]
pub struct ReplicationStats {
    /// Sessions that committed.
    pub sessions_committed: u64,
    /// Sessions that aborted.
    pub sessions_aborted: u64,
    /// Deltas written to a target.
    pub deltas_applied: u64,
    /// Records filtered by a gate.
    pub records_filtered: u64,
    /// Conflicts reported.
    pub conflicts_reported: u64,
    /// Retries performed.
    pub retries: u64,
    /// Last commit time.
    pub last_commit_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of one committed session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// Direction of the session.
    pub direction: Direction,
    /// Collection replicated.
    pub collection: String,
    /// The remote replica.
    pub peer: ReplicaId,
    /// Deltas written to the target.
    pub applied: u64,
    /// Deltas that were already in place.
    pub unchanged: u64,
    /// Clean deltas held back behind an unresolved conflict.
    pub deferred: u64,
    /// Records left out by a gate.
    pub filtered: u64,
    /// Conflicts found. The target kept its own values.
    pub conflicts: Vec<ConflictRecord>,
    /// Checkpoint the target now holds for the source.
    pub checkpoint: Checkpoint,
    /// Duration of the session.
    pub duration: Duration,
}

/// Result of a pull followed by a push.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// The pull half.
    pub pull: SessionReport,
    /// The push half.
    pub push: SessionReport,
}

impl SyncReport {
    /// Returns every conflict reported by either half.
    pub fn conflicts(&self) -> impl Iterator<Item = &ConflictRecord> {
        self.pull.conflicts.iter().chain(self.push.conflicts.iter())
    }
}

/// Shareable flag that cancels a running session at its next stage boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Replicates one local replica with one remote through a transport.
///
/// The replicator is the client side of every session: pulls make the
/// local replica the target, pushes make the remote the target. A local
/// gate can filter what enters and leaves this replica; it defaults to
/// [`AllowAll`] since the remote enforces its own policy.
pub struct Replicator<T: ReplicationTransport> {
    config: ReplicationConfig,
    replica: Arc<Replica>,
    transport: Arc<T>,
    gate: Arc<dyn AuthorizationGate>,
    state: RwLock<SessionState>,
    stats: RwLock<ReplicationStats>,
    cancel: CancelHandle,
}

impl<T: ReplicationTransport> Replicator<T> {
    /// Creates a new replicator.
    pub fn new(config: ReplicationConfig, replica: Arc<Replica>, transport: T) -> Self {
        Self {
            config,
            replica,
            transport: Arc::new(transport),
            gate: Arc::new(AllowAll),
            state: RwLock::new(SessionState::Idle),
            stats: RwLock::new(ReplicationStats::default()),
            cancel: CancelHandle::default(),
        }
    }

    /// Sets the local gate.
    pub fn with_gate(mut self, gate: Arc<dyn AuthorizationGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Returns the local replica.
    pub fn replica(&self) -> &Arc<Replica> {
        &self.replica
    }

    /// Returns the transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Gets the current state.
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> ReplicationStats {
        self.stats.read().clone()
    }

    /// Cancels the running session, if any.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns a handle that cancels sessions of this replicator.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    fn check_cancelled(&self) -> ReplicationResult<()> {
        if self.cancel.is_cancelled() {
            Err(ReplicationError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }

    fn begin(&self) -> ReplicationResult<()> {
        let mut state = self.state.write();
        if !state.can_start() {
            return Err(ReplicationError::InvalidStateTransition {
                from: state.to_string(),
                to: SessionState::FetchingDeltas.to_string(),
            });
        }
        self.cancel.reset();
        *state = SessionState::FetchingDeltas;
        Ok(())
    }

    fn finish(&self, result: ReplicationResult<SessionReport>) -> ReplicationResult<SessionReport> {
        match &result {
            Ok(report) => {
                self.set_state(SessionState::Committed);
                let mut stats = self.stats.write();
                stats.sessions_committed += 1;
                stats.deltas_applied += report.applied;
                stats.records_filtered += report.filtered;
                stats.conflicts_reported += report.conflicts.len() as u64;
                stats.last_commit_time = Some(Instant::now());
                stats.last_error = None;
            }
            Err(err) => {
                self.set_state(SessionState::Aborted);
                warn!(error = %err, kind = err.kind(), "replication session aborted");
                let mut stats = self.stats.write();
                stats.sessions_aborted += 1;
                stats.last_error = Some(err.to_string());
            }
        }
        result
    }

    fn authenticate_locally(&self, caller: &CallerIdentity) -> ReplicationResult<()> {
        match self.gate.authenticate(caller) {
            Authentication::Valid => Ok(()),
            Authentication::Invalid(reason) => Err(ReplicationError::Authentication(reason)),
        }
    }

    fn authorize_locally(
        &self,
        caller: &CallerIdentity,
        access: Access,
        collection: &str,
        entries: Vec<ChangeEntry>,
    ) -> ReplicationResult<Authorized> {
        let mut stored: HashMap<RecordId, Record> = HashMap::new();
        for entry in &entries {
            if let Some(record) = self.replica.get(collection, &entry.record_id)? {
                stored.insert(entry.record_id.clone(), record);
            }
        }
        let authorized = filter_authorized(self.gate.as_ref(), caller, access, entries, |e| {
            stored.get(&e.record_id).cloned()
        });
        if authorized.is_wholesale_denial() {
            return Err(ReplicationError::Authorization(format!(
                "local policy denies every record of '{collection}'"
            )));
        }
        Ok(authorized)
    }

    fn handshake(
        &self,
        collection: &str,
        caller: &CallerIdentity,
    ) -> ReplicationResult<HandshakeResponse> {
        let request = HandshakeRequest {
            protocol_version: self.config.protocol_version,
            replica_id: self.replica.id().clone(),
            collection: collection.to_string(),
        };
        let response = self.transport.handshake(caller, &request)?;
        if response.protocol_version != self.config.protocol_version {
            return Err(ReplicationError::VersionMismatch {
                local: self.config.protocol_version,
                remote: response.protocol_version,
            });
        }
        Ok(response)
    }

    /// Runs one session in the given direction.
    pub fn replicate(
        &self,
        direction: Direction,
        collection: &str,
        caller: &CallerIdentity,
    ) -> ReplicationResult<SessionReport> {
        match direction {
            Direction::Pull => self.pull(collection, caller),
            Direction::Push => self.push(collection, caller),
        }
    }

    /// Pulls the remote's changes into the local replica.
    pub fn pull(
        &self,
        collection: &str,
        caller: &CallerIdentity,
    ) -> ReplicationResult<SessionReport> {
        self.begin()?;
        let result = self.run_pull(collection, caller);
        self.finish(result)
    }

    fn run_pull(
        &self,
        collection: &str,
        caller: &CallerIdentity,
    ) -> ReplicationResult<SessionReport> {
        let start = Instant::now();
        self.authenticate_locally(caller)?;

        let hello = self.handshake(collection, caller)?;
        let remote = hello.replica_id.clone();
        self.check_cancelled()?;

        let since = self.replica.checkpoint(collection, &remote);
        debug!(collection, peer = %remote, since, "fetching deltas");
        let response = self.transport.pull(
            caller,
            &PullRequest::new(collection, self.replica.id().clone(), since),
        )?;
        response.validate()?;
        if response.source != remote {
            return Err(ReplicationError::transport_fatal(format!(
                "pull answered by {} instead of {remote}",
                response.source
            )));
        }
        self.check_cancelled()?;

        self.set_state(SessionState::Authorizing);
        let authorized = self.authorize_locally(caller, Access::Write, collection, response.deltas)?;
        let filtered = response.filtered + authorized.denied.len() as u64;
        self.check_cancelled()?;

        self.set_state(SessionState::DetectingConflicts);
        let outcome = self.replica.commit_inbound_with(
            InboundBatch {
                collection: collection.to_string(),
                source: remote.clone(),
                incoming: authorized.allowed,
                local_since: hello.peer_checkpoint,
                expected_checkpoint: since,
                new_checkpoint: response.source_sequence,
                strict: self.config.is_strict(),
            },
            |stage| {
                if stage == CommitStage::Applying {
                    self.set_state(SessionState::Applying);
                }
                !self.cancel.is_cancelled()
            },
        )?;

        match outcome.status {
            CommitStatus::Committed => {}
            CommitStatus::Rejected => {
                return Err(ReplicationError::Conflict {
                    conflicts: outcome.conflicts,
                })
            }
            CommitStatus::Halted => return Err(ReplicationError::Cancelled),
        }

        info!(
            collection,
            peer = %remote,
            applied = outcome.applied.len(),
            conflicts = outcome.conflicts.len(),
            sequence = outcome.checkpoint,
            "pull committed"
        );

        Ok(SessionReport {
            direction: Direction::Pull,
            collection: collection.to_string(),
            checkpoint: Checkpoint::new(remote.clone(), outcome.checkpoint),
            peer: remote,
            applied: outcome.applied.len() as u64,
            unchanged: outcome.unchanged as u64,
            deferred: outcome.deferred as u64,
            filtered,
            conflicts: outcome.conflicts,
            duration: start.elapsed(),
        })
    }

    /// Pushes local changes to the remote.
    ///
    /// The local replica is never modified by a push.
    pub fn push(
        &self,
        collection: &str,
        caller: &CallerIdentity,
    ) -> ReplicationResult<SessionReport> {
        self.begin()?;
        let result = self.run_push(collection, caller);
        self.finish(result)
    }

    fn run_push(
        &self,
        collection: &str,
        caller: &CallerIdentity,
    ) -> ReplicationResult<SessionReport> {
        let start = Instant::now();
        self.authenticate_locally(caller)?;

        let hello = self.handshake(collection, caller)?;
        let remote = hello.replica_id.clone();
        let outgoing =
            self.replica
                .outgoing_batch(collection, hello.peer_checkpoint, &remote)?;
        self.check_cancelled()?;

        self.set_state(SessionState::Authorizing);
        let authorized = self.authorize_locally(caller, Access::Read, collection, outgoing.deltas)?;
        let local_filtered = authorized.denied.len() as u64;
        self.check_cancelled()?;

        if authorized.allowed.is_empty() && outgoing.up_to == hello.peer_checkpoint {
            debug!(collection, peer = %remote, "nothing to push");
            return Ok(SessionReport {
                direction: Direction::Push,
                collection: collection.to_string(),
                checkpoint: Checkpoint::new(self.replica.id().clone(), hello.peer_checkpoint),
                peer: remote,
                applied: 0,
                unchanged: 0,
                deferred: 0,
                filtered: local_filtered,
                conflicts: Vec::new(),
                duration: start.elapsed(),
            });
        }

        self.set_state(SessionState::DetectingConflicts);
        let request = PushRequest {
            collection: collection.to_string(),
            source: self.replica.id().clone(),
            since: hello.peer_checkpoint,
            source_sequence: outgoing.up_to,
            seen_sequence: self.replica.checkpoint(collection, &remote),
            deltas: authorized.allowed,
            strict: self.config.is_strict(),
        };
        debug!(
            collection,
            peer = %remote,
            sending = request.deltas.len(),
            "pushing deltas"
        );
        let response = self.transport.push(caller, &request)?;

        if !response.committed {
            return Err(ReplicationError::Conflict {
                conflicts: response.conflicts,
            });
        }

        info!(
            collection,
            peer = %remote,
            applied = response.applied,
            conflicts = response.conflicts.len(),
            sequence = response.checkpoint,
            "push committed"
        );

        Ok(SessionReport {
            direction: Direction::Push,
            collection: collection.to_string(),
            checkpoint: Checkpoint::new(self.replica.id().clone(), response.checkpoint),
            peer: remote,
            applied: response.applied,
            unchanged: response.unchanged,
            deferred: response.deferred,
            filtered: local_filtered + response.denied,
            conflicts: response.conflicts,
            duration: start.elapsed(),
        })
    }

    /// Pulls, then pushes.
    ///
    /// Remote changes are reconciled locally before local ones are offered.
    pub fn sync(&self, collection: &str, caller: &CallerIdentity) -> ReplicationResult<SyncReport> {
        let pull = self.pull(collection, caller)?;
        let push = self.push(collection, caller)?;
        Ok(SyncReport { pull, push })
    }

    /// Runs one session, retrying transient errors with backoff.
    pub fn replicate_with_retry(
        &self,
        direction: Direction,
        collection: &str,
        caller: &CallerIdentity,
    ) -> ReplicationResult<SessionReport> {
        self.with_retry(|| self.replicate(direction, collection, caller))
    }

    /// Runs a full sync cycle, retrying transient errors with backoff.
    pub fn sync_with_retry(
        &self,
        collection: &str,
        caller: &CallerIdentity,
    ) -> ReplicationResult<SyncReport> {
        self.with_retry(|| self.sync(collection, caller))
    }

    fn with_retry<R, F>(&self, mut attempt_once: F) -> ReplicationResult<R>
    where
        F: FnMut() -> ReplicationResult<R>,
    {
        let retry = &self.config.retry;
        let attempts = retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                std::thread::sleep(retry.delay_for_attempt(attempt));
                self.stats.write().retries += 1;
                debug!(attempt, "retrying replication");
            }

            match attempt_once() {
                Ok(result) => return Ok(result),
                Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
