//! Serving side of a replication session.
//!
//! A [`ReplicaEndpoint`] answers handshake, pull and push requests for
//! one replica. It authenticates every request through the replica's
//! gate and filters records per caller before anything leaves or enters
//! the store.

use crate::error::{ReplicationError, ReplicationResult};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tandem_protocol::{
    filter_authorized, Access, AllowAll, Authentication, AuthorizationGate, CallerIdentity,
    ChangeEntry, HandshakeRequest, HandshakeResponse, PullRequest, PullResponse, PushRequest,
    PushResponse, Record, RecordId, PROTOCOL_VERSION,
};
use tandem_store::{CommitStatus, InboundBatch, Replica};
use tracing::{debug, info, warn};

/// Answers replication requests for one replica.
pub struct ReplicaEndpoint {
    replica: Arc<Replica>,
    gate: Arc<dyn AuthorizationGate>,
}

impl fmt::Debug for ReplicaEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicaEndpoint")
            .field("replica", self.replica.id())
            .finish_non_exhaustive()
    }
}

impl ReplicaEndpoint {
    /// Creates an endpoint guarded by `gate`.
    pub fn new(replica: Arc<Replica>, gate: Arc<dyn AuthorizationGate>) -> Self {
        Self { replica, gate }
    }

    /// Creates an endpoint that lets everyone in.
    pub fn open(replica: Arc<Replica>) -> Self {
        Self::new(replica, Arc::new(AllowAll))
    }

    /// Returns the served replica.
    pub fn replica(&self) -> &Arc<Replica> {
        &self.replica
    }

    fn authenticate(&self, caller: &CallerIdentity) -> ReplicationResult<()> {
        match self.gate.authenticate(caller) {
            Authentication::Valid => Ok(()),
            Authentication::Invalid(reason) => {
                warn!(replica = %self.replica.id(), %reason, "caller rejected");
                Err(ReplicationError::Authentication(reason))
            }
        }
    }

    fn stored_states(
        &self,
        collection: &str,
        entries: &[ChangeEntry],
    ) -> ReplicationResult<HashMap<RecordId, Record>> {
        let mut states = HashMap::new();
        for entry in entries {
            if let Some(record) = self.replica.get(collection, &entry.record_id)? {
                states.insert(entry.record_id.clone(), record);
            }
        }
        Ok(states)
    }

    /// Opens a session.
    pub fn serve_handshake(
        &self,
        caller: &CallerIdentity,
        request: &HandshakeRequest,
    ) -> ReplicationResult<HandshakeResponse> {
        self.authenticate(caller)?;
        if request.check_version().is_err() {
            return Err(ReplicationError::VersionMismatch {
                local: PROTOCOL_VERSION,
                remote: request.protocol_version,
            });
        }

        let collection = &request.collection;
        Ok(HandshakeResponse {
            protocol_version: PROTOCOL_VERSION,
            replica_id: self.replica.id().clone(),
            collection: collection.clone(),
            current_sequence: self.replica.current_sequence(collection)?,
            peer_checkpoint: self.replica.checkpoint(collection, &request.replica_id),
        })
    }

    /// Returns the changes the caller may read since `request.since`.
    ///
    /// Unreadable records are silently left out. The requester's own
    /// changes are never sent back to it. A delete is judged against the
    /// last live state of its record, so a caller who could read the
    /// record also learns of its removal.
    pub fn serve_pull(
        &self,
        caller: &CallerIdentity,
        request: &PullRequest,
    ) -> ReplicationResult<PullResponse> {
        self.authenticate(caller)?;

        let outgoing =
            self.replica
                .outgoing_batch(&request.collection, request.since, &request.requester)?;
        let deleted: Vec<RecordId> = outgoing
            .deltas
            .iter()
            .filter(|entry| entry.is_delete())
            .map(|entry| entry.record_id.clone())
            .collect();
        let prior = self.replica.last_live_states(&request.collection, &deleted)?;
        let authorized =
            filter_authorized(self.gate.as_ref(), caller, Access::Read, outgoing.deltas, |entry| {
                if entry.is_delete() {
                    prior.get(&entry.record_id).cloned()
                } else {
                    None
                }
            });

        debug!(
            collection = %request.collection,
            peer = %request.requester,
            since = request.since,
            sending = authorized.allowed.len(),
            filtered = authorized.denied.len(),
            "serving pull"
        );

        Ok(PullResponse {
            collection: request.collection.clone(),
            source: self.replica.id().clone(),
            deltas: authorized.allowed,
            source_sequence: outgoing.up_to,
            filtered: authorized.denied.len() as u64,
        })
    }

    /// Accepts a pushed delta.
    ///
    /// Writes are authorized per record against both the stored and the
    /// proposed state. If every offered record is denied the push fails
    /// with [`ReplicationError::Authorization`] and nothing changes.
    pub fn accept_push(
        &self,
        caller: &CallerIdentity,
        request: &PushRequest,
    ) -> ReplicationResult<PushResponse> {
        self.authenticate(caller)?;
        request.validate()?;

        let collection = &request.collection;
        let stored = self.stored_states(collection, &request.deltas)?;
        let authorized = filter_authorized(
            self.gate.as_ref(),
            caller,
            Access::Write,
            request.deltas.clone(),
            |entry| stored.get(&entry.record_id).cloned(),
        );

        if authorized.is_wholesale_denial() {
            warn!(
                collection = %collection,
                peer = %request.source,
                denied = authorized.denied.len(),
                "push denied"
            );
            return Err(ReplicationError::Authorization(format!(
                "no record of the push to '{collection}' may be written by this caller"
            )));
        }

        let denied = authorized.denied.len() as u64;
        let outcome = self.replica.commit_inbound(InboundBatch {
            collection: collection.clone(),
            source: request.source.clone(),
            incoming: authorized.allowed,
            local_since: request.seen_sequence,
            expected_checkpoint: request.since,
            new_checkpoint: request.source_sequence,
            strict: request.strict,
        })?;

        let committed = outcome.status == CommitStatus::Committed;
        if committed {
            info!(
                collection = %collection,
                peer = %request.source,
                applied = outcome.applied.len(),
                conflicts = outcome.conflicts.len(),
                sequence = outcome.checkpoint,
                "push accepted"
            );
        }

        Ok(PushResponse {
            target: self.replica.id().clone(),
            committed,
            applied: outcome.applied.len() as u64,
            unchanged: outcome.unchanged as u64,
            deferred: outcome.deferred as u64,
            denied,
            conflicts: outcome.conflicts,
            checkpoint: outcome.checkpoint,
            target_sequence: self.replica.current_sequence(collection)?,
        })
    }
}
