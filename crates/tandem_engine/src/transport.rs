//! Transport layer abstraction for replication sessions.

use crate::endpoint::ReplicaEndpoint;
use crate::error::{ReplicationError, ReplicationResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tandem_protocol::{
    CallerIdentity, HandshakeRequest, HandshakeResponse, PullRequest, PullResponse, PushRequest,
    PushResponse,
};

/// A replication transport carries protocol messages to a remote replica.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process, mock for testing).
pub trait ReplicationTransport: Send + Sync {
    /// Opens a session with the remote.
    fn handshake(
        &self,
        caller: &CallerIdentity,
        request: &HandshakeRequest,
    ) -> ReplicationResult<HandshakeResponse>;

    /// Fetches the remote's delta.
    fn pull(&self, caller: &CallerIdentity, request: &PullRequest)
        -> ReplicationResult<PullResponse>;

    /// Offers a local delta to the remote.
    fn push(&self, caller: &CallerIdentity, request: &PushRequest)
        -> ReplicationResult<PushResponse>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport.
    fn close(&self) -> ReplicationResult<()>;
}

/// In-process transport calling a [`ReplicaEndpoint`] directly.
#[derive(Debug)]
pub struct LocalTransport {
    endpoint: Arc<ReplicaEndpoint>,
    connected: AtomicBool,
}

impl LocalTransport {
    /// Creates a transport to `endpoint`.
    pub fn new(endpoint: Arc<ReplicaEndpoint>) -> Self {
        Self {
            endpoint,
            connected: AtomicBool::new(true),
        }
    }

    /// Returns the remote endpoint.
    pub fn endpoint(&self) -> &Arc<ReplicaEndpoint> {
        &self.endpoint
    }

    fn ensure_connected(&self) -> ReplicationResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ReplicationError::NotConnected)
        }
    }
}

impl ReplicationTransport for LocalTransport {
    fn handshake(
        &self,
        caller: &CallerIdentity,
        request: &HandshakeRequest,
    ) -> ReplicationResult<HandshakeResponse> {
        self.ensure_connected()?;
        self.endpoint.serve_handshake(caller, request)
    }

    fn pull(
        &self,
        caller: &CallerIdentity,
        request: &PullRequest,
    ) -> ReplicationResult<PullResponse> {
        self.ensure_connected()?;
        self.endpoint.serve_pull(caller, request)
    }

    fn push(
        &self,
        caller: &CallerIdentity,
        request: &PushRequest,
    ) -> ReplicationResult<PushResponse> {
        self.ensure_connected()?;
        self.endpoint.accept_push(caller, request)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> ReplicationResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// A mock transport for testing.
///
/// Serves canned responses. Errors queued with [`MockTransport::fail_next`]
/// are returned first, one per call.
#[derive(Debug, Default)]
pub struct MockTransport {
    connected: AtomicBool,
    handshake_response: Mutex<Option<HandshakeResponse>>,
    pull_response: Mutex<Option<PullResponse>>,
    push_response: Mutex<Option<PushResponse>>,
    failures: Mutex<VecDeque<ReplicationError>>,
    pulled: Mutex<Vec<PullRequest>>,
    pushed: Mutex<Vec<PushRequest>>,
}

impl MockTransport {
    /// Creates a new connected mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Sets the handshake response.
    pub fn set_handshake_response(&self, response: HandshakeResponse) {
        *self.handshake_response.lock() = Some(response);
    }

    /// Sets the pull response.
    pub fn set_pull_response(&self, response: PullResponse) {
        *self.pull_response.lock() = Some(response);
    }

    /// Sets the push response.
    pub fn set_push_response(&self, response: PushResponse) {
        *self.push_response.lock() = Some(response);
    }

    /// Queues an error for the next call.
    pub fn fail_next(&self, error: ReplicationError) {
        self.failures.lock().push_back(error);
    }

    /// Returns the pull requests received so far.
    pub fn pulled(&self) -> Vec<PullRequest> {
        self.pulled.lock().clone()
    }

    /// Returns the push requests received so far.
    pub fn pushed(&self) -> Vec<PushRequest> {
        self.pushed.lock().clone()
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn respond<R: Clone>(&self, slot: &Mutex<Option<R>>, what: &str) -> ReplicationResult<R> {
        if !self.is_connected() {
            return Err(ReplicationError::NotConnected);
        }
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        slot.lock()
            .clone()
            .ok_or_else(|| ReplicationError::transport_fatal(format!("no mock {what} response set")))
    }
}

impl ReplicationTransport for MockTransport {
    fn handshake(
        &self,
        _caller: &CallerIdentity,
        _request: &HandshakeRequest,
    ) -> ReplicationResult<HandshakeResponse> {
        self.respond(&self.handshake_response, "handshake")
    }

    fn pull(
        &self,
        _caller: &CallerIdentity,
        request: &PullRequest,
    ) -> ReplicationResult<PullResponse> {
        let response = self.respond(&self.pull_response, "pull")?;
        self.pulled.lock().push(request.clone());
        Ok(response)
    }

    fn push(
        &self,
        _caller: &CallerIdentity,
        request: &PushRequest,
    ) -> ReplicationResult<PushResponse> {
        let response = self.respond(&self.push_response, "push")?;
        self.pushed.lock().push(request.clone());
        Ok(response)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> ReplicationResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
