//! HTTP transport implementation.
//!
//! This module provides an HTTP-based transport for replication sessions.
//! The actual HTTP client is abstracted via a trait so any library (or an
//! in-process loopback) can carry the CBOR bodies.

use crate::error::{ReplicationError, ReplicationResult};
use crate::transport::ReplicationTransport;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tandem_protocol::{
    CallerIdentity, ErrorResponse, HandshakeRequest, HandshakeResponse, PullRequest, PullResponse,
    PushRequest, PushResponse, WireMessage,
};

/// Path prefix of every replication route.
pub const ROUTE_PREFIX: &str = "/replication/";

/// An outgoing HTTP POST.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Absolute URL.
    pub url: String,
    /// Bearer token for the `Authorization` header.
    pub bearer: Option<String>,
    /// CBOR body.
    pub body: Vec<u8>,
    /// How long to wait for the response.
    pub timeout: Duration,
}

/// An HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }
}

/// Failure to obtain any HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpFailure {
    /// No response within the timeout.
    Timeout,
    /// The remote refused the connection.
    ConnectionRefused(String),
    /// Any other I/O failure.
    Io(String),
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request.
    fn post(&self, request: HttpRequest) -> Result<HttpResponse, HttpFailure>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based replication transport.
///
/// Uses CBOR encoding for request/response bodies and maps status codes
/// to [`ReplicationError`] variants.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    client: C,
    timeout: Duration,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            timeout: Duration::from_secs(30),
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn fail(&self, err: ReplicationError) -> ReplicationError {
        *self.last_error.write() = Some(err.to_string());
        err
    }

    fn post_cbor<Req, Res>(
        &self,
        route: &str,
        caller: &CallerIdentity,
        request: &Req,
    ) -> ReplicationResult<Res>
    where
        Req: WireMessage,
        Res: WireMessage,
    {
        if !self.is_connected() {
            return Err(ReplicationError::NotConnected);
        }

        let http_request = HttpRequest {
            url: format!("{}{ROUTE_PREFIX}{route}", self.base_url),
            bearer: caller.bearer_token().map(str::to_string),
            body: request.encode()?,
            timeout: self.timeout,
        };

        let response = self.client.post(http_request).map_err(|failure| {
            self.fail(match failure {
                HttpFailure::Timeout => ReplicationError::Timeout,
                HttpFailure::ConnectionRefused(msg) => {
                    ReplicationError::transport_retryable(format!("connection refused: {msg}"))
                }
                HttpFailure::Io(msg) => ReplicationError::transport_retryable(msg),
            })
        })?;

        if response.status != 200 {
            return Err(self.fail(status_error(&response)));
        }

        *self.last_error.write() = None;
        Ok(Res::decode(&response.body)?)
    }
}

fn status_error(response: &HttpResponse) -> ReplicationError {
    let message = ErrorResponse::decode(&response.body)
        .map(|body| body.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(&response.body).into_owned());

    match response.status {
        401 => ReplicationError::Authentication(message),
        403 => ReplicationError::Authorization(message),
        409 => ReplicationError::CheckpointConflict(message),
        status @ 500..=599 => {
            ReplicationError::transport_retryable(format!("status {status}: {message}"))
        }
        status => ReplicationError::transport_fatal(format!("status {status}: {message}")),
    }
}

impl<C: HttpClient> ReplicationTransport for HttpTransport<C> {
    fn handshake(
        &self,
        caller: &CallerIdentity,
        request: &HandshakeRequest,
    ) -> ReplicationResult<HandshakeResponse> {
        self.post_cbor("handshake", caller, request)
    }

    fn pull(
        &self,
        caller: &CallerIdentity,
        request: &PullRequest,
    ) -> ReplicationResult<PullResponse> {
        self.post_cbor("pull", caller, request)
    }

    fn push(
        &self,
        caller: &CallerIdentity,
        request: &PushRequest,
    ) -> ReplicationResult<PushResponse> {
        self.post_cbor("push", caller, request)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn close(&self) -> ReplicationResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a POST to `path` and returns the response.
    fn handle_post(&self, path: &str, bearer: Option<&str>, body: &[u8]) -> HttpResponse;
}

impl<S: LoopbackServer + ?Sized> LoopbackServer for Arc<S> {
    fn handle_post(&self, path: &str, bearer: Option<&str>, body: &[u8]) -> HttpResponse {
        (**self).handle_post(path, bearer, body)
    }
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(&self, request: HttpRequest) -> Result<HttpResponse, HttpFailure> {
        let path = request
            .url
            .find(ROUTE_PREFIX)
            .map_or(request.url.as_str(), |i| &request.url[i..]);

        Ok(self
            .server
            .handle_post(path, request.bearer.as_deref(), &request.body))
    }

    fn is_healthy(&self) -> bool {
        true
    }
}
