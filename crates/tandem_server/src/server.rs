//! Main replication server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use std::sync::Arc;
use std::time::Instant;
use tandem_engine::{HttpResponse, LoopbackServer, ReplicaEndpoint};
use tandem_protocol::{AuthorizationGate, ErrorResponse, WireMessage};
use tandem_store::Replica;
use tracing::{info, warn};

/// The replication server.
///
/// Serves `POST /replication/{handshake,pull,push}` for one replica. Bodies
/// are CBOR; failures come back as an [`ErrorResponse`] with a matching
/// status code. The HTTP listener itself is left to the embedding
/// application, which passes each request to [`ReplicationServer::handle_post`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tandem_protocol::{OwnerPolicy, ReplicaId};
/// use tandem_server::{ReplicationServer, ServerConfig};
/// use tandem_store::{MemoryRecordStore, Replica};
///
/// let replica = Arc::new(Replica::new(Arc::new(MemoryRecordStore::new(
///     ReplicaId::new("server"),
/// ))));
/// let config = ServerConfig::default().with_auth(b"secret".to_vec());
/// let server = ReplicationServer::new(config, replica, Arc::new(OwnerPolicy::by_record_id()));
///
/// let token = server.issue_token("alice").unwrap();
/// assert!(!token.is_empty());
/// ```
#[derive(Debug)]
pub struct ReplicationServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl ReplicationServer {
    /// Creates a server for `replica` guarded by `gate`.
    pub fn new(
        config: ServerConfig,
        replica: Arc<Replica>,
        gate: Arc<dyn AuthorizationGate>,
    ) -> Self {
        let endpoint = Arc::new(ReplicaEndpoint::new(replica, gate));
        let context = Arc::new(HandlerContext::new(config, endpoint));
        let handler = RequestHandler::new(Arc::clone(&context));

        info!(
            replica = %context.endpoint.replica().id(),
            addr = %context.config.bind_addr,
            auth = context.config.require_auth,
            "replication server ready"
        );
        Self { handler, context }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Returns the served replica.
    pub fn replica(&self) -> &Arc<Replica> {
        self.context.endpoint.replica()
    }

    /// Issues a bearer token for `principal`.
    pub fn issue_token(&self, principal: &str) -> ServerResult<String> {
        self.context
            .validator()
            .ok_or_else(|| ServerError::Internal("authentication is not configured".into()))?
            .issue_token(principal)
    }

    /// Handles one POST and renders the HTTP response.
    pub fn handle_post(&self, path: &str, bearer: Option<&str>, body: &[u8]) -> HttpResponse {
        let start = Instant::now();
        let response = match self.handler.route(path, bearer, body) {
            Ok(body) => HttpResponse::new(200, body),
            Err(err) => error_response(path, &err),
        };

        let elapsed = start.elapsed();
        if elapsed > self.context.config.slow_request_threshold {
            let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
            warn!(path, elapsed_ms, "slow request");
        }
        response
    }
}

fn error_response(path: &str, err: &ServerError) -> HttpResponse {
    if err.is_server_error() {
        warn!(path, error = %err, "request failed");
    }
    let body = ErrorResponse::new(err.kind(), err.to_string())
        .encode()
        .unwrap_or_else(|_| err.to_string().into_bytes());
    HttpResponse::new(err.status_code(), body)
}

impl LoopbackServer for ReplicationServer {
    fn handle_post(&self, path: &str, bearer: Option<&str>, body: &[u8]) -> HttpResponse {
        ReplicationServer::handle_post(self, path, bearer, body)
    }
}
