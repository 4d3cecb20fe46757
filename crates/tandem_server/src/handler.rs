//! Request handlers for replication routes.

use crate::auth::TokenValidator;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use std::sync::Arc;
use tandem_engine::{ReplicaEndpoint, ROUTE_PREFIX};
use tandem_protocol::{
    CallerIdentity, HandshakeRequest, HandshakeResponse, PullRequest, PullResponse, PushRequest,
    PushResponse, WireMessage,
};
use tracing::{debug, warn};

/// Context for request handling.
#[derive(Debug)]
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Endpoint serving the replica.
    pub endpoint: Arc<ReplicaEndpoint>,
    validator: Option<TokenValidator>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, endpoint: Arc<ReplicaEndpoint>) -> Self {
        let validator = config.auth_config().map(TokenValidator::new);
        Self {
            config,
            endpoint,
            validator,
        }
    }

    /// Returns the token validator, if a secret is configured.
    pub fn validator(&self) -> Option<&TokenValidator> {
        self.validator.as_ref()
    }

    /// Resolves the caller from the request's bearer token.
    ///
    /// With authentication required, a missing or invalid token fails.
    /// Without it, a token is still resolved when a validator exists so
    /// policies can see the principal.
    pub fn caller(&self, bearer: Option<&str>) -> ServerResult<CallerIdentity> {
        match (bearer, &self.validator) {
            (Some(token), Some(validator)) => {
                let principal = validator.validate_token(token)?;
                Ok(CallerIdentity::bearer(token).with_principal(principal))
            }
            (None, _) if self.config.require_auth => Err(ServerError::AuthenticationFailed(
                "missing bearer token".into(),
            )),
            (_, None) if self.config.require_auth => Err(ServerError::Internal(
                "authentication required but no secret configured".into(),
            )),
            (Some(token), None) => Ok(CallerIdentity::bearer(token)),
            (None, _) => Ok(CallerIdentity::anonymous()),
        }
    }
}

/// Handler for replication requests.
#[derive(Debug)]
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Returns the shared context.
    pub fn context(&self) -> &Arc<HandlerContext> {
        &self.context
    }

    /// Handles a handshake request.
    pub fn handle_handshake(
        &self,
        caller: &CallerIdentity,
        request: &HandshakeRequest,
    ) -> ServerResult<HandshakeResponse> {
        Ok(self.context.endpoint.serve_handshake(caller, request)?)
    }

    /// Handles a pull request.
    pub fn handle_pull(
        &self,
        caller: &CallerIdentity,
        request: &PullRequest,
    ) -> ServerResult<PullResponse> {
        Ok(self.context.endpoint.serve_pull(caller, request)?)
    }

    /// Handles a push request.
    pub fn handle_push(
        &self,
        caller: &CallerIdentity,
        request: &PushRequest,
    ) -> ServerResult<PushResponse> {
        let max = self.context.config.max_push_batch;
        if request.deltas.len() > max {
            return Err(ServerError::InvalidRequest(format!(
                "too many deltas: {} > {max}",
                request.deltas.len()
            )));
        }
        Ok(self.context.endpoint.accept_push(caller, request)?)
    }

    /// Dispatches a CBOR request body by path and returns the CBOR response.
    pub fn route(&self, path: &str, bearer: Option<&str>, body: &[u8]) -> ServerResult<Vec<u8>> {
        let route = path
            .strip_prefix(ROUTE_PREFIX)
            .ok_or_else(|| ServerError::UnknownRoute(path.to_string()))?;
        let caller = self.context.caller(bearer)?;
        debug!(route, principal = caller.principal_name(), "handling request");

        let encoded = match route {
            "handshake" => self.handle_handshake(&caller, &decode(body)?)?.encode(),
            "pull" => self.handle_pull(&caller, &decode(body)?)?.encode(),
            "push" => self.handle_push(&caller, &decode(body)?)?.encode(),
            _ => return Err(ServerError::UnknownRoute(path.to_string())),
        };
        encoded.map_err(|e| {
            warn!(route, error = %e, "failed to encode response");
            ServerError::Internal(e.to_string())
        })
    }
}

fn decode<M: WireMessage>(body: &[u8]) -> ServerResult<M> {
    M::decode(body).map_err(|e| ServerError::InvalidRequest(e.to_string()))
}
