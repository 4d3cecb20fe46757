//! Server configuration.

use crate::auth::AuthConfig;
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the replication server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Requests slower than this are logged as slow. Requests are never
    /// cut off.
    pub slow_request_threshold: Duration,
    /// Maximum number of deltas in one push.
    pub max_push_batch: usize,
    /// Whether to require a bearer token.
    pub require_auth: bool,
    /// Secret key for token validation (if auth enabled).
    pub auth_secret: Option<Vec<u8>>,
    /// Lifetime of issued tokens.
    pub token_expiry: Duration,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            slow_request_threshold: Duration::from_secs(30),
            max_push_batch: 1000,
            require_auth: false,
            auth_secret: None,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the duration past which a request is logged as slow.
    pub fn with_slow_request_threshold(mut self, threshold: Duration) -> Self {
        self.slow_request_threshold = threshold;
        self
    }

    /// Sets the maximum push batch size.
    pub fn with_max_push_batch(mut self, size: usize) -> Self {
        self.max_push_batch = size;
        self
    }

    /// Enables authentication with the given secret.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.require_auth = true;
        self.auth_secret = Some(secret);
        self
    }

    /// Sets the token lifetime.
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }

    /// Returns the token configuration, if a secret is set.
    pub fn auth_config(&self) -> Option<AuthConfig> {
        self.auth_secret
            .as_ref()
            .map(|secret| AuthConfig::new(secret.clone()).with_expiry(self.token_expiry))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8080)))
    }
}
