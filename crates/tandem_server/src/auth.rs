//! Bearer-token authentication for the replication server.
//!
//! Tokens are signed with HMAC-SHA256 and carry their issue time so the
//! server can enforce expiry without keeping any session state.
//!
//! ## Token Format
//!
//! Before base64url encoding (no padding), a token is:
//! - N bytes: principal name (UTF-8, non-empty)
//! - 8 bytes: issue time (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 over the preceding bytes

use crate::error::{ServerError, ServerResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

const TIMESTAMP_LEN: usize = 8;
const SIGNATURE_LEN: usize = 32;

/// Authentication configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"<redacted>")
            .field("token_expiry", &self.token_expiry)
            .finish()
    }
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60), // 24 hours
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Issues and validates bearer tokens.
#[derive(Debug, Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Issues a token for `principal`, valid from now.
    pub fn issue_token(&self, principal: &str) -> ServerResult<String> {
        self.issue_token_at(principal, now_millis())
    }

    fn issue_token_at(&self, principal: &str, issued_at: u64) -> ServerResult<String> {
        if principal.is_empty() {
            return Err(ServerError::InvalidRequest(
                "cannot issue a token for an empty principal".into(),
            ));
        }

        let mut token = Vec::with_capacity(principal.len() + TIMESTAMP_LEN + SIGNATURE_LEN);
        token.extend_from_slice(principal.as_bytes());
        token.extend_from_slice(&issued_at.to_be_bytes());
        let signature = self.mac(&token)?.finalize().into_bytes();
        token.extend_from_slice(&signature);

        Ok(URL_SAFE_NO_PAD.encode(token))
    }

    /// Validates a token and returns the principal it was issued for.
    pub fn validate_token(&self, token: &str) -> ServerResult<String> {
        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| ServerError::AuthenticationFailed("malformed token".into()))?;
        if raw.len() <= TIMESTAMP_LEN + SIGNATURE_LEN {
            return Err(ServerError::AuthenticationFailed("invalid token length".into()));
        }

        let (signed, signature) = raw.split_at(raw.len() - SIGNATURE_LEN);
        self.mac(signed)?
            .verify_slice(signature)
            .map_err(|_| ServerError::AuthenticationFailed("invalid signature".into()))?;

        let (principal, timestamp) = signed.split_at(signed.len() - TIMESTAMP_LEN);
        let mut issued = [0u8; TIMESTAMP_LEN];
        issued.copy_from_slice(timestamp);
        let issued_at = u64::from_be_bytes(issued);

        let expiry_millis = u64::try_from(self.config.token_expiry.as_millis()).unwrap_or(u64::MAX);
        if now_millis() > issued_at.saturating_add(expiry_millis) {
            return Err(ServerError::AuthenticationFailed("token expired".into()));
        }

        String::from_utf8(principal.to_vec())
            .map_err(|_| ServerError::AuthenticationFailed("principal is not UTF-8".into()))
    }

    fn mac(&self, data: &[u8]) -> ServerResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("hmac key rejected: {e}")))?;
        mac.update(data);
        Ok(mac)
    }
}

fn now_millis() -> u64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    u64::try_from(elapsed).unwrap_or(u64::MAX)
}
