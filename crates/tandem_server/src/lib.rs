//! # Tandem Server
//!
//! Reference REST-style replication server for Tandem.
//!
//! This crate provides:
//! - Route handling for `POST /replication/{handshake,pull,push}`
//! - Bearer-token authentication (HMAC-SHA256 tokens)
//! - Mapping of replication failures to HTTP status codes
//!
//! # Architecture
//!
//! The server wraps a [`tandem_engine::ReplicaEndpoint`]: it resolves the
//! caller from the bearer token, decodes the CBOR body and lets the
//! endpoint run the session against the served replica. Clients talk to
//! it through [`tandem_engine::HttpTransport`]; tests plug the server
//! straight into a [`tandem_engine::LoopbackClient`].
//!
//! # Authentication
//!
//! ```rust
//! use tandem_server::{AuthConfig, TokenValidator};
//!
//! let validator = TokenValidator::new(AuthConfig::new(b"my-secure-secret".to_vec()));
//! let token = validator.issue_token("alice").unwrap();
//! assert_eq!(validator.validate_token(&token).unwrap(), "alice");
//! ```
//!
//! # Status codes
//!
//! | Status | Meaning |
//! |--------|---------|
//! | 200 | CBOR response body |
//! | 400 | malformed or oversized request, protocol mismatch |
//! | 401 | missing or invalid bearer token |
//! | 403 | every offered record denied |
//! | 404 | unknown route |
//! | 409 | stale checkpoint |
//! | 500 | store failure |

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod auth;
mod config;
mod error;
mod handler;
mod server;

pub use auth::{AuthConfig, TokenValidator};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use server::ReplicationServer;
