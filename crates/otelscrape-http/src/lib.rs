//! The concurrency-governed HTTP client and the five auth strategies it
//! can apply, grounded on `tokf-cli`'s `remote/http.rs` (client/timeout
//! shape) and `auth/credentials.rs` (token expiry semantics).

pub mod auth;
pub mod client;

pub use auth::{Authenticator, SharedAuthenticator};
pub use client::{HttpClient, RequestSpec};
