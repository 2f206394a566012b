//! OAuth 2.0 authorization-code client
//!
//! Stateless operations against a configurable provider: authorization URL
//! construction, code exchange, token refresh, and token revocation. The
//! client never retries; a failed call is reported once with enough detail
//! (status and body, or the transport failure) for the caller to decide.
//!
//! Flow:
//! 1. Caller builds the redirect via `OAuthClient::build_authorization_url()`
//! 2. Provider redirects back with `code` and `state`
//! 3. Caller exchanges the code with `OAuthClient::exchange_code()`
//! 4. Later, `OAuthClient::refresh()` renews and `OAuthClient::revoke()` ends it

pub mod authorize;
pub mod client;
pub mod config;
pub mod error;
pub mod token;

pub use authorize::build_authorization_url;
pub use client::OAuthClient;
pub use config::{ClientCredentials, DEFAULT_TIMEOUT, ProviderConfig, RevocationAuth};
pub use error::{Error, Result};
pub use reqwest::Url;
pub use token::TokenResponse;
