//! Provider endpoint configuration and client credentials
//!
//! Everything the client needs is passed in here at construction; nothing is
//! read from globals or the environment.

use std::time::Duration;

use common::Secret;
use reqwest::Url;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Bound on every provider request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// How the revocation request authenticates.
///
/// Providers disagree here, so the scheme is chosen per provider instead of
/// guessed at call time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationAuth {
    /// HTTP Basic with the gateway's client id and secret (RFC 7009 style).
    #[default]
    ClientBasic,
    /// `Authorization: Bearer <token being revoked>`.
    BearerToken,
}

impl RevocationAuth {
    pub fn label(&self) -> &'static str {
        match self {
            RevocationAuth::ClientBasic => "client_basic",
            RevocationAuth::BearerToken => "bearer_token",
        }
    }
}

/// Endpoint set for one OAuth provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub authorize_url: Url,
    pub token_url: Url,
    pub revoke_url: Url,
    /// Pre-registered callback target. Echoed into requests, never parsed.
    pub redirect_uri: String,
    pub timeout: Duration,
    pub revocation_auth: RevocationAuth,
}

impl ProviderConfig {
    /// Parse the three endpoint URLs. Timeout and revocation scheme start at
    /// their defaults.
    pub fn new(
        authorize_url: &str,
        token_url: &str,
        revoke_url: &str,
        redirect_uri: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            authorize_url: parse_endpoint("authorize_url", authorize_url)?,
            token_url: parse_endpoint("token_url", token_url)?,
            revoke_url: parse_endpoint("revoke_url", revoke_url)?,
            redirect_uri: redirect_uri.into(),
            timeout: DEFAULT_TIMEOUT,
            revocation_auth: RevocationAuth::default(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_revocation_auth(mut self, revocation_auth: RevocationAuth) -> Self {
        self.revocation_auth = revocation_auth;
        self
    }
}

fn parse_endpoint(field: &str, value: &str) -> Result<Url> {
    let url = Url::parse(value).map_err(|e| Error::InvalidConfig(format!("{field}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::InvalidConfig(format!(
            "{field}: unsupported scheme {other}"
        ))),
    }
}

/// Client id and secret of one registered gateway.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Secret<String>,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<Secret<String>>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// True when either half is missing.
    pub fn is_blank(&self) -> bool {
        self.client_id.trim().is_empty() || self.client_secret.is_blank()
    }
}
