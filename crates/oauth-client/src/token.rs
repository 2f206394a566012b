//! Token endpoint responses
//!
//! Code exchange and refresh both POST to the token endpoint and get the same
//! response shape back. Only `access_token` is mandatory; everything else is
//! passed through as the provider sent it.

use common::Secret;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Parsed token endpoint response.
///
/// `expires_in` is a delta in seconds from the response time. The caller
/// converts this to an absolute timestamp when storing the token.
#[derive(Debug, Clone)]
pub struct TokenResponse {
    pub access_token: Secret<String>,
    pub refresh_token: Option<Secret<String>>,
    /// Seconds until the access token expires (delta, not absolute)
    pub expires_in: Option<u64>,
    pub token_type: Option<String>,
}

/// Wire shape with every field optional so a missing `access_token` is
/// reported as malformed rather than as a generic decode failure.
#[derive(Deserialize)]
struct RawTokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
    token_type: Option<String>,
}

impl TokenResponse {
    /// Parse a success body from the token endpoint.
    pub fn from_body(body: &str) -> Result<Self> {
        let raw: RawTokenResponse = serde_json::from_str(body)
            .map_err(|e| Error::MalformedResponse(format!("token response is not valid JSON: {e}")))?;

        let access_token = raw
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::MalformedResponse("token response missing access_token".into()))?;

        Ok(Self {
            access_token: Secret::new(access_token),
            refresh_token: raw.refresh_token.filter(|t| !t.is_empty()).map(Secret::new),
            expires_in: raw.expires_in,
            token_type: raw.token_type,
        })
    }
}
