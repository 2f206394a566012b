//! Provider client: code exchange, refresh, revocation
//!
//! Exchange and refresh POST form-encoded bodies to the token endpoint with
//! different grant types; revocation POSTs `token=` to the revoke endpoint.
//! Each request is bounded by the configured timeout and attempted exactly
//! once. Codes are single-use, so replaying an exchange is never safe here.

use std::sync::Arc;

use reqwest::Url;
use tracing::{debug, warn};

use crate::authorize::build_authorization_url;
use crate::config::{ClientCredentials, ProviderConfig, RevocationAuth};
use crate::error::{Error, Result};
use crate::token::TokenResponse;

/// Stateless client for one provider's endpoint set.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    config: Arc<ProviderConfig>,
    http: reqwest::Client,
}

impl OAuthClient {
    /// Build a client whose connection pool enforces the configured timeout.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("building HTTP client: {e}")))?;
        Ok(Self::with_http_client(config, http))
    }

    /// Use an existing connection pool. The configured timeout is still
    /// applied per request.
    pub fn with_http_client(config: ProviderConfig, http: reqwest::Client) -> Self {
        Self {
            config: Arc::new(config),
            http,
        }
    }

    /// Replacement client for new provider settings, reusing the pool.
    pub fn with_config(&self, config: ProviderConfig) -> Self {
        Self::with_http_client(config, self.http.clone())
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Authorization URL for the configured authorize endpoint.
    pub fn build_authorization_url(&self, client_id: &str, redirect_uri: &str, state: &str) -> Url {
        build_authorization_url(&self.config.authorize_url, client_id, redirect_uri, state)
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        credentials: &ClientCredentials,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse> {
        self.post_token_request(
            "token exchange",
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.expose().as_str()),
            ],
        )
        .await
    }

    /// Obtain a new access token with a refresh token.
    pub async fn refresh(
        &self,
        credentials: &ClientCredentials,
        refresh_token: &str,
    ) -> Result<TokenResponse> {
        self.post_token_request(
            "token refresh",
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.expose().as_str()),
            ],
        )
        .await
    }

    /// Revoke a token at the provider.
    ///
    /// Authenticates with the scheme configured for this provider. Client
    /// credentials are only required for `ClientBasic`.
    pub async fn revoke(&self, credentials: Option<&ClientCredentials>, token: &str) -> Result<()> {
        let request = self
            .http
            .post(self.config.revoke_url.clone())
            .timeout(self.config.timeout)
            .form(&[("token", token)]);

        let request = match (self.config.revocation_auth, credentials) {
            (RevocationAuth::ClientBasic, Some(credentials)) => request.basic_auth(
                &credentials.client_id,
                Some(credentials.client_secret.expose()),
            ),
            (RevocationAuth::ClientBasic, None) => {
                return Err(Error::InvalidConfig(
                    "client_basic revocation requires client credentials".into(),
                ));
            }
            (RevocationAuth::BearerToken, _) => request.bearer_auth(token),
        };

        let response = request
            .send()
            .await
            .map_err(|e| Error::transport("token revocation", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            warn!(status = status.as_u16(), "revocation endpoint rejected request");
            return Err(Error::Revocation {
                status: status.as_u16(),
                body,
            });
        }

        debug!(
            auth = self.config.revocation_auth.label(),
            "token revoked at provider"
        );
        Ok(())
    }

    async fn post_token_request(
        &self,
        operation: &str,
        form: &[(&str, &str)],
    ) -> Result<TokenResponse> {
        let response = self
            .http
            .post(self.config.token_url.clone())
            .timeout(self.config.timeout)
            .form(form)
            .send()
            .await
            .map_err(|e| Error::transport(operation, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            warn!(operation, status = status.as_u16(), "token endpoint rejected request");
            return Err(Error::TokenExchange {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::transport(operation, e))?;

        let token = TokenResponse::from_body(&body)?;
        debug!(operation, expires_in = ?token.expires_in, "token endpoint succeeded");
        Ok(token)
    }
}
