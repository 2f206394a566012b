//! Authorization-code flow coordination
//!
//! The coordinator holds no records of its own. Each operation reads and
//! writes through the three stores and calls the provider client, and every
//! failure is tagged with the step that produced it.
//!
//! Store writes happen only after the provider call succeeds, so a rejected
//! exchange creates no token and a rejected revocation deletes none.

use std::fmt;
use std::sync::Arc;

use oauth_client::{OAuthClient, RevocationAuth, Url};
use tracing::{info, warn};

use crate::error::{Error, FlowError, FlowStep};
use crate::gateway::GatewayRegistry;
use crate::now_millis;
use crate::state::StateStore;
use crate::tokens::{IssuedToken, NewToken, TokenStore};

/// Where a single authorization attempt stands.
///
/// `Idle -> AwaitingCallback -> Completed | Failed | Expired`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    AwaitingCallback,
    Completed,
    Failed,
    Expired,
}

impl AttemptState {
    pub fn label(&self) -> &'static str {
        match self {
            AttemptState::Idle => "idle",
            AttemptState::AwaitingCallback => "awaiting_callback",
            AttemptState::Completed => "completed",
            AttemptState::Failed => "failed",
            AttemptState::Expired => "expired",
        }
    }

    /// Terminal state of a finished callback.
    pub fn of<T>(result: &Result<T, FlowError>) -> Self {
        match result {
            Ok(_) => AttemptState::Completed,
            Err(FlowError {
                error: Error::StateExpired { .. },
                ..
            }) => AttemptState::Expired,
            Err(_) => AttemptState::Failed,
        }
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Drives authorization, refresh, and revocation across the stores.
pub struct FlowCoordinator {
    gateways: Arc<GatewayRegistry>,
    states: Arc<StateStore>,
    tokens: Arc<TokenStore>,
    client: OAuthClient,
}

impl FlowCoordinator {
    pub fn new(
        gateways: Arc<GatewayRegistry>,
        states: Arc<StateStore>,
        tokens: Arc<TokenStore>,
        client: OAuthClient,
    ) -> Self {
        Self {
            gateways,
            states,
            tokens,
            client,
        }
    }

    pub fn gateways(&self) -> &GatewayRegistry {
        &self.gateways
    }

    pub fn states(&self) -> &StateStore {
        &self.states
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn client(&self) -> &OAuthClient {
        &self.client
    }

    /// Start an attempt for `gateway_id` and return the provider URL the
    /// user should be sent to.
    pub async fn begin_authorization(&self, gateway_id: u64) -> Result<Url, FlowError> {
        let gateway = self
            .gateways
            .get(gateway_id)
            .await
            .map_err(FlowError::at(FlowStep::LoadGateway))?;
        if gateway.credentials().is_blank() {
            return Err(FlowError::new(
                FlowStep::LoadGateway,
                Error::NotFound(format!("gateway {gateway_id} has no client credentials")),
            ));
        }

        let state = self
            .states
            .issue(&gateway)
            .await
            .map_err(FlowError::at(FlowStep::IssueState))?;

        let url = self.client.build_authorization_url(
            &gateway.client_id,
            &self.client.config().redirect_uri,
            &state,
        );
        info!(
            gateway_id,
            attempt = %AttemptState::AwaitingCallback,
            "authorization started"
        );
        Ok(url)
    }

    /// Finish an attempt from the provider callback.
    ///
    /// This is the only path that creates tokens.
    pub async fn complete_authorization(
        &self,
        code: &str,
        state: &str,
    ) -> Result<IssuedToken, FlowError> {
        let result = self.try_complete_authorization(code, state).await;
        let attempt = AttemptState::of(&result);
        match &result {
            Ok(token) => info!(
                token_id = token.id,
                gateway_id = token.gateway_id,
                %attempt,
                "authorization completed"
            ),
            Err(e) => warn!(step = %e.step, error = %e.error, %attempt, "authorization failed"),
        }
        result
    }

    async fn try_complete_authorization(
        &self,
        code: &str,
        state: &str,
    ) -> Result<IssuedToken, FlowError> {
        if state.trim().is_empty() {
            return Err(FlowError::new(
                FlowStep::ValidateState,
                Error::Validation("state must not be empty".into()),
            ));
        }
        if code.trim().is_empty() {
            return Err(FlowError::new(
                FlowStep::ExchangeCode,
                Error::Validation("code must not be empty".into()),
            ));
        }

        let pending = self
            .states
            .validate(state)
            .await
            .map_err(FlowError::at(FlowStep::ValidateState))?;

        let response = self
            .client
            .exchange_code(
                &pending.credentials(),
                code,
                &self.client.config().redirect_uri,
            )
            .await
            .map_err(FlowError::at(FlowStep::ExchangeCode))?;

        let new = NewToken::from_response(
            pending.gateway_id,
            pending.gateway_name,
            response,
            now_millis(),
        );
        self.tokens
            .add(new)
            .await
            .map_err(FlowError::at(FlowStep::StoreToken))
    }

    /// Drop an attempt the provider refused (for example `access_denied`).
    ///
    /// The state is consumed so it can't be completed later. A state that is
    /// already gone or expired needs no cleanup; storage failures propagate.
    pub async fn abandon_authorization(&self, state: &str) -> Result<(), FlowError> {
        match self.states.validate(state).await {
            Ok(pending) => {
                info!(
                    gateway_id = pending.gateway_id,
                    attempt = %AttemptState::Failed,
                    "authorization abandoned"
                );
                Ok(())
            }
            Err(Error::StateNotFound | Error::StateExpired { .. }) => Ok(()),
            Err(e) => Err(FlowError::new(FlowStep::ValidateState, e)),
        }
    }

    /// Refresh a token in place using its owning gateway's credentials.
    pub async fn refresh(&self, token_id: u64) -> Result<IssuedToken, FlowError> {
        let token = self
            .tokens
            .get(token_id)
            .await
            .map_err(FlowError::at(FlowStep::LoadToken))?;
        let refresh_token = token.refresh_token.as_ref().ok_or_else(|| {
            FlowError::new(
                FlowStep::LoadToken,
                Error::Validation(format!("token {token_id} has no refresh token")),
            )
        })?;

        let gateway = self
            .gateways
            .get(token.gateway_id)
            .await
            .map_err(FlowError::at(FlowStep::LoadGateway))?;

        let response = self
            .client
            .refresh(&gateway.credentials(), refresh_token.expose())
            .await
            .map_err(FlowError::at(FlowStep::RefreshToken))?;

        let refreshed = self
            .tokens
            .replace(token_id, response)
            .await
            .map_err(FlowError::at(FlowStep::ReplaceToken))?;
        info!(token_id, gateway_id = gateway.id, "token refreshed");
        Ok(refreshed)
    }

    /// Revoke at the provider, then delete the record.
    ///
    /// The record survives any failure before the provider confirms. Bearer
    /// revocation needs no client credentials, so it also works for tokens
    /// whose gateway was removed. A token refreshed while the provider call
    /// was in flight is kept and reported as a conflict.
    pub async fn revoke(&self, token_id: u64) -> Result<(), FlowError> {
        let token = self
            .tokens
            .get(token_id)
            .await
            .map_err(FlowError::at(FlowStep::LoadToken))?;
        let credentials = match self.client.config().revocation_auth {
            RevocationAuth::ClientBasic => Some(
                self.gateways
                    .get(token.gateway_id)
                    .await
                    .map_err(FlowError::at(FlowStep::LoadGateway))?
                    .credentials(),
            ),
            RevocationAuth::BearerToken => None,
        };

        self.client
            .revoke(credentials.as_ref(), token.access_token.expose())
            .await
            .map_err(FlowError::at(FlowStep::RevokeToken))?;

        self.tokens
            .remove_if_current(token_id, &token.access_token)
            .await
            .map_err(FlowError::at(FlowStep::RemoveToken))?;
        info!(token_id, gateway_id = token.gateway_id, "token revoked");
        Ok(())
    }

    /// Drop a token record without contacting the provider.
    ///
    /// For tokens whose gateway no longer exists and that the provider can't
    /// revoke without its client credentials.
    pub async fn discard(&self, token_id: u64) -> Result<IssuedToken, FlowError> {
        let removed = self
            .tokens
            .remove(token_id)
            .await
            .map_err(FlowError::at(FlowStep::RemoveToken))?;
        info!(token_id, "token discarded");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use std::sync::atomic::{AtomicBool, Ordering};

    use axum::Form;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::post;
    use oauth_client::{ProviderConfig, TokenResponse};
    use tokio::net::TcpListener;
    use tokio::sync::Notify;

    use crate::gateway::{Gateway, GatewayUpdate};
    use crate::state::{DEFAULT_STATE_TTL, PendingState};
    use crate::store::{MemoryStore, Store, StoreFuture};

    const REDIRECT_URI: &str = "http://127.0.0.1:8080/callback";

    async fn start_mock_provider(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// Accepts code `abc123` and refresh token `rt_1` for `cid`/`csec`.
    async fn token_endpoint(Form(form): Form<HashMap<String, String>>) -> impl IntoResponse {
        let field = |k: &str| form.get(k).map(String::as_str);
        if field("client_id") != Some("cid") || field("client_secret") != Some("csec") {
            return (StatusCode::UNAUTHORIZED, r#"{"error":"invalid_client"}"#).into_response();
        }
        match field("grant_type") {
            Some("authorization_code") if field("code") == Some("abc123") => {
                axum::Json(serde_json::json!({
                    "access_token": "tok1",
                    "expires_in": 3600
                }))
                .into_response()
            }
            Some("refresh_token") if field("refresh_token") == Some("rt_1") => {
                axum::Json(serde_json::json!({
                    "access_token": "tok2",
                    "expires_in": 3600
                }))
                .into_response()
            }
            _ => (StatusCode::BAD_REQUEST, r#"{"error":"invalid_grant"}"#).into_response(),
        }
    }

    /// Accepts client basic auth for `cid`/`csec`, or bearer auth with the
    /// token being revoked.
    async fn revoke_endpoint(
        headers: HeaderMap,
        Form(form): Form<HashMap<String, String>>,
    ) -> StatusCode {
        let auth = headers.get("authorization").and_then(|v| v.to_str().ok());
        let bearer = form.get("token").map(|t| format!("Bearer {t}"));
        match auth {
            Some("Basic Y2lkOmNzZWM=") => StatusCode::OK,
            Some(a) if Some(a) == bearer.as_deref() => StatusCode::OK,
            _ => StatusCode::FORBIDDEN,
        }
    }

    fn provider_router() -> Router {
        Router::new()
            .route("/oauth/token", post(token_endpoint))
            .route("/oauth/revoke", post(revoke_endpoint))
    }

    fn client_for(base: &str, auth: RevocationAuth) -> OAuthClient {
        let config = ProviderConfig::new(
            &format!("{base}/oauth/authorize"),
            &format!("{base}/oauth/token"),
            &format!("{base}/oauth/revoke"),
            REDIRECT_URI,
        )
        .unwrap()
        .with_timeout(Duration::from_secs(2))
        .with_revocation_auth(auth);
        OAuthClient::new(config).unwrap()
    }

    async fn mock_client(app: Router, auth: RevocationAuth) -> OAuthClient {
        let base = start_mock_provider(app).await;
        client_for(&base, auth)
    }

    fn coordinator(
        client: OAuthClient,
        states: Arc<dyn Store<String, PendingState>>,
        ttl: Duration,
    ) -> FlowCoordinator {
        FlowCoordinator::new(
            Arc::new(GatewayRegistry::new(Arc::new(
                MemoryStore::<u64, Gateway>::new(),
            ))),
            Arc::new(StateStore::new(states, ttl)),
            Arc::new(TokenStore::new(Arc::new(
                MemoryStore::<u64, IssuedToken>::new(),
            ))),
            client,
        )
    }

    fn memory_states() -> Arc<dyn Store<String, PendingState>> {
        Arc::new(MemoryStore::<String, PendingState>::new())
    }

    async fn test_coordinator(ttl: Duration) -> FlowCoordinator {
        let client = mock_client(provider_router(), RevocationAuth::ClientBasic).await;
        coordinator(client, memory_states(), ttl)
    }

    /// Pending-state store whose deletes fail once `fail_deletes` is set.
    #[derive(Default)]
    struct FailingDeletes {
        inner: MemoryStore<String, PendingState>,
        fail_deletes: AtomicBool,
    }

    impl Store<String, PendingState> for FailingDeletes {
        fn get<'a>(&'a self, key: &'a String) -> StoreFuture<'a, Option<PendingState>> {
            self.inner.get(key)
        }

        fn set(&self, key: String, value: PendingState) -> StoreFuture<'_, ()> {
            self.inner.set(key, value)
        }

        fn delete<'a>(&'a self, key: &'a String) -> StoreFuture<'a, Option<PendingState>> {
            if self.fail_deletes.load(Ordering::SeqCst) {
                return Box::pin(async { Err(Error::Storage("disk full".into())) });
            }
            self.inner.delete(key)
        }

        fn list(&self) -> StoreFuture<'_, Vec<(String, PendingState)>> {
            self.inner.list()
        }
    }

    fn query_param(url: &Url, key: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// Store a token for `gateway_id` directly, with a refresh token.
    async fn seed_token(flow: &FlowCoordinator, gateway_id: u64) -> IssuedToken {
        flow.tokens()
            .add(NewToken {
                gateway_id,
                gateway_name: "Acme".into(),
                access_token: "tok1".into(),
                refresh_token: Some("rt_1".into()),
                token_type: Some("bearer".into()),
                expires_at: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn end_to_end_authorization() {
        let flow = test_coordinator(DEFAULT_STATE_TTL).await;
        let gw = flow.gateways().add("Acme", "cid", "csec").await.unwrap();

        let url = flow.begin_authorization(gw.id).await.unwrap();
        assert_eq!(query_param(&url, "response_type").as_deref(), Some("code"));
        assert_eq!(query_param(&url, "client_id").as_deref(), Some("cid"));
        assert_eq!(query_param(&url, "redirect_uri").as_deref(), Some(REDIRECT_URI));
        let state = query_param(&url, "state").unwrap();
        assert!(!state.is_empty());

        let token = flow.complete_authorization("abc123", &state).await.unwrap();
        assert_eq!(token.access_token.expose(), "tok1");
        assert_eq!(token.gateway_id, gw.id);
        assert_eq!(token.gateway_name, "Acme");
        assert!(token.expires_at.is_some());

        let listed = flow.tokens().list().await.unwrap();
        assert_eq!(listed, vec![token]);
    }

    #[tokio::test]
    async fn begin_for_unknown_gateway_fails_at_load() {
        let flow = test_coordinator(DEFAULT_STATE_TTL).await;
        let err = flow.begin_authorization(42).await.unwrap_err();
        assert_eq!(err.step, FlowStep::LoadGateway);
        assert!(matches!(err.error, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn state_cannot_be_replayed() {
        let flow = test_coordinator(DEFAULT_STATE_TTL).await;
        let gw = flow.gateways().add("Acme", "cid", "csec").await.unwrap();
        let url = flow.begin_authorization(gw.id).await.unwrap();
        let state = query_param(&url, "state").unwrap();

        flow.complete_authorization("abc123", &state).await.unwrap();
        let result = flow.complete_authorization("abc123", &state).await;
        assert_eq!(AttemptState::of(&result), AttemptState::Failed);

        let err = result.unwrap_err();
        assert_eq!(err.step, FlowStep::ValidateState);
        assert!(matches!(err.error, Error::StateNotFound));
        assert_eq!(flow.tokens().list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expired_state_is_reported_as_expired() {
        let flow = test_coordinator(Duration::ZERO).await;
        let gw = flow.gateways().add("Acme", "cid", "csec").await.unwrap();
        let url = flow.begin_authorization(gw.id).await.unwrap();
        let state = query_param(&url, "state").unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = flow.complete_authorization("abc123", &state).await;
        assert_eq!(AttemptState::of(&result), AttemptState::Expired);
        assert!(flow.tokens().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_code_or_state_is_validation_error() {
        let flow = test_coordinator(DEFAULT_STATE_TTL).await;

        let err = flow.complete_authorization("", "some-state").await.unwrap_err();
        assert!(matches!(err.error, Error::Validation(_)));

        let err = flow.complete_authorization("abc123", "").await.unwrap_err();
        assert!(matches!(err.error, Error::Validation(_)));
    }

    #[tokio::test]
    async fn rejected_exchange_creates_no_token() {
        let flow = test_coordinator(DEFAULT_STATE_TTL).await;
        let gw = flow.gateways().add("Acme", "cid", "csec").await.unwrap();
        let url = flow.begin_authorization(gw.id).await.unwrap();
        let state = query_param(&url, "state").unwrap();

        let err = flow
            .complete_authorization("wrong-code", &state)
            .await
            .unwrap_err();
        assert_eq!(err.step, FlowStep::ExchangeCode);
        assert!(matches!(
            err.error,
            Error::Provider(oauth_client::Error::TokenExchange { status: 400, .. })
        ));
        assert!(flow.tokens().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn exchange_uses_credentials_captured_at_begin() {
        let flow = test_coordinator(DEFAULT_STATE_TTL).await;
        let gw = flow.gateways().add("Acme", "cid", "csec").await.unwrap();
        let url = flow.begin_authorization(gw.id).await.unwrap();
        let state = query_param(&url, "state").unwrap();

        flow.gateways()
            .update(
                gw.id,
                GatewayUpdate {
                    name: Some("Renamed".into()),
                    client_secret: Some("rotated".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let token = flow.complete_authorization("abc123", &state).await.unwrap();
        assert_eq!(token.gateway_name, "Acme");
    }

    #[tokio::test]
    async fn refresh_replaces_in_place() {
        let flow = test_coordinator(DEFAULT_STATE_TTL).await;
        let gw = flow.gateways().add("Acme", "cid", "csec").await.unwrap();
        let seeded = seed_token(&flow, gw.id).await;

        let refreshed = flow.refresh(seeded.id).await.unwrap();
        assert_eq!(refreshed.id, seeded.id);
        assert_eq!(refreshed.access_token.expose(), "tok2");
        assert_eq!(refreshed.refresh_token.as_ref().unwrap().expose(), "rt_1");
        assert_eq!(flow.tokens().list().await.unwrap(), vec![refreshed]);
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_is_validation_error() {
        let flow = test_coordinator(DEFAULT_STATE_TTL).await;
        let gw = flow.gateways().add("Acme", "cid", "csec").await.unwrap();
        let url = flow.begin_authorization(gw.id).await.unwrap();
        let state = query_param(&url, "state").unwrap();
        // The mock provider issues no refresh token on exchange
        let token = flow.complete_authorization("abc123", &state).await.unwrap();

        let err = flow.refresh(token.id).await.unwrap_err();
        assert_eq!(err.step, FlowStep::LoadToken);
        assert!(matches!(err.error, Error::Validation(_)));
    }

    #[tokio::test]
    async fn rejected_refresh_leaves_token_unchanged() {
        let flow = test_coordinator(DEFAULT_STATE_TTL).await;
        let gw = flow.gateways().add("Acme", "cid", "csec").await.unwrap();
        let seeded = seed_token(&flow, gw.id).await;
        flow.gateways()
            .update(
                gw.id,
                GatewayUpdate {
                    client_secret: Some("wrong".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = flow.refresh(seeded.id).await.unwrap_err();
        assert_eq!(err.step, FlowStep::RefreshToken);
        assert_eq!(flow.tokens().get(seeded.id).await.unwrap(), seeded);
    }

    #[tokio::test]
    async fn successful_revoke_removes_token() {
        let flow = test_coordinator(DEFAULT_STATE_TTL).await;
        let gw = flow.gateways().add("Acme", "cid", "csec").await.unwrap();
        let seeded = seed_token(&flow, gw.id).await;

        flow.revoke(seeded.id).await.unwrap();
        assert!(flow.tokens().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_revoke_keeps_token() {
        let flow = test_coordinator(DEFAULT_STATE_TTL).await;
        let gw = flow.gateways().add("Acme", "cid", "csec").await.unwrap();
        let seeded = seed_token(&flow, gw.id).await;
        flow.gateways()
            .update(
                gw.id,
                GatewayUpdate {
                    client_secret: Some("wrong".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = flow.revoke(seeded.id).await.unwrap_err();
        assert_eq!(err.step, FlowStep::RevokeToken);
        assert!(matches!(
            err.error,
            Error::Provider(oauth_client::Error::Revocation { status: 403, .. })
        ));
        assert_eq!(flow.tokens().list().await.unwrap(), vec![seeded]);
    }

    #[tokio::test]
    async fn orphaned_token_under_basic_auth_can_only_be_discarded() {
        let flow = test_coordinator(DEFAULT_STATE_TTL).await;
        let gw = flow.gateways().add("Acme", "cid", "csec").await.unwrap();
        let seeded = seed_token(&flow, gw.id).await;
        flow.gateways().remove(gw.id).await.unwrap();

        let err = flow.revoke(seeded.id).await.unwrap_err();
        assert_eq!(err.step, FlowStep::LoadGateway);
        assert_eq!(flow.tokens().list().await.unwrap().len(), 1);

        let discarded = flow.discard(seeded.id).await.unwrap();
        assert_eq!(discarded.id, seeded.id);
        assert!(flow.tokens().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bearer_revoke_works_for_orphaned_token() {
        let client = mock_client(provider_router(), RevocationAuth::BearerToken).await;
        let flow = coordinator(client, memory_states(), DEFAULT_STATE_TTL);
        let gw = flow.gateways().add("Acme", "cid", "csec").await.unwrap();
        let seeded = seed_token(&flow, gw.id).await;
        flow.gateways().remove(gw.id).await.unwrap();

        flow.revoke(seeded.id).await.unwrap();
        assert!(flow.tokens().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn token_refreshed_during_revoke_is_kept() {
        let reached = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let app = Router::new().route(
            "/oauth/revoke",
            post({
                let reached = reached.clone();
                let release = release.clone();
                move || {
                    let reached = reached.clone();
                    let release = release.clone();
                    async move {
                        reached.notify_one();
                        release.notified().await;
                        StatusCode::OK
                    }
                }
            }),
        );
        let client = mock_client(app, RevocationAuth::ClientBasic).await;
        let flow = Arc::new(coordinator(client, memory_states(), DEFAULT_STATE_TTL));
        let gw = flow.gateways().add("Acme", "cid", "csec").await.unwrap();
        let seeded = seed_token(&flow, gw.id).await;

        let revoking = tokio::spawn({
            let flow = flow.clone();
            async move { flow.revoke(seeded.id).await }
        });
        reached.notified().await;
        flow.tokens()
            .replace(
                seeded.id,
                TokenResponse::from_body(r#"{"access_token":"tok2"}"#).unwrap(),
            )
            .await
            .unwrap();
        release.notify_one();

        let err = revoking.await.unwrap().unwrap_err();
        assert_eq!(err.step, FlowStep::RemoveToken);
        assert!(matches!(err.error, Error::Conflict(_)));
        let kept = flow.tokens().get(seeded.id).await.unwrap();
        assert_eq!(kept.access_token.expose(), "tok2");
    }

    #[tokio::test]
    async fn malformed_exchange_response_creates_no_token() {
        let app = Router::new().route(
            "/oauth/token",
            post(|| async { axum::Json(serde_json::json!({"token_type": "bearer"})) }),
        );
        let client = mock_client(app, RevocationAuth::ClientBasic).await;
        let flow = coordinator(client, memory_states(), DEFAULT_STATE_TTL);
        let gw = flow.gateways().add("Acme", "cid", "csec").await.unwrap();
        let url = flow.begin_authorization(gw.id).await.unwrap();
        let state = query_param(&url, "state").unwrap();

        let err = flow.complete_authorization("abc123", &state).await.unwrap_err();
        assert_eq!(err.step, FlowStep::ExchangeCode);
        assert!(matches!(
            err.error,
            Error::Provider(oauth_client::Error::MalformedResponse(_))
        ));
        assert!(flow.tokens().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_provider_creates_no_token() {
        let client = client_for("http://127.0.0.1:1", RevocationAuth::ClientBasic);
        let flow = coordinator(client, memory_states(), DEFAULT_STATE_TTL);
        let gw = flow.gateways().add("Acme", "cid", "csec").await.unwrap();
        let url = flow.begin_authorization(gw.id).await.unwrap();
        let state = query_param(&url, "state").unwrap();

        let err = flow.complete_authorization("abc123", &state).await.unwrap_err();
        assert_eq!(err.step, FlowStep::ExchangeCode);
        assert!(matches!(
            err.error,
            Error::Provider(oauth_client::Error::Transport(_))
        ));
        assert!(flow.tokens().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn abandon_consumes_state() {
        let flow = test_coordinator(DEFAULT_STATE_TTL).await;
        let gw = flow.gateways().add("Acme", "cid", "csec").await.unwrap();
        let url = flow.begin_authorization(gw.id).await.unwrap();
        let state = query_param(&url, "state").unwrap();

        flow.abandon_authorization(&state).await.unwrap();
        // Already consumed: nothing left to drop
        flow.abandon_authorization(&state).await.unwrap();

        let err = flow.complete_authorization("abc123", &state).await.unwrap_err();
        assert!(matches!(err.error, Error::StateNotFound));
        assert!(flow.tokens().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn abandon_propagates_storage_failure() {
        let states = Arc::new(FailingDeletes::default());
        let client = mock_client(provider_router(), RevocationAuth::ClientBasic).await;
        let flow = coordinator(client, states.clone(), DEFAULT_STATE_TTL);
        let gw = flow.gateways().add("Acme", "cid", "csec").await.unwrap();
        let url = flow.begin_authorization(gw.id).await.unwrap();
        let state = query_param(&url, "state").unwrap();

        states.fail_deletes.store(true, Ordering::SeqCst);
        let err = flow.abandon_authorization(&state).await.unwrap_err();
        assert_eq!(err.step, FlowStep::ValidateState);
        assert!(matches!(err.error, Error::Storage(_)));
    }

    #[tokio::test]
    async fn revoke_unknown_token_is_not_found() {
        let flow = test_coordinator(DEFAULT_STATE_TTL).await;
        let err = flow.revoke(99).await.unwrap_err();
        assert_eq!(err.step, FlowStep::LoadToken);
        assert!(matches!(err.error, Error::NotFound(_)));
    }

    #[test]
    fn attempt_state_labels() {
        assert_eq!(AttemptState::Idle.label(), "idle");
        assert_eq!(AttemptState::AwaitingCallback.to_string(), "awaiting_callback");
        let ok: Result<(), FlowError> = Ok(());
        assert_eq!(AttemptState::of(&ok), AttemptState::Completed);
    }
}
