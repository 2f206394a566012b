//! Anti-forgery state tokens
//!
//! A state token is issued when an authorization attempt starts and must come
//! back unchanged on the provider callback. Each token is single-use:
//! `validate` removes the record before checking it, so a token is consumed
//! whether it turns out valid or expired.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::Secret;
use oauth_client::ClientCredentials;
use rand::RngExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::gateway::Gateway;
use crate::now_millis;
use crate::store::Store;

/// Default validity window for a state token.
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(60);

/// Random bytes per state token (128 bits).
const STATE_TOKEN_BYTES: usize = 16;

/// An authorization attempt waiting for its callback.
///
/// Credentials are captured at issue time so the exchange uses the same
/// client the user was sent to, even if the gateway changes mid-flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingState {
    pub state_token: String,
    pub gateway_id: u64,
    pub gateway_name: String,
    pub client_id: String,
    pub client_secret: Secret<String>,
    /// Unix milliseconds
    pub created_at: u64,
}

impl PendingState {
    pub fn credentials(&self) -> ClientCredentials {
        ClientCredentials::new(self.client_id.clone(), self.client_secret.clone())
    }

    fn age_millis(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at)
    }
}

/// Sole authority on which state tokens are currently valid.
pub struct StateStore {
    store: Arc<dyn Store<String, PendingState>>,
    ttl: Duration,
}

impl StateStore {
    pub fn new(store: Arc<dyn Store<String, PendingState>>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record a new pending attempt for `gateway` and return its state token.
    ///
    /// Expired records are swept first so abandoned attempts don't pile up.
    pub async fn issue(&self, gateway: &Gateway) -> Result<String> {
        self.sweep_expired().await?;

        let state_token = generate_state_token();
        let pending = PendingState {
            state_token: state_token.clone(),
            gateway_id: gateway.id,
            gateway_name: gateway.name.clone(),
            client_id: gateway.client_id.clone(),
            client_secret: gateway.client_secret.clone(),
            created_at: now_millis(),
        };
        self.store.set(state_token.clone(), pending).await?;

        debug!(gateway_id = gateway.id, "state token issued");
        Ok(state_token)
    }

    /// Consume a state token.
    ///
    /// The record is removed before the expiry check, so a second call with
    /// the same token always fails with `StateNotFound`.
    pub async fn validate(&self, state_token: &str) -> Result<PendingState> {
        let pending = self
            .store
            .delete(&state_token.to_string())
            .await?
            .ok_or(Error::StateNotFound)?;

        let age = pending.age_millis(now_millis());
        if age > self.ttl_millis() {
            warn!(
                gateway_id = pending.gateway_id,
                age_ms = age,
                "state token expired"
            );
            return Err(Error::StateExpired {
                age_secs: age / 1000,
                ttl_secs: self.ttl.as_secs(),
            });
        }

        Ok(pending)
    }

    /// Remove every expired record. Returns how many were removed.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let now = now_millis();
        let ttl = self.ttl_millis();

        let mut removed = 0;
        for (token, pending) in self.store.list().await? {
            if pending.age_millis(now) > ttl && self.store.delete(&token).await?.is_some() {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "swept expired state tokens");
        }
        Ok(removed)
    }

    fn ttl_millis(&self) -> u64 {
        self.ttl.as_millis() as u64
    }
}

/// 16 random bytes from the thread-local CSPRNG, URL-safe base64 encoded.
fn generate_state_token() -> String {
    let mut bytes = [0u8; STATE_TOKEN_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
