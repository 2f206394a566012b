//! Issued token records
//!
//! Tokens are opaque strings. The store never inspects them beyond rejecting
//! an empty access token.

use std::sync::Arc;

use common::Secret;
use oauth_client::TokenResponse;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{Error, Result};
use crate::now_millis;
use crate::store::Store;

/// An access token obtained through a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedToken {
    pub id: u64,
    pub gateway_id: u64,
    pub gateway_name: String,
    pub access_token: Secret<String>,
    pub refresh_token: Option<Secret<String>>,
    pub token_type: Option<String>,
    /// Unix milliseconds, absent when the provider gave no lifetime
    pub expires_at: Option<u64>,
    /// Unix milliseconds
    pub created_at: u64,
}

/// Fields for a token about to be stored. The store assigns the id.
#[derive(Debug, Clone)]
pub struct NewToken {
    pub gateway_id: u64,
    pub gateway_name: String,
    pub access_token: Secret<String>,
    pub refresh_token: Option<Secret<String>>,
    pub token_type: Option<String>,
    pub expires_at: Option<u64>,
}

impl NewToken {
    /// Build from a token endpoint response received at `now` (unix ms).
    pub fn from_response(
        gateway_id: u64,
        gateway_name: impl Into<String>,
        response: TokenResponse,
        now: u64,
    ) -> Self {
        Self {
            gateway_id,
            gateway_name: gateway_name.into(),
            expires_at: expires_at(&response, now),
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            token_type: response.token_type,
        }
    }
}

fn expires_at(response: &TokenResponse, now: u64) -> Option<u64> {
    response
        .expires_in
        .map(|secs| now.saturating_add(secs.saturating_mul(1000)))
}

/// Owner of all issued token records.
pub struct TokenStore {
    store: Arc<dyn Store<u64, IssuedToken>>,
    /// Highest id handed out by this process. Held while writing, so id
    /// assignment and the write are one step.
    write_lock: Mutex<u64>,
}

impl TokenStore {
    pub fn new(store: Arc<dyn Store<u64, IssuedToken>>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(0),
        }
    }

    /// Store a new token under the next id.
    ///
    /// Ids are never reused within a process, even after the highest one is
    /// removed.
    pub async fn add(&self, token: NewToken) -> Result<IssuedToken> {
        if token.access_token.is_blank() {
            return Err(Error::Validation("access_token must not be empty".into()));
        }

        let mut high_water = self.write_lock.lock().await;
        let max_stored = self
            .store
            .list()
            .await?
            .last()
            .map(|(id, _)| *id)
            .unwrap_or(0);
        let id = (*high_water).max(max_stored) + 1;

        let issued = IssuedToken {
            id,
            gateway_id: token.gateway_id,
            gateway_name: token.gateway_name,
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            token_type: token.token_type,
            expires_at: token.expires_at,
            created_at: now_millis(),
        };
        self.store.set(id, issued.clone()).await?;
        *high_water = id;

        info!(token_id = id, gateway_id = issued.gateway_id, "token stored");
        Ok(issued)
    }

    /// Swap in a refreshed token, keeping the id.
    ///
    /// A response without a refresh token or token type keeps the old values.
    pub async fn replace(&self, id: u64, response: TokenResponse) -> Result<IssuedToken> {
        if response.access_token.is_blank() {
            return Err(Error::Validation("access_token must not be empty".into()));
        }

        let _guard = self.write_lock.lock().await;
        let mut token = self.get(id).await?;
        token.expires_at = expires_at(&response, now_millis());
        token.access_token = response.access_token;
        if let Some(refresh_token) = response.refresh_token {
            token.refresh_token = Some(refresh_token);
        }
        if let Some(token_type) = response.token_type {
            token.token_type = Some(token_type);
        }
        self.store.set(id, token.clone()).await?;

        info!(token_id = id, "token replaced");
        Ok(token)
    }

    pub async fn remove(&self, id: u64) -> Result<IssuedToken> {
        let _guard = self.write_lock.lock().await;
        let removed = self
            .store
            .delete(&id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("token {id}")))?;
        info!(token_id = id, "token removed");
        Ok(removed)
    }

    /// Remove the record only if it still holds `access_token`.
    ///
    /// A token refreshed since it was read is left in place as `Conflict`.
    pub async fn remove_if_current(
        &self,
        id: u64,
        access_token: &Secret<String>,
    ) -> Result<IssuedToken> {
        let _guard = self.write_lock.lock().await;
        let current = self.get(id).await?;
        if current.access_token != *access_token {
            return Err(Error::Conflict(format!(
                "token {id} was refreshed and still holds a live access token"
            )));
        }
        let removed = self
            .store
            .delete(&id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("token {id}")))?;
        info!(token_id = id, "token removed");
        Ok(removed)
    }

    pub async fn get(&self, id: u64) -> Result<IssuedToken> {
        self.store
            .get(&id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("token {id}")))
    }

    /// All tokens in id order.
    pub async fn list(&self) -> Result<Vec<IssuedToken>> {
        Ok(self.store.list().await?.into_iter().map(|(_, t)| t).collect())
    }
}
