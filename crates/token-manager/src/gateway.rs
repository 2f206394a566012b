//! Registered API gateways
//!
//! A gateway is one set of OAuth client credentials. Ids are assigned as the
//! current maximum plus one under the registry write lock, so they are
//! strictly increasing and concurrent adds never collide.

use std::sync::Arc;

use common::Secret;
use oauth_client::ClientCredentials;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{Error, Result};
use crate::store::Store;

/// One registered set of client credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gateway {
    pub id: u64,
    pub name: String,
    pub client_id: String,
    pub client_secret: Secret<String>,
}

impl Gateway {
    pub fn credentials(&self) -> ClientCredentials {
        ClientCredentials::new(self.client_id.clone(), self.client_secret.clone())
    }
}

/// Partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayUpdate {
    pub name: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<Secret<String>>,
}

/// Owner of all gateway records.
pub struct GatewayRegistry {
    store: Arc<dyn Store<u64, Gateway>>,
    /// Serializes writes, including id assignment.
    write_lock: Mutex<()>,
}

impl GatewayRegistry {
    pub fn new(store: Arc<dyn Store<u64, Gateway>>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Register a gateway. Every field must be non-blank.
    pub async fn add(
        &self,
        name: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<Secret<String>>,
    ) -> Result<Gateway> {
        let name = name.into();
        let client_id = client_id.into();
        let client_secret = client_secret.into();
        require("name", &name)?;
        require("client_id", &client_id)?;
        require("client_secret", client_secret.expose())?;

        let _guard = self.write_lock.lock().await;
        let id = self
            .store
            .list()
            .await?
            .last()
            .map(|(id, _)| id + 1)
            .unwrap_or(1);

        let gateway = Gateway {
            id,
            name,
            client_id,
            client_secret,
        };
        self.store.set(id, gateway.clone()).await?;
        info!(gateway_id = id, name = %gateway.name, "gateway added");
        Ok(gateway)
    }

    /// Apply a partial update. Provided fields must be non-blank.
    pub async fn update(&self, id: u64, update: GatewayUpdate) -> Result<Gateway> {
        if let Some(name) = &update.name {
            require("name", name)?;
        }
        if let Some(client_id) = &update.client_id {
            require("client_id", client_id)?;
        }
        if let Some(client_secret) = &update.client_secret {
            require("client_secret", client_secret.expose())?;
        }

        let _guard = self.write_lock.lock().await;
        let mut gateway = self.get(id).await?;
        if let Some(name) = update.name {
            gateway.name = name;
        }
        if let Some(client_id) = update.client_id {
            gateway.client_id = client_id;
        }
        if let Some(client_secret) = update.client_secret {
            gateway.client_secret = client_secret;
        }
        self.store.set(id, gateway.clone()).await?;
        info!(gateway_id = id, "gateway updated");
        Ok(gateway)
    }

    /// Delete a gateway. Tokens issued for it are left alone.
    pub async fn remove(&self, id: u64) -> Result<Gateway> {
        let _guard = self.write_lock.lock().await;
        let removed = self
            .store
            .delete(&id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("gateway {id}")))?;
        info!(gateway_id = id, "gateway removed");
        Ok(removed)
    }

    pub async fn get(&self, id: u64) -> Result<Gateway> {
        self.store
            .get(&id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("gateway {id}")))
    }

    /// All gateways in insertion order.
    pub async fn list(&self) -> Result<Vec<Gateway>> {
        Ok(self.store.list().await?.into_iter().map(|(_, g)| g).collect())
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}
