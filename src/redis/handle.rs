//! Redis handle.
//!
//! Values are stored JSON-encoded. Every client failure is reported with the
//! handle name and the key it concerned.

use crate::configuration::{ConnectPolicy, Configurations, RecordReader};
use crate::error::{DbError, DbResult};
use crate::models::{HandleStatus, HandleSummary, RedisSettings, mask_credentials};
use crate::redis::{KvClient, KvConnector};
use crate::registry::{Datastore, HandleState};
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

type ClientOf<C> = <C as KvConnector>::Client;

/// Handle for one named Redis database.
pub struct RedisHandle<C: KvConnector> {
    name: String,
    policy: ConnectPolicy,
    section: String,
    configurations: Arc<Configurations>,
    connector: Arc<C>,
    state: RwLock<HandleState<RedisSettings, ClientOf<C>>>,
}

impl<C: KvConnector> RedisHandle<C> {
    /// Configure from the section this handle was registered with.
    pub async fn apply_from_configuration(&self) -> DbResult<()> {
        self.apply_from(&self.configurations, &self.section).await
    }

    pub fn section(&self) -> &str {
        &self.section
    }

    /// Configured settings, if any.
    pub async fn settings(&self) -> Option<RedisSettings> {
        self.state.read().await.settings.clone()
    }

    /// Read and decode `key`. A missing key is `Ok(None)`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> DbResult<Option<T>> {
        let client = self.client().await?;
        let raw = client
            .get(key)
            .await
            .map_err(|e| self.operation_error("GET", key, &e))?;
        let Some(bytes) = raw else {
            debug!(handle = %self.name, key = %key, "Key not found");
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| self.serialization_error(key, &e))
    }

    /// Read and decode `key`, treating a missing key as an error.
    pub async fn must_get<T: DeserializeOwned>(&self, key: &str) -> DbResult<T> {
        match self.get(key).await? {
            Some(value) => Ok(value),
            None => {
                warn!(handle = %self.name, key = %key, "Mandatory key not found");
                Err(DbError::key_not_found(&self.name, key))
            }
        }
    }

    /// Encode `value` and store it under `key`.
    ///
    /// `None` or a zero `expiration` stores the value without expiry.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        expiration: Option<Duration>,
    ) -> DbResult<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| self.serialization_error(key, &e))?;
        let client = self.client().await?;
        client
            .set(key, bytes, expiration)
            .await
            .map_err(|e| self.operation_error("SET", key, &e))
    }

    /// Remove `key`, returning how many keys were removed.
    pub async fn delete(&self, key: &str) -> DbResult<u64> {
        let client = self.client().await?;
        client
            .delete(key)
            .await
            .map_err(|e| self.operation_error("DEL", key, &e))
    }

    /// Check the server is still reachable.
    pub async fn ping(&self) -> DbResult<()> {
        let client = self.client().await?;
        client
            .ping()
            .await
            .map_err(|e| self.operation_error("PING", "", &e))
    }

    /// Clone of the live client. Fails with `NotConnected` while disconnected.
    async fn client(&self) -> DbResult<ClientOf<C>> {
        let state = self.state.read().await;
        state
            .client
            .clone()
            .ok_or_else(|| DbError::not_connected(&self.name))
    }

    fn configure(
        &self,
        state: &mut HandleState<RedisSettings, ClientOf<C>>,
        configurations: &Configurations,
        section: &str,
    ) -> DbResult<RedisSettings> {
        if let Some(settings) = &state.settings {
            return Ok(settings.clone());
        }

        let reader = RecordReader::locate(
            configurations,
            section,
            &self.name,
            self.policy.must_connect,
        )?;
        let settings = RedisSettings::from_reader(&reader)?;
        let url = settings
            .connection_url()
            .map_err(|reason| reader.unusable("address field", &reason))?;
        info!(
            handle = %self.name,
            section = %section,
            url = %mask_credentials(url.as_str()),
            "Redis configured"
        );
        state.settings = Some(settings.clone());
        Ok(settings)
    }

    fn operation_error(&self, command: &str, key: &str, e: &dyn std::error::Error) -> DbError {
        warn!(handle = %self.name, command = %command, key = %key, error = %e, "Redis command failed");
        DbError::operation(&self.name, key, format!("{}: {}", command, e))
    }

    fn serialization_error(&self, key: &str, e: &serde_json::Error) -> DbError {
        warn!(handle = %self.name, key = %key, error = %e, "Cannot encode or decode value");
        DbError::serialization(&self.name, key, e.to_string())
    }

    fn connection_error(&self, address: &str, e: &dyn std::error::Error) -> DbError {
        error!(
            handle = %self.name,
            address = %mask_credentials(address),
            must_connect = self.policy.must_connect,
            error = %e,
            "Cannot connect to Redis"
        );
        DbError::connection(
            &self.name,
            e.to_string(),
            format!(
                "Check that the Redis server at {} is running and the credentials are valid",
                mask_credentials(address)
            ),
            self.policy.must_connect,
        )
    }
}

impl<C: KvConnector> Datastore for RedisHandle<C> {
    type Connector = C;

    const KIND: &'static str = "redis";

    fn create(
        name: String,
        policy: ConnectPolicy,
        section: String,
        configurations: Arc<Configurations>,
        connector: Arc<C>,
    ) -> Self {
        Self {
            name,
            policy,
            section,
            configurations,
            connector,
            state: RwLock::new(HandleState::new()),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> ConnectPolicy {
        self.policy
    }

    async fn apply_from(&self, configurations: &Configurations, section: &str) -> DbResult<()> {
        let mut state = self.state.write().await;
        self.configure(&mut state, configurations, section)
            .map(|_| ())
    }

    async fn connect(&self) -> DbResult<()> {
        let mut state = self.state.write().await;
        if state.client.is_some() {
            debug!(handle = %self.name, "Already connected");
            return Ok(());
        }
        let settings = self.configure(&mut state, &self.configurations, &self.section)?;

        info!(
            handle = %self.name,
            address = %mask_credentials(&settings.address),
            database_index = settings.database_index,
            "Connecting to Redis"
        );
        let client = self
            .connector
            .connect(&settings)
            .await
            .map_err(|e| self.connection_error(&settings.address, &e))?;
        if let Err(e) = client.ping().await {
            if let Err(close_err) = client.close().await {
                debug!(handle = %self.name, error = %close_err, "Close after failed ping failed");
            }
            return Err(self.connection_error(&settings.address, &e));
        }

        state.client = Some(client);
        state.connected_at = Some(Utc::now());
        info!(handle = %self.name, "Redis connected");
        Ok(())
    }

    async fn disconnect(&self) -> DbResult<()> {
        let mut state = self.state.write().await;
        let Some(client) = state.client.as_ref() else {
            return Ok(());
        };
        if let Err(e) = client.close().await {
            error!(handle = %self.name, error = %e, "Cannot close Redis connection");
            return Err(DbError::operation(
                &self.name,
                "",
                format!("CLOSE: {}", e),
            ));
        }
        state.client = None;
        state.connected_at = None;
        info!(handle = %self.name, "Redis disconnected");
        Ok(())
    }

    async fn status(&self) -> HandleStatus {
        self.state.read().await.status()
    }

    async fn summary(&self) -> HandleSummary {
        let state = self.state.read().await;
        HandleSummary {
            name: self.name.clone(),
            kind: Self::KIND,
            status: state.status(),
            policy: self.policy,
            connected_at: state.connected_at,
        }
    }
}

impl<C: KvConnector> std::fmt::Debug for RedisHandle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisHandle")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("section", &self.section)
            .finish_non_exhaustive()
    }
}
