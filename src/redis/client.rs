//! Redis client over `redis::aio::ConnectionManager`.
//!
//! The connection manager multiplexes commands over one connection, so clones
//! are cheap and safe to use concurrently. It is built without connect
//! retries: an unreachable server fails `connect` at once and the handle's
//! connect policy decides what happens next.

use crate::models::{RedisSettings, mask_credentials};
use crate::redis::{KvClient, KvConnector};
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{ErrorKind, RedisError};
use std::time::Duration;
use tracing::debug;

/// Opens [`RedisClient`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisConnector;

impl KvConnector for RedisConnector {
    type Client = RedisClient;

    async fn connect(&self, settings: &RedisSettings) -> Result<RedisClient, RedisError> {
        let url = settings.connection_url().map_err(|reason| {
            RedisError::from((ErrorKind::InvalidClientConfig, "Invalid address", reason))
        })?;
        let client = redis::Client::open(url.as_str())?;
        let config = ConnectionManagerConfig::new().set_number_of_retries(0);
        let connection_manager = ConnectionManager::new_with_config(client, config).await?;

        debug!(url = %mask_credentials(url.as_str()), "Redis connection established");
        Ok(RedisClient { connection_manager })
    }
}

/// Live Redis client.
#[derive(Clone)]
pub struct RedisClient {
    connection_manager: ConnectionManager,
}

impl std::fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClient")
            .field("connection_manager", &"ConnectionManager")
            .finish()
    }
}

impl KvClient for RedisClient {
    type Error = RedisError;

    async fn ping(&self) -> Result<(), RedisError> {
        let mut conn = self.connection_manager.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!(reply = %pong, "Redis PING");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RedisError> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("GET").arg(key).query_async(&mut conn).await
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        expiration: Option<Duration>,
    ) -> Result<(), RedisError> {
        let mut conn = self.connection_manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = expiration.filter(|ttl| !ttl.is_zero()) {
            // PX takes whole milliseconds and rejects 0
            cmd.arg("PX").arg((ttl.as_millis() as u64).max(1));
        }
        cmd.query_async::<()>(&mut conn).await
    }

    async fn delete(&self, key: &str) -> Result<u64, RedisError> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("DEL").arg(key).query_async(&mut conn).await
    }

    /// The connection manager closes its connection when the last clone drops.
    async fn close(&self) -> Result<(), RedisError> {
        Ok(())
    }
}
