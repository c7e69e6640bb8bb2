//! Shared test fixtures.
//!
//! `FakeConnector` stands in for a Redis server: values live in memory, and
//! connect, ping and close can be made to fail on demand.

#![allow(dead_code)]

use datastore_manager::configuration::Configurations;
use datastore_manager::models::RedisSettings;
use datastore_manager::redis::{KvClient, KvConnector, RedisHandle};
use datastore_manager::registry::Registry;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::NamedTempFile;

#[derive(Debug, thiserror::Error)]
#[error("fake redis: {0}")]
pub struct FakeError(pub String);

type Key = (i64, String);

/// In-memory server state shared by every client of a connector.
#[derive(Debug, Default)]
pub struct FakeServer {
    values: Mutex<HashMap<Key, Vec<u8>>>,
    expirations: Mutex<HashMap<Key, Duration>>,
    pub fail_connect: AtomicBool,
    pub fail_ping: AtomicBool,
    pub fail_close: AtomicBool,
    pub connects: AtomicUsize,
    pub last_url: Mutex<Option<String>>,
}

impl FakeServer {
    /// Expiration recorded for `key` in database `index`.
    pub fn expiration(&self, index: i64, key: &str) -> Option<Duration> {
        self.expirations
            .lock()
            .unwrap()
            .get(&(index, key.to_string()))
            .copied()
    }

    /// Raw stored bytes, bypassing any handle.
    pub fn raw(&self, index: i64, key: &str) -> Option<Vec<u8>> {
        self.values
            .lock()
            .unwrap()
            .get(&(index, key.to_string()))
            .cloned()
    }

    pub fn put_raw(&self, index: i64, key: &str, value: &[u8]) {
        self.values
            .lock()
            .unwrap()
            .insert((index, key.to_string()), value.to_vec());
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeConnector {
    pub server: Arc<FakeServer>,
}

impl KvConnector for FakeConnector {
    type Client = FakeClient;

    async fn connect(&self, settings: &RedisSettings) -> Result<FakeClient, FakeError> {
        let url = settings.connection_url().map_err(FakeError)?;
        *self.server.last_url.lock().unwrap() = Some(url.to_string());
        if self.server.fail_connect.load(Ordering::SeqCst) {
            return Err(FakeError("connection refused".to_string()));
        }
        self.server.connects.fetch_add(1, Ordering::SeqCst);
        Ok(FakeClient {
            server: Arc::clone(&self.server),
            database_index: settings.database_index,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FakeClient {
    server: Arc<FakeServer>,
    database_index: i64,
}

impl FakeClient {
    fn key(&self, key: &str) -> Key {
        (self.database_index, key.to_string())
    }
}

impl KvClient for FakeClient {
    type Error = FakeError;

    async fn ping(&self) -> Result<(), FakeError> {
        if self.server.fail_ping.load(Ordering::SeqCst) {
            return Err(FakeError("no PONG".to_string()));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, FakeError> {
        Ok(self.server.values.lock().unwrap().get(&self.key(key)).cloned())
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        expiration: Option<Duration>,
    ) -> Result<(), FakeError> {
        let key = self.key(key);
        let mut expirations = self.server.expirations.lock().unwrap();
        match expiration.filter(|ttl| !ttl.is_zero()) {
            Some(ttl) => expirations.insert(key.clone(), ttl),
            None => expirations.remove(&key),
        };
        self.server.values.lock().unwrap().insert(key, value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<u64, FakeError> {
        let removed = self.server.values.lock().unwrap().remove(&self.key(key));
        Ok(removed.map_or(0, |_| 1))
    }

    async fn close(&self) -> Result<(), FakeError> {
        if self.server.fail_close.load(Ordering::SeqCst) {
            return Err(FakeError("close interrupted".to_string()));
        }
        Ok(())
    }
}

pub type FakeRedisManager = Registry<RedisHandle<FakeConnector>>;

/// Redis manager over a fake server, configured from `document`.
pub fn redis_manager(document: Value) -> (FakeRedisManager, Arc<FakeServer>) {
    let configurations = Configurations::from_value(document).unwrap();
    let connector = FakeConnector::default();
    let server = Arc::clone(&connector.server);
    let manager = Registry::with_connector(Arc::new(configurations), "redis", connector);
    (manager, server)
}

/// A SQLite file that outlives the returned path's creator.
pub fn sqlite_file() -> String {
    let temp_file = NamedTempFile::new().unwrap();
    temp_file
        .into_temp_path()
        .keep()
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}
