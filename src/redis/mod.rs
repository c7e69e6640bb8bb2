//! Redis key/value store support.
//!
//! Handles talk to the store through the [`KvConnector`] / [`KvClient`] pair,
//! so the lifecycle can be driven against any client that speaks the small
//! command set used here. [`RedisConnector`] is the production implementation
//! over `redis::aio::ConnectionManager`.

pub mod client;
pub mod handle;

use crate::config::DEFAULT_REDIS_SECTION;
use crate::configuration::Configurations;
use crate::models::RedisSettings;
use crate::registry::Registry;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use client::{RedisClient, RedisConnector};
pub use handle::RedisHandle;

/// A live key/value client. Clones share the underlying connection.
pub trait KvClient: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn ping(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Raw value of `key`, `None` when the key does not exist.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;

    /// Store `value` under `key`. `None` or a zero expiration keeps it forever.
    fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        expiration: Option<Duration>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Remove `key`, returning the number of keys removed.
    fn delete(&self, key: &str) -> impl Future<Output = Result<u64, Self::Error>> + Send;

    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Opens clients from handle settings.
pub trait KvConnector: Send + Sync + 'static {
    type Client: KvClient;

    fn connect(
        &self,
        settings: &RedisSettings,
    ) -> impl Future<Output = Result<Self::Client, <Self::Client as KvClient>::Error>> + Send;
}

/// Registry of named Redis handles backed by real servers.
///
/// Handles over another [`KvConnector`] live in a
/// `Registry<RedisHandle<C>>` built with [`Registry::with_connector`].
pub type RedisManager = Registry<RedisHandle<RedisConnector>>;

impl Registry<RedisHandle<RedisConnector>> {
    /// Create an empty manager whose handles read from the `redis` section.
    pub fn new(configurations: Arc<Configurations>) -> Self {
        Self::with_connector(configurations, DEFAULT_REDIS_SECTION, RedisConnector)
    }
}
