//! Named registries of datastore handles.
//!
//! A [`Registry`] maps handle names to shared handles of one datastore kind and
//! drives their lifecycle in bulk: load from a configuration section, connect
//! (all, or only those marked `is_connect_at_start`) and disconnect.
//!
//! Registries are plain values. Construct one per datastore kind during startup
//! and hand it (usually behind an `Arc`) to whatever needs datastore access.
//!
//! # Concurrency
//!
//! The handle map sits behind a `tokio::sync::RwLock`. Bulk operations take a
//! name-ordered snapshot of the handles and release the lock before awaiting any
//! handle, so a slow connect never blocks lookups. Bulk operations are expected
//! to be called by a single startup/shutdown task.

use crate::configuration::{ConnectPolicy, Configurations};
use crate::error::{DbError, DbResult};
use crate::models::{HandleStatus, HandleSummary};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// A configurable, connectable datastore handle.
pub trait Datastore: Send + Sync + 'static {
    /// Factory for live clients, shared by every handle of a registry.
    type Connector: Send + Sync + 'static;

    /// Short kind label used in logs and summaries.
    const KIND: &'static str;

    /// Create an unconfigured, disconnected handle.
    fn create(
        name: String,
        policy: ConnectPolicy,
        section: String,
        configurations: Arc<Configurations>,
        connector: Arc<Self::Connector>,
    ) -> Self;

    fn name(&self) -> &str;

    fn policy(&self) -> ConnectPolicy;

    /// Read this handle's record from `section`. No-op once configured.
    fn apply_from(
        &self,
        configurations: &Configurations,
        section: &str,
    ) -> impl Future<Output = DbResult<()>> + Send;

    /// Configure if needed, then connect and ping. No-op while connected.
    fn connect(&self) -> impl Future<Output = DbResult<()>> + Send;

    /// Close the live client. No-op while not connected.
    fn disconnect(&self) -> impl Future<Output = DbResult<()>> + Send;

    fn status(&self) -> impl Future<Output = HandleStatus> + Send;

    fn summary(&self) -> impl Future<Output = HandleSummary> + Send;
}

/// Per-handle lifecycle state shared by both handle kinds.
///
/// `settings` present means configured, `client` present means connected.
/// Settings are never cleared once set.
#[derive(Debug)]
pub(crate) struct HandleState<S, C> {
    pub settings: Option<S>,
    pub client: Option<C>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl<S, C> HandleState<S, C> {
    pub fn new() -> Self {
        Self {
            settings: None,
            client: None,
            connected_at: None,
        }
    }

    pub fn status(&self) -> HandleStatus {
        match (&self.settings, &self.client) {
            (_, Some(_)) => HandleStatus::Connected,
            (Some(_), None) => HandleStatus::Configured,
            (None, None) => HandleStatus::Unconfigured,
        }
    }
}

/// Registry of handles of one datastore kind, keyed by name.
pub struct Registry<H: Datastore> {
    configurations: Arc<Configurations>,
    connector: Arc<H::Connector>,
    default_section: String,
    handles: RwLock<HashMap<String, Arc<H>>>,
}

impl<H: Datastore> Registry<H> {
    /// Create an empty registry.
    ///
    /// Handles created with [`Registry::new_handle`] read their record from
    /// `default_section`; handles created by [`Registry::load_from_configuration`]
    /// read from the section they were loaded from.
    pub fn with_connector(
        configurations: Arc<Configurations>,
        default_section: impl Into<String>,
        connector: H::Connector,
    ) -> Self {
        Self {
            configurations,
            connector: Arc::new(connector),
            default_section: default_section.into(),
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// The configuration registry handles are configured from.
    pub fn configurations(&self) -> &Arc<Configurations> {
        &self.configurations
    }

    pub fn default_section(&self) -> &str {
        &self.default_section
    }

    /// Kind label of the handles this registry holds.
    pub fn kind(&self) -> &'static str {
        H::KIND
    }

    /// Create an unconfigured handle and register it, replacing any handle
    /// already registered under the same name.
    pub async fn new_handle(&self, name: impl Into<String>, policy: ConnectPolicy) -> Arc<H> {
        let section = self.default_section.clone();
        self.register(name.into(), policy, section).await
    }

    async fn register(&self, name: String, policy: ConnectPolicy, section: String) -> Arc<H> {
        let handle = Arc::new(H::create(
            name.clone(),
            policy,
            section,
            Arc::clone(&self.configurations),
            Arc::clone(&self.connector),
        ));
        let previous = {
            let mut handles = self.handles.write().await;
            handles.insert(name.clone(), Arc::clone(&handle))
        };
        if previous.is_some() {
            debug!(kind = H::KIND, handle = %name, "Replaced registered handle");
        }
        handle
    }

    /// Create and configure one handle per entry of `section`.
    ///
    /// Stops at the first entry that is not an object or cannot be configured.
    pub async fn load_from_configuration(&self, section: &str) -> DbResult<()> {
        let entries = self.configurations.section(section)?;
        for (name, entry) in entries {
            let Value::Object(record) = entry else {
                error!(kind = H::KIND, section = %section, entry = %name, "Cannot read entry as an object");
                return Err(DbError::malformed_entry(section, name));
            };
            let policy = ConnectPolicy::from_record(record);
            let handle = self
                .register(name.clone(), policy, section.to_string())
                .await;
            handle.apply_from(&self.configurations, section).await?;
        }
        Ok(())
    }

    /// Configure every handle from `section`, then connect those marked
    /// `is_connect_at_start`.
    ///
    /// All handles are configured, including the ones that stay disconnected.
    pub async fn connect_all_at_start(&self, section: &str) -> DbResult<()> {
        self.connect_each(section, true).await
    }

    /// Configure every handle from `section`, then connect all of them.
    pub async fn connect_all(&self, section: &str) -> DbResult<()> {
        self.connect_each(section, false).await
    }

    async fn connect_each(&self, section: &str, only_at_start: bool) -> DbResult<()> {
        let handles = self.snapshot().await;
        if handles.is_empty() {
            return Ok(());
        }

        info!(kind = H::KIND, count = handles.len(), "Connecting handles... start");
        for handle in handles {
            if let Err(e) = handle.apply_from(&self.configurations, section).await {
                error!(
                    kind = H::KIND,
                    handle = %handle.name(),
                    error = %e,
                    "Cannot configure handle to connect"
                );
                return Err(e);
            }
            if !only_at_start || handle.policy().connect_at_start {
                handle.connect().await?;
            }
        }
        info!(kind = H::KIND, "Connecting handles... done");
        Ok(())
    }

    /// Disconnect every handle, stopping at the first failure.
    ///
    /// Handles after the failing one are left as they were.
    pub async fn disconnect_all(&self) -> DbResult<()> {
        for handle in self.snapshot().await {
            handle.disconnect().await?;
        }
        Ok(())
    }

    /// Get a handle by name.
    pub async fn get(&self, name: &str) -> DbResult<Arc<H>> {
        let handles = self.handles.read().await;
        handles
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::handle_not_found(name))
    }

    /// Check if a handle is registered.
    pub async fn contains(&self, name: &str) -> bool {
        self.handles.read().await.contains_key(name)
    }

    /// Registered handle names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handles.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.handles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handles.read().await.is_empty()
    }

    /// Summaries of every handle, sorted by name (no secrets exposed).
    pub async fn list_handles(&self) -> Vec<HandleSummary> {
        let mut summaries = Vec::new();
        for handle in self.snapshot().await {
            summaries.push(handle.summary().await);
        }
        summaries
    }

    /// Name-ordered copy of the registered handles; the map lock is released on return.
    async fn snapshot(&self) -> Vec<Arc<H>> {
        let handles = self.handles.read().await;
        let mut snapshot: Vec<Arc<H>> = handles.values().cloned().collect();
        snapshot.sort_by(|a, b| a.name().cmp(b.name()));
        snapshot
    }
}

impl<H: Datastore> std::fmt::Debug for Registry<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &H::KIND)
            .field("default_section", &self.default_section)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_state_status() {
        let mut state: HandleState<u8, u8> = HandleState::new();
        assert_eq!(state.status(), HandleStatus::Unconfigured);
        state.settings = Some(1);
        assert_eq!(state.status(), HandleStatus::Configured);
        state.client = Some(2);
        assert_eq!(state.status(), HandleStatus::Connected);
        state.client = None;
        assert_eq!(state.status(), HandleStatus::Configured);
    }
}
