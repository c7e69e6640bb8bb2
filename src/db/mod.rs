//! SQL database support.
//!
//! This module provides the SQL side of the datastore managers:
//! - Connection pool creation
//! - Row to JSON conversion
//! - The [`DatabaseHandle`] and its [`DatabaseManager`]

#[macro_use]
pub mod macros;
pub mod handle;
pub mod pool;
pub mod types;

use crate::config::DEFAULT_DATABASE_SECTION;
use crate::configuration::Configurations;
use crate::registry::Registry;
use std::sync::Arc;

pub use handle::DatabaseHandle;
pub use pool::{DbPool, SqlConnector};

/// Registry of named SQL database handles.
pub type DatabaseManager = Registry<DatabaseHandle>;

impl Registry<DatabaseHandle> {
    /// Create an empty manager whose handles read from the `databases` section.
    pub fn new(configurations: Arc<Configurations>) -> Self {
        Self::with_connector(configurations, DEFAULT_DATABASE_SECTION, SqlConnector)
    }
}
