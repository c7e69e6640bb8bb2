//! Data models shared by the database and Redis handles.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{
    DatabaseSettings, DatabaseType, HandleStatus, HandleSummary, RedisSettings, mask_credentials,
};
pub use query::{
    ColumnMetadata, DEFAULT_ROW_LIMIT, ExecuteResult, MAX_ROW_LIMIT, QueryParam, QueryRequest,
    QueryResult,
};
