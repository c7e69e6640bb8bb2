//! Datastore Manager Library
//!
//! Configuration-driven lifecycle management for named datastore handles:
//! SQL databases (SQLite, PostgreSQL, MySQL) and Redis. A manager per kind
//! loads handles from a configuration section, connects them (all, or only
//! those marked to connect at start) and disconnects them on shutdown.

pub mod config;
pub mod configuration;
pub mod db;
pub mod error;
pub mod models;
pub mod redis;
pub mod registry;

pub use config::Config;
pub use configuration::{ConnectPolicy, Configurations};
pub use db::{DatabaseHandle, DatabaseManager};
pub use error::{DbError, DbResult};
pub use self::redis::{RedisHandle, RedisManager};
pub use registry::{Datastore, Registry};
