//! Configuration handling for the datastore manager binary.
//!
//! This module provides process configuration via CLI arguments and environment
//! variables, and the SQL pool options that may appear in a datastore record.

use clap::Parser;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DATABASE_SECTION: &str = "databases";
pub const DEFAULT_REDIS_SECTION: &str = "redis";
pub const DEFAULT_LOG_LEVEL: &str = "info";

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_CONNECTIONS_SQLITE: u32 = 1;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;
pub const MAX_QUERY_TIMEOUT_SECS: u64 = 300;

/// Connection pool configuration options read from a database record.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PoolOptions {
    /// Maximum connections in pool (default: 10 for MySQL/PostgreSQL, 1 for SQLite)
    pub max_connections: Option<u32>,
    /// Minimum connections in pool (default: 1)
    pub min_connections: Option<u32>,
    /// Idle timeout in seconds (default: 600)
    pub idle_timeout_secs: Option<u64>,
    /// Connection acquire timeout in seconds (default: 30)
    pub acquire_timeout_secs: Option<u64>,
    /// Per-statement timeout in seconds (default: 30, at most 300)
    pub query_timeout_secs: Option<u64>,
}

impl PoolOptions {
    /// Read pool options from a database record.
    ///
    /// Values that are absent or not non-negative integers are ignored.
    pub fn from_record(record: &Map<String, Value>) -> Self {
        let uint = |key: &str| record.get(key).and_then(Value::as_u64);
        Self {
            max_connections: uint("max_connections").and_then(|v| u32::try_from(v).ok()),
            min_connections: uint("min_connections").and_then(|v| u32::try_from(v).ok()),
            idle_timeout_secs: uint("idle_timeout_secs"),
            acquire_timeout_secs: uint("acquire_timeout_secs"),
            query_timeout_secs: uint("query_timeout_secs"),
        }
    }

    /// Get max_connections with default value based on database type.
    pub fn max_connections_or_default(&self, is_sqlite: bool) -> u32 {
        self.max_connections.unwrap_or(if is_sqlite {
            DEFAULT_MAX_CONNECTIONS_SQLITE
        } else {
            DEFAULT_MAX_CONNECTIONS
        })
    }

    /// Get min_connections with default value.
    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    /// Get idle_timeout with default value.
    pub fn idle_timeout_or_default(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS))
    }

    /// Get acquire_timeout with default value.
    pub fn acquire_timeout_or_default(&self) -> Duration {
        Duration::from_secs(
            self.acquire_timeout_secs
                .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        )
    }

    pub fn query_timeout_or_default(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs.unwrap_or(DEFAULT_QUERY_TIMEOUT_SECS))
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_connections {
            if max == 0 {
                return Err("max_connections must be greater than 0".to_string());
            }
        }
        if let Some(secs) = self.query_timeout_secs {
            if secs == 0 || secs > MAX_QUERY_TIMEOUT_SECS {
                return Err(format!(
                    "query_timeout_secs must be between 1 and {}",
                    MAX_QUERY_TIMEOUT_SECS
                ));
            }
        }
        if let Some(min) = self.min_connections {
            if let Some(max) = self.max_connections {
                if min > max {
                    return Err(format!(
                        "min_connections ({}) cannot exceed max_connections ({})",
                        min, max
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Configuration for the datastore manager binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "datastore-manager",
    about = "Connects the SQL and Redis datastores described by a configuration document",
    version,
    author
)]
pub struct Config {
    /// Path to the JSON configuration document.
    /// Top-level keys are section names; each section maps handle names to records.
    #[arg(short, long, value_name = "FILE", env = "DATASTORE_CONFIG")]
    pub config: PathBuf,

    /// Section holding SQL database records
    #[arg(
        long,
        default_value = DEFAULT_DATABASE_SECTION,
        env = "DATASTORE_DATABASE_SECTION"
    )]
    pub database_section: String,

    /// Section holding Redis records
    #[arg(
        long,
        default_value = DEFAULT_REDIS_SECTION,
        env = "DATASTORE_REDIS_SECTION"
    )]
    pub redis_section: String,

    /// Connect every handle, not only those marked is_connect_at_start
    #[arg(long, env = "DATASTORE_CONNECT_ALL")]
    pub connect_all: bool,

    /// Connect, print the handle summary, disconnect and exit
    #[arg(long)]
    pub check: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = DEFAULT_LOG_LEVEL, env = "DATASTORE_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DATASTORE_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
