//! Connection pool creation.
//!
//! This module provides connection pooling functionality using database-specific
//! pools (MySqlPool, PgPool, SqlitePool) to ensure full type support.

use crate::models::{DatabaseSettings, DatabaseType};
use sqlx::{
    MySqlPool, PgPool, SqlitePool, mysql::MySqlConnectOptions, mysql::MySqlPoolOptions,
    postgres::PgConnectOptions, postgres::PgPoolOptions, sqlite::SqliteConnectOptions,
    sqlite::SqlitePoolOptions,
};
use std::str::FromStr;
use tracing::{debug, warn};

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Close the connection pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        with_pool!(self, |pool| pool.close().await)
    }

    /// Check if the pool has been closed.
    pub fn is_closed(&self) -> bool {
        with_pool!(self, |pool| pool.is_closed())
    }

    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::MySql(_) => DatabaseType::MySQL,
            DbPool::Postgres(_) => DatabaseType::PostgreSQL,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Round-trip a trivial statement to prove the database is reachable.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        with_pool!(self, |pool| sqlx::raw_sql("SELECT 1").execute(pool).await.map(|_| ()))
    }

    /// Get the server version from the connected database.
    pub async fn server_version(&self) -> Option<String> {
        let sql = match self {
            DbPool::SQLite(_) => "SELECT sqlite_version()",
            DbPool::MySql(_) | DbPool::Postgres(_) => "SELECT version()",
        };
        let result = with_pool!(self, |pool| {
            sqlx::query_scalar::<_, String>(sql).fetch_one(pool).await
        });
        match result {
            Ok(version) => {
                debug!(version = %version, "Got server version");
                Some(version)
            }
            Err(e) => {
                warn!(error = %e, "Failed to get server version");
                None
            }
        }
    }
}

/// Creates pools from database settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlConnector;

impl SqlConnector {
    /// Create a connection pool for the given settings.
    ///
    /// The pool opens `min_connections` connections eagerly, so an unreachable
    /// server fails here rather than on first use.
    pub async fn create_pool(&self, settings: &DatabaseSettings) -> Result<DbPool, sqlx::Error> {
        let pool_opts = &settings.pool_options;
        let is_sqlite = settings.db_type == DatabaseType::SQLite;
        let max_connections = pool_opts.max_connections_or_default(is_sqlite);
        let min_connections = pool_opts.min_connections_or_default().min(max_connections);
        let acquire_timeout = pool_opts.acquire_timeout_or_default();
        let idle_timeout = Some(pool_opts.idle_timeout_or_default());

        match settings.db_type {
            DatabaseType::MySQL => {
                let options =
                    MySqlConnectOptions::from_str(&settings.connection_string)?.charset("utf8mb4");
                let pool = MySqlPoolOptions::new()
                    .min_connections(min_connections)
                    .max_connections(max_connections)
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .connect_with(options)
                    .await?;
                Ok(DbPool::MySql(pool))
            }
            DatabaseType::PostgreSQL => {
                let options = PgConnectOptions::from_str(&settings.connection_string)?;
                let pool = PgPoolOptions::new()
                    .min_connections(min_connections)
                    .max_connections(max_connections)
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .connect_with(options)
                    .await?;
                Ok(DbPool::Postgres(pool))
            }
            DatabaseType::SQLite => {
                let options = SqliteConnectOptions::from_str(&settings.connection_string)?;
                let pool = SqlitePoolOptions::new()
                    .min_connections(min_connections)
                    .max_connections(max_connections)
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .connect_with(options)
                    .await?;
                Ok(DbPool::SQLite(pool))
            }
        }
    }

    /// Generate a helpful suggestion for connection errors.
    pub fn connection_suggestion(&self, db_type: DatabaseType, error: &sqlx::Error) -> String {
        let error_str = error.to_string().to_lowercase();

        if error_str.contains("connection refused") {
            return format!(
                "Check that the {} server is running and accessible",
                db_type
            );
        }

        if error_str.contains("authentication") || error_str.contains("password") {
            return "Verify the user_name and password fields".to_string();
        }

        if error_str.contains("does not exist") || error_str.contains("unknown database") {
            return "Check that the database name exists".to_string();
        }

        if error_str.contains("unable to open database file") {
            return "Check that the SQLite file exists or add ?mode=rwc to create it".to_string();
        }

        match db_type {
            DatabaseType::PostgreSQL => {
                "Verify the address format: postgres://host:5432/db".to_string()
            }
            DatabaseType::MySQL => "Verify the address format: mysql://host:3306/db".to_string(),
            DatabaseType::SQLite => {
                "Verify the file path exists and is accessible: sqlite:path/to/db.sqlite"
                    .to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolOptions;

    fn sqlite_settings(connection_string: &str) -> DatabaseSettings {
        DatabaseSettings {
            db_type: DatabaseType::SQLite,
            connection_string: connection_string.to_string(),
            user_name: None,
            password: None,
            pool_options: PoolOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_sqlite_memory_pool_pings() {
        let pool = SqlConnector
            .create_pool(&sqlite_settings("sqlite::memory:"))
            .await
            .unwrap();
        assert_eq!(pool.db_type(), DatabaseType::SQLite);
        pool.ping().await.unwrap();
        assert!(pool.server_version().await.is_some());

        pool.close().await;
        assert!(pool.is_closed());
        assert!(pool.ping().await.is_err());
    }

    #[tokio::test]
    async fn test_missing_sqlite_file_fails() {
        let result = SqlConnector
            .create_pool(&sqlite_settings(
                "sqlite:/nonexistent-dir/definitely/missing.db",
            ))
            .await;
        let err = result.unwrap_err();
        let suggestion = SqlConnector.connection_suggestion(DatabaseType::SQLite, &err);
        assert!(!suggestion.is_empty());
    }

    #[test]
    fn test_connection_suggestion_fallback() {
        let err = sqlx::Error::PoolTimedOut;
        let suggestion = SqlConnector.connection_suggestion(DatabaseType::PostgreSQL, &err);
        assert!(suggestion.contains("postgres://"));
    }
}
