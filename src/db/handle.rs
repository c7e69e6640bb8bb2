//! SQL database handle.
//!
//! A [`DatabaseHandle`] owns the configuration of one named SQL database and,
//! while connected, its connection pool. Data operations clone the pool out of
//! the handle state, so no lock is held across a query.
//!
//! Statements without parameters go through `raw_sql`, which skips the
//! prepare step some servers refuse for DDL. Statements with parameters are
//! prepared and bound in order.

use crate::configuration::{ConnectPolicy, Configurations, RecordReader};
use crate::db::pool::{DbPool, SqlConnector};
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{
    DatabaseSettings, ExecuteResult, HandleStatus, HandleSummary, QueryParam, QueryRequest,
    QueryResult,
};
use crate::registry::{Datastore, HandleState};
use chrono::Utc;
use futures_util::{StreamExt, TryStreamExt};
use sqlx::query::Query;
use sqlx::{Database, Encode, Pool, Type};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Live pool plus what was learned about the server at connect time.
#[derive(Debug, Clone)]
struct LivePool {
    pool: DbPool,
    server_version: Option<String>,
    query_timeout: Duration,
}

/// Handle for one named SQL database.
pub struct DatabaseHandle {
    name: String,
    policy: ConnectPolicy,
    section: String,
    configurations: Arc<Configurations>,
    connector: Arc<SqlConnector>,
    state: RwLock<HandleState<DatabaseSettings, LivePool>>,
}

impl DatabaseHandle {
    /// Configure from the section this handle was registered with.
    pub async fn apply_from_configuration(&self) -> DbResult<()> {
        self.apply_from(&self.configurations, &self.section).await
    }

    /// Section the handle reads its record from.
    pub fn section(&self) -> &str {
        &self.section
    }

    /// Configured settings, if any.
    pub async fn settings(&self) -> Option<DatabaseSettings> {
        self.state.read().await.settings.clone()
    }

    /// Server version reported when the handle connected.
    pub async fn server_version(&self) -> Option<String> {
        let state = self.state.read().await;
        state
            .client
            .as_ref()
            .and_then(|live| live.server_version.clone())
    }

    /// The live pool. Fails with `NotConnected` while disconnected.
    pub async fn pool(&self) -> DbResult<DbPool> {
        self.live().await.map(|live| live.pool)
    }

    async fn live(&self) -> DbResult<LivePool> {
        let state = self.state.read().await;
        state
            .client
            .clone()
            .ok_or_else(|| DbError::not_connected(&self.name))
    }

    /// Execute a statement and return the number of affected rows.
    pub async fn execute(&self, sql: &str, params: &[QueryParam]) -> DbResult<ExecuteResult> {
        let live = self.live().await?;
        let started = Instant::now();
        let rows_affected = with_pool!(&live.pool, |p| {
            let work = async {
                let done = if params.is_empty() {
                    sqlx::raw_sql(sql).execute(p).await?
                } else {
                    prepared(p, sql, params).execute(p).await?
                };
                Ok::<_, sqlx::Error>(done.rows_affected())
            };
            self.bounded(live.query_timeout, sql, work).await
        })?;
        Ok(ExecuteResult {
            rows_affected,
            execution_time_ms: elapsed_ms(started),
        })
    }

    /// Run a query with the default row limit and the handle's timeout.
    pub async fn query(&self, sql: &str, params: Vec<QueryParam>) -> DbResult<QueryResult> {
        self.query_with(&QueryRequest::new(sql).with_params(params))
            .await
    }

    /// Run a query with an explicit row limit and/or timeout.
    ///
    /// One row past the limit is fetched to tell whether the result was cut.
    pub async fn query_with(&self, request: &QueryRequest) -> DbResult<QueryResult> {
        let live = self.live().await?;
        let timeout = request.timeout.unwrap_or(live.query_timeout);
        let limit = request.rows() as usize;
        let started = Instant::now();
        let sql = request.sql.as_str();

        with_pool!(&live.pool, |p| {
            let rows = if request.params.is_empty() {
                sqlx::raw_sql(sql).fetch(p)
            } else {
                prepared(p, sql, &request.params).fetch(p)
            };
            let fetched = self
                .bounded(timeout, sql, rows.take(limit + 1).try_collect::<Vec<_>>())
                .await?;
            Ok(collect_result(&fetched, limit, started))
        })
    }

    /// Check the database is still reachable.
    pub async fn ping(&self) -> DbResult<()> {
        let pool = self.pool().await?;
        pool.ping()
            .await
            .map_err(|e| DbError::operation(&self.name, "SELECT 1", e.to_string()))
    }

    /// Await `work` for at most `timeout`, tagging failures with this handle.
    async fn bounded<T>(
        &self,
        timeout: Duration,
        sql: &str,
        work: impl Future<Output = Result<T, sqlx::Error>>,
    ) -> DbResult<T> {
        match tokio::time::timeout(timeout, work).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(handle = %self.name, sql = %sql, error = %e, "Statement failed");
                Err(DbError::from_sqlx(&self.name, e))
            }
            Err(_) => {
                warn!(handle = %self.name, sql = %sql, timeout = ?timeout, "Statement timed out");
                let secs = u32::try_from(timeout.as_secs()).unwrap_or(u32::MAX);
                Err(DbError::timeout(&self.name, "statement", secs))
            }
        }
    }

    /// Read settings into `state` unless already configured, and return them.
    fn configure(
        &self,
        state: &mut HandleState<DatabaseSettings, LivePool>,
        configurations: &Configurations,
        section: &str,
    ) -> DbResult<DatabaseSettings> {
        if let Some(settings) = &state.settings {
            return Ok(settings.clone());
        }

        let reader = RecordReader::locate(
            configurations,
            section,
            &self.name,
            self.policy.must_connect,
        )?;
        let settings = DatabaseSettings::from_reader(&reader)?;
        info!(
            handle = %self.name,
            section = %section,
            db_type = %settings.db_type,
            database = %settings.masked_connection_string(),
            "Database configured"
        );
        state.settings = Some(settings.clone());
        Ok(settings)
    }

    fn connection_error(&self, settings: &DatabaseSettings, e: &sqlx::Error) -> DbError {
        let suggestion = self.connector.connection_suggestion(settings.db_type, e);
        error!(
            handle = %self.name,
            database = %settings.masked_connection_string(),
            must_connect = self.policy.must_connect,
            error = %e,
            "Cannot connect to database"
        );
        DbError::connection(
            &self.name,
            e.to_string(),
            suggestion,
            self.policy.must_connect,
        )
    }
}

impl Datastore for DatabaseHandle {
    type Connector = SqlConnector;

    const KIND: &'static str = "database";

    fn create(
        name: String,
        policy: ConnectPolicy,
        section: String,
        configurations: Arc<Configurations>,
        connector: Arc<SqlConnector>,
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
            database = %settings.masked_connection_string(),
            "Connecting to database"
        );
        let pool = self
            .connector
            .create_pool(&settings)
            .await
            .map_err(|e| self.connection_error(&settings, &e))?;
        if let Err(e) = pool.ping().await {
            pool.close().await;
            return Err(self.connection_error(&settings, &e));
        }
        let server_version = pool.server_version().await;

        state.client = Some(LivePool {
            pool,
            server_version,
            query_timeout: settings.pool_options.query_timeout_or_default(),
        });
        state.connected_at = Some(Utc::now());
        info!(handle = %self.name, db_type = %settings.db_type, "Database connected");
        Ok(())
    }

    async fn disconnect(&self) -> DbResult<()> {
        let mut state = self.state.write().await;
        let Some(live) = state.client.take() else {
            return Ok(());
        };
        live.pool.close().await;
        state.connected_at = None;
        info!(handle = %self.name, "Database disconnected");
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

/// Prepare `sql` on the pool's backend and bind `params` positionally.
fn prepared<'q, DB>(
    _pool: &Pool<DB>,
    sql: &'q str,
    params: &'q [QueryParam],
) -> Query<'q, DB, <DB as Database>::Arguments<'q>>
where
    DB: Database,
    Option<String>: Encode<'q, DB> + Type<DB>,
    bool: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    &'q str: Encode<'q, DB> + Type<DB>,
    &'q [u8]: Encode<'q, DB> + Type<DB>,
{
    params
        .iter()
        .fold(sqlx::query(sql), |query, param| match param {
            QueryParam::Null => query.bind(None::<String>),
            QueryParam::Bool(v) => query.bind(*v),
            QueryParam::Int(v) => query.bind(*v),
            QueryParam::Float(v) => query.bind(*v),
            QueryParam::Text(v) => query.bind(v.as_str()),
            QueryParam::Bytes(v) => query.bind(v.as_slice()),
        })
}

fn collect_result<R: RowToJson>(fetched: &[R], limit: usize, started: Instant) -> QueryResult {
    QueryResult {
        columns: fetched
            .first()
            .map(RowToJson::column_metadata)
            .unwrap_or_default(),
        rows: fetched.iter().take(limit).map(RowToJson::to_json).collect(),
        truncated: fetched.len() > limit,
        execution_time_ms: elapsed_ms(started),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

impl std::fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("section", &self.section)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handle(record: serde_json::Value, policy: ConnectPolicy) -> DatabaseHandle {
        let configurations = Configurations::from_value(json!({ "databases": { "main": record } }))
            .unwrap();
        DatabaseHandle::create(
            "main".to_string(),
            policy,
            "databases".to_string(),
            Arc::new(configurations),
            Arc::new(SqlConnector),
        )
    }

    #[tokio::test]
    async fn test_lifecycle_on_sqlite_memory() {
        let handle = handle(json!({ "address": "sqlite::memory:" }), ConnectPolicy::default());
        assert_eq!(handle.status().await, HandleStatus::Unconfigured);

        handle.apply_from_configuration().await.unwrap();
        assert_eq!(handle.status().await, HandleStatus::Configured);

        handle.connect().await.unwrap();
        assert_eq!(handle.status().await, HandleStatus::Connected);
        assert!(handle.server_version().await.is_some());
        handle.ping().await.unwrap();

        handle.disconnect().await.unwrap();
        assert_eq!(handle.status().await, HandleStatus::Configured);
        assert!(handle.summary().await.connected_at.is_none());
    }

    #[tokio::test]
    async fn test_unknown_scheme_is_unusable() {
        let handle = handle(
            json!({ "address": "oracle://db:1521/app" }),
            ConnectPolicy::default(),
        );
        let err = handle.apply_from_configuration().await.unwrap_err();
        assert!(matches!(err, DbError::ConfigurationUnusable { .. }));
        assert_eq!(handle.status().await, HandleStatus::Unconfigured);
    }

    #[tokio::test]
    async fn test_failed_connect_keeps_configured() {
        let handle = handle(
            json!({ "address": "sqlite:/nonexistent-dir/definitely/missing.db" }),
            ConnectPolicy::new(false, true),
        );
        let err = handle.connect().await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Connection {
                mandatory: true,
                ..
            }
        ));
        assert!(err.is_fatal());
        assert_eq!(handle.status().await, HandleStatus::Configured);
    }

    #[tokio::test]
    async fn test_statement_timeout_names_handle() {
        let handle = handle(json!({ "address": "sqlite::memory:" }), ConnectPolicy::default());
        handle.connect().await.unwrap();

        let slow = QueryRequest::new(
            "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 50000000) \
             SELECT COUNT(*) FROM n",
        )
        .with_timeout(Duration::from_millis(10));
        let err = handle.query_with(&slow).await.unwrap_err();
        assert!(matches!(err, DbError::Timeout { ref handle, .. } if handle == "main"));
    }

    #[tokio::test]
    async fn test_data_ops_require_connection() {
        let handle = handle(json!({ "address": "sqlite::memory:" }), ConnectPolicy::default());
        let err = handle.query("SELECT 1", vec![]).await.unwrap_err();
        assert!(matches!(err, DbError::NotConnected { .. }));
        let err = handle.execute("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, DbError::NotConnected { .. }));
    }
}
