//! Statement inputs and results for SQL handles.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

pub const DEFAULT_ROW_LIMIT: u32 = 100;
pub const MAX_ROW_LIMIT: u32 = 10_000;

/// A positional statement parameter.
///
/// Deserializes from plain JSON: `null`, booleans, integers, floats, strings,
/// and arrays of bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl From<bool> for QueryParam {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for QueryParam {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for QueryParam {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for QueryParam {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for QueryParam {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for QueryParam {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

/// A query plus the knobs that bound its result.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub sql: String,
    pub params: Vec<QueryParam>,
    /// Rows to return; clamped to `1..=MAX_ROW_LIMIT`
    pub row_limit: Option<u32>,
    /// Overrides the handle's `query_timeout_secs`
    pub timeout: Option<Duration>,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Self::default()
        }
    }

    pub fn bind(mut self, param: impl Into<QueryParam>) -> Self {
        self.params.push(param.into());
        self
    }

    pub fn with_params(mut self, params: Vec<QueryParam>) -> Self {
        self.params = params;
        self
    }

    pub fn with_limit(mut self, rows: u32) -> Self {
        self.row_limit = Some(rows);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Row limit after defaults and clamping.
    pub fn rows(&self) -> u32 {
        self.row_limit
            .unwrap_or(DEFAULT_ROW_LIMIT)
            .clamp(1, MAX_ROW_LIMIT)
    }
}

/// Name and driver type name of a result column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMetadata {
    pub name: String,
    pub type_name: String,
}

/// Rows returned by a query, each as a JSON object keyed by column name.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResult {
    pub columns: Vec<ColumnMetadata>,
    pub rows: Vec<Map<String, Value>>,
    /// More rows were available than the limit allowed
    pub truncated: bool,
    pub execution_time_ms: u64,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Outcome of a statement run through `execute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecuteResult {
    pub rows_affected: u64,
    pub execution_time_ms: u64,
}
