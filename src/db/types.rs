//! Row to JSON conversion.
//!
//! Each column is classified once from its driver type name into a
//! [`ColumnKind`], then decoded with the Rust types the backend supports for
//! that kind. Values that do not decode become JSON `null`.

use crate::models::ColumnMetadata;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{Map, Number, Value};
use sqlx::error::BoxDynError;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, ColumnIndex, Decode, MySql, Postgres, Row, Type, TypeInfo, ValueRef};

/// How a column's values map to JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    /// Exact decimal, kept as a string
    Decimal,
    Boolean,
    Bytes,
    Json,
    Temporal,
    Text,
}

impl ColumnKind {
    /// Classify a driver type name such as `INT4`, `BIGINT UNSIGNED` or `TEXT`.
    pub fn of(type_name: &str) -> Self {
        let lower = type_name.to_ascii_lowercase();
        let base = lower.split_whitespace().next().unwrap_or_default();
        match base {
            "bool" | "boolean" => Self::Boolean,
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "int2"
            | "int4" | "int8" | "smallserial" | "serial" | "bigserial" => Self::Integer,
            "real" | "float" | "float4" | "float8" | "double" => Self::Float,
            "decimal" | "numeric" => Self::Decimal,
            "json" | "jsonb" => Self::Json,
            "bytea" | "blob" | "tinyblob" | "mediumblob" | "longblob" | "binary" | "varbinary" => {
                Self::Bytes
            }
            "date" | "time" | "datetime" | "timestamp" | "timestamptz" => Self::Temporal,
            _ => Self::Text,
        }
    }
}

/// Conversion of a fetched row into a JSON object keyed by column name.
pub trait RowToJson: Row {
    /// JSON value of the cell at `index`.
    fn cell_value(&self, index: usize, kind: ColumnKind) -> Value;

    fn to_json(&self) -> Map<String, Value> {
        self.columns()
            .iter()
            .map(|column| {
                let kind = ColumnKind::of(column.type_info().name());
                let value = self.cell_value(column.ordinal(), kind);
                (column.name().to_string(), value)
            })
            .collect()
    }

    fn column_metadata(&self) -> Vec<ColumnMetadata> {
        self.columns()
            .iter()
            .map(|column| ColumnMetadata {
                name: column.name().to_string(),
                type_name: column.type_info().name().to_string(),
            })
            .collect()
    }
}

/// Decode one cell as `T`, treating NULL and type mismatches alike.
fn cell<'r, R, T>(row: &'r R, index: usize) -> Option<T>
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<Option<T>, _>(index).ok().flatten()
}

fn float(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

fn bytes(value: &[u8]) -> Value {
    Value::String(STANDARD.encode(value))
}

impl RowToJson for PgRow {
    fn cell_value(&self, index: usize, kind: ColumnKind) -> Value {
        let value = match kind {
            ColumnKind::Integer => cell::<_, i64>(self, index)
                .or_else(|| cell::<_, i32>(self, index).map(i64::from))
                .or_else(|| cell::<_, i16>(self, index).map(i64::from))
                .map(Value::from),
            ColumnKind::Float => cell::<_, f64>(self, index)
                .or_else(|| cell::<_, f32>(self, index).map(f64::from))
                .map(float),
            ColumnKind::Decimal => cell::<_, DecimalText>(self, index).map(|d| Value::String(d.0)),
            ColumnKind::Boolean => cell::<_, bool>(self, index).map(Value::Bool),
            ColumnKind::Bytes => cell::<_, Vec<u8>>(self, index).map(|b| bytes(&b)),
            ColumnKind::Json => cell::<_, Value>(self, index),
            ColumnKind::Temporal => cell::<_, DateTime<Utc>>(self, index)
                .map(|t| t.to_rfc3339())
                .or_else(|| cell::<_, NaiveDateTime>(self, index).map(|t| t.to_string()))
                .or_else(|| cell::<_, NaiveDate>(self, index).map(|d| d.to_string()))
                .or_else(|| cell::<_, NaiveTime>(self, index).map(|t| t.to_string()))
                .map(Value::String),
            ColumnKind::Text => cell::<_, String>(self, index).map(Value::String),
        };
        value.unwrap_or(Value::Null)
    }
}

impl RowToJson for MySqlRow {
    fn cell_value(&self, index: usize, kind: ColumnKind) -> Value {
        let value = match kind {
            ColumnKind::Integer => cell::<_, i64>(self, index)
                .map(Value::from)
                .or_else(|| cell::<_, u64>(self, index).map(Value::from)),
            ColumnKind::Float => cell::<_, f64>(self, index)
                .or_else(|| cell::<_, f32>(self, index).map(f64::from))
                .map(float),
            ColumnKind::Decimal => cell::<_, DecimalText>(self, index).map(|d| Value::String(d.0)),
            ColumnKind::Boolean => cell::<_, bool>(self, index).map(Value::Bool),
            ColumnKind::Bytes => cell::<_, Vec<u8>>(self, index).map(|b| bytes(&b)),
            ColumnKind::Json => cell::<_, Value>(self, index),
            ColumnKind::Temporal => cell::<_, DateTime<Utc>>(self, index)
                .map(|t| t.to_rfc3339())
                .or_else(|| cell::<_, NaiveDateTime>(self, index).map(|t| t.to_string()))
                .or_else(|| cell::<_, NaiveDate>(self, index).map(|d| d.to_string()))
                .or_else(|| cell::<_, NaiveTime>(self, index).map(|t| t.to_string()))
                .map(Value::String),
            ColumnKind::Text => cell::<_, String>(self, index).map(Value::String),
        };
        value.unwrap_or(Value::Null)
    }
}

impl RowToJson for SqliteRow {
    /// SQLite types values, not columns: the storage class of the cell decides,
    /// and the declared column type only marks booleans and JSON text.
    fn cell_value(&self, index: usize, kind: ColumnKind) -> Value {
        let storage = match self.try_get_raw(index) {
            Ok(raw) if !raw.is_null() => raw.type_info().name().to_string(),
            _ => return Value::Null,
        };
        let value = match (storage.as_str(), kind) {
            ("INTEGER", ColumnKind::Boolean) => cell::<_, bool>(self, index).map(Value::Bool),
            ("INTEGER", _) => cell::<_, i64>(self, index).map(Value::from),
            ("REAL", _) => cell::<_, f64>(self, index).map(float),
            ("BLOB", _) => cell::<_, Vec<u8>>(self, index).map(|b| bytes(&b)),
            (_, ColumnKind::Json) => cell::<_, String>(self, index)
                .map(|text| serde_json::from_str(&text).unwrap_or(Value::String(text))),
            _ => cell::<_, String>(self, index).map(Value::String),
        };
        value.unwrap_or(Value::Null)
    }
}

/// DECIMAL / NUMERIC rendered exactly as text.
#[derive(Debug)]
struct DecimalText(String);

impl Type<MySql> for DecimalText {
    fn type_info() -> MySqlTypeInfo {
        <str as Type<MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        ty.name().eq_ignore_ascii_case("decimal")
    }
}

impl<'r> Decode<'r, MySql> for DecimalText {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, BoxDynError> {
        // Both MySQL protocols send decimals as ASCII digits
        let text = <&str as Decode<MySql>>::decode(value)?;
        Ok(Self(text.to_owned()))
    }
}

impl Type<Postgres> for DecimalText {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("NUMERIC")
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        ty.name().eq_ignore_ascii_case("numeric")
    }
}

impl<'r> Decode<'r, Postgres> for DecimalText {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(Self(value.as_str()?.to_owned())),
            PgValueFormat::Binary => numeric_to_string(value.as_bytes()?).map(Self),
        }
    }
}

const NUMERIC_NEGATIVE: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_POS_INF: u16 = 0xD000;
const NUMERIC_NEG_INF: u16 = 0xF000;

/// Render PostgreSQL's binary NUMERIC: a header of ndigits, weight, sign and
/// display scale, then base-10000 digits, most significant first.
fn numeric_to_string(buf: &[u8]) -> Result<String, BoxDynError> {
    let word = |i: usize| -> Result<u16, BoxDynError> {
        buf.get(i * 2..i * 2 + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated NUMERIC value".into())
    };
    let ndigits = usize::from(word(0)?);
    let weight = i32::from(word(1)? as i16);
    let sign = word(2)?;
    let scale = usize::from(word(3)?);
    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_POS_INF => return Ok("Infinity".to_string()),
        NUMERIC_NEG_INF => return Ok("-Infinity".to_string()),
        _ => {}
    }
    let digits = (0..ndigits)
        .map(|i| word(4 + i))
        .collect::<Result<Vec<_>, _>>()?;
    // Digit `i` is worth 10000^(weight - i)
    let digit_at = |position: i32| -> u16 {
        usize::try_from(position)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEGATIVE {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&digit_at(0).to_string());
        for position in 1..=weight {
            out.push_str(&format!("{:04}", digit_at(position)));
        }
    }
    if scale > 0 {
        let mut fraction = String::with_capacity(scale + 4);
        let mut position = weight + 1;
        while fraction.len() < scale {
            fraction.push_str(&format!("{:04}", digit_at(position)));
            position += 1;
        }
        fraction.truncate(scale);
        out.push('.');
        out.push_str(&fraction);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    fn numeric(header: [u16; 4], digits: &[u16]) -> Vec<u8> {
        header
            .iter()
            .chain(digits)
            .flat_map(|word| word.to_be_bytes())
            .collect()
    }

    #[test]
    fn test_column_kinds() {
        assert_eq!(ColumnKind::of("INT4"), ColumnKind::Integer);
        assert_eq!(ColumnKind::of("BIGINT UNSIGNED"), ColumnKind::Integer);
        assert_eq!(ColumnKind::of("DOUBLE PRECISION"), ColumnKind::Float);
        assert_eq!(ColumnKind::of("NUMERIC"), ColumnKind::Decimal);
        assert_eq!(ColumnKind::of("BYTEA"), ColumnKind::Bytes);
        assert_eq!(ColumnKind::of("TIMESTAMPTZ"), ColumnKind::Temporal);
        assert_eq!(ColumnKind::of("jsonb"), ColumnKind::Json);
        // Names that merely contain "int" are not integers
        assert_eq!(ColumnKind::of("INTERVAL"), ColumnKind::Text);
        assert_eq!(ColumnKind::of("POINT"), ColumnKind::Text);
    }

    #[test]
    fn test_binary_numeric() {
        // 123.45
        let buf = numeric([2, 0, 0, 2], &[123, 4500]);
        assert_eq!(numeric_to_string(&buf).unwrap(), "123.45");
        // -10000
        let buf = numeric([1, 1, NUMERIC_NEGATIVE, 0], &[1]);
        assert_eq!(numeric_to_string(&buf).unwrap(), "-10000");
        // 0.001
        let buf = numeric([1, u16::MAX, 0, 3], &[10]);
        assert_eq!(numeric_to_string(&buf).unwrap(), "0.001");
        // 0
        let buf = numeric([0, 0, 0, 0], &[]);
        assert_eq!(numeric_to_string(&buf).unwrap(), "0");

        let buf = numeric([0, 0, NUMERIC_NAN, 0], &[]);
        assert_eq!(numeric_to_string(&buf).unwrap(), "NaN");
        assert!(numeric_to_string(&[0, 1]).is_err());
    }

    #[tokio::test]
    async fn test_sqlite_row_follows_storage_class() {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let row = sqlx::query("SELECT 7 AS n, 2.5 AS f, 'x' AS s, X'DEAD' AS b, NULL AS z")
            .fetch_one(&pool)
            .await
            .unwrap();

        let json = row.to_json();
        assert_eq!(json["n"], serde_json::json!(7));
        assert_eq!(json["f"], serde_json::json!(2.5));
        assert_eq!(json["s"], serde_json::json!("x"));
        assert_eq!(json["b"], serde_json::json!("3q0="));
        assert_eq!(json["z"], Value::Null);
        assert_eq!(row.column_metadata().len(), 5);
    }
}
