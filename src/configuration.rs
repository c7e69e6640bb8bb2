//! Named configuration sections.
//!
//! A configuration document is a JSON object whose top-level keys are section
//! names. Each section maps a handle name to that handle's record. Records stay
//! untyped here; each datastore kind turns its record into typed settings once,
//! when the handle is configured.

use crate::error::{DbError, DbResult};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// Registry of configuration sections keyed by section name.
#[derive(Debug, Clone, Default)]
pub struct Configurations {
    sections: HashMap<String, Value>,
}

impl Configurations {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration document.
    pub fn from_json_str(document: &str) -> DbResult<Self> {
        let value: Value = serde_json::from_str(document)
            .map_err(|e| DbError::config(format!("Invalid configuration document: {}", e)))?;
        Self::from_value(value)
    }

    /// Build the registry from an already parsed document.
    pub fn from_value(document: Value) -> DbResult<Self> {
        match document {
            Value::Object(map) => Ok(Self {
                sections: map.into_iter().collect(),
            }),
            _ => Err(DbError::config(
                "Configuration document must be a JSON object of sections",
            )),
        }
    }

    /// Read and parse a configuration document from disk.
    pub fn from_file(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|e| {
            DbError::config(format!("Cannot read configuration {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "Loaded configuration document");
        Self::from_json_str(&document)
    }

    /// Insert or replace a section.
    pub fn insert_section(&mut self, name: impl Into<String>, section: Value) {
        self.sections.insert(name.into(), section);
    }

    /// Check if a section exists.
    pub fn contains_section(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    /// Get the entries of a section.
    ///
    /// Returns `ConfigurationNotFound` when the section is absent. A section that
    /// is present but not an object has no usable entries and is reported the
    /// same way.
    pub fn section(&self, name: &str) -> DbResult<&Map<String, Value>> {
        match self.sections.get(name) {
            Some(Value::Object(entries)) => Ok(entries),
            Some(_) => {
                warn!(section = %name, "Configuration section is not an object");
                Err(DbError::configuration_not_found(name))
            }
            None => Err(DbError::configuration_not_found(name)),
        }
    }
}

/// Connection policy flags read once from a handle's record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectPolicy {
    /// `is_connect_at_start`: connect during bulk startup
    pub connect_at_start: bool,
    /// `must_connected`: configuration or connection failure is fatal
    pub must_connect: bool,
}

impl ConnectPolicy {
    pub fn new(connect_at_start: bool, must_connect: bool) -> Self {
        Self {
            connect_at_start,
            must_connect,
        }
    }

    /// Read the policy flags from a record. Absent or non-boolean flags are false.
    pub fn from_record(record: &Map<String, Value>) -> Self {
        let flag = |key: &str| record.get(key).and_then(Value::as_bool).unwrap_or(false);
        Self {
            connect_at_start: flag("is_connect_at_start"),
            must_connect: flag("must_connected"),
        }
    }
}

/// Reads fields out of one handle's record, applying the must/optional split.
///
/// Problems with required fields become `MandatoryFieldMissing` when the handle
/// must connect and `ConfigurationUnusable` otherwise. The fatal-class variant
/// is logged at error level, the recoverable one at warn level.
pub struct RecordReader<'a> {
    handle: &'a str,
    record: &'a Map<String, Value>,
    must_connect: bool,
}

impl<'a> RecordReader<'a> {
    /// Locate `handle`'s record inside `section`.
    pub fn locate(
        configurations: &'a Configurations,
        section: &str,
        handle: &'a str,
        must_connect: bool,
    ) -> DbResult<Self> {
        let entries = configurations.section(section)?;
        match entries.get(handle) {
            Some(Value::Object(record)) => Ok(Self {
                handle,
                record,
                must_connect,
            }),
            _ => Err(missing(
                handle,
                must_connect,
                "configuration record",
                &format!("configuration record not found in section '{}'", section),
            )),
        }
    }

    /// The raw record.
    pub fn record(&self) -> &'a Map<String, Value> {
        self.record
    }

    /// A required string field.
    pub fn required_str(&self, field: &str) -> DbResult<String> {
        match self.record.get(field).and_then(Value::as_str) {
            Some(value) => Ok(value.to_string()),
            None => Err(self.unusable(
                &format!("{} field", field),
                &format!("mandatory {} field not exist", field),
            )),
        }
    }

    /// An optional string field. Absent or non-string values read as `None`.
    pub fn optional_str(&self, field: &str) -> Option<String> {
        self.record
            .get(field)
            .and_then(Value::as_str)
            .map(String::from)
    }

    /// An optional integer field. Absent reads as `None`; any other non-integer
    /// value is a configuration problem.
    pub fn optional_int(&self, field: &str) -> DbResult<Option<i64>> {
        match self.record.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value.as_i64().map(Some).ok_or_else(|| {
                self.unusable(
                    &format!("{} field", field),
                    &format!("{} field must be an integer, not {}", field, value),
                )
            }),
        }
    }

    /// Report a field that is present but cannot be used.
    pub fn unusable(&self, field: &str, reason: &str) -> DbError {
        missing(self.handle, self.must_connect, field, reason)
    }
}

fn missing(handle: &str, must_connect: bool, field: &str, reason: &str) -> DbError {
    if must_connect {
        tracing::error!(handle = %handle, field = %field, "{}", reason);
        DbError::mandatory_field_missing(handle, field)
    } else {
        warn!(handle = %handle, field = %field, "Configuration is unusable: {}", reason);
        DbError::configuration_unusable(handle, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Configurations {
        Configurations::from_value(json!({
            "redis": {
                "cache": {
                    "is_connect_at_start": true,
                    "must_connected": "yes",
                    "address": "127.0.0.1:6379",
                    "user_name": 42,
                    "database_index": "2"
                },
                "broken": "not an object"
            },
            "flat": 7
        }))
        .unwrap()
    }

    #[test]
    fn test_document_must_be_object() {
        let result = Configurations::from_json_str("[1, 2]");
        assert!(matches!(result, Err(DbError::Config { .. })));

        let result = Configurations::from_json_str("{ not json");
        assert!(matches!(result, Err(DbError::Config { .. })));
    }

    #[test]
    fn test_section_lookup() {
        let configurations = sample();
        assert!(configurations.contains_section("redis"));
        assert_eq!(configurations.section("redis").unwrap().len(), 2);
        assert!(matches!(
            configurations.section("databases"),
            Err(DbError::ConfigurationNotFound { .. })
        ));
        assert!(matches!(
            configurations.section("flat"),
            Err(DbError::ConfigurationNotFound { .. })
        ));
    }

    #[test]
    fn test_policy_flags_default_false_on_wrong_type() {
        let configurations = sample();
        let record = configurations.section("redis").unwrap()["cache"]
            .as_object()
            .unwrap();
        let policy = ConnectPolicy::from_record(record);
        assert!(policy.connect_at_start);
        assert!(!policy.must_connect);
    }

    #[test]
    fn test_missing_record_split() {
        let configurations = sample();
        let optional = RecordReader::locate(&configurations, "redis", "absent", false);
        assert!(matches!(
            optional,
            Err(DbError::ConfigurationUnusable { .. })
        ));

        let mandatory = RecordReader::locate(&configurations, "redis", "absent", true);
        assert!(matches!(
            mandatory,
            Err(DbError::MandatoryFieldMissing { .. })
        ));

        let not_object = RecordReader::locate(&configurations, "redis", "broken", false);
        assert!(not_object.is_err());
    }

    #[test]
    fn test_field_reads() {
        let configurations = sample();
        let reader = RecordReader::locate(&configurations, "redis", "cache", false).unwrap();
        assert_eq!(reader.required_str("address").unwrap(), "127.0.0.1:6379");
        assert!(reader.required_str("password").is_err());
        assert_eq!(reader.optional_str("user_name"), None);
        assert!(matches!(
            reader.optional_int("database_index"),
            Err(DbError::ConfigurationUnusable { .. })
        ));
        assert_eq!(reader.optional_int("missing").unwrap(), None);
    }
}
