//! Typed database error taxonomy.
//!
//! Every driver failure the filters recognise is converted into a [`DbError`]
//! carrying one [`ErrorKind`]. Each kind has a stable machine-readable name,
//! a fixed default message, and a deterministic field map used for logging
//! and API responses.

use std::fmt;
use std::sync::Arc;

use serde::ser::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::driver::DriverError;

/// A shareable reference to whatever error was in flight when a savepoint
/// rollback happened.
pub type CauseRef = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// The category of a classified database error, with its structured fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A unique or primary-key constraint was violated.
    DuplicateEntry {
        /// Columns covered by the violated constraint, possibly empty.
        columns: Vec<String>,
        /// The duplicated value, when the backend reports it.
        value: Option<String>,
    },
    /// A CHECK constraint rejected a row.
    ConstraintViolation { table: String, check_name: String },
    /// A foreign-key constraint was violated.
    ReferenceViolation {
        table: Option<String>,
        constraint: Option<String>,
        key: Option<String>,
        key_table: Option<String>,
    },
    /// A DDL statement referenced a constraint that does not exist.
    NonExistentConstraint {
        table: Option<String>,
        constraint: Option<String>,
    },
    /// A statement referenced a table that does not exist.
    NonExistentTable { table: String },
    /// The target database does not exist or cannot be opened.
    NonExistentDatabase { database: Option<String> },
    /// A parameter could not be encoded for the driver.
    InvalidUnicodeParameter,
    /// A value was invalid for its column (truncated, out of range, ...).
    DataError,
    /// The backend does not support the requested operation.
    NotSupported,
    /// The transaction lost a deadlock or lock wait.
    Deadlock,
    /// The connection is unusable and should be evicted from the pool.
    ConnectionError,
    /// Catch-all for errors no specific rule recognised.
    Generic,
}

impl ErrorKind {
    /// Stable machine-readable name of the kind.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::DuplicateEntry { .. } => "DuplicateEntry",
            ErrorKind::ConstraintViolation { .. } => "ConstraintViolation",
            ErrorKind::ReferenceViolation { .. } => "ReferenceViolation",
            ErrorKind::NonExistentConstraint { .. } => "NonExistentConstraint",
            ErrorKind::NonExistentTable { .. } => "NonExistentTable",
            ErrorKind::NonExistentDatabase { .. } => "NonExistentDatabase",
            ErrorKind::InvalidUnicodeParameter => "InvalidUnicodeParameter",
            ErrorKind::DataError => "DataError",
            ErrorKind::NotSupported => "NotSupportedError",
            ErrorKind::Deadlock => "Deadlock",
            ErrorKind::ConnectionError => "ConnectionError",
            ErrorKind::Generic => "Generic",
        }
    }

    /// Message used when no explicit message was supplied.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorKind::DuplicateEntry { .. } => "Duplicate entry",
            ErrorKind::ConstraintViolation { .. } => "Check constraint violated",
            ErrorKind::ReferenceViolation { .. } => "Foreign key constraint violated",
            ErrorKind::NonExistentConstraint { .. } => "Constraint does not exist",
            ErrorKind::NonExistentTable { .. } => "Table does not exist",
            ErrorKind::NonExistentDatabase { .. } => "Database does not exist",
            ErrorKind::InvalidUnicodeParameter => {
                "Invalid Parameter: Encoding directive wasn't provided."
            }
            ErrorKind::DataError => "Invalid data for the target column",
            ErrorKind::NotSupported => "Operation not supported by the database backend",
            ErrorKind::Deadlock => "Deadlock detected, the transaction was rolled back",
            ErrorKind::ConnectionError => "Database connection is unusable",
            ErrorKind::Generic => "Unclassified database error",
        }
    }

    /// Kinds whose message is always the fixed default.
    pub fn has_fixed_message(&self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidUnicodeParameter
                | ErrorKind::DataError
                | ErrorKind::NotSupported
                | ErrorKind::Deadlock
                | ErrorKind::ConnectionError
        )
    }

    /// Kind-specific fields in their stable serialisation order.
    fn fields(&self) -> Vec<(&'static str, Value)> {
        fn opt(value: &Option<String>) -> Value {
            value.clone().map(Value::String).unwrap_or(Value::Null)
        }

        match self {
            ErrorKind::DuplicateEntry { columns, value } => vec![
                ("columns", Value::from(columns.clone())),
                ("value", opt(value)),
            ],
            ErrorKind::ConstraintViolation { table, check_name } => vec![
                ("table", Value::from(table.as_str())),
                ("check_name", Value::from(check_name.as_str())),
            ],
            ErrorKind::ReferenceViolation {
                table,
                constraint,
                key,
                key_table,
            } => vec![
                ("table", opt(table)),
                ("constraint", opt(constraint)),
                ("key", opt(key)),
                ("key_table", opt(key_table)),
            ],
            ErrorKind::NonExistentConstraint { table, constraint } => {
                vec![("table", opt(table)), ("constraint", opt(constraint))]
            }
            ErrorKind::NonExistentTable { table } => vec![("table", Value::from(table.as_str()))],
            ErrorKind::NonExistentDatabase { database } => vec![("database", opt(database))],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A classified database error.
///
/// Built once by a classifier and never mutated afterwards; the builder
/// methods consume and return the value.
#[derive(Clone)]
pub struct DbError {
    kind: ErrorKind,
    message: Option<String>,
    inner: Option<Arc<DriverError>>,
    rollback_cause: Option<CauseRef>,
}

impl DbError {
    /// Creates an error of the given kind with its default message.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            inner: None,
            rollback_cause: None,
        }
    }

    /// Sets an explicit message. Ignored for fixed-message kinds.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        if !self.kind.has_fixed_message() {
            self.message = Some(message.into());
        }
        self
    }

    /// Attaches the low-level error this one was classified from.
    pub fn with_inner(mut self, inner: DriverError) -> Self {
        self.inner = Some(Arc::new(inner));
        self
    }

    /// Attaches the error that triggered an earlier savepoint rollback.
    pub fn with_rollback_cause(mut self, cause: CauseRef) -> Self {
        self.rollback_cause = Some(cause);
        self
    }

    /// Wraps a low-level error as [`ErrorKind::Generic`], keeping its text.
    pub fn generic(inner: DriverError) -> Self {
        let message = inner.message.clone();
        Self::new(ErrorKind::Generic)
            .with_message(message)
            .with_inner(inner)
    }

    /// The error kind.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Stable machine-readable kind name.
    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }

    /// The explicit message, or the kind's default.
    pub fn message(&self) -> &str {
        self.message
            .as_deref()
            .unwrap_or_else(|| self.kind.default_message())
    }

    /// The low-level error this was classified from.
    pub fn inner(&self) -> Option<&DriverError> {
        self.inner.as_deref()
    }

    /// The error recorded by a savepoint rollback before this one was raised.
    pub fn rollback_cause(&self) -> Option<&CauseRef> {
        self.rollback_cause.as_ref()
    }

    /// Returns true if the connection should be treated as disconnected.
    pub fn is_connection_error(&self) -> bool {
        matches!(self.kind, ErrorKind::ConnectionError)
    }

    /// Returns true for deadlocks and lock wait timeouts.
    pub fn is_deadlock(&self) -> bool {
        matches!(self.kind, ErrorKind::Deadlock)
    }

    /// Ordered field map: `error`, kind fields, then `message`.
    pub fn as_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("error".to_string(), Value::from(self.kind_name()));
        for (key, value) in self.kind.fields() {
            map.insert(key.to_string(), value);
        }
        map.insert("message".to_string(), Value::from(self.message()));
        map
    }
}

impl PartialEq for DbError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.message() == other.message() && self.inner == other.inner
    }
}

impl Eq for DbError {}

impl fmt::Debug for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbError")
            .field("kind", &self.kind)
            .field("message", &self.message())
            .field("inner", &self.inner)
            .field(
                "rollback_cause",
                &self.rollback_cause.as_ref().map(|c| c.to_string()),
            )
            .finish()
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for DbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner
            .as_deref()
            .map(|inner| inner as &(dyn std::error::Error + 'static))
    }
}

impl Serialize for DbError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_map().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ExceptionClass;

    fn keys(err: &DbError) -> Vec<String> {
        err.as_map().keys().cloned().collect()
    }

    #[test]
    fn test_default_message_used_without_explicit() {
        let err = DbError::new(ErrorKind::NonExistentTable {
            table: "widgets".to_string(),
        });
        assert_eq!(err.message(), "Table does not exist");
    }

    #[test]
    fn test_explicit_message_overrides_default() {
        let err = DbError::new(ErrorKind::Generic).with_message("boom");
        assert_eq!(err.message(), "boom");
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_fixed_message_kinds_ignore_explicit_message() {
        let err = DbError::new(ErrorKind::Deadlock).with_message("deadlock detected on t1");
        assert_eq!(err.message(), ErrorKind::Deadlock.default_message());
    }

    #[test]
    fn test_as_map_duplicate_entry_order() {
        let err = DbError::new(ErrorKind::DuplicateEntry {
            columns: vec!["email".to_string()],
            value: Some("x".to_string()),
        });
        assert_eq!(keys(&err), vec!["error", "columns", "value", "message"]);

        let map = err.as_map();
        assert_eq!(map["error"], "DuplicateEntry");
        assert_eq!(map["columns"], serde_json::json!(["email"]));
        assert_eq!(map["value"], "x");
    }

    #[test]
    fn test_as_map_reference_violation_nulls() {
        let err = DbError::new(ErrorKind::ReferenceViolation {
            table: None,
            constraint: None,
            key: None,
            key_table: None,
        });
        assert_eq!(
            keys(&err),
            vec!["error", "table", "constraint", "key", "key_table", "message"]
        );
        assert!(err.as_map()["key_table"].is_null());
    }

    #[test]
    fn test_as_map_fixed_message_kind() {
        let err = DbError::new(ErrorKind::ConnectionError);
        assert_eq!(keys(&err), vec!["error", "message"]);
        assert_eq!(err.as_map()["message"], "Database connection is unusable");
    }

    #[test]
    fn test_as_map_is_deterministic() {
        let err = DbError::new(ErrorKind::NonExistentConstraint {
            table: Some("t".to_string()),
            constraint: Some("c".to_string()),
        });
        assert_eq!(err.as_map(), err.as_map());
        assert_eq!(
            serde_json::to_string(&err).unwrap(),
            r#"{"error":"NonExistentConstraint","table":"t","constraint":"c","message":"Constraint does not exist"}"#
        );
    }

    #[test]
    fn test_equality_by_kind_and_fields() {
        let a = DbError::new(ErrorKind::NonExistentTable {
            table: "a".to_string(),
        });
        let b = DbError::new(ErrorKind::NonExistentTable {
            table: "a".to_string(),
        });
        let c = DbError::new(ErrorKind::NonExistentTable {
            table: "c".to_string(),
        });
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_generic_keeps_original_text_and_source() {
        let inner = DriverError::new(ExceptionClass::Exception, "something odd");
        let err = DbError::generic(inner.clone());
        assert_eq!(err.message(), "something odd");
        assert_eq!(err.inner(), Some(&inner));

        let source = std::error::Error::source(&err).expect("source");
        assert_eq!(source.to_string(), inner.to_string());
    }

    #[test]
    fn test_rollback_cause_attached() {
        let cause: CauseRef = Arc::new(DriverError::new(
            ExceptionClass::IntegrityError,
            "duplicate key",
        ));
        let err = DbError::new(ErrorKind::ConnectionError).with_rollback_cause(cause);
        assert_eq!(
            err.rollback_cause().map(|c| c.to_string()),
            Some("(IntegrityError) duplicate key".to_string())
        );
        assert!(err.is_connection_error());
        assert!(!err.is_deadlock());
    }

    #[test]
    fn test_kind_names_are_distinct() {
        let kinds = [
            ErrorKind::InvalidUnicodeParameter,
            ErrorKind::DataError,
            ErrorKind::NotSupported,
            ErrorKind::Deadlock,
            ErrorKind::ConnectionError,
            ErrorKind::Generic,
        ];
        let mut names: Vec<_> = kinds.iter().map(ErrorKind::name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), kinds.len());
    }
}
