//! Error types for rowkeeper operations

use crate::ValueKind;
use thiserror::Error;

/// Schema and usage errors.
///
/// These signal a mismatch between what the caller asked for and what the
/// row or result set actually carries. They are programmer errors and are
/// never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Model error: did not read property {column}")]
    FieldNotRead { column: String },

    #[error("Column not found in result set: {column}")]
    ColumnNotFound { column: String },

    #[error("Type mismatch on {column}: expected {expected:?}, found {found:?}")]
    TypeMismatch {
        column: String,
        expected: ValueKind,
        found: Option<ValueKind>,
    },

    #[error("Column {column} holds NULL")]
    NullValue { column: String },

    #[error("Invalid column name {name}: {reason}")]
    InvalidColumnName { name: String, reason: String },

    #[error("Table {table} has no column {column}")]
    UnknownColumn { table: String, column: String },

    #[error("Table {table} declares column {column} twice")]
    DuplicateColumn { table: String, column: String },

    #[error("Cursor is closed")]
    CursorClosed,

    #[error("Cursor is not positioned on a row")]
    NoCurrentRow,

    #[error("Row factory for {table} failed: {reason}")]
    FactoryFailed { table: String, reason: String },
}

/// Storage engine errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Database used without being opened")]
    NotOpen,

    #[error("Database is open read-only")]
    ReadOnly,

    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Unknown table: {table}")]
    UnknownTable { table: String },

    #[error("Unknown column {column} in {table}")]
    UnknownColumn { table: String, column: String },

    #[error("Constraint violation on {table}: {reason}")]
    ConstraintViolation { table: String, reason: String },

    #[error("Invalid clause {clause:?}: {reason}")]
    InvalidClause { clause: String, reason: String },

    #[error("Insert into {table} failed: {reason}")]
    InsertFailed { table: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all rowkeeper errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RowkeeperError {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl RowkeeperError {
    /// Whether this error points at a caller/query mismatch rather than an
    /// engine failure.
    pub fn is_usage_error(&self) -> bool {
        matches!(self, RowkeeperError::Schema(_))
    }
}

/// Result type alias for rowkeeper operations.
pub type RowkeeperResult<T> = Result<T, RowkeeperError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_not_read_display() {
        let err = SchemaError::FieldNotRead {
            column: "title".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("did not read"));
        assert!(msg.contains("title"));
    }

    #[test]
    fn test_type_mismatch_display() {
        let err = SchemaError::TypeMismatch {
            column: "importance".to_string(),
            expected: ValueKind::Integer,
            found: Some(ValueKind::Text),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("importance"));
        assert!(msg.contains("Integer"));
        assert!(msg.contains("Text"));
    }

    #[test]
    fn test_storage_error_display_not_open() {
        let msg = format!("{}", StorageError::NotOpen);
        assert!(msg.contains("without being opened"));
    }

    #[test]
    fn test_invalid_clause_display() {
        let err = StorageError::InvalidClause {
            clause: "_id ==".to_string(),
            reason: "unexpected end".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("_id =="));
        assert!(msg.contains("unexpected end"));
    }

    #[test]
    fn test_rowkeeper_error_from_variants() {
        let schema = RowkeeperError::from(SchemaError::CursorClosed);
        assert!(matches!(schema, RowkeeperError::Schema(_)));
        assert!(schema.is_usage_error());

        let storage = RowkeeperError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, RowkeeperError::Storage(_)));
        assert!(!storage.is_usage_error());

        let config = RowkeeperError::from(ConfigError::InvalidValue {
            field: "default_fetch_limit".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        });
        assert!(matches!(config, RowkeeperError::Config(_)));
    }
}
