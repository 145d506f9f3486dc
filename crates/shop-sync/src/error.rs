//! Error types for the sync engine.

use thiserror::Error;

/// A raw value that could not be mapped onto its column's logical type.
///
/// Coercion errors are collected per batch; the offending row is dropped and
/// the rest of the batch proceeds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("row {row}: column {column} expected {expected}, got {value}")]
pub struct CoercionError {
    /// Zero-based index of the row within its batch.
    pub row: usize,
    pub column: String,
    /// Rendered source value (truncated).
    pub value: String,
    pub expected: String,
}

impl CoercionError {
    pub fn new(
        row: usize,
        column: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        let mut value = value.into();
        if value.len() > 64 {
            let mut cut = 64;
            while !value.is_char_boundary(cut) {
                cut -= 1;
            }
            value.truncate(cut);
            value.push_str("...");
        }
        Self {
            row,
            column: column.into(),
            value,
            expected: expected.into(),
        }
    }
}

/// Main error type for sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// No SQL strategy is registered for the requested dialect.
    #[error("Unsupported dialect '{0}'. Supported: mssql, mysql, postgres")]
    DialectUnsupported(String),

    /// Batch named a table the catalog does not know.
    #[error("Unknown table '{0}'")]
    UnknownTable(String),

    /// A schema or merge policy is inconsistent.
    #[error("Invalid schema for table {table}: {message}")]
    InvalidSchema { table: String, message: String },

    /// The database rejected the staging DDL, bulk load or merge statement.
    #[error("Merge failed for table {table}: {message}")]
    MergeExecution {
        table: String,
        message: String,
        /// Deadlocks and lock timeouts; safe to retry the whole transaction.
        transient: bool,
    },

    /// Connection or pool error with context
    #[error("Connection error: {message}\n  Context: {context}")]
    Connection { message: String, context: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Sync was cancelled (SIGINT, etc.)
    #[error("Sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Create a Connection error with context about where it occurred
    pub fn connection(message: impl Into<String>, context: impl Into<String>) -> Self {
        SyncError::Connection {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a non-retryable MergeExecution error
    pub fn merge(table: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::MergeExecution {
            table: table.into(),
            message: message.into(),
            transient: false,
        }
    }

    /// Create a retryable MergeExecution error (deadlock, lock timeout).
    pub fn transient_merge(table: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::MergeExecution {
            table: table.into(),
            message: message.into(),
            transient: true,
        }
    }

    pub fn invalid_schema(table: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::InvalidSchema {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the failed merge transaction may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::MergeExecution { transient: true, .. })
    }

    /// Whether the error must abort the whole run rather than one table.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Connection { .. }
                | SyncError::DialectUnsupported(_)
                | SyncError::Config(_)
                | SyncError::Cancelled
        )
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            SyncError::Config(_)
            | SyncError::DialectUnsupported(_)
            | SyncError::Yaml(_)
            | SyncError::InvalidSchema { .. } => 1,
            SyncError::Connection { .. } => 2,
            SyncError::Cancelled => 130,
            _ => 3,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
