//! Error taxonomy
//!
//! Each layer has its own error type so callers can tell where a failure
//! originated. Build-time (`QueryError`, `ValidationError`) and compile-time
//! (`CompileError`) failures never reach the database; `ExecutionError` and
//! `TransactionError` come from the driver; `MigrationError` covers history
//! conflicts and failed batches. [`Error`] wraps them all so `?` composes
//! across layers.

use thiserror::Error;

/// A single broken invariant found while validating a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// Table the violation belongs to (empty for schema-wide problems)
    pub table: String,
    pub message: String,
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.table.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.table, self.message)
        }
    }
}

/// Invariant violation in the data model
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("table '{0}' is already defined")]
    DuplicateTable(String),
    #[error("unknown table '{0}'")]
    UnknownTable(String),
    #[error("unknown column '{table}.{column}'")]
    UnknownColumn { table: String, column: String },
    #[error("schema has {} violation(s):\n{}", .0.len(), format_violations(.0))]
    Invalid(Vec<SchemaViolation>),
}

fn format_violations(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("  - {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

impl SchemaError {
    /// All violations carried by an `Invalid` error (empty otherwise).
    pub fn violations(&self) -> &[SchemaViolation] {
        match self {
            SchemaError::Invalid(v) => v,
            _ => &[],
        }
    }
}

/// Malformed or unresolvable query, detected while building
#[derive(Debug, Error, PartialEq)]
pub enum QueryError {
    #[error("unknown table '{0}'")]
    UnknownTable(String),
    #[error("unknown field '{field}' on '{table}'")]
    UnknownField { table: String, field: String },
    #[error("field '{0}' is ambiguous between joined tables; qualify it as table.column")]
    AmbiguousField(String),
    #[error("table '{0}' is already part of the query")]
    DuplicateJoin(String),
    #[error("output name '{0}' is already used by this query")]
    DuplicateName(String),
    #[error("invalid pagination: {0}")]
    InvalidPagination(String),
    #[error("{0}")]
    Invalid(String),
}

/// Ambiguous or unsupported query shape, detected while compiling
#[derive(Debug, Error, PartialEq)]
pub enum CompileError {
    #[error(
        "column '{column}' is selected next to aggregation '{aggregation}' without a grouping key; \
         add it to group_by() or remove it from values()"
    )]
    AmbiguousGrouping { column: String, aggregation: String },
    #[error("column '{0}' is selected but not part of group_by()")]
    NotGrouped(String),
    #[error("cannot compile: {0}")]
    Unsupported(String),
}

/// A column validator rejected a value before it was written
#[derive(Debug, Error, PartialEq)]
#[error("validation failed for '{table}.{column}': {message}")]
pub struct ValidationError {
    pub table: String,
    pub column: String,
    pub message: String,
}

/// Driver-level failure: constraint violation, connectivity loss, decoding
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] may_postgres::Error),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("cannot delete from '{table}': {dependents} dependent row(s) in '{dependent_table}' are protected")]
    Protected {
        table: String,
        dependent_table: String,
        dependents: i64,
    },
    #[error("expected exactly one row, got {0}")]
    RowCount(usize),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("execution error: {0}")]
    Other(String),
}

/// Commit/rollback failure or misuse of a transaction scope
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("transaction has already been committed or rolled back")]
    Closed,
    #[error("a transaction is already open on this connection")]
    AlreadyOpen,
    #[error("savepoint error: {0}")]
    Savepoint(String),
    #[error("failed to {action}: {source}")]
    Driver {
        action: &'static str,
        #[source]
        source: ExecutionError,
    },
}

/// History conflict, out-of-order revert, or failed batch
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(
        "migration history conflict for batch '{batch}': expected last applied batch {}, found {}\n\
         The database history diverges from the batch artifacts; resolve it manually.",
        display_opt(.expected), display_opt(.actual)
    )]
    Conflict {
        batch: String,
        expected: Option<String>,
        actual: Option<String>,
    },
    #[error(
        "cannot revert '{requested}': only the most recently applied batch ({}) can be reverted",
        display_opt(.latest)
    )]
    OutOfOrder {
        requested: String,
        latest: Option<String>,
    },
    #[error("batch '{0}' has already been applied")]
    AlreadyApplied(String),
    #[error("batch '{0}' is not recorded as applied")]
    NotApplied(String),
    #[error(
        "batch '{identifier}' has been modified after being applied.\n\
         Stored checksum: {stored}\n\
         Current checksum: {current}"
    )]
    ChecksumMismatch {
        identifier: String,
        stored: String,
        current: String,
    },
    #[error("batch '{identifier}' failed at operation {index} ({kind}): {source}")]
    OperationFailed {
        identifier: String,
        index: usize,
        kind: &'static str,
        #[source]
        source: ExecutionError,
    },
    #[error("invalid state transition for batch '{identifier}': {from:?} -> {to:?}")]
    InvalidTransition {
        identifier: String,
        from: crate::migration::BatchState,
        to: crate::migration::BatchState,
    },
    #[error("operation cannot be applied: {0}")]
    InvalidOperation(String),
    #[error("invalid migration artifact: {0}")]
    InvalidArtifact(String),
    #[error("migration I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

fn display_opt(value: &Option<String>) -> String {
    match value {
        Some(v) => format!("'{v}'"),
        None => "<none>".to_string(),
    }
}

/// Umbrella error for code that crosses layers
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
}

impl From<may_postgres::Error> for Error {
    fn from(err: may_postgres::Error) -> Self {
        Error::Execution(ExecutionError::Postgres(err))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_schema_lists_every_violation() {
        let err = SchemaError::Invalid(vec![
            SchemaViolation {
                table: "book".into(),
                message: "no primary key".into(),
            },
            SchemaViolation {
                table: String::new(),
                message: "relationship 'x' targets unknown table".into(),
            },
        ]);
        let text = err.to_string();
        assert!(text.contains("2 violation(s)"));
        assert!(text.contains("book: no primary key"));
        assert!(text.contains("relationship 'x'"));
        assert_eq!(err.violations().len(), 2);
    }

    #[test]
    fn test_conflict_reports_expected_and_actual() {
        let err = MigrationError::Conflict {
            batch: "0003_tags".into(),
            expected: Some("0002_books".into()),
            actual: None,
        };
        let text = err.to_string();
        assert!(text.contains("'0002_books'"));
        assert!(text.contains("<none>"));
    }

    #[test]
    fn test_errors_convert_into_umbrella() {
        let err: Error = QueryError::UnknownTable("x".into()).into();
        assert!(matches!(err, Error::Query(_)));
        let err: Error = TransactionError::Closed.into();
        assert!(err.to_string().contains("already been committed"));
    }
}
