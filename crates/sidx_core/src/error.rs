//! Error types for the index engine.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in index engine operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Bad index or property definition.
    #[error("schema error: {message}")]
    Schema {
        /// Description of the problem.
        message: String,
    },

    /// An index or class with the same name already exists.
    #[error("{kind} with name '{name}' already exists")]
    DuplicateName {
        /// What kind of object collided ("index", "class", "property").
        kind: &'static str,
        /// The colliding name.
        name: String,
    },

    /// Unique constraint violation.
    #[error(
        "duplicate key {key} in unique index '{index}': already owned by {existing}, rejected {rejected}"
    )]
    DuplicateKey {
        /// Index name.
        index: String,
        /// Rendered key.
        key: String,
        /// Record that already owns the key.
        existing: String,
        /// Record whose write was rejected.
        rejected: String,
    },

    /// A concurrent commit won the race for the same key or record.
    #[error("write conflict on {target}: {key} was modified by a concurrent commit")]
    Conflict {
        /// Index name, or `record` for record-level conflicts.
        target: String,
        /// Rendered key or record id.
        key: String,
    },

    /// Dropped or unknown index, class, property or record.
    #[error("not found: {message}")]
    NotFound {
        /// What was not found.
        message: String,
    },

    /// Operation not supported by this index kind.
    #[error("unsupported operation: {message}")]
    Unsupported {
        /// Description of the operation.
        message: String,
    },

    /// The index exists but cannot serve queries in its current state.
    #[error("index '{index}' is not ready (state: {state})")]
    IndexNotReady {
        /// Index name.
        index: String,
        /// Current lifecycle state.
        state: String,
    },

    /// A value cannot be converted to the declared property type.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Declared type.
        expected: String,
        /// Type of the offending value.
        actual: String,
    },

    /// A rebuild did not complete; the index stays unusable.
    #[error("rebuild of index '{index}' failed: {message}")]
    RebuildFailed {
        /// Index name.
        index: String,
        /// Underlying failure.
        message: String,
    },

    /// Operation on a transaction that is no longer active.
    #[error("transaction error: {message}")]
    TransactionState {
        /// Description of the state problem.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// Invalid or corrupt persisted data.
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Index directory is held by another process.
    #[error("index directory locked: another process has exclusive access")]
    DirectoryLocked,

    /// Database has been closed.
    #[error("database is closed")]
    DatabaseClosed,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CoreError {
    /// Creates a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Creates a duplicate index name error.
    pub fn duplicate_index(name: impl Into<String>) -> Self {
        Self::DuplicateName {
            kind: "Index",
            name: name.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates an unsupported operation error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a rebuild failure error.
    pub fn rebuild_failed(index: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RebuildFailed {
            index: index.into(),
            message: message.into(),
        }
    }

    /// Creates a transaction state error.
    pub fn transaction_state(message: impl Into<String>) -> Self {
        Self::TransactionState {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Returns true for unique-constraint and write-race failures.
    ///
    /// Both abort the enclosing transaction; callers may retry.
    #[must_use]
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. } | Self::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_index_message() {
        let err = CoreError::duplicate_index("byName");
        assert_eq!(err.to_string(), "Index with name 'byName' already exists");
    }

    #[test]
    fn constraint_violation_classification() {
        let dup = CoreError::DuplicateKey {
            index: "u".into(),
            key: "(1)".into(),
            existing: "a".into(),
            rejected: "b".into(),
        };
        let conflict = CoreError::Conflict {
            target: "u".into(),
            key: "(1)".into(),
        };
        assert!(dup.is_constraint_violation());
        assert!(conflict.is_constraint_violation());
        assert!(!CoreError::schema("x").is_constraint_violation());
    }

    #[test]
    fn io_errors_convert() {
        let err: CoreError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, CoreError::Io(_)));
    }
}
