//! Engine error taxonomy.
//!
//! Builder mistakes are memoized by the fluent surface and reported by the
//! first terminal call; compile, cursor, codec, and executor failures are
//! wrapped without reinterpretation. Condition failures, retry exhaustion,
//! and cancellation each stay distinguishable so callers can branch on
//! them.

use dynaquery_model::Operation;

use crate::cursor::CursorError;
use crate::executor::{ExecutorError, ExecutorErrorKind};
use crate::expression::CompileError;
use crate::model::CodecError;
use crate::schema::SchemaError;

/// Convenience alias used across the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Malformed builder input, recorded sticky at the offending call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BuilderError {
    /// The operator string was not recognized.
    #[error("unknown condition operator: {operator:?}")]
    UnknownOperator {
        /// The rejected spelling.
        operator: String,
    },
    /// A condition named an empty field.
    #[error("condition field must not be empty")]
    EmptyField,
    /// A forced index is not declared in the schema.
    #[error("index {name} is not declared in the schema")]
    UnknownIndex {
        /// The undeclared index name.
        name: String,
    },
    /// A raw condition expression failed validation.
    #[error("malformed condition expression: {reason}")]
    MalformedExpression {
        /// What was wrong with it.
        reason: String,
    },
    /// A condition referenced a protected field.
    #[error("field {field} is protected and cannot appear in conditions")]
    ProtectedField {
        /// The protected field.
        field: String,
    },
    /// An update resolved to zero fields.
    #[error("update resolved to zero fields")]
    EmptyUpdate,
    /// An optimistic-lock condition was requested without a version field.
    #[error("table {table} declares no version field")]
    NoVersionField {
        /// The table missing a version declaration.
        table: String,
    },
}

/// Missing or incomplete primary key for a key-addressed operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KeyError {
    /// A key attribute had no equality condition or value.
    #[error("incomplete primary key: missing equality on {missing}")]
    Incomplete {
        /// Wire name of the missing key attribute.
        missing: String,
    },
    /// A key attribute was conditioned with something other than equality.
    #[error("key attribute {field} requires an equality condition")]
    NonEquality {
        /// Wire name of the offending key attribute.
        field: String,
    },
}

/// Top-level engine error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed builder input.
    #[error("builder: {0}")]
    Builder(#[from] BuilderError),
    /// Missing or incomplete primary key.
    #[error("key: {0}")]
    Key(#[from] KeyError),
    /// Invalid expression construction.
    #[error("compile: {0}")]
    Compile(#[from] CompileError),
    /// Malformed pagination cursor.
    #[error("cursor: {0}")]
    Cursor(#[from] CursorError),
    /// Model marshal or unmarshal failure.
    #[error("codec: {0}")]
    Codec(#[from] CodecError),
    /// Invalid schema declaration.
    #[error("schema: {0}")]
    Schema(#[from] SchemaError),
    /// Store or transport failure, wrapped verbatim.
    #[error("executor: {0}")]
    Executor(#[from] ExecutorError),
    /// A conditional write guard rejected the operation.
    #[error("condition failed during {operation}")]
    ConditionFailed {
        /// The rejected operation.
        operation: Operation,
    },
    /// Batch retry exhaustion with items still unprocessed.
    #[error("{remaining} items unprocessed after {attempts} retry attempts")]
    UnprocessedItems {
        /// Leftover item count.
        remaining: usize,
        /// Retry attempts spent.
        attempts: u32,
    },
    /// The ambient context was cancelled.
    #[error("{operation} cancelled")]
    Cancelled {
        /// What was interrupted.
        operation: String,
    },
    /// A deadline elapsed before the operation finished.
    #[error("{operation} exceeded its deadline")]
    DeadlineExceeded {
        /// What timed out.
        operation: String,
    },
}

impl Error {
    /// Wraps an executor failure, promoting condition failures and
    /// cancellations to their distinguishable variants.
    #[must_use]
    pub fn from_executor(operation: Operation, err: ExecutorError) -> Self {
        match err.kind {
            ExecutorErrorKind::ConditionFailed => Self::ConditionFailed { operation },
            ExecutorErrorKind::Cancelled => Self::Cancelled {
                operation: operation.as_str().to_owned(),
            },
            _ => Self::Executor(err),
        }
    }

    /// Returns `true` for a rejected conditional write.
    #[must_use]
    pub fn is_condition_failed(&self) -> bool {
        matches!(self, Self::ConditionFailed { .. })
    }

    /// Returns `true` for cancellation or deadline expiry.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::DeadlineExceeded { .. })
    }

    /// Returns `true` when retrying with backoff could help.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Executor(e) => e.is_retryable(),
            _ => false,
        }
    }
}
