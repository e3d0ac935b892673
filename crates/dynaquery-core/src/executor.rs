//! The executor boundary: every wire round trip goes through this trait.
//!
//! Implementations wrap a real store client. They classify transport and
//! store failures into [`ExecutorErrorKind`] so the engine can route
//! condition failures and retry throttling without reinterpreting wrapped
//! sources.

use async_trait::async_trait;
use dynaquery_model::{
    BatchGetResult, BatchWriteResult, CompiledBatchGet, CompiledQuery, Key, QueryResult,
    UpdateResult, WriteRequest,
};

/// Failure classification across the executor boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutorErrorKind {
    /// A conditional write guard rejected the operation.
    ConditionFailed,
    /// The store shed load; safe to retry with backoff.
    Throttled,
    /// The store or transport reported a transient server fault.
    ServerBusy,
    /// The caller's context was cancelled mid-flight.
    Cancelled,
    /// The target table or index does not exist.
    NotFound,
    /// The request was rejected as invalid.
    Validation,
    /// Anything else.
    Other,
}

impl ExecutorErrorKind {
    /// Returns a stable label for logs and messages.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConditionFailed => "condition failed",
            Self::Throttled => "throttled",
            Self::ServerBusy => "server busy",
            Self::Cancelled => "cancelled",
            Self::NotFound => "not found",
            Self::Validation => "validation",
            Self::Other => "error",
        }
    }

    /// Classifies a store error code into a kind.
    ///
    /// Only known throttling and server-busy signatures become retryable
    /// kinds; everything unrecognized is `Other`.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code {
            "ConditionalCheckFailedException" => Self::ConditionFailed,
            "ProvisionedThroughputExceededException"
            | "ThrottlingException"
            | "RequestLimitExceeded" => Self::Throttled,
            "InternalServerError" | "ServiceUnavailable" => Self::ServerBusy,
            "RequestCancelled" | "RequestCanceled" => Self::Cancelled,
            "ResourceNotFoundException" => Self::NotFound,
            "ValidationException" => Self::Validation,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for ExecutorErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure from an executor implementation.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ExecutorError {
    /// Failure classification.
    pub kind: ExecutorErrorKind,
    /// Human-readable detail.
    pub message: String,
    /// Underlying cause, preserved verbatim.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ExecutorError {
    /// Creates an error of the given kind.
    #[must_use]
    pub fn new(kind: ExecutorErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error classified from a store error code.
    #[must_use]
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        Self::new(ExecutorErrorKind::from_code(code), message)
    }

    /// Creates a condition-failure error.
    #[must_use]
    pub fn condition_failed(message: impl Into<String>) -> Self {
        Self::new(ExecutorErrorKind::ConditionFailed, message)
    }

    /// Creates a throttling error.
    #[must_use]
    pub fn throttled(message: impl Into<String>) -> Self {
        Self::new(ExecutorErrorKind::Throttled, message)
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ExecutorErrorKind::Cancelled, message)
    }

    /// Creates an unclassified error.
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ExecutorErrorKind::Other, message)
    }

    /// Attaches the underlying cause.
    #[must_use]
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns `true` for kinds worth retrying with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ExecutorErrorKind::Throttled | ExecutorErrorKind::ServerBusy
        )
    }
}

/// Async store interface consumed by the engine.
///
/// Handles are shared as `Arc<dyn Executor>` so fan-out tasks can clone
/// them.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Runs a compiled `Query` and returns one page.
    async fn execute_query(&self, query: &CompiledQuery) -> Result<QueryResult, ExecutorError>;

    /// Runs a compiled `Scan` and returns one page.
    async fn execute_scan(&self, query: &CompiledQuery) -> Result<QueryResult, ExecutorError>;

    /// Runs a compiled `PutItem`.
    async fn execute_put_item(&self, query: &CompiledQuery) -> Result<(), ExecutorError>;

    /// Runs a compiled `UpdateItem`, discarding any returned attributes.
    async fn execute_update_item(&self, query: &CompiledQuery) -> Result<(), ExecutorError>;

    /// Runs a compiled `UpdateItem` and returns the requested attribute
    /// image.
    async fn execute_update_item_with_result(
        &self,
        query: &CompiledQuery,
    ) -> Result<UpdateResult, ExecutorError>;

    /// Runs a compiled `DeleteItem`.
    async fn execute_delete_item(&self, query: &CompiledQuery) -> Result<(), ExecutorError>;

    /// Runs a `Query` with explicit page bounds overriding the compiled
    /// ones.
    async fn execute_query_with_pagination(
        &self,
        query: &CompiledQuery,
        limit: Option<i32>,
        start_key: Option<Key>,
    ) -> Result<QueryResult, ExecutorError>;

    /// Runs a `Scan` with explicit page bounds overriding the compiled
    /// ones.
    async fn execute_scan_with_pagination(
        &self,
        query: &CompiledQuery,
        limit: Option<i32>,
        start_key: Option<Key>,
    ) -> Result<QueryResult, ExecutorError>;

    /// Fetches a chunk of keys from one table.
    async fn execute_batch_get(
        &self,
        request: &CompiledBatchGet,
    ) -> Result<BatchGetResult, ExecutorError>;

    /// Applies a chunk of writes to one table.
    async fn execute_batch_write(
        &self,
        table: &str,
        writes: &[WriteRequest],
    ) -> Result<BatchWriteResult, ExecutorError>;
}
