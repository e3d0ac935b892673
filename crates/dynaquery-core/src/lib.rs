//! Client-side query and batch execution engine for partition/sort-key
//! stores.
//!
//! Callers describe conditions and mutations against typed models; the
//! engine selects an index, compiles expression trees with generated
//! placeholders, paginates through opaque cursors, and runs single or bulk
//! operations with bounded concurrency and retry. All wire I/O goes through
//! the [`executor::Executor`] trait.
#![allow(clippy::doc_markdown, clippy::module_name_repetitions)]

pub mod batch;
pub mod config;
pub mod cursor;
pub mod error;
pub mod executor;
pub mod expression;
pub mod index;
pub mod model;
pub mod query;
pub mod retry;
pub mod schema;
pub mod update;

pub use batch::{Batch, BatchOptions, ErrorDecision};
pub use config::EngineConfig;
pub use cursor::{Cursor, CursorError};
pub use error::{BuilderError, Error, KeyError, Result};
pub use executor::{Executor, ExecutorError, ExecutorErrorKind};
pub use expression::{CompileError, Connective, ExpressionCompiler, ResolvedCondition, SetOperand};
pub use index::select_index;
pub use model::{CodecError, Model, key_of};
pub use query::{FilterGroup, IntoOperands, Page, Query};
pub use retry::RetryPolicy;
pub use schema::{
    AttributeMeta, SchemaBuilder, SchemaDescriptor, SchemaError, TAG_CREATED_AT, TAG_PROTECTED,
};
pub use update::Update;
