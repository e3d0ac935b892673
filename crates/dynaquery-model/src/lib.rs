//! Wire-level data model for the dynaquery engine.
//!
//! This crate defines the types that cross the executor boundary: attribute
//! values, key and index schemas, condition operators, compiled operations,
//! and batch request/result shapes. Everything here serializes to the
//! PascalCase JSON wire format the store expects; the engine logic lives in
//! `dynaquery-core`.

#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]

pub mod attribute_value;
pub mod compiled;
pub mod condition;
pub mod result;
pub mod types;

pub use attribute_value::AttributeValue;
pub use compiled::{CompiledBatchGet, CompiledQuery, ExpressionComponents, Operation};
pub use condition::{Condition, ConditionOperator, OperatorParseError};
pub use result::{BatchGetResult, BatchWriteResult, QueryResult, UpdateResult};
pub use types::{
    DeleteRequest, IndexSchema, IndexType, Item, Key, KeySchema, KeysAndAttributes,
    ProjectionType, PutRequest, ReturnValues, Select, SortDirection, WriteRequest,
};
