//! Compiled operation shapes handed to an executor.
//!
//! A [`CompiledQuery`] is the immutable output of query compilation. Once
//! built it is only ever passed by shared reference; per-segment variants
//! for parallel scans are cloned before their segment fields are set.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::attribute_value::AttributeValue;
use crate::types::{Item, Key, ReturnValues, Select};

/// Store operation a compiled query resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Key-addressed read through an index.
    Query,
    /// Full-table read.
    Scan,
    /// Whole-item write.
    PutItem,
    /// Partial-item write.
    UpdateItem,
    /// Item removal.
    DeleteItem,
}

impl Operation {
    /// Returns the wire-format operation name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "Query",
            Self::Scan => "Scan",
            Self::PutItem => "PutItem",
            Self::UpdateItem => "UpdateItem",
            Self::DeleteItem => "DeleteItem",
        }
    }

    /// Looks up an operation by its wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Query" => Some(Self::Query),
            "Scan" => Some(Self::Scan),
            "PutItem" => Some(Self::PutItem),
            "UpdateItem" => Some(Self::UpdateItem),
            "DeleteItem" => Some(Self::DeleteItem),
            _ => None,
        }
    }

    /// Returns `true` for read operations.
    #[must_use]
    pub fn is_read(&self) -> bool {
        matches!(self, Self::Query | Self::Scan)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The five expression slots plus their shared placeholder maps.
///
/// Name placeholders are `#n0, #n1, ...` and value placeholders
/// `:v0, :v1, ...`, numbered monotonically by the compiler that produced
/// them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExpressionComponents {
    /// Key condition for `Query` operations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_condition_expression: Option<String>,
    /// Post-read filter for `Query` and `Scan`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_expression: Option<String>,
    /// Write guard for `PutItem`, `UpdateItem`, and `DeleteItem`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_expression: Option<String>,
    /// Mutation clauses for `UpdateItem`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_expression: Option<String>,
    /// Attribute projection for reads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection_expression: Option<String>,
    /// `#nK` placeholder to wire attribute name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub expression_attribute_names: HashMap<String, String>,
    /// `:vK` placeholder to operand value.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub expression_attribute_values: HashMap<String, AttributeValue>,
}

impl ExpressionComponents {
    /// Returns `true` when no expression slot is populated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.key_condition_expression.is_none()
            && self.filter_expression.is_none()
            && self.condition_expression.is_none()
            && self.update_expression.is_none()
            && self.projection_expression.is_none()
    }
}

/// An executable operation with all expression state resolved.
///
/// Treated as immutable once compilation returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CompiledQuery {
    /// The operation this compiles to.
    pub operation: Operation,
    /// Target table.
    pub table_name: String,
    /// Secondary index, when one was selected or forced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
    /// Expression slots and placeholder maps.
    #[serde(flatten)]
    pub expressions: ExpressionComponents,
    /// Maximum number of items to evaluate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i32>,
    /// Client-side skip count; best effort, executor dependent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i32>,
    /// Resume point from a previous page.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub exclusive_start_key: Key,
    /// Sort-key traversal direction for `Query`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_index_forward: Option<bool>,
    /// Strongly consistent read flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consistent_read: Option<bool>,
    /// Read selection, `COUNT` for count queries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub select: Option<Select>,
    /// What an `UpdateItem` or `DeleteItem` reports back.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_values: Option<ReturnValues>,
    /// Segment index for parallel scans.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment: Option<i32>,
    /// Total segment count for parallel scans.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_segments: Option<i32>,
    /// Full item payload for `PutItem`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub item: Item,
    /// Primary key for `UpdateItem` and `DeleteItem`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub key: Key,
}

impl CompiledQuery {
    /// Creates an empty compiled operation against `table_name`.
    #[must_use]
    pub fn new(operation: Operation, table_name: impl Into<String>) -> Self {
        Self {
            operation,
            table_name: table_name.into(),
            index_name: None,
            expressions: ExpressionComponents::default(),
            limit: None,
            offset: None,
            exclusive_start_key: Key::new(),
            scan_index_forward: None,
            consistent_read: None,
            select: None,
            return_values: None,
            segment: None,
            total_segments: None,
            item: Item::new(),
            key: Key::new(),
        }
    }
}

/// A chunked batch-get request against one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CompiledBatchGet {
    /// Target table.
    pub table_name: String,
    /// Primary keys to fetch, in caller order.
    pub keys: Vec<Key>,
    /// Optional projection over fetched items.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection_expression: Option<String>,
    /// Placeholder map for the projection expression.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub expression_attribute_names: HashMap<String, String>,
    /// Strongly consistent read flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consistent_read: Option<bool>,
}
