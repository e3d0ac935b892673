//! Shared key, index, and batch request types.
//!
//! All structs follow the store's JSON wire format with `PascalCase` field
//! names; enum variants map to the `SCREAMING_SNAKE_CASE` wire strings via
//! `#[serde(rename)]`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::attribute_value::AttributeValue;

/// A full item: wire attribute name to value.
pub type Item = HashMap<String, AttributeValue>;

/// A primary-key projection of an item.
pub type Key = HashMap<String, AttributeValue>;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Kind of index a query can run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexType {
    /// The table's own key schema.
    #[serde(rename = "PRIMARY")]
    Primary,
    /// Global secondary index.
    #[serde(rename = "GSI")]
    Gsi,
    /// Local secondary index.
    #[serde(rename = "LSI")]
    Lsi,
}

impl IndexType {
    /// Returns the wire-format string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "PRIMARY",
            Self::Gsi => "GSI",
            Self::Lsi => "LSI",
        }
    }
}

impl std::fmt::Display for IndexType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Projection type for secondary indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProjectionType {
    /// All attributes are projected into the index.
    #[default]
    #[serde(rename = "ALL")]
    All,
    /// Only the index and primary keys are projected.
    #[serde(rename = "KEYS_ONLY")]
    KeysOnly,
    /// Keys plus a named set of non-key attributes.
    #[serde(rename = "INCLUDE")]
    Include,
}

impl ProjectionType {
    /// Returns the wire-format string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "ALL",
            Self::KeysOnly => "KEYS_ONLY",
            Self::Include => "INCLUDE",
        }
    }
}

impl std::fmt::Display for ProjectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sort direction along the sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SortDirection {
    /// Ascending, the store's default.
    #[default]
    #[serde(rename = "ASC")]
    Asc,
    /// Descending.
    #[serde(rename = "DESC")]
    Desc,
}

impl SortDirection {
    /// Returns the wire-format string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }

    /// Maps to the `ScanIndexForward` wire flag.
    #[must_use]
    pub fn scan_index_forward(&self) -> bool {
        matches!(self, Self::Asc)
    }
}

impl std::fmt::Display for SortDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an update or delete returns about the touched item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReturnValues {
    /// Nothing is returned.
    #[default]
    #[serde(rename = "NONE")]
    None,
    /// The whole item as it was before the write.
    #[serde(rename = "ALL_OLD")]
    AllOld,
    /// Only updated attributes, pre-write values.
    #[serde(rename = "UPDATED_OLD")]
    UpdatedOld,
    /// The whole item as it is after the write.
    #[serde(rename = "ALL_NEW")]
    AllNew,
    /// Only updated attributes, post-write values.
    #[serde(rename = "UPDATED_NEW")]
    UpdatedNew,
}

impl ReturnValues {
    /// Returns the wire-format string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::AllOld => "ALL_OLD",
            Self::UpdatedOld => "UPDATED_OLD",
            Self::AllNew => "ALL_NEW",
            Self::UpdatedNew => "UPDATED_NEW",
        }
    }
}

impl std::fmt::Display for ReturnValues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a read operation returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Select {
    /// Every attribute of each item.
    #[serde(rename = "ALL_ATTRIBUTES")]
    AllAttributes,
    /// Every attribute projected into the queried index.
    #[serde(rename = "ALL_PROJECTED_ATTRIBUTES")]
    AllProjectedAttributes,
    /// Only the attributes named by the projection expression.
    #[serde(rename = "SPECIFIC_ATTRIBUTES")]
    SpecificAttributes,
    /// No items, only the match count.
    #[serde(rename = "COUNT")]
    Count,
}

impl Select {
    /// Returns the wire-format string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllAttributes => "ALL_ATTRIBUTES",
            Self::AllProjectedAttributes => "ALL_PROJECTED_ATTRIBUTES",
            Self::SpecificAttributes => "SPECIFIC_ATTRIBUTES",
            Self::Count => "COUNT",
        }
    }
}

impl std::fmt::Display for Select {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Key and index schemas
// ---------------------------------------------------------------------------

/// Key schema of a table or index, in wire attribute names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeySchema {
    /// Partition (hash) key attribute name.
    pub partition_key: String,
    /// Sort (range) key attribute name, if the schema has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<String>,
}

impl KeySchema {
    /// Creates a partition-only key schema.
    #[must_use]
    pub fn new(partition_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            sort_key: None,
        }
    }

    /// Adds a sort key to the schema.
    #[must_use]
    pub fn with_sort_key(mut self, sort_key: impl Into<String>) -> Self {
        self.sort_key = Some(sort_key.into());
        self
    }

    /// Returns `true` when `attribute` is one of the key attributes.
    #[must_use]
    pub fn contains(&self, attribute: &str) -> bool {
        self.partition_key == attribute || self.sort_key.as_deref() == Some(attribute)
    }

    /// Returns `true` when `key` holds a value for every key attribute.
    #[must_use]
    pub fn covered_by(&self, key: &Key) -> bool {
        key.contains_key(&self.partition_key)
            && self.sort_key.as_ref().is_none_or(|sk| key.contains_key(sk))
    }
}

/// A queryable index: the primary key schema or a secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IndexSchema {
    /// Index name; empty for the primary index.
    pub name: String,
    /// Whether this is the primary key, a GSI, or an LSI.
    pub index_type: IndexType,
    /// Key schema of the index.
    pub key_schema: KeySchema,
    /// Attribute projection of the index.
    #[serde(default)]
    pub projection: ProjectionType,
}

impl IndexSchema {
    /// Describes a table's own key schema as the primary index.
    #[must_use]
    pub fn primary(key_schema: KeySchema) -> Self {
        Self {
            name: String::new(),
            index_type: IndexType::Primary,
            key_schema,
            projection: ProjectionType::All,
        }
    }

    /// Describes a global secondary index.
    #[must_use]
    pub fn global(name: impl Into<String>, key_schema: KeySchema) -> Self {
        Self {
            name: name.into(),
            index_type: IndexType::Gsi,
            key_schema,
            projection: ProjectionType::All,
        }
    }

    /// Describes a local secondary index.
    #[must_use]
    pub fn local(name: impl Into<String>, key_schema: KeySchema) -> Self {
        Self {
            name: name.into(),
            index_type: IndexType::Lsi,
            key_schema,
            projection: ProjectionType::All,
        }
    }

    /// Returns `true` for the primary key schema.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.index_type == IndexType::Primary
    }
}

// ---------------------------------------------------------------------------
// Batch request shapes
// ---------------------------------------------------------------------------

/// One write inside a batch: exactly one of put or delete is present.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WriteRequest {
    /// Put request, if this write stores an item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub put_request: Option<PutRequest>,
    /// Delete request, if this write removes an item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_request: Option<DeleteRequest>,
}

impl WriteRequest {
    /// Builds a put write.
    #[must_use]
    pub fn put(item: Item) -> Self {
        Self {
            put_request: Some(PutRequest { item }),
            delete_request: None,
        }
    }

    /// Builds a delete write.
    #[must_use]
    pub fn delete(key: Key) -> Self {
        Self {
            put_request: None,
            delete_request: Some(DeleteRequest { key }),
        }
    }
}

/// Item payload of a batch put.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutRequest {
    /// The full item to store.
    pub item: Item,
}

/// Key payload of a batch delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteRequest {
    /// Primary key of the item to remove.
    pub key: Key,
}

/// Keys plus read options for one table inside a batch get.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeysAndAttributes {
    /// Primary keys to fetch.
    pub keys: Vec<Key>,
    /// Optional projection over the fetched items.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection_expression: Option<String>,
    /// Placeholder map for the projection expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression_attribute_names: Option<HashMap<String, String>>,
    /// Strongly consistent read flag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consistent_read: Option<bool>,
}
