//! Result shapes returned across the executor boundary.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{Item, Key, KeysAndAttributes, WriteRequest};

/// Outcome of a `Query` or `Scan` page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryResult {
    /// Matched items; empty for `COUNT` selections.
    #[serde(default)]
    pub items: Vec<Item>,
    /// Number of items the store reports as matched.
    #[serde(default)]
    pub count: i32,
    /// Number of items evaluated before filtering.
    #[serde(default)]
    pub scanned_count: i32,
    /// Resume key when the page is not the last one; empty when exhausted.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub last_evaluated_key: Key,
}

impl QueryResult {
    /// Returns `true` when the store signalled more pages.
    #[must_use]
    pub fn has_more(&self) -> bool {
        !self.last_evaluated_key.is_empty()
    }
}

/// Outcome of an `UpdateItem` that asked for return values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateResult {
    /// Attribute image per the requested `ReturnValues`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: Item,
}

/// Outcome of one batch-get round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchGetResult {
    /// Fetched items, in store order, keyed by table.
    #[serde(default)]
    pub responses: HashMap<String, Vec<Item>>,
    /// Keys the store did not serve this round.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub unprocessed_keys: HashMap<String, KeysAndAttributes>,
}

impl BatchGetResult {
    /// Returns the leftover key count across all tables.
    #[must_use]
    pub fn unprocessed_len(&self) -> usize {
        self.unprocessed_keys.values().map(|k| k.keys.len()).sum()
    }
}

/// Outcome of one batch-write round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchWriteResult {
    /// Writes the store did not apply this round.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub unprocessed_items: HashMap<String, Vec<WriteRequest>>,
}

impl BatchWriteResult {
    /// Returns the leftover write count across all tables.
    #[must_use]
    pub fn unprocessed_len(&self) -> usize {
        self.unprocessed_items.values().map(Vec::len).sum()
    }
}
