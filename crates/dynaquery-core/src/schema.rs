//! Static schema metadata for model types.
//!
//! A [`SchemaDescriptor`] is built once per model type and answers every
//! metadata question the engine asks: table name, key schema, declared
//! secondary indexes, logical-to-wire attribute name mapping, tags, and the
//! optional version field. Declaration order of indexes is load-bearing;
//! when two indexes cover a query equally well, the first declared wins.

use dynaquery_model::{IndexSchema, KeySchema};

// Attribute tags the engine gives meaning to. Anything else is carried
// through untouched for callers.

/// Marks an attribute that is written once at creation and never updated
/// through field auto-discovery.
pub const TAG_CREATED_AT: &str = "created_at";

/// Marks an attribute that callers may not reference in conditions or
/// update paths; field auto-discovery skips it.
pub const TAG_PROTECTED: &str = "protected";

/// Errors produced while building a schema descriptor.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The table name was empty.
    #[error("table name must not be empty")]
    EmptyTableName,
    /// No partition key was declared.
    #[error("table {table} has no partition key")]
    MissingPartitionKey {
        /// Table under construction.
        table: String,
    },
    /// A key or version declaration referenced an unregistered field.
    #[error("field {field} referenced by {context} is not a registered attribute")]
    UnknownField {
        /// The unregistered field name.
        field: String,
        /// Which declaration referenced it.
        context: String,
    },
    /// Two indexes were declared under one name.
    #[error("index {name} is declared twice")]
    DuplicateIndex {
        /// The colliding index name.
        name: String,
    },
}

/// Metadata for one logical attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeMeta {
    /// Logical field name callers use in builder calls.
    pub name: String,
    /// Attribute name on the wire.
    pub wire_name: String,
    /// Behavior tags, see [`TAG_CREATED_AT`] and [`TAG_PROTECTED`].
    pub tags: Vec<String>,
}

impl AttributeMeta {
    /// Creates metadata where the wire name equals the logical name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            wire_name: name.clone(),
            name,
            tags: Vec::new(),
        }
    }

    /// Overrides the wire attribute name.
    #[must_use]
    pub fn with_wire_name(mut self, wire_name: impl Into<String>) -> Self {
        self.wire_name = wire_name.into();
        self
    }

    /// Adds a behavior tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Returns `true` when `tag` is present.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Immutable per-model schema metadata.
///
/// Candidate indexes are stored primary-first so index selection can walk
/// them in preference order.
#[derive(Debug, Clone)]
pub struct SchemaDescriptor {
    table: String,
    candidates: Vec<IndexSchema>,
    attributes: Vec<AttributeMeta>,
    version_field: Option<String>,
}

impl SchemaDescriptor {
    /// Starts building a descriptor for `table`.
    #[must_use]
    pub fn builder(table: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(table)
    }

    /// Returns the table name.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Returns the table's own key schema, in wire names.
    #[must_use]
    pub fn primary_key(&self) -> &KeySchema {
        &self.candidates[0].key_schema
    }

    /// Returns the declared secondary indexes, in declaration order.
    #[must_use]
    pub fn indexes(&self) -> &[IndexSchema] {
        &self.candidates[1..]
    }

    /// Returns all queryable indexes, primary first.
    #[must_use]
    pub fn candidate_indexes(&self) -> &[IndexSchema] {
        &self.candidates
    }

    /// Returns metadata for a logical field name.
    #[must_use]
    pub fn attribute(&self, field: &str) -> Option<&AttributeMeta> {
        self.attributes.iter().find(|a| a.name == field)
    }

    /// Returns every registered attribute, in declaration order.
    #[must_use]
    pub fn attributes(&self) -> &[AttributeMeta] {
        &self.attributes
    }

    /// Resolves a logical field name to its wire name.
    ///
    /// Unregistered fields resolve to themselves so ad-hoc attributes keep
    /// working.
    #[must_use]
    pub fn wire_name<'a>(&'a self, field: &'a str) -> &'a str {
        self.attribute(field).map_or(field, |a| a.wire_name.as_str())
    }

    /// Resolves a wire name back to its logical field name.
    #[must_use]
    pub fn logical_name<'a>(&'a self, wire: &'a str) -> &'a str {
        self.attributes
            .iter()
            .find(|a| a.wire_name == wire)
            .map_or(wire, |a| a.name.as_str())
    }

    /// Returns the logical name of the optimistic-lock version field.
    #[must_use]
    pub fn version_field(&self) -> Option<&str> {
        self.version_field.as_deref()
    }

    /// Returns `true` when `wire` names a primary-key attribute.
    #[must_use]
    pub fn is_primary_key_attribute(&self, wire: &str) -> bool {
        self.primary_key().contains(wire)
    }
}

/// Validating builder for [`SchemaDescriptor`].
///
/// Keys and index declarations use logical field names; `build` resolves
/// them to wire names through the registered attributes.
#[derive(Debug)]
pub struct SchemaBuilder {
    table: String,
    partition_key: Option<String>,
    sort_key: Option<String>,
    secondary: Vec<(String, IndexKind, String, Option<String>)>,
    attributes: Vec<AttributeMeta>,
    version_field: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum IndexKind {
    Global,
    Local,
}

impl SchemaBuilder {
    fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            partition_key: None,
            sort_key: None,
            secondary: Vec::new(),
            attributes: Vec::new(),
            version_field: None,
        }
    }

    /// Declares the table partition key.
    #[must_use]
    pub fn partition_key(mut self, field: impl Into<String>) -> Self {
        self.partition_key = Some(field.into());
        self
    }

    /// Declares the table sort key.
    #[must_use]
    pub fn sort_key(mut self, field: impl Into<String>) -> Self {
        self.sort_key = Some(field.into());
        self
    }

    /// Registers an attribute.
    #[must_use]
    pub fn attribute(mut self, meta: AttributeMeta) -> Self {
        self.attributes.push(meta);
        self
    }

    /// Declares a global secondary index. Declaration order is the
    /// tie-break order during index selection.
    #[must_use]
    pub fn global_index(
        mut self,
        name: impl Into<String>,
        partition_field: impl Into<String>,
        sort_field: Option<&str>,
    ) -> Self {
        self.secondary.push((
            name.into(),
            IndexKind::Global,
            partition_field.into(),
            sort_field.map(ToOwned::to_owned),
        ));
        self
    }

    /// Declares a local secondary index sharing the table partition key.
    #[must_use]
    pub fn local_index(mut self, name: impl Into<String>, sort_field: impl Into<String>) -> Self {
        self.secondary.push((
            name.into(),
            IndexKind::Local,
            String::new(),
            Some(sort_field.into()),
        ));
        self
    }

    /// Names the optimistic-lock version field.
    #[must_use]
    pub fn version_field(mut self, field: impl Into<String>) -> Self {
        self.version_field = Some(field.into());
        self
    }

    /// Validates the declarations and produces the descriptor.
    pub fn build(self) -> Result<SchemaDescriptor, SchemaError> {
        if self.table.is_empty() {
            return Err(SchemaError::EmptyTableName);
        }
        let Some(partition_field) = self.partition_key else {
            return Err(SchemaError::MissingPartitionKey { table: self.table });
        };

        let resolve = |field: &str, context: &str| -> Result<String, SchemaError> {
            self.attributes
                .iter()
                .find(|a| a.name == field)
                .map(|a| a.wire_name.clone())
                .ok_or_else(|| SchemaError::UnknownField {
                    field: field.to_owned(),
                    context: context.to_owned(),
                })
        };

        let mut primary = KeySchema::new(resolve(&partition_field, "partition key")?);
        if let Some(sort_field) = &self.sort_key {
            primary = primary.with_sort_key(resolve(sort_field, "sort key")?);
        }

        let mut candidates = vec![IndexSchema::primary(primary.clone())];
        for (name, kind, pk_field, sk_field) in &self.secondary {
            if candidates.iter().any(|i| &i.name == name) {
                return Err(SchemaError::DuplicateIndex { name: name.clone() });
            }
            let context = format!("index {name}");
            let key_schema = match kind {
                IndexKind::Global => {
                    let mut ks = KeySchema::new(resolve(pk_field, &context)?);
                    if let Some(sk) = sk_field {
                        ks = ks.with_sort_key(resolve(sk, &context)?);
                    }
                    ks
                }
                IndexKind::Local => {
                    let sk = sk_field.as_deref().unwrap_or_default();
                    KeySchema::new(primary.partition_key.clone())
                        .with_sort_key(resolve(sk, &context)?)
                }
            };
            candidates.push(match kind {
                IndexKind::Global => IndexSchema::global(name.clone(), key_schema),
                IndexKind::Local => IndexSchema::local(name.clone(), key_schema),
            });
        }

        if let Some(version) = &self.version_field {
            resolve(version, "version field")?;
        }

        Ok(SchemaDescriptor {
            table: self.table,
            candidates,
            attributes: self.attributes,
            version_field: self.version_field,
        })
    }
}
