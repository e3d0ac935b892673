//! The model boundary: marshaling, unmarshaling, and field access.
//!
//! The engine never inspects caller structs directly. A [`Model`]
//! implementation supplies the schema descriptor plus value conversion in
//! both directions, which is everything compilation and execution need.

use dynaquery_model::{AttributeValue, Item, Key};

use crate::error::KeyError;
use crate::schema::SchemaDescriptor;

/// Errors produced while converting between models and wire items.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A required attribute was absent from the wire item.
    #[error("missing attribute {name}")]
    MissingAttribute {
        /// Wire name of the absent attribute.
        name: String,
    },
    /// An attribute carried an unexpected wire type.
    #[error("attribute {name} has type {found}, expected {expected}")]
    TypeMismatch {
        /// Wire name of the attribute.
        name: String,
        /// Expected wire type tag.
        expected: &'static str,
        /// Actual wire type tag.
        found: &'static str,
    },
    /// Implementation-specific conversion failure.
    #[error("{message}")]
    Other {
        /// Explanation.
        message: String,
    },
}

impl CodecError {
    /// Builds a [`CodecError::MissingAttribute`].
    #[must_use]
    pub fn missing(name: impl Into<String>) -> Self {
        Self::MissingAttribute { name: name.into() }
    }

    /// Builds a [`CodecError::TypeMismatch`] from the offending value.
    #[must_use]
    pub fn mismatch(name: impl Into<String>, expected: &'static str, found: &AttributeValue) -> Self {
        Self::TypeMismatch {
            name: name.into(),
            expected,
            found: found.type_tag(),
        }
    }

    /// Builds a [`CodecError::Other`].
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

/// A typed record the engine can query and mutate.
///
/// `attribute` drives key extraction and update field auto-discovery: it
/// must return `None` for fields that are unset or hold their zero value,
/// so they are skipped when changed fields are discovered.
pub trait Model: Sized + Send + Sync {
    /// Returns the static schema descriptor for this type.
    fn schema() -> &'static SchemaDescriptor;

    /// Marshals the whole record into a wire item.
    fn to_item(&self) -> Result<Item, CodecError>;

    /// Unmarshals a record from a wire item.
    fn from_item(item: &Item) -> Result<Self, CodecError>;

    /// Reads one logical field as a wire value; `None` when unset or zero.
    fn attribute(&self, field: &str) -> Option<AttributeValue>;
}

/// Extracts the primary key of `model` as a wire key map.
///
/// Fails with [`KeyError::Incomplete`] when a key attribute is unset.
pub fn key_of<M: Model>(model: &M) -> Result<Key, KeyError> {
    let schema = M::schema();
    let primary = schema.primary_key();
    let mut key = Key::new();

    let mut put = |wire: &str| -> Result<(), KeyError> {
        let field = schema.logical_name(wire);
        let value = model.attribute(field).ok_or_else(|| KeyError::Incomplete {
            missing: wire.to_owned(),
        })?;
        key.insert(wire.to_owned(), value);
        Ok(())
    };

    put(&primary.partition_key)?;
    if let Some(sort) = &primary.sort_key {
        put(sort)?;
    }
    Ok(key)
}
