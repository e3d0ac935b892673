//! Opaque pagination cursors.
//!
//! A cursor wraps the store's last evaluated key together with the index
//! and sort direction it was produced under, serialized as JSON and
//! base64url-encoded without padding. Key attributes serialize through a
//! sorted map, so the same cursor state always encodes to the same bytes
//! regardless of map iteration order.
//!
//! The empty string means "no cursor": encoding an empty key yields `""`
//! and decoding `""` yields `None`.

use std::collections::BTreeMap;

use dynaquery_model::{AttributeValue, Key, SortDirection};
use serde::{Deserialize, Serialize};

/// Errors produced while encoding or decoding cursors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CursorError {
    /// The token is not valid base64url.
    #[error("cursor is not valid base64")]
    InvalidBase64(#[source] base64::DecodeError),
    /// The decoded bytes are not a valid cursor payload.
    #[error("cursor payload is malformed: {detail}")]
    InvalidPayload {
        /// Parser failure description.
        detail: String,
    },
    /// One key attribute failed to decode.
    #[error("cursor key {key} does not decode: {detail}")]
    InvalidKeyValue {
        /// Name of the offending key attribute.
        key: String,
        /// Parser failure description.
        detail: String,
    },
    /// The payload carried no last evaluated key.
    #[error("cursor payload has no last evaluated key")]
    EmptyKey,
    /// A key attribute failed to serialize.
    #[error("cursor key {key} does not serialize: {detail}")]
    Serialize {
        /// Name of the offending key attribute.
        key: String,
        /// Serializer failure description.
        detail: String,
    },
}

/// Resumption point for a paginated read.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    /// Key of the last item the previous page evaluated.
    pub last_evaluated_key: Key,
    /// Index the previous page ran against, `None` for the table itself.
    pub index_name: Option<String>,
    /// Sort direction of the previous page.
    pub sort_direction: SortDirection,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CursorPayload {
    last_evaluated_key: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    index_name: Option<String>,
    sort_direction: SortDirection,
}

impl Cursor {
    /// Creates a cursor over the table itself, ascending.
    #[must_use]
    pub fn new(last_evaluated_key: Key) -> Self {
        Self {
            last_evaluated_key,
            index_name: None,
            sort_direction: SortDirection::Asc,
        }
    }

    /// Records the index the page ran against.
    #[must_use]
    pub fn with_index_name(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = Some(index_name.into());
        self
    }

    /// Records the page's sort direction.
    #[must_use]
    pub fn with_sort_direction(mut self, direction: SortDirection) -> Self {
        self.sort_direction = direction;
        self
    }

    /// Encodes the cursor as a base64url token.
    ///
    /// An empty last evaluated key encodes to the empty string.
    pub fn encode(&self) -> Result<String, CursorError> {
        if self.last_evaluated_key.is_empty() {
            return Ok(String::new());
        }
        let mut key = BTreeMap::new();
        for (name, value) in &self.last_evaluated_key {
            let encoded =
                serde_json::to_value(value).map_err(|e| CursorError::Serialize {
                    key: name.clone(),
                    detail: e.to_string(),
                })?;
            key.insert(name.clone(), encoded);
        }
        let payload = CursorPayload {
            last_evaluated_key: key,
            index_name: self.index_name.clone(),
            sort_direction: self.sort_direction,
        };
        let json = serde_json::to_vec(&payload).map_err(|e| CursorError::InvalidPayload {
            detail: e.to_string(),
        })?;
        Ok(b64_encode(&json))
    }

    /// Decodes a token produced by [`Cursor::encode`].
    ///
    /// The empty string decodes to `None`. Decode failures name the
    /// offending key attribute where one exists.
    pub fn decode(token: &str) -> Result<Option<Self>, CursorError> {
        if token.is_empty() {
            return Ok(None);
        }
        let bytes = b64_decode(token)?;
        let payload: CursorPayload =
            serde_json::from_slice(&bytes).map_err(|e| CursorError::InvalidPayload {
                detail: e.to_string(),
            })?;
        if payload.last_evaluated_key.is_empty() {
            return Err(CursorError::EmptyKey);
        }
        let mut key = Key::new();
        for (name, value) in payload.last_evaluated_key {
            let attr: AttributeValue =
                serde_json::from_value(value).map_err(|e| CursorError::InvalidKeyValue {
                    key: name.clone(),
                    detail: e.to_string(),
                })?;
            key.insert(name, attr);
        }
        Ok(Some(Self {
            last_evaluated_key: key,
            index_name: payload.index_name,
            sort_direction: payload.sort_direction,
        }))
    }
}

fn b64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn b64_decode(token: &str) -> Result<Vec<u8>, CursorError> {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(token)
        .map_err(CursorError::InvalidBase64)
}
