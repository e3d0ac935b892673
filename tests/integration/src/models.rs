//! Typed models the end-to-end tests run against.

use std::sync::LazyLock;

use dynaquery_core::{AttributeMeta, CodecError, Model, SchemaDescriptor, TAG_CREATED_AT};
use dynaquery_model::{AttributeValue, Item};

fn string(item: &Item, name: &str) -> String {
    item.get(name)
        .and_then(AttributeValue::as_s)
        .unwrap_or_default()
        .to_owned()
}

fn int(item: &Item, name: &str) -> i64 {
    item.get(name).and_then(AttributeValue::as_i64).unwrap_or_default()
}

/// A customer order keyed by id and creation time, with a
/// customer-partitioned secondary index and an optimistic-lock version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: String,
    pub created: i64,
    pub customer: String,
    pub status: String,
    pub amount: i64,
    pub note: String,
    pub version: i64,
}

impl Order {
    /// Builds an order with version 1 and an empty note.
    #[must_use]
    pub fn new(id: &str, created: i64, customer: &str, status: &str, amount: i64) -> Self {
        Self {
            id: id.to_owned(),
            created,
            customer: customer.to_owned(),
            status: status.to_owned(),
            amount,
            note: String::new(),
            version: 1,
        }
    }
}

static ORDER_SCHEMA: LazyLock<SchemaDescriptor> = LazyLock::new(|| {
    SchemaDescriptor::builder("orders")
        .partition_key("id")
        .sort_key("created")
        .attribute(AttributeMeta::new("id").with_wire_name("order_id"))
        .attribute(AttributeMeta::new("created").with_tag(TAG_CREATED_AT))
        .attribute(AttributeMeta::new("customer"))
        .attribute(AttributeMeta::new("status"))
        .attribute(AttributeMeta::new("amount"))
        .attribute(AttributeMeta::new("note"))
        .attribute(AttributeMeta::new("version"))
        .global_index("customer-index", "customer", Some("created"))
        .version_field("version")
        .build()
        .unwrap()
});

impl Model for Order {
    fn schema() -> &'static SchemaDescriptor {
        &ORDER_SCHEMA
    }

    fn to_item(&self) -> Result<Item, CodecError> {
        let mut item = Item::new();
        item.insert("order_id".to_owned(), AttributeValue::from(self.id.as_str()));
        for field in ["created", "customer", "status", "amount", "note", "version"] {
            if let Some(value) = self.attribute(field) {
                item.insert(field.to_owned(), value);
            }
        }
        Ok(item)
    }

    fn from_item(item: &Item) -> Result<Self, CodecError> {
        let id = item
            .get("order_id")
            .and_then(AttributeValue::as_s)
            .ok_or_else(|| CodecError::missing("order_id"))?
            .to_owned();
        Ok(Self {
            id,
            created: int(item, "created"),
            customer: string(item, "customer"),
            status: string(item, "status"),
            amount: int(item, "amount"),
            note: string(item, "note"),
            version: int(item, "version"),
        })
    }

    fn attribute(&self, field: &str) -> Option<AttributeValue> {
        match field {
            "id" => (!self.id.is_empty()).then(|| AttributeValue::from(self.id.as_str())),
            "created" => (self.created != 0).then(|| AttributeValue::number(self.created)),
            "customer" => {
                (!self.customer.is_empty()).then(|| AttributeValue::from(self.customer.as_str()))
            }
            "status" => {
                (!self.status.is_empty()).then(|| AttributeValue::from(self.status.as_str()))
            }
            "amount" => (self.amount != 0).then(|| AttributeValue::number(self.amount)),
            "note" => (!self.note.is_empty()).then(|| AttributeValue::from(self.note.as_str())),
            "version" => (self.version != 0).then(|| AttributeValue::number(self.version)),
            _ => None,
        }
    }
}
