//! Document codec: flat documents to `(columns, bucket)` and back.

use serde_json::{Map, Value};
use tracing::warn;

use crate::schema::CollectionSchema;
use crate::types::Document;

/// Storage form of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitDocument {
    /// One value per first-class field, in schema order.
    pub columns: Vec<(String, Value)>,
    /// Every other key.
    pub bucket: Map<String, Value>,
}

impl SplitDocument {
    pub fn column(&self, name: &str) -> Option<&Value> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// Partition a document into first-class column values and the bucket.
///
/// First-class keys are copied verbatim and absent ones take their declared
/// default. A key naming the bucket field whose value is a map is unpacked
/// into the bucket, so callers can pass pre-nested extension data. Values are
/// not type-checked.
pub fn split(schema: &CollectionSchema, doc: &Document) -> SplitDocument {
    let columns = schema
        .fields
        .iter()
        .map(|field| {
            let value = doc
                .get(&field.name)
                .cloned()
                .unwrap_or_else(|| field.default.clone());
            (field.name.clone(), value)
        })
        .collect();

    let mut bucket = Map::new();
    for (key, value) in doc {
        if schema.is_field(key) {
            continue;
        }
        match value {
            Value::Object(nested) if *key == schema.bucket => {
                for (k, v) in nested {
                    bucket.insert(k.clone(), v.clone());
                }
            }
            _ => {
                bucket.insert(key.clone(), value.clone());
            }
        }
    }

    SplitDocument { columns, bucket }
}

/// Rebuild the visible document from a stored row.
///
/// Bucket entries are layered over column values, so a bucket key sharing a
/// first-class field's name wins. Each such collision is logged.
pub fn merge(
    schema: &CollectionSchema,
    columns: Vec<(String, Value)>,
    bucket: Map<String, Value>,
) -> Document {
    let mut doc: Document = columns.into_iter().collect();
    for (key, value) in bucket {
        if let Some(column_value) = doc.get(&key) {
            warn!(
                collection = %schema.name,
                key = %key,
                column = %column_value,
                bucket = %value,
                "extension bucket key shadows first-class column"
            );
        }
        doc.insert(key, value);
    }
    doc
}
