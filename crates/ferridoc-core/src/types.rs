//! Core types: documents and the result objects returned by CRUD calls.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A flat document: string keys mapped to scalars, lists, or nested maps.
///
/// Key order is insertion order (`serde_json`'s `preserve_order`).
pub type Document = Map<String, Value>;

/// Result of `insert_one`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertOneResult {
    /// The new document's identifying key: the caller-supplied natural key,
    /// or the engine-assigned surrogate id.
    pub inserted_id: Value,
}

/// Result of `insert_many`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertManyResult {
    pub inserted_ids: Vec<Value>,
}

/// Result of `update_one` / `update_many`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateResult {
    pub matched_count: u64,
    /// Number of matched documents rewritten. A matched document is always
    /// rewritten, even when the update leaves it unchanged.
    pub modified_count: u64,
    /// Id of the document created by an upsert.
    pub upserted_id: Option<Value>,
}

/// Result of `delete_one` / `delete_many`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

/// Return a human-readable type name for a JSON value.
pub fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
