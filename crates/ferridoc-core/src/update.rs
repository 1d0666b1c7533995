//! Update operators: `$set`, `$inc`, `$push`, `$pull`, `$addToSet`, `$unset`.
//!
//! An update document is compiled into a list of [`UpdateOp`]s in the order
//! its operator keys appear, then applied to a copy of the target document.
//! Keys are top-level: `"a.b"` names the literal key `a.b`.

use serde_json::{Number, Value};

use crate::error::QueryError;
use crate::filter::values_equal;
use crate::types::{Document, type_name};

/// An individual update action on one top-level key.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// Overwrite or add the key.
    Set { field: String, value: Value },
    /// Add `delta` to the current number; a missing key counts as 0.
    Inc { field: String, delta: Number },
    /// Append every value, creating the list if absent.
    Push { field: String, values: Vec<Value> },
    /// Remove every element equal to `value`.
    Pull { field: String, value: Value },
    /// Append each value not already present.
    AddToSet { field: String, values: Vec<Value> },
    /// Remove the key.
    Unset { field: String },
}

impl UpdateOp {
    pub fn field(&self) -> &str {
        match self {
            UpdateOp::Set { field, .. }
            | UpdateOp::Inc { field, .. }
            | UpdateOp::Push { field, .. }
            | UpdateOp::Pull { field, .. }
            | UpdateOp::AddToSet { field, .. }
            | UpdateOp::Unset { field } => field,
        }
    }
}

/// A compiled update document.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    ops: Vec<UpdateOp>,
    strict: bool,
}

impl Update {
    /// Compile an update document.
    ///
    /// Lenient mode skips unknown operators and malformed payloads; strict
    /// mode rejects them, and also rejects type mismatches when applied.
    pub fn parse(update: &Value, strict: bool) -> Result<Self, QueryError> {
        let map = match update {
            Value::Object(map) => map,
            other if strict => return Err(QueryError::NotADocument(type_name(other))),
            _ => {
                return Ok(Self {
                    ops: Vec::new(),
                    strict,
                });
            }
        };

        let mut ops = Vec::new();
        for (operator, payload) in map {
            let Some(fields) = payload.as_object() else {
                if strict {
                    return Err(QueryError::InvalidOperand {
                        operator: operator.clone(),
                        message: format!("expected an object, got {}", type_name(payload)),
                    });
                }
                continue;
            };
            match operator.as_str() {
                "$set" => {
                    for (field, value) in fields {
                        ops.push(UpdateOp::Set {
                            field: field.clone(),
                            value: value.clone(),
                        });
                    }
                }
                "$inc" => {
                    for (field, delta) in fields {
                        match delta {
                            Value::Number(n) => ops.push(UpdateOp::Inc {
                                field: field.clone(),
                                delta: n.clone(),
                            }),
                            other if strict => {
                                return Err(QueryError::InvalidOperand {
                                    operator: "$inc".to_string(),
                                    message: format!(
                                        "delta for '{field}' must be a number, got {}",
                                        type_name(other)
                                    ),
                                });
                            }
                            _ => {}
                        }
                    }
                }
                "$push" => {
                    for (field, value) in fields {
                        ops.push(UpdateOp::Push {
                            field: field.clone(),
                            values: each_values(value),
                        });
                    }
                }
                "$pull" => {
                    for (field, value) in fields {
                        ops.push(UpdateOp::Pull {
                            field: field.clone(),
                            value: value.clone(),
                        });
                    }
                }
                "$addToSet" => {
                    for (field, value) in fields {
                        ops.push(UpdateOp::AddToSet {
                            field: field.clone(),
                            values: each_values(value),
                        });
                    }
                }
                "$unset" => {
                    for field in fields.keys() {
                        ops.push(UpdateOp::Unset {
                            field: field.clone(),
                        });
                    }
                }
                unknown if strict => {
                    return Err(QueryError::UnknownOperator(unknown.to_string()));
                }
                _ => {}
            }
        }

        Ok(Self { ops, strict })
    }

    pub fn ops(&self) -> &[UpdateOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply to a copy of `doc`.
    pub fn apply(&self, doc: &Document) -> Result<Document, QueryError> {
        let mut updated = doc.clone();
        self.apply_in_place(&mut updated)?;
        Ok(updated)
    }

    /// Apply the actions in order. A type mismatch leaves that key unchanged,
    /// or fails the whole update in strict mode.
    pub fn apply_in_place(&self, doc: &mut Document) -> Result<(), QueryError> {
        for op in &self.ops {
            if let Err(e) = apply_op(doc, op)
                && self.strict
            {
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Lenient one-shot application of an update document.
pub fn apply(doc: &Document, update: &Value) -> Document {
    match Update::parse(update, false) {
        Ok(compiled) => compiled.apply(doc).unwrap_or_else(|_| doc.clone()),
        Err(_) => doc.clone(),
    }
}

/// `{"$each": [..]}` expands to its members; anything else is one value.
fn each_values(value: &Value) -> Vec<Value> {
    match value.as_object().and_then(|m| m.get("$each")) {
        Some(Value::Array(items)) => items.clone(),
        _ => vec![value.clone()],
    }
}

fn apply_op(doc: &mut Document, op: &UpdateOp) -> Result<(), QueryError> {
    match op {
        UpdateOp::Set { field, value } => {
            doc.insert(field.clone(), value.clone());
        }
        UpdateOp::Inc { field, delta } => {
            let current = doc.get(field).unwrap_or(&Value::Null);
            let sum = match current {
                Value::Null if !doc.contains_key(field) => Some(Value::Number(delta.clone())),
                Value::Number(n) => add_numbers(n, delta),
                other => return Err(mismatch(field, "$inc", "a number", other)),
            };
            let sum = sum.ok_or_else(|| QueryError::TypeMismatch {
                field: field.clone(),
                message: "$inc result is not a finite number".to_string(),
            })?;
            doc.insert(field.clone(), sum);
        }
        UpdateOp::Push { field, values } => {
            let list = list_entry(doc, field, "$push")?;
            list.extend(values.iter().cloned());
        }
        UpdateOp::Pull { field, value } => {
            if let Some(Value::Array(list)) = doc.get_mut(field) {
                list.retain(|item| !values_equal(item, value));
            }
        }
        UpdateOp::AddToSet { field, values } => {
            let list = list_entry(doc, field, "$addToSet")?;
            for value in values {
                if !list.iter().any(|item| values_equal(item, value)) {
                    list.push(value.clone());
                }
            }
        }
        UpdateOp::Unset { field } => {
            doc.shift_remove(field);
        }
    }
    Ok(())
}

/// The list stored at `field`, created empty if the key is absent.
fn list_entry<'a>(
    doc: &'a mut Document,
    field: &str,
    operator: &str,
) -> Result<&'a mut Vec<Value>, QueryError> {
    let entry = doc
        .entry(field.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    match entry {
        Value::Array(list) => Ok(list),
        other => Err(mismatch(field, operator, "a list", other)),
    }
}

/// Integer addition while it fits, float addition otherwise.
fn add_numbers(a: &Number, b: &Number) -> Option<Value> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64())
        && let Some(sum) = x.checked_add(y)
    {
        return Some(Value::from(sum));
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64())
        && let Some(sum) = x.checked_add(y)
    {
        return Some(Value::from(sum));
    }
    Number::from_f64(a.as_f64()? + b.as_f64()?).map(Value::Number)
}

fn mismatch(field: &str, operator: &str, expected: &str, actual: &Value) -> QueryError {
    QueryError::TypeMismatch {
        field: field.to_string(),
        message: format!(
            "{operator} requires {expected}, found {}",
            type_name(actual)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        match v {
            Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }

    fn run(start: Value, update: Value) -> Value {
        let compiled = Update::parse(&update, true).unwrap();
        Value::Object(compiled.apply(&doc(start)).unwrap())
    }

    // -----------------------------------------------------------------------
    // $set / $unset
    // -----------------------------------------------------------------------

    #[test]
    fn test_set_adds_and_overwrites() {
        let out = run(json!({"a": 1}), json!({"$set": {"a": 2, "b": "x"}}));
        assert_eq!(out, json!({"a": 2, "b": "x"}));
    }

    #[test]
    fn test_unset_removes_key() {
        let out = run(json!({"a": 1, "b": null}), json!({"$unset": {"a": "", "b": 1, "zz": 1}}));
        assert_eq!(out, json!({}));
    }

    // -----------------------------------------------------------------------
    // $inc
    // -----------------------------------------------------------------------

    #[test]
    fn test_inc_existing_and_missing() {
        let out = run(json!({"n": 1}), json!({"$inc": {"n": 2, "m": 5}}));
        assert_eq!(out, json!({"n": 3, "m": 5}));
    }

    #[test]
    fn test_inc_keeps_integers() {
        let out = run(json!({"n": 1}), json!({"$inc": {"n": -1}}));
        assert_eq!(out["n"], 0);
        assert!(out["n"].is_i64());
    }

    #[test]
    fn test_inc_float() {
        let out = run(json!({"n": 1}), json!({"$inc": {"n": 0.5}}));
        assert_eq!(out["n"], 1.5);
    }

    #[test]
    fn test_inc_overflow_falls_back_to_float() {
        let out = run(json!({"n": i64::MAX}), json!({"$inc": {"n": i64::MAX}}));
        assert!(out["n"].is_u64());
        let out = run(json!({"n": u64::MAX}), json!({"$inc": {"n": 1}}));
        assert!(out["n"].is_f64());
    }

    #[test]
    fn test_inc_on_non_number() {
        let start = doc(json!({"n": "five", "k": 1}));
        let lenient = Update::parse(&json!({"$inc": {"n": 1, "k": 1}}), false).unwrap();
        assert_eq!(
            Value::Object(lenient.apply(&start).unwrap()),
            json!({"n": "five", "k": 2})
        );

        let strict = Update::parse(&json!({"$inc": {"n": 1}}), true).unwrap();
        assert!(matches!(
            strict.apply(&start),
            Err(QueryError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_inc_on_explicit_null() {
        let lenient = Update::parse(&json!({"$inc": {"n": 1}}), false).unwrap();
        let out = lenient.apply(&doc(json!({"n": null}))).unwrap();
        assert_eq!(out["n"], Value::Null);
    }

    // -----------------------------------------------------------------------
    // $push / $pull / $addToSet
    // -----------------------------------------------------------------------

    #[test]
    fn test_push_creates_and_appends() {
        let out = run(json!({}), json!({"$push": {"l": 1}}));
        assert_eq!(out, json!({"l": [1]}));
        let out = run(json!({"l": [1]}), json!({"$push": {"l": {"k": "v"}}}));
        assert_eq!(out, json!({"l": [1, {"k": "v"}]}));
    }

    #[test]
    fn test_push_each_then_pull() {
        let out = run(json!({}), json!({"$push": {"l": {"$each": ["a", "b"]}}}));
        assert_eq!(out, json!({"l": ["a", "b"]}));
        let out = run(out, json!({"$pull": {"l": "a"}}));
        assert_eq!(out, json!({"l": ["b"]}));
    }

    #[test]
    fn test_push_each_non_list_appends_map() {
        let out = run(json!({}), json!({"$push": {"l": {"$each": "a"}}}));
        assert_eq!(out, json!({"l": [{"$each": "a"}]}));
    }

    #[test]
    fn test_pull_removes_all_equal() {
        let out = run(json!({"l": [1, 2, 1.0, 3]}), json!({"$pull": {"l": 1}}));
        assert_eq!(out, json!({"l": [2, 3]}));
    }

    #[test]
    fn test_pull_noop_when_absent_or_not_list() {
        let out = run(json!({"s": "x"}), json!({"$pull": {"s": "x", "missing": 1}}));
        assert_eq!(out, json!({"s": "x"}));
    }

    #[test]
    fn test_add_to_set() {
        let out = run(json!({"l": ["a"]}), json!({"$addToSet": {"l": "a"}}));
        assert_eq!(out, json!({"l": ["a"]}));
        let out = run(json!({"l": ["a"]}), json!({"$addToSet": {"l": "b"}}));
        assert_eq!(out, json!({"l": ["a", "b"]}));
    }

    #[test]
    fn test_add_to_set_each_skips_duplicates() {
        let out = run(
            json!({"l": ["a", "b"]}),
            json!({"$addToSet": {"l": {"$each": ["b", "c", "c", "a"]}}}),
        );
        assert_eq!(out, json!({"l": ["a", "b", "c"]}));
    }

    #[test]
    fn test_push_onto_non_list() {
        let start = doc(json!({"l": 5}));
        let lenient = Update::parse(&json!({"$push": {"l": 1}}), false).unwrap();
        assert_eq!(lenient.apply(&start).unwrap()["l"], 5);
        let strict = Update::parse(&json!({"$addToSet": {"l": 1}}), true).unwrap();
        assert!(strict.apply(&start).is_err());
    }

    // -----------------------------------------------------------------------
    // Ordering and malformed input
    // -----------------------------------------------------------------------

    #[test]
    fn test_operators_apply_in_document_order() {
        let out = run(json!({}), json!({"$set": {"n": 10}, "$inc": {"n": 1}}));
        assert_eq!(out["n"], 11);
        let out = run(json!({}), json!({"$inc": {"n": 1}, "$set": {"n": 10}}));
        assert_eq!(out["n"], 10);
    }

    #[test]
    fn test_unknown_operator_ignored_when_lenient() {
        let update = json!({"$sett": {"a": 1}, "$set": {"b": 2}});
        let lenient = Update::parse(&update, false).unwrap();
        assert_eq!(lenient.ops().len(), 1);
        assert_eq!(
            Update::parse(&update, true).unwrap_err(),
            QueryError::UnknownOperator("$sett".to_string())
        );
    }

    #[test]
    fn test_bare_replacement_document_is_ignored() {
        let out = apply(&doc(json!({"a": 1})), &json!({"a": 2}));
        assert_eq!(Value::Object(out), json!({"a": 1}));
    }

    #[test]
    fn test_non_object_payload() {
        let lenient = Update::parse(&json!({"$set": 5}), false).unwrap();
        assert!(lenient.is_empty());
        assert!(matches!(
            Update::parse(&json!({"$set": 5}), true),
            Err(QueryError::InvalidOperand { .. })
        ));
    }

    #[test]
    fn test_apply_does_not_mutate_input() {
        let start = doc(json!({"n": 1}));
        let out = apply(&start, &json!({"$inc": {"n": 1}}));
        assert_eq!(start["n"], 1);
        assert_eq!(out["n"], 2);
    }
}
