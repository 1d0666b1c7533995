//! Query matcher for the MongoDB-style filter dialect.
//!
//! A filter document is compiled once per call into a [`Filter`] tree and then
//! evaluated against each candidate document of a full table scan. There is no
//! index: every call visits every row of the collection.
//!
//! Supported clauses:
//!
//! | clause                         | meaning                                     |
//! |--------------------------------|---------------------------------------------|
//! | `{"k": literal}`               | equality (numbers compare numerically)      |
//! | `{"k": {"$in": [..]}}`         | membership                                  |
//! | `{"k": {"$lt"/"$lte"/"$gt"/"$gte": v}}` | ordering on numbers, strings, bools |
//! | `{"k": {"$exists": bool}}`     | present and non-null / absent or null       |
//! | `{"k": {"$regex": p, "$options": "i"}}` | unanchored pattern search          |
//! | `{"$or": [f1, f2, ..]}`        | at least one sub-filter, AND siblings       |
//!
//! A key missing from the document fails its clause, except for the exact
//! clause `{"$exists": false}`.

use std::cmp::Ordering;

use regex::{Regex, RegexBuilder};
use serde_json::Value;

use crate::error::QueryError;
use crate::types::{Document, type_name};

/// A compiled filter: the conjunction of its clauses.
#[derive(Debug, Clone)]
pub struct Filter {
    clauses: Vec<Clause>,
}

#[derive(Debug, Clone)]
enum Clause {
    Field { key: String, condition: Condition },
    Or(Vec<Filter>),
    /// A malformed clause tolerated in lenient mode; never matches.
    Never,
}

#[derive(Debug, Clone)]
enum Condition {
    Eq(Value),
    Ops(Vec<FieldOp>),
}

#[derive(Debug, Clone)]
enum FieldOp {
    In(Vec<Value>),
    Lt(Value),
    Lte(Value),
    Gt(Value),
    Gte(Value),
    Exists(bool),
    Regex(Regex),
    Never,
}

impl Filter {
    /// A filter matching every document.
    pub fn all() -> Self {
        Self {
            clauses: Vec::new(),
        }
    }

    /// Compile a filter document.
    ///
    /// `null` is the empty filter. In lenient mode every malformed clause
    /// compiles to a clause that never matches; in strict mode it is an error.
    pub fn parse(filter: &Value, strict: bool) -> Result<Self, QueryError> {
        match filter {
            Value::Null => Ok(Self::all()),
            Value::Object(map) => {
                let mut clauses = Vec::with_capacity(map.len());
                for (key, value) in map {
                    clauses.push(parse_clause(key, value, strict)?);
                }
                Ok(Self { clauses })
            }
            other if strict => Err(QueryError::NotADocument(type_name(other))),
            _ => Ok(Self {
                clauses: vec![Clause::Never],
            }),
        }
    }

    /// Evaluate this filter against a document.
    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses.iter().all(|clause| clause.matches(doc))
    }

    /// Top-level equality clauses, used to seed an upserted document.
    /// Operator clauses and `$or` contribute nothing.
    pub fn equality_seed(&self) -> Document {
        let mut seed = Document::new();
        for clause in &self.clauses {
            if let Clause::Field {
                key,
                condition: Condition::Eq(value),
            } = clause
            {
                seed.insert(key.clone(), value.clone());
            }
        }
        seed
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

/// Lenient one-shot match of `doc` against a filter document.
pub fn matches(doc: &Document, filter: &Value) -> bool {
    Filter::parse(filter, false).is_ok_and(|f| f.matches(doc))
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

fn parse_clause(key: &str, value: &Value, strict: bool) -> Result<Clause, QueryError> {
    if key == "$or" {
        return match value {
            Value::Array(branches) => {
                let mut filters = Vec::with_capacity(branches.len());
                for branch in branches {
                    filters.push(Filter::parse(branch, strict)?);
                }
                Ok(Clause::Or(filters))
            }
            other => lenient(
                strict,
                Clause::Never,
                QueryError::InvalidOperand {
                    operator: "$or".to_string(),
                    message: format!("expected an array, got {}", type_name(other)),
                },
            ),
        };
    }
    if key.starts_with('$') {
        return lenient(strict, Clause::Never, QueryError::UnknownOperator(key.to_string()));
    }

    let condition = match value {
        Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
            Condition::Ops(parse_ops(ops, strict)?)
        }
        literal => Condition::Eq(literal.clone()),
    };
    Ok(Clause::Field {
        key: key.to_string(),
        condition,
    })
}

fn parse_ops(
    ops: &serde_json::Map<String, Value>,
    strict: bool,
) -> Result<Vec<FieldOp>, QueryError> {
    let mut parsed = Vec::with_capacity(ops.len());
    for (op, operand) in ops {
        let field_op = match op.as_str() {
            "$in" => match operand {
                Value::Array(items) => FieldOp::In(items.clone()),
                other => lenient(
                    strict,
                    FieldOp::Never,
                    QueryError::InvalidOperand {
                        operator: "$in".to_string(),
                        message: format!("expected an array, got {}", type_name(other)),
                    },
                )?,
            },
            "$lt" => FieldOp::Lt(operand.clone()),
            "$lte" => FieldOp::Lte(operand.clone()),
            "$gt" => FieldOp::Gt(operand.clone()),
            "$gte" => FieldOp::Gte(operand.clone()),
            "$exists" => FieldOp::Exists(truthy(operand)),
            "$regex" => {
                let options = ops.get("$options");
                match compile_regex(operand, options) {
                    Ok(re) => FieldOp::Regex(re),
                    Err(e) => lenient(strict, FieldOp::Never, e)?,
                }
            }
            // Consumed by $regex; alone it has no effect.
            "$options" => continue,
            unknown => lenient(
                strict,
                FieldOp::Never,
                QueryError::UnknownOperator(unknown.to_string()),
            )?,
        };
        parsed.push(field_op);
    }
    Ok(parsed)
}

fn compile_regex(pattern: &Value, options: Option<&Value>) -> Result<Regex, QueryError> {
    let invalid = |message: String| QueryError::InvalidOperand {
        operator: "$regex".to_string(),
        message,
    };

    let Value::String(pattern) = pattern else {
        return Err(invalid(format!(
            "expected a string pattern, got {}",
            type_name(pattern)
        )));
    };

    let mut builder = RegexBuilder::new(pattern);
    match options {
        None | Some(Value::Null) => {}
        Some(Value::String(flags)) => {
            for flag in flags.chars() {
                match flag {
                    'i' => builder.case_insensitive(true),
                    'm' => builder.multi_line(true),
                    's' => builder.dot_matches_new_line(true),
                    'x' => builder.ignore_whitespace(true),
                    other => return Err(invalid(format!("unsupported option '{other}'"))),
                };
            }
        }
        Some(other) => {
            return Err(invalid(format!(
                "$options must be a string, got {}",
                type_name(other)
            )));
        }
    }
    builder.build().map_err(|e| invalid(e.to_string()))
}

/// In strict mode surface `err`; otherwise degrade to `fallback`.
fn lenient<T>(strict: bool, fallback: T, err: QueryError) -> Result<T, QueryError> {
    if strict { Err(err) } else { Ok(fallback) }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

impl Clause {
    fn matches(&self, doc: &Document) -> bool {
        match self {
            Clause::Field { key, condition } => match doc.get(key) {
                Some(value) => condition.matches(value),
                None => condition.matches_missing(),
            },
            Clause::Or(branches) => branches.iter().any(|f| f.matches(doc)),
            Clause::Never => false,
        }
    }
}

impl Condition {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Condition::Eq(expected) => values_equal(value, expected),
            Condition::Ops(ops) => ops.iter().all(|op| op.matches(value)),
        }
    }

    fn matches_missing(&self) -> bool {
        matches!(self, Condition::Ops(ops) if matches!(ops.as_slice(), [FieldOp::Exists(false)]))
    }
}

impl FieldOp {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldOp::In(items) => items.iter().any(|item| values_equal(value, item)),
            FieldOp::Lt(bound) => compare_values(value, bound) == Some(Ordering::Less),
            FieldOp::Lte(bound) => matches!(
                compare_values(value, bound),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FieldOp::Gt(bound) => compare_values(value, bound) == Some(Ordering::Greater),
            FieldOp::Gte(bound) => matches!(
                compare_values(value, bound),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FieldOp::Exists(expected) => !value.is_null() == *expected,
            FieldOp::Regex(re) => value.as_str().is_some_and(|s| re.is_match(s)),
            FieldOp::Never => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Value helpers
// ---------------------------------------------------------------------------

/// Structural equality where numbers compare by value (`1 == 1.0`).
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => {
            compare_values(left, right) == Some(Ordering::Equal)
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|w| values_equal(v, w)))
        }
        _ => left == right,
    }
}

/// Compare two JSON values, returning an ordering if the types are comparable.
///
/// - Numbers: exact for integers, otherwise compared as f64
/// - Strings: compared lexicographically
/// - Booleans: false < true
/// - Anything else, including null and mismatched types: `None`
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
                Some(x.cmp(&y))
            } else if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
                Some(x.cmp(&y))
            } else {
                a.as_f64()?.partial_cmp(&b.as_f64()?)
            }
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Truthiness of an operand such as `$exists: 1`.
fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
