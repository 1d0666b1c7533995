//! Cursor over the materialized result of `find`.

use std::cmp::Ordering;
use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::filter::compare_values;
use crate::types::Document;

/// Sort direction; converts from the MongoDB convention `1` / `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl From<i32> for SortDirection {
    fn from(direction: i32) -> Self {
        if direction < 0 {
            SortDirection::Descending
        } else {
            SortDirection::Ascending
        }
    }
}

/// A sortable, limitable handle over matched documents.
///
/// All matches are loaded when the cursor is created; `sort`, `skip` and
/// `limit` reshape the buffered set and iteration drains it front to back.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    docs: VecDeque<Document>,
}

impl Cursor {
    pub fn new(docs: Vec<Document>) -> Self {
        Self { docs: docs.into() }
    }

    /// Stable sort on one key. Missing keys and nulls sort first, then
    /// numbers, strings, maps, lists and booleans.
    pub fn sort(mut self, key: &str, direction: impl Into<SortDirection>) -> Self {
        let direction = direction.into();
        self.docs.make_contiguous().sort_by(|a, b| {
            let ord = sort_order(a.get(key), b.get(key));
            match direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            }
        });
        self
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.docs.drain(..n.min(self.docs.len()));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.docs.truncate(n);
        self
    }

    /// Remaining documents, at most `max` of them.
    pub fn to_list(self, max: Option<usize>) -> Vec<Document> {
        let mut docs: Vec<Document> = self.docs.into();
        if let Some(max) = max {
            docs.truncate(max);
        }
        docs
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

impl Iterator for Cursor {
    type Item = Document;

    fn next(&mut self) -> Option<Document> {
        self.docs.pop_front()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.docs.len(), Some(self.docs.len()))
    }
}

impl ExactSizeIterator for Cursor {}

fn type_rank(v: Option<&Value>) -> u8 {
    match v {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}
