//! Row-level access to one collection's table.
//!
//! A [`TableRef`] binds a schema to its physical table and, for generic
//! collections, to the collection name every statement is scoped by. All
//! functions here are synchronous and run on a pooled connection inside a
//! blocking worker.
//!
//! First-class values are stored by JSON type rather than declared type:
//! strings as TEXT, integers as INTEGER, floats as REAL, and booleans, lists,
//! maps and integers beyond `i64` as a BLOB of JSON. Reads decode by storage
//! class, so a value comes back exactly as it was written.

use std::ops::ControlFlow;
use std::sync::Arc;

use rusqlite::Connection;
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::codec;
use crate::error::{Error, StorageError};
use crate::schema::{CollectionSchema, FieldDef, GENERIC_SCOPE_COLUMN, KeyKind, quote_ident};
use crate::types::Document;

/// A collection's table, plus the scope for generic collections.
#[derive(Debug, Clone)]
pub(crate) struct TableRef {
    schema: Arc<CollectionSchema>,
    /// Generic collection name; `None` for declared collections.
    scope: Option<String>,
}

impl TableRef {
    pub(crate) fn declared(schema: Arc<CollectionSchema>) -> Self {
        Self {
            schema,
            scope: None,
        }
    }

    pub(crate) fn generic(schema: Arc<CollectionSchema>, collection: &str) -> Self {
        Self {
            schema,
            scope: Some(collection.to_string()),
        }
    }

    pub(crate) fn schema(&self) -> &CollectionSchema {
        &self.schema
    }

    /// Visit every row in insertion order, stopping when `visit` breaks.
    pub(crate) fn scan(
        &self,
        conn: &Connection,
        mut visit: impl FnMut(i64, Document) -> ControlFlow<()>,
    ) -> Result<(), Error> {
        let columns: Vec<String> = self
            .schema
            .column_names()
            .into_iter()
            .map(quote_ident)
            .collect();
        let mut sql = format!(
            "SELECT rowid, {} FROM {}",
            columns.join(", "),
            quote_ident(&self.schema.table)
        );
        if self.scope.is_some() {
            sql.push_str(&format!(" WHERE {} = ?1", quote_ident(GENERIC_SCOPE_COLUMN)));
        }
        sql.push_str(" ORDER BY rowid");

        let mut stmt = conn.prepare_cached(&sql)?;
        let mut rows = match &self.scope {
            Some(scope) => stmt.query([scope])?,
            None => stmt.query([])?,
        };

        let field_count = self.schema.fields.len();
        while let Some(row) = rows.next()? {
            let rowid: i64 = row.get(0)?;
            let mut values = Vec::with_capacity(field_count);
            for (i, field) in self.schema.fields.iter().enumerate() {
                let mut value = self.decode_column(row.get_ref(i + 1)?, &field.name)?;
                if i == 0 && value.is_null() && self.schema.key_kind == KeyKind::Flexible {
                    value = Value::from(rowid);
                }
                values.push((field.name.clone(), value));
            }
            let bucket = self.decode_bucket(row.get_ref(field_count + 1)?, rowid)?;
            let doc = codec::merge(&self.schema, values, bucket);
            if visit(rowid, doc).is_break() {
                break;
            }
        }
        Ok(())
    }

    /// Every `(rowid, document)` pair accepted by `keep`, at most `limit`.
    pub(crate) fn collect(
        &self,
        conn: &Connection,
        limit: Option<usize>,
        mut keep: impl FnMut(&Document) -> bool,
    ) -> Result<Vec<(i64, Document)>, Error> {
        let mut found = Vec::new();
        if limit == Some(0) {
            return Ok(found);
        }
        self.scan(conn, |rowid, doc| {
            if keep(&doc) {
                found.push((rowid, doc));
                if limit.is_some_and(|n| found.len() >= n) {
                    return ControlFlow::Break(());
                }
            }
            ControlFlow::Continue(())
        })?;
        Ok(found)
    }

    /// Insert a new row and return the document's identifying key.
    pub(crate) fn insert(&self, conn: &Connection, doc: &Document) -> Result<Value, Error> {
        let split = codec::split(&self.schema, doc);
        let mut names = Vec::with_capacity(split.columns.len() + 2);
        let mut params: Vec<SqlValue> = Vec::with_capacity(split.columns.len() + 2);

        for (field, (name, value)) in self.schema.fields.iter().zip(&split.columns) {
            names.push(quote_ident(name));
            params.push(self.encode_column(field, value));
        }
        if let Some(scope) = &self.scope {
            names.push(quote_ident(GENERIC_SCOPE_COLUMN));
            params.push(SqlValue::Text(scope.clone()));
        }
        names.push(quote_ident(&self.schema.bucket));
        params.push(SqlValue::Text(encode_bucket(split.bucket)));

        let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&self.schema.table),
            names.join(", "),
            placeholders.join(", ")
        );
        conn.prepare_cached(&sql)?
            .execute(rusqlite::params_from_iter(params))?;

        // A null key reads back as the rowid SQLite just assigned.
        match &split.columns[0].1 {
            Value::Null => Ok(Value::from(conn.last_insert_rowid())),
            key => Ok(key.clone()),
        }
    }

    /// Rewrite every column and the bucket of an existing row.
    pub(crate) fn update(&self, conn: &Connection, rowid: i64, doc: &Document) -> Result<(), Error> {
        let split = codec::split(&self.schema, doc);
        let mut assignments = Vec::with_capacity(split.columns.len() + 1);
        let mut params: Vec<SqlValue> = Vec::with_capacity(split.columns.len() + 2);

        for (i, (field, (name, value))) in self.schema.fields.iter().zip(&split.columns).enumerate() {
            // The key of an existing row is kept unless the update sets a new one.
            if i == 0 && value.is_null() {
                continue;
            }
            params.push(self.encode_column(field, value));
            assignments.push(format!("{} = ?{}", quote_ident(name), params.len()));
        }
        params.push(SqlValue::Text(encode_bucket(split.bucket)));
        assignments.push(format!(
            "{} = ?{}",
            quote_ident(&self.schema.bucket),
            params.len()
        ));
        params.push(SqlValue::Integer(rowid));

        let sql = format!(
            "UPDATE {} SET {} WHERE rowid = ?{}",
            quote_ident(&self.schema.table),
            assignments.join(", "),
            params.len()
        );
        conn.prepare_cached(&sql)?
            .execute(rusqlite::params_from_iter(params))?;
        Ok(())
    }

    pub(crate) fn delete(&self, conn: &Connection, rowid: i64) -> Result<(), Error> {
        let sql = format!(
            "DELETE FROM {} WHERE rowid = ?1",
            quote_ident(&self.schema.table)
        );
        conn.prepare_cached(&sql)?.execute([rowid])?;
        Ok(())
    }

    /// Convert a first-class value to the SQLite value that decodes back to
    /// it. Off-type values are kept as they are.
    fn encode_column(&self, field: &FieldDef, value: &Value) -> SqlValue {
        if !field.column_type.accepts(value) {
            debug!(
                table = %self.schema.table,
                column = %field.name,
                declared = ?field.column_type,
                "storing value of a different type than declared"
            );
        }
        match value {
            Value::Null => SqlValue::Null,
            Value::String(s) => SqlValue::Text(s.clone()),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Integer(i)
                } else if let (true, Some(f)) = (n.is_f64(), n.as_f64()) {
                    SqlValue::Real(f)
                } else {
                    SqlValue::Blob(n.to_string().into_bytes())
                }
            }
            other => SqlValue::Blob(other.to_string().into_bytes()),
        }
    }

    fn decode_column(&self, raw: ValueRef<'_>, column: &str) -> Result<Value, Error> {
        Ok(match raw {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::from(i),
            ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
            ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => {
                serde_json::from_slice(bytes).map_err(|source| StorageError::CorruptJson {
                    table: self.schema.table.clone(),
                    column: column.to_string(),
                    source,
                })?
            }
        })
    }

    fn decode_bucket(&self, raw: ValueRef<'_>, rowid: i64) -> Result<Map<String, Value>, Error> {
        let text = match raw {
            ValueRef::Null => return Ok(Map::new()),
            ValueRef::Text(bytes) => String::from_utf8_lossy(bytes),
            _ => {
                return Err(StorageError::BucketNotObject {
                    table: self.schema.table.clone(),
                    rowid,
                }
                .into());
            }
        };
        if text.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str(&text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(StorageError::BucketNotObject {
                table: self.schema.table.clone(),
                rowid,
            }
            .into()),
            Err(source) => Err(StorageError::CorruptJson {
                table: self.schema.table.clone(),
                column: self.schema.bucket.clone(),
                source,
            }
            .into()),
        }
    }
}

fn encode_bucket(bucket: Map<String, Value>) -> String {
    Value::Object(bucket).to_string()
}

/// Names of the columns of `table` as SQLite reports them, or `None` if the
/// table does not exist.
pub(crate) fn table_columns(conn: &Connection, table: &str) -> Result<Option<Vec<String>>, Error> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(if columns.is_empty() { None } else { Some(columns) })
}
