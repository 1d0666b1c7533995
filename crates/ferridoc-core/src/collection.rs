//! Async collection handle: the CRUD surface over one collection.
//!
//! Every call compiles its filter and update up front, then takes the
//! collection's lock and holds it for the whole scan-match-mutate-persist
//! sequence, which runs on a pooled connection in a blocking worker. Writes
//! happen inside a single `BEGIN IMMEDIATE` transaction.

use std::sync::Arc;

use rusqlite::{Connection, TransactionBehavior};
use serde_json::Value;
use tracing::debug;

use crate::cursor::Cursor;
use crate::error::{Error, QueryError};
use crate::filter::Filter;
use crate::storage::{ConnectionPool, TableRef};
use crate::store::CollectionState;
use crate::types::{
    DeleteResult, Document, InsertManyResult, InsertOneResult, UpdateResult, type_name,
};
use crate::update::Update;

/// Handle to one collection. Cheap to clone; all clones share the same lock.
#[derive(Clone)]
pub struct Collection {
    pool: ConnectionPool,
    pub(crate) state: Arc<CollectionState>,
    strict: bool,
}

impl Collection {
    pub(crate) fn new(pool: ConnectionPool, state: Arc<CollectionState>, strict: bool) -> Self {
        Self { pool, state, strict }
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Whether this collection lives in the shared generic table.
    pub fn is_generic(&self) -> bool {
        self.state.table.schema().is_generic()
    }

    /// Switch this handle between lenient and strict dialect checking.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// First matching document in storage order.
    pub async fn find_one(&self, filter: &Value) -> Result<Option<Document>, Error> {
        let filter = self.compile_filter(filter)?;
        let mut found = self
            .with_table(move |conn, table| table.collect(conn, Some(1), |doc| filter.matches(doc)))
            .await?;
        debug!(collection = %self.name(), found = !found.is_empty(), "find_one");
        Ok(found.pop().map(|(_, doc)| doc))
    }

    /// Every matching document, materialized into a cursor.
    pub async fn find(&self, filter: &Value) -> Result<Cursor, Error> {
        let filter = self.compile_filter(filter)?;
        let found = self
            .with_table(move |conn, table| table.collect(conn, None, |doc| filter.matches(doc)))
            .await?;
        debug!(collection = %self.name(), matched = found.len(), "find");
        Ok(Cursor::new(found.into_iter().map(|(_, doc)| doc).collect()))
    }

    pub async fn count_documents(&self, filter: &Value) -> Result<u64, Error> {
        let filter = self.compile_filter(filter)?;
        let count = self
            .with_table(move |conn, table| {
                let mut count = 0u64;
                table.scan(conn, |_, doc| {
                    if filter.matches(&doc) {
                        count += 1;
                    }
                    std::ops::ControlFlow::Continue(())
                })?;
                Ok(count)
            })
            .await?;
        debug!(collection = %self.name(), count, "count_documents");
        Ok(count)
    }

    pub async fn exists(&self, filter: &Value) -> Result<bool, Error> {
        Ok(self.find_one(filter).await?.is_some())
    }

    /// Insert one document and return its identifying key.
    pub async fn insert_one(&self, document: Value) -> Result<InsertOneResult, Error> {
        let doc = into_document(document)?;
        let inserted_id = self
            .with_table(move |conn, table| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let id = table.insert(&tx, &doc)?;
                tx.commit()?;
                Ok(id)
            })
            .await?;
        debug!(collection = %self.name(), id = %inserted_id, "insert_one");
        Ok(InsertOneResult { inserted_id })
    }

    /// Insert several documents in one transaction. Either all are stored or,
    /// on a storage error, none are.
    pub async fn insert_many(&self, documents: Vec<Value>) -> Result<InsertManyResult, Error> {
        let docs = documents
            .into_iter()
            .map(into_document)
            .collect::<Result<Vec<_>, _>>()?;
        let inserted_ids = self
            .with_table(move |conn, table| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let mut ids = Vec::with_capacity(docs.len());
                for doc in &docs {
                    ids.push(table.insert(&tx, doc)?);
                }
                tx.commit()?;
                Ok(ids)
            })
            .await?;
        debug!(collection = %self.name(), inserted = inserted_ids.len(), "insert_many");
        Ok(InsertManyResult { inserted_ids })
    }

    /// Update the first match. With `upsert`, a miss inserts the filter's
    /// equality clauses with the update applied.
    pub async fn update_one(
        &self,
        filter: &Value,
        update: &Value,
        upsert: bool,
    ) -> Result<UpdateResult, Error> {
        self.update(filter, update, upsert, Some(1), "update_one").await
    }

    /// Update every match; upserts like [`Collection::update_one`] on a miss.
    pub async fn update_many(
        &self,
        filter: &Value,
        update: &Value,
        upsert: bool,
    ) -> Result<UpdateResult, Error> {
        self.update(filter, update, upsert, None, "update_many").await
    }

    pub async fn delete_one(&self, filter: &Value) -> Result<DeleteResult, Error> {
        self.delete(filter, Some(1), "delete_one").await
    }

    pub async fn delete_many(&self, filter: &Value) -> Result<DeleteResult, Error> {
        self.delete(filter, None, "delete_many").await
    }

    async fn update(
        &self,
        filter: &Value,
        update: &Value,
        upsert: bool,
        limit: Option<usize>,
        op: &'static str,
    ) -> Result<UpdateResult, Error> {
        let filter = self.compile_filter(filter)?;
        let update = Update::parse(update, self.strict)?;

        let result = self
            .with_table(move |conn, table| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let matched = table.collect(&tx, limit, |doc| filter.matches(doc))?;

                let mut result = UpdateResult {
                    matched_count: matched.len() as u64,
                    modified_count: 0,
                    upserted_id: None,
                };
                if matched.is_empty() {
                    if upsert {
                        let mut seed = filter.equality_seed();
                        update.apply_in_place(&mut seed)?;
                        result.upserted_id = Some(table.insert(&tx, &seed)?);
                    }
                } else {
                    for (rowid, doc) in &matched {
                        let updated = update.apply(doc)?;
                        table.update(&tx, *rowid, &updated)?;
                        result.modified_count += 1;
                    }
                }
                tx.commit()?;
                Ok(result)
            })
            .await?;

        debug!(
            collection = %self.name(),
            matched = result.matched_count,
            upserted = result.upserted_id.is_some(),
            "{op}"
        );
        Ok(result)
    }

    async fn delete(
        &self,
        filter: &Value,
        limit: Option<usize>,
        op: &'static str,
    ) -> Result<DeleteResult, Error> {
        let filter = self.compile_filter(filter)?;
        let deleted_count = self
            .with_table(move |conn, table| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let matched = table.collect(&tx, limit, |doc| filter.matches(doc))?;
                for (rowid, _) in &matched {
                    table.delete(&tx, *rowid)?;
                }
                tx.commit()?;
                Ok(matched.len() as u64)
            })
            .await?;
        debug!(collection = %self.name(), deleted = deleted_count, "{op}");
        Ok(DeleteResult { deleted_count })
    }

    fn compile_filter(&self, filter: &Value) -> Result<Filter, QueryError> {
        Filter::parse(filter, self.strict)
    }

    /// Run `f` against this collection's table while holding its lock.
    ///
    /// The lock guard moves into the worker, so dropping the returned future
    /// does not release the lock before `f` has finished.
    async fn with_table<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Connection, &TableRef) -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        let guard = Arc::clone(&self.state.lock).lock_owned().await;
        let state = Arc::clone(&self.state);
        self.pool
            .run(move |conn| {
                let _guard = guard;
                f(conn, &state.table)
            })
            .await
    }
}

fn into_document(value: Value) -> Result<Document, QueryError> {
    match value {
        Value::Object(doc) => Ok(doc),
        other => Err(QueryError::NotADocument(type_name(&other))),
    }
}
