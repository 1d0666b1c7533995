use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::collection::Collection;
use crate::config::StoreConfig;
use crate::error::Error;
use crate::schema::{CollectionSchema, SchemaRegistry};
use crate::storage::{self, ConnectionPool, TableRef};

/// Per-collection state shared by every handle to the same collection.
pub(crate) struct CollectionState {
    pub(crate) name: String,
    pub(crate) table: TableRef,
    /// Serializes every operation on this collection. Shared so a blocking
    /// worker can own its guard until the work finishes.
    pub(crate) lock: Arc<tokio::sync::Mutex<()>>,
}

struct StoreInner {
    pool: ConnectionPool,
    registry: SchemaRegistry,
    generic: Arc<CollectionSchema>,
    collections: Mutex<HashMap<String, Arc<CollectionState>>>,
    config: StoreConfig,
}

/// The document store handle.
///
/// `Store` is cheaply clonable (`Arc`-based) and `Send + Sync`. It owns the
/// connection pool and the map from collection name to collection state;
/// build one at start-up and pass clones to whatever needs it.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Open a store with the standard set of declared collections.
    pub fn open(config: StoreConfig) -> Result<Self, Error> {
        Self::open_with_registry(config, SchemaRegistry::standard()?)
    }

    /// Open an in-memory store with the standard declared collections.
    pub fn open_in_memory() -> Result<Self, Error> {
        Self::open(StoreConfig::in_memory())
    }

    /// Open a store declaring exactly the collections in `registry`. Missing
    /// tables are created; existing ones are left untouched.
    pub fn open_with_registry(config: StoreConfig, registry: SchemaRegistry) -> Result<Self, Error> {
        let pool = ConnectionPool::open(&config)?;
        let generic = Arc::new(CollectionSchema::generic());
        pool.run_blocking(|conn| storage::init_schema(conn, &registry, &generic))?;

        info!(
            path = ?config.path,
            workers = config.effective_workers(),
            declared = registry.len(),
            strict = config.strict,
            "store opened"
        );

        Ok(Self {
            inner: Arc::new(StoreInner {
                pool,
                registry,
                generic,
                collections: Mutex::new(HashMap::new()),
                config,
            }),
        })
    }

    /// Handle to the collection `name`. Undeclared names are generic
    /// collections and come into existence on first use.
    pub fn collection(&self, name: &str) -> Collection {
        let state = {
            let mut collections = self.inner.collections.lock();
            match collections.get(name) {
                Some(state) => Arc::clone(state),
                None => {
                    let table = match self.inner.registry.get(name) {
                        Some(schema) => TableRef::declared(Arc::clone(schema)),
                        None => {
                            debug!(collection = name, "registering generic collection");
                            TableRef::generic(Arc::clone(&self.inner.generic), name)
                        }
                    };
                    let state = Arc::new(CollectionState {
                        name: name.to_string(),
                        table,
                        lock: Arc::new(tokio::sync::Mutex::new(())),
                    });
                    collections.insert(name.to_string(), Arc::clone(&state));
                    state
                }
            }
        };
        Collection::new(self.inner.pool.clone(), state, self.inner.config.strict)
    }

    /// Declared collection names plus every generic collection that holds
    /// documents or has been opened by this process, sorted.
    pub async fn list_collections(&self) -> Result<Vec<String>, Error> {
        let stored = self
            .inner
            .pool
            .run(|conn| storage::generic_collection_names(conn))
            .await?;

        let mut names: BTreeSet<String> = self.inner.registry.names().map(str::to_string).collect();
        names.extend(stored);
        names.extend(self.inner.collections.lock().keys().cloned());
        Ok(names.into_iter().collect())
    }

    /// Check that every declared collection's table exists with all of its
    /// declared columns.
    pub async fn verify(&self) -> Result<VerifyReport, Error> {
        let schemas: Vec<Arc<CollectionSchema>> = self
            .inner
            .registry
            .iter()
            .cloned()
            .chain(std::iter::once(Arc::clone(&self.inner.generic)))
            .collect();

        let report = self
            .inner
            .pool
            .run(move |conn| {
                let mut tables = Vec::with_capacity(schemas.len());
                for schema in &schemas {
                    let check = match storage::table_columns(conn, &schema.table)? {
                        None => TableCheck {
                            collection: schema.name.clone(),
                            table: schema.table.clone(),
                            present: false,
                            missing_columns: Vec::new(),
                        },
                        Some(columns) => TableCheck {
                            collection: schema.name.clone(),
                            table: schema.table.clone(),
                            present: true,
                            missing_columns: schema
                                .column_names()
                                .into_iter()
                                .filter(|wanted| !columns.iter().any(|c| c.eq_ignore_ascii_case(wanted)))
                                .map(str::to_string)
                                .collect(),
                        },
                    };
                    tables.push(check);
                }
                Ok(VerifyReport { tables })
            })
            .await?;

        for check in report.tables.iter().filter(|c| !c.is_ok()) {
            tracing::warn!(
                table = %check.table,
                present = check.present,
                missing = ?check.missing_columns,
                "table does not match its schema"
            );
        }
        Ok(report)
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }
}

/// Outcome of [`Store::verify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub tables: Vec<TableCheck>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.tables.iter().all(TableCheck::is_ok)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCheck {
    pub collection: String,
    pub table: String,
    pub present: bool,
    pub missing_columns: Vec<String>,
}

impl TableCheck {
    pub fn is_ok(&self) -> bool {
        self.present && self.missing_columns.is_empty()
    }
}
