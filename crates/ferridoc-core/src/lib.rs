//! # FerriDoc
//!
//! An embedded, MongoDB-style document store on top of SQLite.
//!
//! Documents are flat JSON maps. A fixed set of declared collections maps to
//! their own tables, with one column per first-class field and a JSON
//! extension bucket for every other key; all other collection names share a
//! generic table. Queries use a small filter/update dialect (`$in`, `$gt`,
//! `$regex`, `$or`, `$set`, `$inc`, `$push`, `$addToSet`, ...) evaluated by a
//! full scan.
//!
//! ## Quick Start
//!
//! ```no_run
//! use ferridoc_core::{Store, StoreConfig};
//! use serde_json::json;
//!
//! # async fn demo() -> ferridoc_core::Result<()> {
//! let store = Store::open(StoreConfig::file("bot.sqlite"))?;
//!
//! let logs = store.collection("admin_logs");
//! logs.insert_one(json!({"chat_id": -100123, "enabled": true})).await?;
//!
//! let counters = store.collection("counters");
//! counters
//!     .update_one(&json!({"name": "hits"}), &json!({"$inc": {"n": 1}}), true)
//!     .await?;
//!
//! let doc = counters.find_one(&json!({"name": "hits"})).await?;
//! assert_eq!(doc.unwrap()["n"], 1);
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod collection;
pub mod config;
pub mod cursor;
pub mod error;
pub mod filter;
pub mod schema;
mod storage;
pub mod store;
pub mod types;
pub mod update;

pub use collection::Collection;
pub use config::{JournalMode, StoreConfig};
pub use cursor::{Cursor, SortDirection};
pub use error::{Error, QueryError, Result, SchemaError, StorageError};
pub use filter::Filter;
pub use schema::{CollectionSchema, ColumnType, FieldDef, KeyKind, SchemaRegistry};
pub use store::{Store, TableCheck, VerifyReport};
pub use types::{DeleteResult, Document, InsertManyResult, InsertOneResult, UpdateResult};
pub use update::{Update, UpdateOp};
