//! SQLite persistence: the connection pool and per-table row access.

mod pool;
mod table;

pub(crate) use pool::ConnectionPool;
pub(crate) use table::{TableRef, table_columns};

use rusqlite::Connection;
use tracing::debug;

use crate::error::Error;
use crate::schema::{CollectionSchema, GENERIC_SCOPE_COLUMN, GENERIC_TABLE, SchemaRegistry, quote_ident};

/// Create every declared table and the shared generic table if missing.
pub(crate) fn init_schema(
    conn: &mut Connection,
    registry: &SchemaRegistry,
    generic: &CollectionSchema,
) -> Result<(), Error> {
    let tx = conn.transaction()?;
    for schema in registry.iter() {
        tx.execute_batch(&schema.create_table_sql())?;
        debug!(collection = %schema.name, "table ready");
    }
    tx.execute_batch(&generic.create_table_sql())?;
    tx.commit()?;
    Ok(())
}

/// Names of the generic collections holding at least one document.
pub(crate) fn generic_collection_names(conn: &Connection) -> Result<Vec<String>, Error> {
    let sql = format!(
        "SELECT DISTINCT {col} FROM {table} ORDER BY {col}",
        col = quote_ident(GENERIC_SCOPE_COLUMN),
        table = quote_ident(GENERIC_TABLE)
    );
    let mut stmt = conn.prepare(&sql)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}
