//! Bounded pool of SQLite connections driven by blocking worker tasks.
//!
//! Every storage call checks out one connection, runs on tokio's blocking
//! thread pool, and returns the connection afterwards. A semaphore with one
//! permit per connection bounds how many calls run at once, so the async
//! callers never block their scheduler thread on disk I/O.
//!
//! The blocking job owns both its permit and the check-in of its connection.
//! A caller that stops waiting (a dropped future) does not lose the
//! connection or free the permit while the job is still running.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::Connection;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::config::{JournalMode, StoreConfig};
use crate::error::{Error, StorageError};

#[derive(Debug, Clone)]
enum Location {
    Memory,
    File(PathBuf),
}

struct PoolInner {
    location: Location,
    busy_timeout: Duration,
    journal_mode: JournalMode,
    idle: Mutex<Vec<Connection>>,
    permits: Arc<Semaphore>,
}

/// Cheaply clonable handle to the connection pool.
#[derive(Clone)]
pub(crate) struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Open `config.effective_workers()` connections.
    pub(crate) fn open(config: &StoreConfig) -> Result<Self, Error> {
        let location = match &config.path {
            Some(path) => {
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    std::fs::create_dir_all(parent).map_err(StorageError::from)?;
                }
                Location::File(path.clone())
            }
            None => Location::Memory,
        };

        let size = config.effective_workers();
        let inner = PoolInner {
            location,
            busy_timeout: Duration::from_millis(config.busy_timeout_ms),
            journal_mode: config.journal_mode,
            idle: Mutex::new(Vec::with_capacity(size)),
            permits: Arc::new(Semaphore::new(size)),
        };
        let pool = Self {
            inner: Arc::new(inner),
        };

        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            connections.push(pool.connect()?);
        }
        *pool.inner.idle.lock() = connections;
        debug!(workers = size, "connection pool ready");
        Ok(pool)
    }

    /// Run `f` on a pooled connection in a blocking worker.
    pub(crate) async fn run<F, T>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Connection) -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| StorageError::PoolClosed)?;
        let pool = self.clone();

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            pool.with_connection(f)
        })
        .await?
    }

    /// Run `f` on a pooled connection on the current thread. Only for
    /// start-up work that happens before any async caller exists.
    pub(crate) fn run_blocking<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, Error>,
    ) -> Result<T, Error> {
        self.with_connection(f)
    }

    /// Check out a connection, run `f`, and check the connection back in even
    /// if `f` panics. The panic is then resumed.
    fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut conn = self
            .inner
            .idle
            .lock()
            .pop()
            .ok_or(StorageError::PoolExhausted)?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(&mut conn)));
        self.inner.idle.lock().push(conn);
        outcome.unwrap_or_else(|payload| panic::resume_unwind(payload))
    }

    fn connect(&self) -> Result<Connection, Error> {
        let conn = match &self.inner.location {
            Location::Memory => Connection::open_in_memory()?,
            Location::File(path) => Connection::open(path)?,
        };
        conn.busy_timeout(self.inner.busy_timeout)?;
        if let Location::File(_) = self.inner.location {
            // journal_mode returns a row, so it cannot go through execute().
            let _mode: String = conn.query_row(
                &format!("PRAGMA journal_mode = {}", self.inner.journal_mode.pragma_value()),
                [],
                |row| row.get(0),
            )?;
            conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        }
        Ok(conn)
    }
}
