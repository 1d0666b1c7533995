//! Store configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable naming the database (`sqlite:///path` or a bare path).
pub const ENV_DB_URL: &str = "FERRIDOC_DB_URL";
/// Fallback variable kept for deployments configured for the older bot.
pub const ENV_DB_URL_LEGACY: &str = "DB_URL";
pub const ENV_WORKERS: &str = "FERRIDOC_WORKERS";
pub const ENV_STRICT: &str = "FERRIDOC_STRICT";

pub const DEFAULT_DB_FILE: &str = "ferridoc.sqlite";
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// SQLite journal mode for file-backed stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum JournalMode {
    #[default]
    Wal,
    Delete,
    Memory,
}

impl JournalMode {
    pub fn pragma_value(self) -> &'static str {
        match self {
            JournalMode::Wal => "WAL",
            JournalMode::Delete => "DELETE",
            JournalMode::Memory => "MEMORY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file; `None` keeps everything in memory.
    pub path: Option<PathBuf>,
    /// Blocking workers, one pooled connection each. In-memory stores always
    /// use a single worker so every call sees the same database.
    pub workers: usize,
    pub busy_timeout_ms: u64,
    pub journal_mode: JournalMode,
    /// Report dialect errors instead of degrading to non-match / no-op.
    pub strict: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            workers: DEFAULT_WORKERS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: JournalMode::default(),
            strict: false,
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    pub fn with_path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = mode;
        self
    }

    /// Build a configuration from `FERRIDOC_DB_URL` (or `DB_URL`),
    /// `FERRIDOC_WORKERS` and `FERRIDOC_STRICT`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let url = lookup(ENV_DB_URL)
            .or_else(|| lookup(ENV_DB_URL_LEGACY))
            .unwrap_or_else(|| format!("sqlite:///{DEFAULT_DB_FILE}"));

        let mut config = Self {
            path: parse_db_url(&url),
            ..Self::default()
        };
        if let Some(workers) = lookup(ENV_WORKERS).and_then(|w| w.trim().parse().ok()) {
            config.workers = workers;
        }
        if let Some(strict) = lookup(ENV_STRICT) {
            config.strict = matches!(
                strict.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        config
    }

    /// Number of pooled connections actually opened.
    pub(crate) fn effective_workers(&self) -> usize {
        if self.path.is_none() {
            1
        } else {
            self.workers.max(1)
        }
    }
}

/// Resolve a database URL to a file path; `None` means in-memory.
///
/// Accepts `sqlite:///relative.db`, `sqlite:////abs/path.db`, `sqlite://`
/// forms ending in `:memory:`, and bare paths.
pub fn parse_db_url(url: &str) -> Option<PathBuf> {
    let url = url.trim();
    let path = match url.strip_prefix("sqlite:") {
        Some(rest) => rest.strip_prefix("///").or_else(|| rest.strip_prefix("//")).unwrap_or(rest),
        None => url,
    };
    if path.is_empty() || path == ":memory:" {
        None
    } else {
        Some(PathBuf::from(path))
    }
}
