use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use ferridoc_core::config::{ENV_DB_URL, ENV_DB_URL_LEGACY};
use ferridoc_core::{SortDirection, Store, StoreConfig};
use serde_json::Value;
use tracing::info;

mod display;

use display::{CommandResult, OutputMode};

/// FerriDoc Console: scriptable CLI over a FerriDoc store file.
#[derive(Parser, Debug)]
#[command(name = "ferridoc-console", version)]
struct Cli {
    /// Store file (default: $FERRIDOC_DB_URL, else
    /// ~/.local/share/ferridoc/ferridoc.sqlite).
    #[arg(short, long)]
    db: Option<PathBuf>,

    /// Reject unknown operators and malformed filters instead of ignoring them.
    #[arg(long)]
    strict: bool,

    /// Print results as single-line JSON.
    #[arg(short, long)]
    compact: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List declared and generic collections.
    Collections,
    /// Check that every declared table has its declared columns.
    Verify,
    /// Print documents matching FILTER.
    Find {
        collection: String,
        /// Filter document as JSON (default: match everything).
        filter: Option<String>,
        #[arg(long)]
        sort: Option<String>,
        /// Sort descending.
        #[arg(long, requires = "sort")]
        desc: bool,
        #[arg(long)]
        skip: Option<usize>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Count documents matching FILTER.
    Count {
        collection: String,
        filter: Option<String>,
    },
    /// Insert one document, or every element of a JSON array.
    Insert { collection: String, document: String },
    /// Apply UPDATE to the first (or, with --many, every) match.
    Update {
        collection: String,
        filter: String,
        update: String,
        #[arg(long)]
        upsert: bool,
        #[arg(long)]
        many: bool,
    },
    /// Delete the first (or, with --many, every) match.
    Delete {
        collection: String,
        filter: String,
        #[arg(long)]
        many: bool,
    },
}

fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ferridoc")
        .join("ferridoc.sqlite")
}

/// `--db` wins, then the database URL from the environment, then the
/// per-user data directory.
fn store_config(cli: &Cli) -> StoreConfig {
    let url_in_env =
        std::env::var_os(ENV_DB_URL).is_some() || std::env::var_os(ENV_DB_URL_LEGACY).is_some();
    let mut config = StoreConfig::from_env();
    match &cli.db {
        Some(path) => config = config.with_path(path),
        None if !url_in_env => config = config.with_path(default_db_path()),
        None => {}
    }
    if cli.strict {
        config = config.strict(true);
    }
    config
}

fn parse_json(what: &str, text: Option<&str>) -> Result<Value, Box<dyn std::error::Error>> {
    match text {
        None => Ok(Value::Null),
        Some(text) => serde_json::from_str(text).map_err(|e| format!("invalid {what} JSON: {e}").into()),
    }
}

async fn execute(store: &Store, command: Command) -> Result<CommandResult, Box<dyn std::error::Error>> {
    let result = match command {
        Command::Collections => CommandResult::Names(store.list_collections().await?),
        Command::Verify => CommandResult::Verify(store.verify().await?),
        Command::Find {
            collection,
            filter,
            sort,
            desc,
            skip,
            limit,
        } => {
            let filter = parse_json("filter", filter.as_deref())?;
            let mut cursor = store.collection(&collection).find(&filter).await?;
            if let Some(key) = sort {
                let direction = if desc {
                    SortDirection::Descending
                } else {
                    SortDirection::Ascending
                };
                cursor = cursor.sort(&key, direction);
            }
            if let Some(n) = skip {
                cursor = cursor.skip(n);
            }
            CommandResult::Documents(cursor.to_list(limit))
        }
        Command::Count { collection, filter } => {
            let filter = parse_json("filter", filter.as_deref())?;
            CommandResult::Count(store.collection(&collection).count_documents(&filter).await?)
        }
        Command::Insert {
            collection,
            document,
        } => {
            let coll = store.collection(&collection);
            match parse_json("document", Some(&document))? {
                Value::Array(docs) => CommandResult::Inserted(coll.insert_many(docs).await?.inserted_ids),
                doc => CommandResult::Inserted(vec![coll.insert_one(doc).await?.inserted_id]),
            }
        }
        Command::Update {
            collection,
            filter,
            update,
            upsert,
            many,
        } => {
            let filter = parse_json("filter", Some(&filter))?;
            let update = parse_json("update", Some(&update))?;
            let coll = store.collection(&collection);
            let result = if many {
                coll.update_many(&filter, &update, upsert).await?
            } else {
                coll.update_one(&filter, &update, upsert).await?
            };
            CommandResult::Updated(result)
        }
        Command::Delete {
            collection,
            filter,
            many,
        } => {
            let filter = parse_json("filter", Some(&filter))?;
            let coll = store.collection(&collection);
            let result = if many {
                coll.delete_many(&filter).await?
            } else {
                coll.delete_one(&filter).await?
            };
            CommandResult::Deleted(result.deleted_count)
        }
    };
    Ok(result)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = store_config(&cli);
    let mode = if cli.compact {
        OutputMode::Compact
    } else {
        OutputMode::Pretty
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to create tokio runtime: {e}");
            process::exit(1);
        }
    };

    let location = config
        .path
        .as_ref()
        .map_or_else(|| ":memory:".to_string(), |p| p.display().to_string());
    info!(db = %location, strict = config.strict, "opening store");
    let store = match Store::open(config) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("cannot open {location}: {e}");
            process::exit(1);
        }
    };

    match runtime.block_on(execute(&store, cli.command)) {
        Ok(result) => {
            let ok = display::render(&result, &mode);
            process::exit(if ok { 0 } else { 2 });
        }
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}
