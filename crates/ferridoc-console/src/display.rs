use ferridoc_core::{Document, UpdateResult, VerifyReport};
use serde_json::{Value, json};

/// Outcome of one console command.
pub enum CommandResult {
    Names(Vec<String>),
    Verify(VerifyReport),
    Documents(Vec<Document>),
    Count(u64),
    Inserted(Vec<Value>),
    Updated(UpdateResult),
    Deleted(u64),
}

pub enum OutputMode {
    /// Indented JSON.
    Pretty,
    /// One JSON value per line.
    Compact,
}

/// Print `result` to stdout. Returns `false` when the result reports a
/// problem (a failed verification), so the caller can pick an exit code.
pub fn render(result: &CommandResult, mode: &OutputMode) -> bool {
    let (value, ok) = match result {
        CommandResult::Names(names) => (json!({"collections": names}), true),
        CommandResult::Verify(report) => (
            json!({"ok": report.is_ok(), "tables": report.tables}),
            report.is_ok(),
        ),
        CommandResult::Documents(docs) => (
            json!({"documents": docs, "count": docs.len()}),
            true,
        ),
        CommandResult::Count(n) => (json!({"count": n}), true),
        CommandResult::Inserted(ids) => (json!({"inserted_ids": ids}), true),
        CommandResult::Updated(result) => (json!(result), true),
        CommandResult::Deleted(n) => (json!({"deleted_count": n}), true),
    };
    println!("{}", format_value(&value, mode));
    ok
}

fn format_value(value: &Value, mode: &OutputMode) -> String {
    match mode {
        OutputMode::Pretty => serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
        OutputMode::Compact => value.to_string(),
    }
}
