//! Collection schemas: which keys are first-class columns and which fall into
//! the extension bucket.
//!
//! A declared collection maps to its own SQLite table with one column per
//! first-class field plus a JSON bucket column. Every undeclared name is a
//! generic collection routed through one shared table, scoped by a
//! `collection` column, whose only first-class field is `_id`.
//!
//! First-class columns are declared without an SQLite type affinity, so a
//! stored value keeps its JSON type whatever the declared [`ColumnType`] says.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::SchemaError;

/// Name of the shared table backing every generic collection.
pub const GENERIC_TABLE: &str = "generic_documents";

/// Column in [`GENERIC_TABLE`] holding the owning collection's name.
pub const GENERIC_SCOPE_COLUMN: &str = "collection";

/// Identifying key exposed on generic documents.
pub const GENERIC_KEY: &str = "_id";

/// Auto-increment column backing [`KeyKind::Flexible`] keys. Never visible in
/// documents.
pub const SEQUENCE_COLUMN: &str = "seq";

/// Default name of the extension bucket column.
pub const DEFAULT_BUCKET: &str = "data";

/// Declared value type of a first-class column.
///
/// Advisory only: documents are not validated, and a value of another type is
/// stored and read back unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Boolean,
    /// Any JSON value.
    Json,
}

impl ColumnType {
    /// Whether `value` has the declared type. `null` always does.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (ColumnType::Json, _) => true,
            (ColumnType::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (ColumnType::Real, Value::Number(_)) => true,
            (ColumnType::Text, Value::String(_)) => true,
            (ColumnType::Boolean, Value::Bool(_)) => true,
            _ => false,
        }
    }
}

/// How a collection identifies its documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyKind {
    /// Engine-assigned auto-increment id.
    Surrogate,
    /// Caller-supplied value (e.g. `chat_id`) used as the primary key.
    Natural,
    /// Optional caller-supplied value of any type. A row stored without one
    /// reports its [`SEQUENCE_COLUMN`] number instead.
    Flexible,
}

/// A first-class field definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub column_type: ColumnType,
    /// Value used when a document does not carry this field.
    pub default: Value,
    pub not_null: bool,
    pub unique: bool,
}

impl FieldDef {
    /// A nullable field defaulting to `null`.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            default: Value::Null,
            not_null: false,
            unique: false,
        }
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = value.into();
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Schema of one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub table: String,
    /// Name of the identifying field; always `fields[0]`.
    pub key: String,
    pub key_kind: KeyKind,
    pub fields: Vec<FieldDef>,
    pub bucket: String,
}

impl CollectionSchema {
    pub fn builder(name: impl Into<String>) -> CollectionSchemaBuilder {
        CollectionSchemaBuilder::new(name.into())
    }

    /// The schema shared by every generic collection.
    pub fn generic() -> Self {
        Self {
            name: GENERIC_TABLE.to_string(),
            table: GENERIC_TABLE.to_string(),
            key: GENERIC_KEY.to_string(),
            key_kind: KeyKind::Flexible,
            fields: vec![FieldDef::new(GENERIC_KEY, ColumnType::Json)],
            bucket: DEFAULT_BUCKET.to_string(),
        }
    }

    pub fn is_generic(&self) -> bool {
        self.table == GENERIC_TABLE
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn key_field(&self) -> &FieldDef {
        &self.fields[0]
    }

    /// Every physical column name except the generic scope column, in
    /// declaration order, bucket last.
    pub fn column_names(&self) -> Vec<&str> {
        self.fields
            .iter()
            .map(|f| f.name.as_str())
            .chain(std::iter::once(self.bucket.as_str()))
            .collect()
    }

    /// `CREATE TABLE IF NOT EXISTS` statement(s) for this schema.
    ///
    /// Only a surrogate key gets a type (it aliases the rowid); every other
    /// column is untyped so SQLite never coerces what it stores.
    pub fn create_table_sql(&self) -> String {
        let mut columns = Vec::with_capacity(self.fields.len() + 3);
        if self.key_kind == KeyKind::Flexible {
            columns.push(format!(
                "{} INTEGER PRIMARY KEY AUTOINCREMENT",
                quote_ident(SEQUENCE_COLUMN)
            ));
        }
        for (i, field) in self.fields.iter().enumerate() {
            let mut col = quote_ident(&field.name);
            if i == 0 {
                match self.key_kind {
                    KeyKind::Surrogate => col.push_str(" INTEGER PRIMARY KEY AUTOINCREMENT"),
                    KeyKind::Natural => col.push_str(" PRIMARY KEY NOT NULL"),
                    KeyKind::Flexible => {}
                }
            } else {
                if field.not_null {
                    col.push_str(" NOT NULL");
                }
                if field.unique {
                    col.push_str(" UNIQUE");
                }
            }
            columns.push(col);
        }
        if self.is_generic() {
            columns.push(format!("{} TEXT NOT NULL", quote_ident(GENERIC_SCOPE_COLUMN)));
        }
        columns.push(format!("{} TEXT NOT NULL DEFAULT '{{}}'", quote_ident(&self.bucket)));

        let mut sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
            quote_ident(&self.table),
            columns.join(",\n    ")
        );
        if self.is_generic() {
            sql.push_str(&format!(
                "\nCREATE INDEX IF NOT EXISTS {} ON {} ({});",
                quote_ident(&format!("idx_{}_{}", self.table, GENERIC_SCOPE_COLUMN)),
                quote_ident(&self.table),
                quote_ident(GENERIC_SCOPE_COLUMN)
            ));
        }
        sql
    }
}

/// Quote an SQL identifier. Identifiers are validated at build time, so this
/// never has to escape anything.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{name}\"")
}

fn is_valid_ident(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ---------------------------------------------------------------------------
// CollectionSchemaBuilder
// ---------------------------------------------------------------------------

/// Builder for a declared collection.
pub struct CollectionSchemaBuilder {
    name: String,
    key: Option<(FieldDef, KeyKind)>,
    fields: Vec<FieldDef>,
    bucket: String,
}

impl CollectionSchemaBuilder {
    fn new(name: String) -> Self {
        Self {
            name,
            key: None,
            fields: Vec::new(),
            bucket: DEFAULT_BUCKET.to_string(),
        }
    }

    /// Use an auto-increment integer id stored in `name`.
    pub fn surrogate_key(mut self, name: &str) -> Self {
        self.key = Some((FieldDef::new(name, ColumnType::Integer), KeyKind::Surrogate));
        self
    }

    /// Use a caller-supplied value stored in `name` as the primary key.
    pub fn natural_key(mut self, name: &str, column_type: ColumnType) -> Self {
        self.key = Some((FieldDef::new(name, column_type), KeyKind::Natural));
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Rename the extension bucket column (default `data`).
    pub fn bucket(mut self, name: &str) -> Self {
        self.bucket = name.to_string();
        self
    }

    pub fn build(self) -> Result<CollectionSchema, SchemaError> {
        let (key, key_kind) = self.key.ok_or_else(|| SchemaError::MissingKey(self.name.clone()))?;

        for ident in [&self.name, &self.bucket] {
            if !is_valid_ident(ident) {
                return Err(SchemaError::InvalidIdentifier(ident.clone()));
            }
        }
        if self.name == GENERIC_TABLE {
            return Err(SchemaError::ReservedName {
                collection: self.name,
                name: GENERIC_TABLE.to_string(),
            });
        }

        let mut fields = Vec::with_capacity(self.fields.len() + 1);
        fields.push(key.clone());
        fields.extend(self.fields);

        let mut seen = std::collections::HashSet::new();
        for field in &fields {
            if !is_valid_ident(&field.name) {
                return Err(SchemaError::InvalidIdentifier(field.name.clone()));
            }
            if field.name == self.bucket || field.name.eq_ignore_ascii_case("rowid") {
                return Err(SchemaError::ReservedName {
                    collection: self.name,
                    name: field.name.clone(),
                });
            }
            if !seen.insert(field.name.to_ascii_lowercase()) {
                return Err(SchemaError::DuplicateField {
                    collection: self.name,
                    field: field.name.clone(),
                });
            }
        }

        Ok(CollectionSchema {
            table: self.name.clone(),
            name: self.name,
            key: key.name,
            key_kind,
            fields,
            bucket: self.bucket,
        })
    }
}

// ---------------------------------------------------------------------------
// SchemaRegistry
// ---------------------------------------------------------------------------

/// The fixed set of declared collections, registered before the store opens.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: Vec<Arc<CollectionSchema>>,
    by_name: HashMap<String, usize>,
}

impl SchemaRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The collections the bot's feature modules rely on.
    pub fn standard() -> Result<Self, SchemaError> {
        let mut registry = Self::empty();
        for schema in standard_schemas()? {
            registry.register(schema)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, schema: CollectionSchema) -> Result<(), SchemaError> {
        if self.by_name.contains_key(&schema.name) {
            return Err(SchemaError::DuplicateCollection(schema.name));
        }
        self.by_name.insert(schema.name.clone(), self.schemas.len());
        self.schemas.push(Arc::new(schema));
        Ok(())
    }

    pub fn with(mut self, schema: CollectionSchema) -> Result<Self, SchemaError> {
        self.register(schema)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<CollectionSchema>> {
        self.by_name.get(name).map(|&i| &self.schemas[i])
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<CollectionSchema>> {
        self.schemas.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemas.iter().map(|s| s.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

fn standard_schemas() -> Result<Vec<CollectionSchema>, SchemaError> {
    use ColumnType::*;

    let declared = [
        CollectionSchema::builder("users")
            .natural_key("user_id", Integer)
            .field(FieldDef::new("name", Text).default_value(""))
            .field(FieldDef::new("admin", Boolean).default_value(false)),
        CollectionSchema::builder("chats")
            .natural_key("chat_id", Integer)
            .field(FieldDef::new("welcome_message", Text).default_value("")),
        CollectionSchema::builder("bans")
            .surrogate_key("id")
            .field(FieldDef::new("user_id", Integer).not_null())
            .field(FieldDef::new("chat_id", Integer))
            .field(FieldDef::new("reason", Text).default_value("")),
        CollectionSchema::builder("settings")
            .surrogate_key("id")
            .field(FieldDef::new("key", Text).not_null().unique())
            .field(FieldDef::new("value", Json).default_value(json!({}))),
        CollectionSchema::builder("feds")
            .surrogate_key("id")
            .field(FieldDef::new("fed_id", Text).not_null().unique())
            .field(FieldDef::new("owner_id", Integer)),
        CollectionSchema::builder("warnings")
            .surrogate_key("id")
            .field(FieldDef::new("chat_id", Integer).not_null())
            .field(FieldDef::new("user_id", Integer).not_null())
            .field(FieldDef::new("warns", Integer).default_value(0)),
        CollectionSchema::builder("blocklist")
            .natural_key("chat_id", Integer)
            .field(FieldDef::new("triggers", Json).default_value(json!([])))
            .field(FieldDef::new("mode", Text).default_value("warn")),
        CollectionSchema::builder("admin_logs")
            .natural_key("chat_id", Integer)
            .field(FieldDef::new("enabled", Boolean).default_value(false))
            .field(FieldDef::new("updated_at", Integer)),
        CollectionSchema::builder("rules")
            .natural_key("chat_id", Integer)
            .field(FieldDef::new("rules", Text).default_value("")),
        CollectionSchema::builder("restart_stage")
            .natural_key("chat_id", Integer)
            .field(FieldDef::new("message_id", Integer)),
    ];

    declared.into_iter().map(CollectionSchemaBuilder::build).collect()
}
