use std::fmt;

use pg_escape::quote_identifier;

/// Namespace on the target that receives the replicated tables and the watermark table.
pub const RAW_SCHEMA: &str = "raw";

/// Name of the metadata table holding one watermark per replicated table.
pub const WATERMARKS_TABLE: &str = "_etl_watermarks";

/// Column appended to every upserted row with the time of its batch.
pub const LOADED_AT_COLUMN: &str = "_etl_loaded_at";

/// Column every source table exposes to track its last modification.
pub const CHANGE_TRACKING_COLUMN: &str = "updated_at";

/// Column used as the conflict target and as the full extraction order.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// A possibly schema-qualified table name.
///
/// Source tables are addressed unqualified so that they resolve through the connection's
/// `search_path`, while target tables always live in [`RAW_SCHEMA`].
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct TableName {
    /// The schema containing the table, if qualified.
    pub schema: Option<String>,
    /// The name of the table within the schema.
    pub name: String,
}

impl TableName {
    /// Creates a new [`TableName`] qualified with `schema`.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> TableName {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    /// Creates an unqualified [`TableName`].
    pub fn unqualified(name: impl Into<String>) -> TableName {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    /// Creates the [`TableName`] of the `raw` copy of a source table.
    pub fn raw(name: impl Into<String>) -> TableName {
        Self::new(RAW_SCHEMA, name)
    }

    /// Returns the table name as a properly quoted Postgres identifier.
    ///
    /// Escapes both schema and table names according to Postgres identifier quoting rules, so
    /// names coming from configuration can never break out of the statement.
    pub fn as_quoted_identifier(&self) -> String {
        let quoted_name = quote_identifier(&self.name);

        match &self.schema {
            Some(schema) => format!("{}.{quoted_name}", quote_identifier(schema)),
            None => quoted_name.into_owned(),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}
