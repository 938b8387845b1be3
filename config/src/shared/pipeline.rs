use std::fmt;

use serde::Deserialize;

use crate::shared::{PgConnectionConfig, ValidationError};

/// Tables replicated by default, in processing order.
pub const DEFAULT_TABLES: &[&str] = &["customers", "products", "orders", "order_items"];

/// Default number of rows written per upsert transaction.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default log verbosity when `RUST_LOG` is not set.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// How the watermark persisted after a successful load is computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkStrategy {
    /// Query `max(updated_at)` on the source once the load finished.
    ///
    /// Rows committed on the source between extraction and this query are skipped by the next
    /// incremental run.
    #[default]
    SourceMax,
    /// Use the largest `updated_at` among the rows extracted in this run.
    ObservedMax,
}

impl fmt::Display for WatermarkStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatermarkStrategy::SourceMax => f.write_str("source_max"),
            WatermarkStrategy::ObservedMax => f.write_str("observed_max"),
        }
    }
}

/// Configuration of one extract-load run.
///
/// Built once per invocation and shared by reference with the extractor and the loader.
/// This intentionally does not implement `Serialize` to avoid leaking the endpoint secrets.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Endpoint rows are extracted from.
    pub source: PgConnectionConfig,
    /// Endpoint rows are upserted into, also hosting the watermark table.
    pub target: PgConnectionConfig,
    /// Maximum number of rows per upsert transaction.
    pub batch_size: usize,
    /// Default tracing directive used when `RUST_LOG` is not set.
    pub log_level: String,
    /// Tables processed by a run, in order.
    pub tables: Vec<String>,
    /// How the next watermark is derived after a load.
    pub watermark_strategy: WatermarkStrategy,
}

impl PipelineConfig {
    /// Validates the configuration.
    ///
    /// Checks both endpoints' TLS settings, that the batch size is positive and that the table
    /// list is neither empty nor contains blank names.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.source.tls.validate()?;
        self.target.tls.validate()?;

        if self.batch_size == 0 {
            return Err(ValidationError::BatchSizeZero);
        }

        validate_tables(&self.tables)
    }
}

/// Checks that `tables` is not empty and holds no blank names.
///
/// Applies to the configured table set as well as to per-run overrides.
pub fn validate_tables(tables: &[String]) -> Result<(), ValidationError> {
    if tables.is_empty() {
        return Err(ValidationError::NoTables);
    }

    if let Some(position) = tables.iter().position(|t| t.trim().is_empty()) {
        return Err(ValidationError::EmptyTableName(position));
    }

    Ok(())
}
