//! Queries on the watermark metadata table stored in the target database.
//!
//! The table is expected to exist with at least the columns `table_name` (unique),
//! `last_extracted_at`, `last_loaded_at` and `rows_processed`. Creating it is left to the
//! target's schema management.

use chrono::{DateTime, Utc};
use tokio_postgres::GenericClient;

use crate::schema::{RAW_SCHEMA, TableName, WATERMARKS_TABLE};

/// A row of the watermark table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatermarkRow {
    /// Name of the replicated table.
    pub table_name: String,
    /// Largest change timestamp known to be loaded for the table.
    pub last_extracted_at: DateTime<Utc>,
    /// When the watermark was last written.
    pub last_loaded_at: DateTime<Utc>,
    /// Rows loaded by the run that wrote the watermark.
    pub rows_processed: i64,
}

/// Returns the name of the watermark table.
pub fn watermarks_table() -> TableName {
    TableName::new(RAW_SCHEMA, WATERMARKS_TABLE)
}

fn select_watermark_query() -> String {
    format!(
        "select table_name, last_extracted_at::timestamptz, last_loaded_at::timestamptz, \
         rows_processed::bigint from {} where table_name = $1",
        watermarks_table().as_quoted_identifier()
    )
}

fn upsert_watermark_query() -> String {
    format!(
        "insert into {} (table_name, last_extracted_at, last_loaded_at, rows_processed) \
         values ($1, $2::timestamptz, current_timestamp, $3::bigint) \
         on conflict (table_name) do update set \
         last_extracted_at = excluded.last_extracted_at, \
         last_loaded_at = current_timestamp, \
         rows_processed = excluded.rows_processed",
        watermarks_table().as_quoted_identifier()
    )
}

/// Fetches the watermark row of `table_name`, if one was ever written.
pub async fn get_watermark<C>(
    client: &C,
    table_name: &str,
) -> Result<Option<WatermarkRow>, tokio_postgres::Error>
where
    C: GenericClient + Sync,
{
    let row = client
        .query_opt(&select_watermark_query(), &[&table_name])
        .await?;

    Ok(row.map(|row| WatermarkRow {
        table_name: row.get(0),
        last_extracted_at: row.get(1),
        last_loaded_at: row.get(2),
        rows_processed: row.get(3),
    }))
}

/// Inserts or replaces the watermark of `table_name`.
///
/// `last_loaded_at` is set by the server to the statement time. When `client` is not inside a
/// transaction the statement commits on its own.
pub async fn upsert_watermark<C>(
    client: &C,
    table_name: &str,
    last_extracted_at: DateTime<Utc>,
    rows_processed: i64,
) -> Result<u64, tokio_postgres::Error>
where
    C: GenericClient + Sync,
{
    client
        .execute(
            &upsert_watermark_query(),
            &[&table_name, &last_extracted_at, &rows_processed],
        )
        .await
}
