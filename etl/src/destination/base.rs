use std::future::Future;

use tracing::{debug, info};

use crate::error::EtlResult;
#[cfg(feature = "failpoints")]
use crate::failpoints::{LOAD_TABLE_BEFORE_UPSERT, etl_fail_point};
use crate::types::RowBatch;

/// Trait for databases that receive extracted rows.
///
/// Rows land in the `raw` namespace under the same table name they had on the source. Writes
/// are upserts keyed by a primary key, so replaying a batch leaves the destination unchanged
/// and delivery is at-least-once.
///
/// Like [`crate::source::Source`], a destination is either connected or not. Writes issued
/// while unconnected are no-ops returning zero rows.
pub trait Destination: Sync {
    /// Returns the name of the destination.
    fn name() -> &'static str;

    /// Opens the connection. Connecting an already connected destination is a no-op.
    fn connect(&mut self) -> impl Future<Output = EtlResult<()>> + Send;

    /// Closes the connection. Disconnecting an unconnected destination is a no-op.
    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;

    /// Returns whether the destination is connected.
    fn is_connected(&self) -> bool;

    /// Removes every row of `raw.<table_name>`.
    ///
    /// Only used by full refreshes that explicitly ask for it.
    fn truncate(&self, table_name: &str) -> impl Future<Output = EtlResult<()>> + Send;

    /// Writes `batch` into `raw.<table_name>` in a single transaction.
    ///
    /// Rows whose `primary_key` already exists have every other column overwritten. A failure
    /// rolls back the whole batch. Returns the number of rows written.
    fn upsert(
        &self,
        table_name: &str,
        batch: &RowBatch,
        primary_key: &str,
    ) -> impl Future<Output = EtlResult<u64>> + Send;

    /// Writes `rows` in chunks of `batch_size`, one [`Destination::upsert`] per chunk.
    ///
    /// Chunks are written in order and the first failing chunk aborts the load. Chunks written
    /// before the failure stay committed. Returns the total number of rows written.
    fn load(
        &self,
        table_name: &str,
        rows: &RowBatch,
        batch_size: usize,
        primary_key: &str,
    ) -> impl Future<Output = EtlResult<u64>> + Send {
        async move {
            if rows.is_empty() {
                info!(table = table_name, "no rows to load");
                return Ok(0);
            }

            let mut total_rows = 0;
            for (index, chunk) in rows.chunks(batch_size).enumerate() {
                #[cfg(feature = "failpoints")]
                etl_fail_point(LOAD_TABLE_BEFORE_UPSERT)?;

                let rows_written = self.upsert(table_name, &chunk, primary_key).await?;
                total_rows += rows_written;

                debug!(
                    table = table_name,
                    batch = index + 1,
                    rows = rows_written,
                    total_rows,
                    "batch loaded"
                );
            }

            info!(table = table_name, rows = total_rows, "table loaded");

            Ok(total_rows)
        }
    }
}
