use std::future::Future;

use futures::StreamExt;
use futures::stream::BoxStream;

use crate::error::EtlResult;
use crate::types::{RowBatch, Watermark};

/// Batch size used when a whole table is drained into memory.
pub const EXTRACT_ALL_BATCH_SIZE: usize = 10_000;

/// Finite, forward-only stream of row batches produced by [`Source::extract`].
pub type RowBatchStream = BoxStream<'static, EtlResult<RowBatch>>;

/// A database rows are extracted from.
///
/// A source moves between an unconnected and a connected state. Every query issued while
/// unconnected fails with [`crate::error::ErrorKind::NotConnected`].
///
/// Tables are expected to carry an `id` primary key and an `updated_at` change timestamp. A
/// full extraction is ordered by `id`, an incremental one returns the rows changed strictly
/// after the watermark ordered by `updated_at`.
pub trait Source: Sync {
    /// Returns the name of the source.
    fn name() -> &'static str;

    /// Opens the connection. Connecting an already connected source is a no-op.
    fn connect(&mut self) -> impl Future<Output = EtlResult<()>> + Send;

    /// Closes the connection. Disconnecting an unconnected source is a no-op.
    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;

    /// Returns whether the source is connected.
    fn is_connected(&self) -> bool;

    /// Returns how many rows an extraction with the same arguments would yield.
    fn row_count(
        &self,
        table_name: &str,
        watermark: Option<Watermark>,
    ) -> impl Future<Output = EtlResult<u64>> + Send;

    /// Starts extracting `table_name` in batches of `batch_size` rows (the last may be smaller).
    ///
    /// The returned stream is not restartable. It ends at the first error.
    fn extract(
        &self,
        table_name: &str,
        batch_size: usize,
        watermark: Option<Watermark>,
    ) -> impl Future<Output = EtlResult<RowBatchStream>> + Send;

    /// Extracts `table_name` into a single in-memory [`RowBatch`].
    fn extract_all(
        &self,
        table_name: &str,
        watermark: Option<Watermark>,
    ) -> impl Future<Output = EtlResult<RowBatch>> + Send {
        async move {
            let mut batches = self
                .extract(table_name, EXTRACT_ALL_BATCH_SIZE, watermark)
                .await?;

            let mut rows = RowBatch::default();
            while let Some(batch) = batches.next().await {
                rows.append(batch?)?;
            }

            Ok(rows)
        }
    }

    /// Returns the largest `updated_at` of `table_name`, or `None` if the table is empty.
    fn max_change_timestamp(
        &self,
        table_name: &str,
    ) -> impl Future<Output = EtlResult<Option<Watermark>>> + Send;
}
