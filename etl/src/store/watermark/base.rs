use std::future::Future;

use crate::error::EtlResult;
use crate::types::Watermark;

/// Trait for storing and retrieving per-table watermarks.
///
/// A watermark is the largest change timestamp known to be loaded for a table. It is absent
/// until the first successful load and is written in its own committed transaction, so a
/// failure after the write never rolls it back.
pub trait WatermarkStore {
    /// Returns the watermark of `table_name`, or `None` if it was never written.
    fn get_watermark(
        &self,
        table_name: &str,
    ) -> impl Future<Output = EtlResult<Option<Watermark>>> + Send;

    /// Inserts or replaces the watermark of `table_name`.
    ///
    /// `rows_processed` is the number of rows loaded by the run writing the watermark. The
    /// time of the write is recorded alongside it.
    fn update_watermark(
        &self,
        table_name: &str,
        watermark: Watermark,
        rows_processed: u64,
    ) -> impl Future<Output = EtlResult<()>> + Send;
}
