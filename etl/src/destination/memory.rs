use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::bail;
use crate::destination::Destination;
use crate::error::{ErrorKind, EtlResult};
use crate::store::watermark::WatermarkStore;
use crate::types::{RowBatch, TableRow, Watermark};

/// A watermark as stored by [`MemoryDestination`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredWatermark {
    pub watermark: Watermark,
    pub rows_processed: u64,
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<String, Vec<TableRow>>,
    watermarks: HashMap<String, StoredWatermark>,
    upsert_calls: u64,
}

/// In-memory destination for tests.
///
/// Rows are kept per table and keyed by primary key, so upserting the same rows twice leaves
/// the contents unchanged. Clones share the same storage, which lets tests inspect the
/// destination after handing it to a [`crate::pipeline::Pipeline`].
#[derive(Debug, Clone, Default)]
pub struct MemoryDestination {
    inner: Arc<Mutex<Inner>>,
    connected: bool,
}

impl MemoryDestination {
    /// Creates a new empty memory destination.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the rows currently stored for `table_name`, in first-insertion order.
    pub async fn table_rows(&self, table_name: &str) -> Vec<TableRow> {
        let inner = self.inner.lock().await;
        inner.tables.get(table_name).cloned().unwrap_or_default()
    }

    /// Returns the stored watermark of `table_name`.
    pub async fn stored_watermark(&self, table_name: &str) -> Option<StoredWatermark> {
        let inner = self.inner.lock().await;
        inner.watermarks.get(table_name).copied()
    }

    /// Sets the watermark of `table_name` as if a previous run had written it.
    pub async fn set_watermark(&self, table_name: &str, watermark: Watermark) {
        let mut inner = self.inner.lock().await;
        inner.watermarks.insert(
            table_name.to_string(),
            StoredWatermark {
                watermark,
                rows_processed: 0,
            },
        );
    }

    /// Returns how many non-empty batches were upserted.
    pub async fn upsert_calls(&self) -> u64 {
        self.inner.lock().await.upsert_calls
    }

    fn check_connected(&self) -> EtlResult<()> {
        if !self.connected {
            bail!(ErrorKind::NotConnected, "Not connected to database");
        }

        Ok(())
    }
}

impl Destination for MemoryDestination {
    fn name() -> &'static str {
        "memory"
    }

    async fn connect(&mut self) -> EtlResult<()> {
        self.connected = true;
        info!("connected to memory destination");

        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            info!("disconnected from memory destination");
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn truncate(&self, table_name: &str) -> EtlResult<()> {
        self.check_connected()?;

        let mut inner = self.inner.lock().await;
        inner.tables.remove(table_name);
        info!(table = table_name, "truncating table");

        Ok(())
    }

    async fn upsert(&self, table_name: &str, batch: &RowBatch, primary_key: &str) -> EtlResult<u64> {
        if !self.connected || batch.is_empty() {
            return Ok(0);
        }

        let Some(key_index) = batch.schema().index_of(primary_key) else {
            bail!(
                ErrorKind::InvalidData,
                "Primary key column missing from batch",
                format!("table `{table_name}` has no column `{primary_key}`")
            );
        };

        let mut inner = self.inner.lock().await;
        inner.upsert_calls += 1;

        let rows = inner.tables.entry(table_name.to_string()).or_default();
        for row in batch.rows() {
            let key = &row.values()[key_index];
            match rows.iter_mut().find(|stored| &stored.values()[key_index] == key) {
                Some(stored) => *stored = row.clone(),
                None => rows.push(row.clone()),
            }
        }

        info!(table = table_name, rows = batch.len(), "writing table rows");

        Ok(batch.len() as u64)
    }
}

impl WatermarkStore for MemoryDestination {
    async fn get_watermark(&self, table_name: &str) -> EtlResult<Option<Watermark>> {
        self.check_connected()?;

        Ok(self
            .stored_watermark(table_name)
            .await
            .map(|stored| stored.watermark))
    }

    async fn update_watermark(
        &self,
        table_name: &str,
        watermark: Watermark,
        rows_processed: u64,
    ) -> EtlResult<()> {
        self.check_connected()?;

        let mut inner = self.inner.lock().await;
        inner.watermarks.insert(
            table_name.to_string(),
            StoredWatermark {
                watermark,
                rows_processed,
            },
        );

        Ok(())
    }
}
