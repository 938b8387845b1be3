use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::bail;
use crate::destination::Destination;
use crate::error::{ErrorKind, EtlResult};
use crate::store::watermark::WatermarkStore;
use crate::types::{RowBatch, Watermark};

/// Failures a [`TestDestinationWrapper`] injects instead of delegating.
#[derive(Debug, Clone, Default)]
pub struct DestinationFaults {
    /// Fail `connect`.
    pub connect: bool,
    /// Fail `upsert` for these tables.
    pub upsert_tables: HashSet<String>,
    /// Fail `update_watermark` for these tables.
    pub watermark_update_tables: HashSet<String>,
}

#[derive(Debug, Default)]
struct Calls {
    connects: u64,
    disconnects: u64,
    watermark_reads: Vec<String>,
    watermark_updates: Vec<(String, Watermark, u64)>,
    truncates: Vec<String>,
    upserted_batches: HashMap<String, Vec<RowBatch>>,
}

/// Test wrapper for [`Destination`] implementations recording calls and injecting failures.
///
/// Clones share the recorded calls.
#[derive(Debug, Clone)]
pub struct TestDestinationWrapper<D> {
    wrapped_destination: D,
    faults: Arc<DestinationFaults>,
    calls: Arc<Mutex<Calls>>,
}

impl<D> TestDestinationWrapper<D> {
    /// Wraps `destination` without injecting failures.
    pub fn wrap(destination: D) -> Self {
        Self::with_faults(destination, DestinationFaults::default())
    }

    pub fn with_faults(destination: D, faults: DestinationFaults) -> Self {
        Self {
            wrapped_destination: destination,
            faults: Arc::new(faults),
            calls: Arc::new(Mutex::new(Calls::default())),
        }
    }

    pub fn get_inner(&self) -> &D {
        &self.wrapped_destination
    }

    /// Returns the tables whose watermark was read, in order.
    pub async fn watermark_reads(&self) -> Vec<String> {
        self.calls.lock().await.watermark_reads.clone()
    }

    /// Returns every successful watermark write, in order.
    pub async fn watermark_updates(&self) -> Vec<(String, Watermark, u64)> {
        self.calls.lock().await.watermark_updates.clone()
    }

    /// Returns the truncated tables, in order.
    pub async fn truncates(&self) -> Vec<String> {
        self.calls.lock().await.truncates.clone()
    }

    /// Returns the batches successfully upserted into `table_name`.
    pub async fn upserted_batches(&self, table_name: &str) -> Vec<RowBatch> {
        self.calls
            .lock()
            .await
            .upserted_batches
            .get(table_name)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns how often the destination was connected and disconnected.
    pub async fn connections(&self) -> (u64, u64) {
        let calls = self.calls.lock().await;
        (calls.connects, calls.disconnects)
    }
}

impl<D> Destination for TestDestinationWrapper<D>
where
    D: Destination + Send,
{
    fn name() -> &'static str {
        D::name()
    }

    async fn connect(&mut self) -> EtlResult<()> {
        self.calls.lock().await.connects += 1;

        if self.faults.connect {
            bail!(
                ErrorKind::DestinationConnectionFailed,
                "Failed to connect to target database",
                "injected failure"
            );
        }

        self.wrapped_destination.connect().await
    }

    async fn disconnect(&mut self) {
        self.calls.lock().await.disconnects += 1;
        self.wrapped_destination.disconnect().await
    }

    fn is_connected(&self) -> bool {
        self.wrapped_destination.is_connected()
    }

    async fn truncate(&self, table_name: &str) -> EtlResult<()> {
        self.wrapped_destination.truncate(table_name).await?;
        self.calls
            .lock()
            .await
            .truncates
            .push(table_name.to_string());

        Ok(())
    }

    async fn upsert(&self, table_name: &str, batch: &RowBatch, primary_key: &str) -> EtlResult<u64> {
        if self.faults.upsert_tables.contains(table_name) {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "Failed to upsert batch",
                format!("injected failure for `{table_name}`")
            );
        }

        let rows = self
            .wrapped_destination
            .upsert(table_name, batch, primary_key)
            .await?;

        self.calls
            .lock()
            .await
            .upserted_batches
            .entry(table_name.to_string())
            .or_default()
            .push(batch.clone());

        Ok(rows)
    }
}

impl<D> WatermarkStore for TestDestinationWrapper<D>
where
    D: WatermarkStore + Sync,
{
    async fn get_watermark(&self, table_name: &str) -> EtlResult<Option<Watermark>> {
        self.calls
            .lock()
            .await
            .watermark_reads
            .push(table_name.to_string());

        self.wrapped_destination.get_watermark(table_name).await
    }

    async fn update_watermark(
        &self,
        table_name: &str,
        watermark: Watermark,
        rows_processed: u64,
    ) -> EtlResult<()> {
        if self.faults.watermark_update_tables.contains(table_name) {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "Failed to update watermark",
                format!("injected failure for `{table_name}`")
            );
        }

        self.wrapped_destination
            .update_watermark(table_name, watermark, rows_processed)
            .await?;

        self.calls.lock().await.watermark_updates.push((
            table_name.to_string(),
            watermark,
            rows_processed,
        ));

        Ok(())
    }
}
