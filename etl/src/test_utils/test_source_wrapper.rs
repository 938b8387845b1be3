use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::source::{RowBatchStream, Source};
use crate::types::Watermark;

/// Failures a [`TestSourceWrapper`] injects instead of delegating.
#[derive(Debug, Clone, Default)]
pub struct SourceFaults {
    /// Fail `connect`.
    pub connect: bool,
    /// Fail `extract` for these tables.
    pub extract_tables: HashSet<String>,
    /// Fail `max_change_timestamp` for these tables.
    pub max_change_tables: HashSet<String>,
}

#[derive(Debug, Default)]
struct Calls {
    connects: u64,
    disconnects: u64,
    extracts: Vec<(String, Option<Watermark>)>,
    max_change_lookups: Vec<String>,
}

/// Test wrapper for [`Source`] implementations recording calls and injecting failures.
///
/// Clones share the recorded calls, so a test can keep one clone while the pipeline owns
/// another.
#[derive(Debug, Clone)]
pub struct TestSourceWrapper<S> {
    wrapped_source: S,
    faults: Arc<SourceFaults>,
    calls: Arc<Mutex<Calls>>,
}

impl<S> TestSourceWrapper<S> {
    /// Wraps `source` without injecting failures.
    pub fn wrap(source: S) -> Self {
        Self::with_faults(source, SourceFaults::default())
    }

    pub fn with_faults(source: S, faults: SourceFaults) -> Self {
        Self {
            wrapped_source: source,
            faults: Arc::new(faults),
            calls: Arc::new(Mutex::new(Calls::default())),
        }
    }

    pub fn get_inner(&self) -> &S {
        &self.wrapped_source
    }

    /// Returns every `(table, watermark)` pair extraction was started with, in order.
    pub async fn extracts(&self) -> Vec<(String, Option<Watermark>)> {
        self.calls.lock().await.extracts.clone()
    }

    /// Returns the tables `max_change_timestamp` was queried for, in order.
    pub async fn max_change_lookups(&self) -> Vec<String> {
        self.calls.lock().await.max_change_lookups.clone()
    }

    /// Returns how often the source was connected and disconnected.
    pub async fn connections(&self) -> (u64, u64) {
        let calls = self.calls.lock().await;
        (calls.connects, calls.disconnects)
    }
}

impl<S> Source for TestSourceWrapper<S>
where
    S: Source + Send,
{
    fn name() -> &'static str {
        S::name()
    }

    async fn connect(&mut self) -> EtlResult<()> {
        self.calls.lock().await.connects += 1;

        if self.faults.connect {
            bail!(
                ErrorKind::SourceConnectionFailed,
                "Failed to connect to source database",
                "injected failure"
            );
        }

        self.wrapped_source.connect().await
    }

    async fn disconnect(&mut self) {
        self.calls.lock().await.disconnects += 1;
        self.wrapped_source.disconnect().await
    }

    fn is_connected(&self) -> bool {
        self.wrapped_source.is_connected()
    }

    async fn row_count(&self, table_name: &str, watermark: Option<Watermark>) -> EtlResult<u64> {
        self.wrapped_source.row_count(table_name, watermark).await
    }

    async fn extract(
        &self,
        table_name: &str,
        batch_size: usize,
        watermark: Option<Watermark>,
    ) -> EtlResult<RowBatchStream> {
        self.calls
            .lock()
            .await
            .extracts
            .push((table_name.to_string(), watermark));

        if self.faults.extract_tables.contains(table_name) {
            bail!(
                ErrorKind::SourceQueryFailed,
                "Failed to extract table",
                format!("injected failure for `{table_name}`")
            );
        }

        self.wrapped_source
            .extract(table_name, batch_size, watermark)
            .await
    }

    async fn max_change_timestamp(&self, table_name: &str) -> EtlResult<Option<Watermark>> {
        self.calls
            .lock()
            .await
            .max_change_lookups
            .push(table_name.to_string());

        if self.faults.max_change_tables.contains(table_name) {
            bail!(
                ErrorKind::SourceQueryFailed,
                "Failed to query the latest change",
                format!("injected failure for `{table_name}`")
            );
        }

        self.wrapped_source.max_change_timestamp(table_name).await
    }
}
