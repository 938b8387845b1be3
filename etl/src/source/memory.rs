use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use postgres::schema::{CHANGE_TRACKING_COLUMN, DEFAULT_PRIMARY_KEY};
use tokio::sync::Mutex;
use tracing::info;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::source::{RowBatchStream, Source};
use crate::types::{Cell, RowBatch, TableRow, Watermark};

/// In-memory source for tests and local experiments.
///
/// Tables are plain [`RowBatch`]es that can be replaced between runs through any clone of the
/// source. Extraction follows the same ordering and watermark rules as the Postgres source.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    tables: Arc<Mutex<HashMap<String, RowBatch>>>,
    connected: bool,
}

impl MemorySource {
    /// Creates a new empty memory source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the contents of `table_name`.
    pub async fn set_table(&self, table_name: &str, rows: RowBatch) {
        let mut tables = self.tables.lock().await;
        tables.insert(table_name.to_string(), rows);
    }

    /// Returns a copy of the current contents of `table_name`.
    pub async fn table(&self, table_name: &str) -> Option<RowBatch> {
        let tables = self.tables.lock().await;
        tables.get(table_name).cloned()
    }

    fn check_connected(&self) -> EtlResult<()> {
        if !self.connected {
            bail!(ErrorKind::NotConnected, "Not connected to database");
        }

        Ok(())
    }

    async fn select(&self, table_name: &str, watermark: Option<Watermark>) -> EtlResult<RowBatch> {
        self.check_connected()?;

        let tables = self.tables.lock().await;
        let Some(table) = tables.get(table_name) else {
            bail!(
                ErrorKind::SourceSchemaError,
                "Table not found",
                format!("relation \"{table_name}\" does not exist")
            );
        };

        let schema = table.schema().clone();
        let column = |name: &str| {
            schema.index_of(name).ok_or_else(|| {
                etl_error!(
                    ErrorKind::SourceSchemaError,
                    "Column not found",
                    format!("column \"{name}\" of \"{table_name}\" does not exist")
                )
            })
        };

        let mut rows: Vec<TableRow> = table.rows().to_vec();
        match watermark {
            Some(watermark) => {
                let updated_at = column(CHANGE_TRACKING_COLUMN)?;
                rows.retain(|row| {
                    row.values()[updated_at]
                        .as_timestamp()
                        .is_some_and(|ts| ts > watermark)
                });
                rows.sort_by(|a, b| compare_cells(&a.values()[updated_at], &b.values()[updated_at]));
            }
            None => {
                let id = column(DEFAULT_PRIMARY_KEY)?;
                rows.sort_by(|a, b| compare_cells(&a.values()[id], &b.values()[id]));
            }
        }

        RowBatch::new(schema, rows)
    }
}

/// Orders cells like Postgres orders values of one column, nulls last.
fn compare_cells(a: &Cell, b: &Cell) -> Ordering {
    fn as_i64(cell: &Cell) -> Option<i64> {
        match cell {
            Cell::I16(v) => Some(i64::from(*v)),
            Cell::I32(v) => Some(i64::from(*v)),
            Cell::U32(v) => Some(i64::from(*v)),
            Cell::I64(v) => Some(*v),
            _ => None,
        }
    }

    match (a, b) {
        (Cell::Null, Cell::Null) => Ordering::Equal,
        (Cell::Null, _) => Ordering::Greater,
        (_, Cell::Null) => Ordering::Less,
        (Cell::String(a), Cell::String(b)) => a.cmp(b),
        (Cell::Uuid(a), Cell::Uuid(b)) => a.cmp(b),
        (Cell::Numeric(a), Cell::Numeric(b)) => a.cmp(b),
        (Cell::F64(a), Cell::F64(b)) => a.total_cmp(b),
        _ => match (as_i64(a), as_i64(b), a.as_timestamp(), b.as_timestamp()) {
            (Some(a), Some(b), _, _) => a.cmp(&b),
            (_, _, Some(a), Some(b)) => a.cmp(&b),
            _ => Ordering::Equal,
        },
    }
}

impl Source for MemorySource {
    fn name() -> &'static str {
        "memory"
    }

    async fn connect(&mut self) -> EtlResult<()> {
        self.connected = true;
        info!("connected to memory source");

        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            info!("disconnected from memory source");
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn row_count(&self, table_name: &str, watermark: Option<Watermark>) -> EtlResult<u64> {
        Ok(self.select(table_name, watermark).await?.len() as u64)
    }

    async fn extract(
        &self,
        table_name: &str,
        batch_size: usize,
        watermark: Option<Watermark>,
    ) -> EtlResult<RowBatchStream> {
        let rows = self.select(table_name, watermark).await?;
        let batches: Vec<EtlResult<RowBatch>> = rows.chunks(batch_size).map(Ok).collect();

        Ok(stream::iter(batches).boxed())
    }

    async fn max_change_timestamp(&self, table_name: &str) -> EtlResult<Option<Watermark>> {
        let rows = self.select(table_name, None).await?;

        Ok(rows.max_timestamp(CHANGE_TRACKING_COLUMN))
    }
}
