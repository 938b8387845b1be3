use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use config::shared::PgConnectionConfig;
use futures::{StreamExt, TryStreamExt, future, stream};
use pg_escape::quote_identifier;
use postgres::schema::{CHANGE_TRACKING_COLUMN, DEFAULT_PRIMARY_KEY, TableName};
use tokio_postgres::Client;
use tokio_postgres::types::ToSql;
use tracing::{Instrument, Span, debug, info, info_span};

use crate::clients::postgres::connect;
use crate::concurrency::stream::BatchStream;
use crate::conversions::table_row::{row_schema_from_columns, table_row_from_row};
use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::etl_error;
use crate::source::{RowBatchStream, Source};
use crate::types::{RowBatch, Watermark};

/// Extracts rows from the source Postgres database.
///
/// Table names are resolved through the connection's `search_path`.
pub struct Extractor {
    config: PgConnectionConfig,
    client: Option<Client>,
    span: Span,
}

impl Extractor {
    /// Creates an unconnected extractor logging within a child of `parent`.
    pub fn new(config: PgConnectionConfig, parent: &Span) -> Self {
        let span = info_span!(parent: parent, "extractor", db = %config);

        Self {
            config,
            client: None,
            span,
        }
    }

    fn client(&self) -> EtlResult<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| etl_error!(ErrorKind::NotConnected, "Not connected to database"))
    }
}

fn count_query(table: &TableName, incremental: bool) -> String {
    let mut query = format!("select count(*) from {}", table.as_quoted_identifier());
    if incremental {
        query.push_str(&format!(
            " where {} > $1::timestamptz",
            quote_identifier(CHANGE_TRACKING_COLUMN)
        ));
    }

    query
}

fn extract_query(table: &TableName, incremental: bool) -> String {
    let table = table.as_quoted_identifier();
    let updated_at = quote_identifier(CHANGE_TRACKING_COLUMN);

    if incremental {
        format!("select * from {table} where {updated_at} > $1::timestamptz order by {updated_at} asc")
    } else {
        format!(
            "select * from {table} order by {} asc",
            quote_identifier(DEFAULT_PRIMARY_KEY)
        )
    }
}

fn max_change_query(table: &TableName) -> String {
    format!(
        "select max({})::timestamptz from {}",
        quote_identifier(CHANGE_TRACKING_COLUMN),
        table.as_quoted_identifier()
    )
}

impl Source for Extractor {
    fn name() -> &'static str {
        "postgres"
    }

    async fn connect(&mut self) -> EtlResult<()> {
        if self.client.is_some() {
            return Ok(());
        }

        let span = self.span.clone();
        let client = async {
            info!(
                host = %self.config.host,
                db = %self.config.name,
                "connecting to source database"
            );

            let client = connect(&self.config).await.map_err(|err| {
                etl_error!(
                    ErrorKind::SourceConnectionFailed,
                    "Failed to connect to source database",
                    format!("{}: {err}", self.config.redacted_url()),
                    source: err
                )
            })?;

            info!("connected to source database successfully");

            Ok::<_, EtlError>(client)
        }
        .instrument(span)
        .await?;

        self.client = Some(client);

        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.client.take().is_some() {
            self.span
                .in_scope(|| info!("disconnected from source database"));
        }
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    async fn row_count(&self, table_name: &str, watermark: Option<Watermark>) -> EtlResult<u64> {
        let client = self.client()?;
        let query = count_query(&TableName::unqualified(table_name), watermark.is_some());

        let row = match &watermark {
            Some(watermark) => client.query_one(&query, &[watermark]).await?,
            None => client.query_one(&query, &[]).await?,
        };
        let count: i64 = row.get(0);

        Ok(count.max(0) as u64)
    }

    async fn extract(
        &self,
        table_name: &str,
        batch_size: usize,
        watermark: Option<Watermark>,
    ) -> EtlResult<RowBatchStream> {
        let client = self.client()?;
        let span = info_span!(parent: &self.span, "extract", table = table_name);

        let total_rows = self
            .row_count(table_name, watermark)
            .instrument(span.clone())
            .await?;
        span.in_scope(|| {
            info!(
                total_rows,
                batch_size,
                incremental = watermark.is_some(),
                watermark = ?watermark,
                "starting extraction"
            )
        });

        let query = extract_query(&TableName::unqualified(table_name), watermark.is_some());
        let statement = client.prepare(&query).await?;
        let schema = Arc::new(row_schema_from_columns(statement.columns())?);

        let params: Vec<&(dyn ToSql + Sync)> = match &watermark {
            Some(watermark) => vec![watermark as &(dyn ToSql + Sync)],
            None => vec![],
        };
        let rows = client.query_raw(&statement, params).await?;

        let batch_count = Arc::new(AtomicU64::new(0));
        let batches = {
            let span = span.clone();
            let batch_count = batch_count.clone();

            let rows = BatchStream::wrap(rows.map_err(EtlError::from), batch_size);
            rows.map(move |rows| -> EtlResult<RowBatch> {
                let rows = rows?
                    .iter()
                    .map(|row| table_row_from_row(&schema, row))
                    .collect::<EtlResult<Vec<_>>>()?;
                let batch = RowBatch::new(schema.clone(), rows)?;

                let batch_num = batch_count.fetch_add(1, Ordering::Relaxed) + 1;
                span.in_scope(|| debug!(batch_num, rows_in_batch = batch.len(), "extracted batch"));

                Ok(batch)
            })
        };

        let completion = stream::once(async move {
            span.in_scope(|| {
                info!(
                    total_batches = batch_count.load(Ordering::Relaxed),
                    total_rows,
                    "extraction complete"
                )
            });

            None::<EtlResult<RowBatch>>
        })
        .filter_map(future::ready);

        Ok(batches.chain(completion).boxed())
    }

    async fn max_change_timestamp(&self, table_name: &str) -> EtlResult<Option<Watermark>> {
        let client = self.client()?;
        let query = max_change_query(&TableName::unqualified(table_name));

        let row = client.query_one(&query, &[]).await?;

        Ok(row.get(0))
    }
}
