use chrono::Utc;
use config::shared::PgConnectionConfig;
use pg_escape::quote_identifier;
use postgres::schema::{LOADED_AT_COLUMN, TableName};
use postgres::watermarks;
use tokio_postgres::Client;
use tokio_postgres::types::{ToSql, Type};
use tracing::{Instrument, Span, debug, info, info_span, warn};

use crate::bail;
use crate::clients::postgres::connect;
use crate::destination::Destination;
use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::etl_error;
use crate::store::watermark::WatermarkStore;
use crate::types::{Cell, ColumnSchema, RowBatch, Watermark};

/// Maximum number of rows sent in a single insert statement.
const MAX_ROWS_PER_STATEMENT: usize = 1000;

/// Maximum number of bind parameters Postgres accepts in one statement.
const MAX_BIND_PARAMETERS: usize = u16::MAX as usize;

/// Loads rows into the `raw` namespace of the target Postgres database and keeps the
/// watermark table of that database.
pub struct Loader {
    config: PgConnectionConfig,
    client: Option<Client>,
    max_rows_per_statement: usize,
    span: Span,
}

impl Loader {
    /// Creates an unconnected loader logging within a child of `parent`.
    pub fn new(config: PgConnectionConfig, parent: &Span) -> Self {
        let span = info_span!(parent: parent, "loader", db = %config);

        Self {
            config,
            client: None,
            max_rows_per_statement: MAX_ROWS_PER_STATEMENT,
            span,
        }
    }

    /// Caps the number of rows sent per insert statement.
    ///
    /// A batch larger than the cap is written with several statements in the same transaction.
    /// Values above the default or below one are clamped.
    pub fn with_max_rows_per_statement(mut self, max_rows: usize) -> Self {
        self.max_rows_per_statement = max_rows.clamp(1, MAX_ROWS_PER_STATEMENT);
        self
    }

    fn client(&self) -> EtlResult<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| etl_error!(ErrorKind::NotConnected, "Not connected to database"))
    }

    async fn upsert_in_transaction(
        &self,
        client: &Client,
        table: &TableName,
        columns: &[ColumnSchema],
        batch: &RowBatch,
        loaded_at: &Cell,
        primary_key: &str,
    ) -> EtlResult<()> {
        let rows_per_statement = rows_per_statement(columns.len(), self.max_rows_per_statement);

        client
            .batch_execute("begin")
            .await
            .map_err(destination_error)?;

        let result = async {
            for page in batch.rows().chunks(rows_per_statement) {
                let query = upsert_query(table, columns, primary_key, page.len());

                let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(page.len() * columns.len());
                for row in page {
                    for value in row.values() {
                        params.push(value);
                    }
                    if columns.len() > row.values().len() {
                        params.push(loaded_at);
                    }
                }

                client
                    .execute(&query, &params)
                    .await
                    .map_err(destination_error)?;
            }

            Ok::<(), EtlError>(())
        }
        .await;

        match result {
            Ok(()) => {
                client
                    .batch_execute("commit")
                    .await
                    .map_err(destination_error)?;

                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = client.batch_execute("rollback").await {
                    warn!(error = %rollback_err, "failed to roll back upsert transaction");
                }

                Err(err)
            }
        }
    }
}

fn destination_error(err: tokio_postgres::Error) -> EtlError {
    EtlError::from(err).into_destination()
}

/// Returns how many rows fit in one statement for a table with `column_count` columns.
fn rows_per_statement(column_count: usize, max_rows: usize) -> usize {
    (MAX_BIND_PARAMETERS / column_count.max(1)).clamp(1, max_rows.max(1))
}

/// Returns the cast applied to a parameter bound to a column of type `typ`.
///
/// Numeric values are bound as text and converted by the server.
fn parameter_cast(typ: &Type) -> String {
    if *typ == Type::NUMERIC {
        "text::numeric".to_string()
    } else {
        typ.name().to_string()
    }
}

/// Builds a multi-row `insert ... on conflict` statement for `row_count` rows.
///
/// Parameters are numbered row by row in column order and every parameter is cast to its
/// column type. When the key is the only column conflicting rows are left untouched.
fn upsert_query(
    table: &TableName,
    columns: &[ColumnSchema],
    primary_key: &str,
    row_count: usize,
) -> String {
    let column_list = columns
        .iter()
        .map(|column| quote_identifier(&column.name).to_string())
        .collect::<Vec<_>>()
        .join(", ");

    let values = (0..row_count)
        .map(|row| {
            let placeholders = columns
                .iter()
                .enumerate()
                .map(|(i, column)| {
                    format!(
                        "${}::{}",
                        row * columns.len() + i + 1,
                        parameter_cast(&column.typ)
                    )
                })
                .collect::<Vec<_>>()
                .join(", ");

            format!("({placeholders})")
        })
        .collect::<Vec<_>>()
        .join(", ");

    let updates = columns
        .iter()
        .filter(|column| column.name != primary_key)
        .map(|column| {
            let name = quote_identifier(&column.name);
            format!("{name} = excluded.{name}")
        })
        .collect::<Vec<_>>();

    let conflict_action = if updates.is_empty() {
        "do nothing".to_string()
    } else {
        format!("do update set {}", updates.join(", "))
    };

    format!(
        "insert into {} ({column_list}) values {values} on conflict ({}) {conflict_action}",
        table.as_quoted_identifier(),
        quote_identifier(primary_key)
    )
}

impl Destination for Loader {
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
                "connecting to target database"
            );

            let client = connect(&self.config).await.map_err(|err| {
                etl_error!(
                    ErrorKind::DestinationConnectionFailed,
                    "Failed to connect to target database",
                    format!("{}: {err}", self.config.redacted_url()),
                    source: err
                )
            })?;

            info!("connected to target database successfully");

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
                .in_scope(|| info!("disconnected from target database"));
        }
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    async fn truncate(&self, table_name: &str) -> EtlResult<()> {
        let client = self.client()?;
        let table = TableName::raw(table_name);

        client
            .batch_execute(&format!("truncate table {}", table.as_quoted_identifier()))
            .await
            .map_err(destination_error)?;

        self.span
            .in_scope(|| info!(table = %table, "truncated table"));

        Ok(())
    }

    async fn upsert(&self, table_name: &str, batch: &RowBatch, primary_key: &str) -> EtlResult<u64> {
        let Some(client) = &self.client else {
            return Ok(0);
        };
        if batch.is_empty() {
            return Ok(0);
        }

        if batch.schema().index_of(primary_key).is_none() {
            bail!(
                ErrorKind::InvalidData,
                "Primary key column missing from batch",
                format!("table `{table_name}` has no column `{primary_key}`")
            );
        }

        let mut columns = batch.schema().columns().to_vec();
        if batch.schema().index_of(LOADED_AT_COLUMN).is_none() {
            columns.push(ColumnSchema::new(LOADED_AT_COLUMN, Type::TIMESTAMPTZ));
        }
        let loaded_at = Cell::TimestampTz(Utc::now());
        let table = TableName::raw(table_name);

        let span = info_span!(parent: &self.span, "upsert", table = %table, rows = batch.len());
        self.upsert_in_transaction(client, &table, &columns, batch, &loaded_at, primary_key)
            .instrument(span.clone())
            .await?;

        span.in_scope(|| debug!("upserted batch"));

        Ok(batch.len() as u64)
    }
}

impl WatermarkStore for Loader {
    async fn get_watermark(&self, table_name: &str) -> EtlResult<Option<Watermark>> {
        let client = self.client()?;

        let row = watermarks::get_watermark(client, table_name)
            .await
            .map_err(destination_error)?;

        Ok(row.map(|row| row.last_extracted_at))
    }

    async fn update_watermark(
        &self,
        table_name: &str,
        watermark: Watermark,
        rows_processed: u64,
    ) -> EtlResult<()> {
        let client = self.client()?;
        let rows_processed = i64::try_from(rows_processed).map_err(|err| {
            etl_error!(
                ErrorKind::ConversionError,
                "Row count does not fit the watermark table",
                err
            )
        })?;

        watermarks::upsert_watermark(client, table_name, watermark, rows_processed)
            .await
            .map_err(destination_error)?;

        self.span.in_scope(|| {
            info!(
                table = table_name,
                watermark = %watermark,
                rows_processed,
                "updated watermark"
            )
        });

        Ok(())
    }
}
