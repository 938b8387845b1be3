//! Orchestration of an extract-load run over the configured tables.

use config::shared::{PipelineConfig, WatermarkStrategy, validate_tables};
use postgres::schema::{CHANGE_TRACKING_COLUMN, DEFAULT_PRIMARY_KEY};
use tracing::{Instrument, Span, error, info, info_span, warn};
use uuid::Uuid;

use crate::destination::Destination;
use crate::destination::postgres::Loader;
use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
#[cfg(feature = "failpoints")]
use crate::failpoints::{LOAD_TABLE_BEFORE_WATERMARK_UPDATE, etl_fail_point};
use crate::report::{RunReport, RunReportBuilder};
use crate::source::Source;
use crate::source::postgres::Extractor;
use crate::store::watermark::WatermarkStore;
use crate::types::{RowBatch, Watermark};

/// Per-run overrides of the [`PipelineConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Ignore stored watermarks and extract every row.
    pub full_refresh: bool,
    /// Truncate each target table before a full refresh reloads it.
    pub truncate: bool,
    /// Tables to process instead of the configured ones.
    pub tables: Option<Vec<String>>,
}

/// What happened to a table that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableResult {
    Skipped,
    Loaded { rows_extracted: u64, rows_loaded: u64 },
}

/// Creates the span a run logs within.
///
/// Every run gets a fresh `run_id`. Extractors and loaders used by the run should be created
/// with this span as their parent.
pub fn run_span() -> Span {
    info_span!("etl_run", run_id = %Uuid::new_v4())
}

/// Moves rows of a fixed, ordered set of tables from a [`Source`] to a [`Destination`].
///
/// Tables are processed one after the other. A failing table is recorded in the
/// [`RunReport`] and does not stop the remaining tables.
#[derive(Debug)]
pub struct Pipeline<S, D> {
    config: PipelineConfig,
    source: S,
    destination: D,
    span: Span,
}

impl<S, D> Pipeline<S, D>
where
    S: Source + Send,
    D: Destination + WatermarkStore + Send,
{
    pub fn new(config: PipelineConfig, source: S, destination: D) -> Self {
        Self {
            config,
            source,
            destination,
            span: run_span(),
        }
    }

    /// Replaces the span the run logs within, see [`run_span`].
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn destination(&self) -> &D {
        &self.destination
    }

    /// Runs the pipeline once and reports the outcome.
    ///
    /// Never fails: connection errors and per-table errors end up in the report. Both
    /// connections are closed before returning.
    pub async fn run(&mut self, options: RunOptions) -> RunReport {
        let span = self.span.clone();
        self.run_inner(options).instrument(span).await
    }

    async fn run_inner(&mut self, options: RunOptions) -> RunReport {
        let mut report = RunReportBuilder::start();
        let tables = options
            .tables
            .clone()
            .unwrap_or_else(|| self.config.tables.clone());

        info!(
            ?tables,
            full_refresh = options.full_refresh,
            truncate = options.truncate,
            batch_size = self.config.batch_size,
            watermark_strategy = %self.config.watermark_strategy,
            "starting etl run"
        );

        let connected = match validate_tables(&tables) {
            Ok(()) => self.connect().await,
            Err(err) => Err(etl_error!(
                ErrorKind::ValidationError,
                "Invalid table selection",
                err
            )),
        };

        match connected {
            Ok(()) => {
                for table_name in &tables {
                    let span = info_span!("table", table = %table_name);
                    let result = self
                        .process_table(table_name, &options)
                        .instrument(span)
                        .await;

                    match result {
                        Ok(TableResult::Skipped) => report.table_skipped(table_name),
                        Ok(TableResult::Loaded {
                            rows_extracted,
                            rows_loaded,
                        }) => report.table_succeeded(table_name, rows_extracted, rows_loaded),
                        Err(err) => {
                            error!(table = %table_name, error = %err, "error processing table");
                            report.table_failed(table_name, &err);
                        }
                    }
                }
            }
            Err(err) => {
                error!(error = %err, "etl process failed");
                report.run_failed(&err);
            }
        }

        self.disconnect().await;

        let report = report.finish();
        let duration = report.completed_at() - report.started_at();
        info!(
            status = ?report.status(),
            total_rows = report.total_rows(),
            errors = report.errors().len(),
            duration_ms = duration.num_milliseconds(),
            "etl run completed"
        );

        report
    }

    async fn connect(&mut self) -> EtlResult<()> {
        self.source.connect().await?;
        self.destination.connect().await?;

        Ok(())
    }

    async fn disconnect(&mut self) {
        self.source.disconnect().await;
        self.destination.disconnect().await;
    }

    async fn process_table(
        &self,
        table_name: &str,
        options: &RunOptions,
    ) -> EtlResult<TableResult> {
        let watermark = if options.full_refresh {
            if options.truncate {
                self.destination.truncate(table_name).await?;
            }

            None
        } else {
            self.destination.get_watermark(table_name).await?
        };

        info!(table = table_name, watermark = ?watermark, "extracting table");
        let rows = self.source.extract_all(table_name, watermark).await?;
        let rows_extracted = rows.len() as u64;

        if rows.is_empty() {
            info!(table = table_name, "no new rows, skipping table");
            return Ok(TableResult::Skipped);
        }

        let rows_loaded = self
            .destination
            .load(table_name, &rows, self.config.batch_size, DEFAULT_PRIMARY_KEY)
            .await?;

        #[cfg(feature = "failpoints")]
        etl_fail_point(LOAD_TABLE_BEFORE_WATERMARK_UPDATE)?;

        match self.next_watermark(table_name, &rows).await? {
            Some(next_watermark) => {
                self.destination
                    .update_watermark(table_name, next_watermark, rows_loaded)
                    .await?;
            }
            None => warn!(
                table = table_name,
                "no change timestamp found, watermark left unchanged"
            ),
        }

        info!(
            table = table_name,
            rows_extracted, rows_loaded, "table processed"
        );

        Ok(TableResult::Loaded {
            rows_extracted,
            rows_loaded,
        })
    }

    async fn next_watermark(
        &self,
        table_name: &str,
        rows: &RowBatch,
    ) -> EtlResult<Option<Watermark>> {
        match self.config.watermark_strategy {
            WatermarkStrategy::SourceMax => self.source.max_change_timestamp(table_name).await,
            WatermarkStrategy::ObservedMax => Ok(rows.max_timestamp(CHANGE_TRACKING_COLUMN)),
        }
    }
}

/// Runs the pipeline once between the Postgres databases described by `config`.
pub async fn run_etl(config: &PipelineConfig, options: RunOptions) -> RunReport {
    let span = run_span();
    let source = Extractor::new(config.source.clone(), &span);
    let destination = Loader::new(config.target.clone(), &span);

    let mut pipeline = Pipeline::new(config.clone(), source, destination).with_span(span);

    pipeline.run(options).await
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use config::shared::{PgConnectionConfig, TlsConfig};

    use super::*;
    use crate::destination::memory::MemoryDestination;
    use crate::report::{RunStatus, TableOutcome, TableStatus};
    use crate::source::memory::MemorySource;
    use crate::test_utils::fixtures::{
        ORDERS, PRODUCTS, at_minute, orders_batch, product, products_batch,
    };
    use crate::test_utils::test_destination_wrapper::{DestinationFaults, TestDestinationWrapper};
    use crate::test_utils::test_source_wrapper::{SourceFaults, TestSourceWrapper};
    use crate::types::RowBatch;

    type TestPipeline =
        Pipeline<TestSourceWrapper<MemorySource>, TestDestinationWrapper<MemoryDestination>>;

    fn endpoint(name: &str) -> PgConnectionConfig {
        PgConnectionConfig {
            host: "localhost".to_string(),
            port: 5432,
            name: name.to_string(),
            username: "etl".to_string(),
            password: None,
            tls: TlsConfig::default(),
        }
    }

    fn pipeline_config(strategy: WatermarkStrategy) -> PipelineConfig {
        PipelineConfig {
            source: endpoint("source_oltp"),
            target: endpoint("target_dwh"),
            batch_size: 2,
            log_level: "info".to_string(),
            tables: vec![PRODUCTS.to_string(), ORDERS.to_string()],
            watermark_strategy: strategy,
        }
    }

    async fn seeded_source() -> MemorySource {
        let source = MemorySource::new();
        source.set_table(PRODUCTS, products_batch()).await;
        source.set_table(ORDERS, orders_batch()).await;
        source
    }

    async fn create_pipeline(
        strategy: WatermarkStrategy,
        source_faults: SourceFaults,
        destination_faults: DestinationFaults,
    ) -> TestPipeline {
        Pipeline::new(
            pipeline_config(strategy),
            TestSourceWrapper::with_faults(seeded_source().await, source_faults),
            TestDestinationWrapper::with_faults(MemoryDestination::new(), destination_faults),
        )
    }

    fn tables(names: &[&str]) -> HashSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[tokio::test]
    async fn first_run_loads_every_table_and_sets_watermarks() {
        let mut pipeline = create_pipeline(
            WatermarkStrategy::SourceMax,
            SourceFaults::default(),
            DestinationFaults::default(),
        )
        .await;

        let report = pipeline.run(RunOptions::default()).await;

        assert_eq!(report.status(), RunStatus::Success);
        assert_eq!(report.total_rows(), 5);
        assert_eq!(report.tables().get(PRODUCTS), Some(&TableOutcome::success(3, 3)));
        assert_eq!(report.tables().get(ORDERS), Some(&TableOutcome::success(2, 2)));
        assert!(report.errors().is_empty());

        let destination = pipeline.destination();
        assert_eq!(
            destination.watermark_updates().await,
            vec![
                (PRODUCTS.to_string(), at_minute(3), 3),
                (ORDERS.to_string(), at_minute(2), 2),
            ]
        );
        // Three products with a batch size of two.
        assert_eq!(destination.upserted_batches(PRODUCTS).await.len(), 2);
        assert_eq!(destination.connections().await, (1, 1));
        assert_eq!(pipeline.source().connections().await, (1, 1));
    }

    #[tokio::test]
    async fn rerunning_without_changes_skips_every_table() {
        let mut pipeline = create_pipeline(
            WatermarkStrategy::SourceMax,
            SourceFaults::default(),
            DestinationFaults::default(),
        )
        .await;

        pipeline.run(RunOptions::default()).await;
        let products_after_first_run = pipeline.destination().get_inner().table_rows(PRODUCTS).await;

        let report = pipeline.run(RunOptions::default()).await;

        assert_eq!(report.status(), RunStatus::Success);
        assert_eq!(report.total_rows(), 0);
        for (_, outcome) in report.tables().iter() {
            assert_eq!(outcome, &TableOutcome::skipped());
        }
        assert_eq!(
            pipeline.destination().get_inner().table_rows(PRODUCTS).await,
            products_after_first_run
        );
        // Skipped tables keep their watermark.
        assert_eq!(pipeline.destination().watermark_updates().await.len(), 2);
    }

    #[tokio::test]
    async fn incremental_run_only_extracts_rows_changed_after_the_watermark() {
        let mut pipeline = create_pipeline(
            WatermarkStrategy::SourceMax,
            SourceFaults::default(),
            DestinationFaults::default(),
        )
        .await;
        pipeline.run(RunOptions::default()).await;

        let mut products = products_batch();
        products
            .append(
                RowBatch::from_records(vec![product(2, "Gadget Pro", "29.00", at_minute(10))])
                    .unwrap(),
            )
            .unwrap();
        pipeline.source().get_inner().set_table(PRODUCTS, products).await;

        let report = pipeline.run(RunOptions::default()).await;

        assert_eq!(report.status(), RunStatus::Success);
        assert_eq!(report.tables().get(PRODUCTS), Some(&TableOutcome::success(1, 1)));
        assert_eq!(report.tables().get(ORDERS).map(|o| o.status), Some(TableStatus::Skipped));

        let extracts = pipeline.source().extracts().await;
        assert_eq!(extracts[2], (PRODUCTS.to_string(), Some(at_minute(3))));
        assert_eq!(
            pipeline
                .destination()
                .get_inner()
                .stored_watermark(PRODUCTS)
                .await
                .map(|stored| stored.watermark),
            Some(at_minute(10))
        );
        // Upserting the changed row replaced it instead of adding a copy.
        assert_eq!(pipeline.destination().get_inner().table_rows(PRODUCTS).await.len(), 3);
    }

    #[tokio::test]
    async fn failing_table_does_not_stop_the_others() {
        let mut pipeline = create_pipeline(
            WatermarkStrategy::SourceMax,
            SourceFaults::default(),
            DestinationFaults {
                upsert_tables: tables(&[PRODUCTS]),
                ..Default::default()
            },
        )
        .await;

        let report = pipeline.run(RunOptions::default()).await;

        assert_eq!(report.status(), RunStatus::Partial);
        assert_eq!(report.total_rows(), 2);
        assert_eq!(report.tables().get(PRODUCTS).map(|o| o.status), Some(TableStatus::Error));
        assert_eq!(report.tables().get(ORDERS), Some(&TableOutcome::success(2, 2)));
        assert_eq!(report.errors().len(), 1);
        assert!(report.errors()[0].starts_with("Error processing table products: "));

        let updates = pipeline.destination().watermark_updates().await;
        assert_eq!(updates, vec![(ORDERS.to_string(), at_minute(2), 2)]);
    }

    #[tokio::test]
    async fn every_table_failing_fails_the_run() {
        let mut pipeline = create_pipeline(
            WatermarkStrategy::SourceMax,
            SourceFaults {
                extract_tables: tables(&[PRODUCTS, ORDERS]),
                ..Default::default()
            },
            DestinationFaults::default(),
        )
        .await;

        let report = pipeline.run(RunOptions::default()).await;

        assert_eq!(report.status(), RunStatus::Failed);
        assert_eq!(report.errors().len(), 2);
        assert_eq!(report.tables().len(), 2);
    }

    #[tokio::test]
    async fn connection_failure_fails_the_run_and_disconnects() {
        let mut pipeline = create_pipeline(
            WatermarkStrategy::SourceMax,
            SourceFaults::default(),
            DestinationFaults {
                connect: true,
                ..Default::default()
            },
        )
        .await;

        let report = pipeline.run(RunOptions::default()).await;

        assert_eq!(report.status(), RunStatus::Failed);
        assert!(report.tables().is_empty());
        assert_eq!(report.errors().len(), 1);
        assert!(report.errors()[0].starts_with("ETL process failed: "));
        assert!(pipeline.source().extracts().await.is_empty());
        assert_eq!(pipeline.source().connections().await, (1, 1));
        assert!(!pipeline.source().is_connected());
    }

    #[tokio::test]
    async fn blank_table_override_fails_the_run_before_connecting() {
        let mut pipeline = create_pipeline(
            WatermarkStrategy::SourceMax,
            SourceFaults::default(),
            DestinationFaults::default(),
        )
        .await;

        let report = pipeline
            .run(RunOptions {
                tables: Some(vec![ORDERS.to_string(), " ".to_string()]),
                ..Default::default()
            })
            .await;

        assert_eq!(report.status(), RunStatus::Failed);
        assert!(report.tables().is_empty());
        assert_eq!(report.errors().len(), 1);
        assert!(report.errors()[0].starts_with("ETL process failed: "));
        assert!(report.errors()[0].contains("table name at position 1 is empty"));
        assert_eq!(pipeline.source().connections().await.0, 0);
        assert_eq!(pipeline.destination().connections().await.0, 0);
        assert!(pipeline.source().extracts().await.is_empty());
    }

    #[tokio::test]
    async fn failed_watermark_lookup_keeps_the_previous_watermark() {
        let mut pipeline = create_pipeline(
            WatermarkStrategy::SourceMax,
            SourceFaults {
                max_change_tables: tables(&[ORDERS]),
                ..Default::default()
            },
            DestinationFaults::default(),
        )
        .await;
        pipeline
            .destination()
            .get_inner()
            .set_watermark(ORDERS, at_minute(1))
            .await;

        let report = pipeline.run(RunOptions::default()).await;

        assert_eq!(report.status(), RunStatus::Partial);
        assert_eq!(report.tables().get(ORDERS).map(|o| o.status), Some(TableStatus::Error));
        assert_eq!(
            pipeline
                .destination()
                .get_inner()
                .stored_watermark(ORDERS)
                .await
                .map(|stored| stored.watermark),
            Some(at_minute(1))
        );
        // The rows were loaded before the failure and are replayed by the next run.
        assert_eq!(pipeline.destination().get_inner().table_rows(ORDERS).await.len(), 1);
    }

    #[tokio::test]
    async fn full_refresh_ignores_and_truncates() {
        let mut pipeline = create_pipeline(
            WatermarkStrategy::SourceMax,
            SourceFaults::default(),
            DestinationFaults::default(),
        )
        .await;
        pipeline.run(RunOptions::default()).await;

        let report = pipeline
            .run(RunOptions {
                full_refresh: true,
                truncate: true,
                tables: None,
            })
            .await;

        assert_eq!(report.status(), RunStatus::Success);
        assert_eq!(report.total_rows(), 5);

        let destination = pipeline.destination();
        // Only the first run read watermarks.
        assert_eq!(destination.watermark_reads().await, vec![PRODUCTS, ORDERS]);
        assert_eq!(destination.truncates().await, vec![PRODUCTS, ORDERS]);
        let extracts = pipeline.source().extracts().await;
        assert_eq!(extracts[2], (PRODUCTS.to_string(), None));
        assert_eq!(extracts[3], (ORDERS.to_string(), None));
    }

    #[tokio::test]
    async fn full_refresh_without_truncate_keeps_existing_rows() {
        let mut pipeline = create_pipeline(
            WatermarkStrategy::SourceMax,
            SourceFaults::default(),
            DestinationFaults::default(),
        )
        .await;

        let report = pipeline
            .run(RunOptions {
                full_refresh: true,
                ..Default::default()
            })
            .await;

        assert_eq!(report.status(), RunStatus::Success);
        assert!(pipeline.destination().truncates().await.is_empty());
        assert!(pipeline.destination().watermark_reads().await.is_empty());
    }

    #[tokio::test]
    async fn observed_max_strategy_uses_the_extracted_rows() {
        let mut pipeline = create_pipeline(
            WatermarkStrategy::ObservedMax,
            SourceFaults::default(),
            DestinationFaults::default(),
        )
        .await;

        let report = pipeline
            .run(RunOptions {
                tables: Some(vec![PRODUCTS.to_string()]),
                ..Default::default()
            })
            .await;

        assert_eq!(report.status(), RunStatus::Success);
        assert_eq!(report.tables().len(), 1);
        assert!(pipeline.source().max_change_lookups().await.is_empty());
        assert_eq!(
            pipeline.destination().watermark_updates().await,
            vec![(PRODUCTS.to_string(), at_minute(3), 3)]
        );
    }
}
