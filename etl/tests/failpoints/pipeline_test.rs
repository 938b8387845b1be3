use config::shared::{PgConnectionConfig, PipelineConfig, TlsConfig, WatermarkStrategy};
use etl::destination::memory::MemoryDestination;
use etl::failpoints::{LOAD_TABLE_BEFORE_UPSERT, LOAD_TABLE_BEFORE_WATERMARK_UPDATE};
use etl::pipeline::{Pipeline, RunOptions};
use etl::report::{RunStatus, TableOutcome, TableStatus};
use etl::source::memory::MemorySource;
use etl::test_utils::failpoints::TestFailScenario;
use etl::test_utils::fixtures::{PRODUCTS, at_minute, products_batch};
use etl::test_utils::test_destination_wrapper::TestDestinationWrapper;
use telemetry::init_test_tracing;

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

async fn create_pipeline() -> Pipeline<MemorySource, TestDestinationWrapper<MemoryDestination>> {
    let source = MemorySource::new();
    source.set_table(PRODUCTS, products_batch()).await;

    let config = PipelineConfig {
        source: endpoint("source_oltp"),
        target: endpoint("target_dwh"),
        batch_size: 2,
        log_level: "info".to_string(),
        tables: vec![PRODUCTS.to_string()],
        watermark_strategy: WatermarkStrategy::SourceMax,
    };

    Pipeline::new(
        config,
        source,
        TestDestinationWrapper::wrap(MemoryDestination::new()),
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn crash_before_watermark_update_replays_the_table() {
    init_test_tracing();
    let mut pipeline = create_pipeline().await;

    let scenario = TestFailScenario::setup(&[(LOAD_TABLE_BEFORE_WATERMARK_UPDATE, "return")]);
    let report = pipeline.run(RunOptions::default()).await;
    drop(scenario);

    assert_eq!(report.status(), RunStatus::Failed);
    assert_eq!(
        report.tables().get(PRODUCTS).map(|outcome| outcome.status),
        Some(TableStatus::Error)
    );
    // The rows were committed but the watermark was not.
    let destination = pipeline.destination().clone();
    assert_eq!(destination.get_inner().table_rows(PRODUCTS).await.len(), 3);
    assert!(destination.watermark_updates().await.is_empty());

    let report = pipeline.run(RunOptions::default()).await;

    assert_eq!(report.status(), RunStatus::Success);
    assert_eq!(report.tables().get(PRODUCTS), Some(&TableOutcome::success(3, 3)));
    assert_eq!(destination.get_inner().table_rows(PRODUCTS).await.len(), 3);
    assert_eq!(
        destination.watermark_updates().await,
        vec![(PRODUCTS.to_string(), at_minute(3), 3)]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_second_batch_keeps_the_first_and_stops_the_load() {
    init_test_tracing();
    let mut pipeline = create_pipeline().await;

    let scenario = TestFailScenario::setup(&[(LOAD_TABLE_BEFORE_UPSERT, "1*off->return")]);
    let report = pipeline.run(RunOptions::default()).await;
    drop(scenario);

    assert_eq!(report.status(), RunStatus::Failed);
    let destination = pipeline.destination().clone();
    assert_eq!(destination.upserted_batches(PRODUCTS).await.len(), 1);
    assert_eq!(destination.get_inner().table_rows(PRODUCTS).await.len(), 2);
    assert!(destination.watermark_updates().await.is_empty());

    let report = pipeline.run(RunOptions::default()).await;

    assert_eq!(report.status(), RunStatus::Success);
    assert_eq!(destination.get_inner().table_rows(PRODUCTS).await.len(), 3);
}
