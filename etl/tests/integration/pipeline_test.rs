use config::shared::{PipelineConfig, WatermarkStrategy};
use etl::pipeline::{RunOptions, run_etl};
use etl::report::{RunStatus, TableOutcome, TableStatus};
use etl::test_utils::database::{spawn_source_database, spawn_target_database};
use etl::test_utils::fixtures::{
    ORDERS, ORDERS_SOURCE_COLUMNS, PRODUCTS, PRODUCTS_SOURCE_COLUMNS, at_minute, create_tables,
    insert_source_order, upsert_source_product,
};
use postgres::schema::TableName;
use postgres::tokio::test_utils::PgDatabase;
use telemetry::init_test_tracing;

fn pipeline_config(source: &PgDatabase, target: &PgDatabase) -> PipelineConfig {
    PipelineConfig {
        source: source.config.clone(),
        target: target.config.clone(),
        batch_size: 2,
        log_level: "info".to_string(),
        tables: vec![PRODUCTS.to_string(), ORDERS.to_string()],
        watermark_strategy: WatermarkStrategy::SourceMax,
    }
}

async fn stored_watermark(target: &PgDatabase, table_name: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    target
        .client()
        .query_opt(
            "select last_extracted_at from raw._etl_watermarks where table_name = $1",
            &[&table_name],
        )
        .await
        .unwrap()
        .map(|row| row.get(0))
}

#[tokio::test(flavor = "multi_thread")]
async fn orders_are_loaded_incrementally() {
    init_test_tracing();
    let source = spawn_source_database().await;
    let target = spawn_target_database().await;
    create_tables(&source, &target, PRODUCTS, PRODUCTS_SOURCE_COLUMNS).await;
    create_tables(&source, &target, ORDERS, ORDERS_SOURCE_COLUMNS).await;

    insert_source_order(&source, 1, 10, "pending", "19.98", at_minute(1)).await;
    insert_source_order(&source, 2, 11, "shipped", "24.50", at_minute(2)).await;
    insert_source_order(&source, 3, 10, "pending", "5.00", at_minute(3)).await;
    let config = pipeline_config(&source, &target);

    let report = run_etl(&config, RunOptions::default()).await;

    assert_eq!(report.status(), RunStatus::Success);
    assert_eq!(report.tables().get(ORDERS), Some(&TableOutcome::success(3, 3)));
    assert_eq!(report.tables().get(PRODUCTS), Some(&TableOutcome::skipped()));
    assert_eq!(stored_watermark(&target, ORDERS).await, Some(at_minute(3)));
    assert_eq!(stored_watermark(&target, PRODUCTS).await, None);

    // A second run without source changes loads nothing.
    let report = run_etl(&config, RunOptions::default()).await;
    assert_eq!(report.status(), RunStatus::Success);
    assert_eq!(report.total_rows(), 0);

    insert_source_order(&source, 4, 12, "pending", "7.25", at_minute(4)).await;
    source
        .run_sql("update orders set status = 'shipped', updated_at = '2024-01-01T00:05:00Z' where id = 1")
        .await
        .unwrap();

    let report = run_etl(&config, RunOptions::default()).await;

    assert_eq!(report.tables().get(ORDERS), Some(&TableOutcome::success(2, 2)));
    assert_eq!(stored_watermark(&target, ORDERS).await, Some(at_minute(5)));

    let statuses: Vec<String> = target
        .query_table(&TableName::raw(ORDERS), "status", "id")
        .await
        .unwrap();
    assert_eq!(statuses, vec!["shipped", "shipped", "pending", "pending"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn product_changes_replace_rows_and_full_refresh_reloads_everything() {
    init_test_tracing();
    let source = spawn_source_database().await;
    let target = spawn_target_database().await;
    create_tables(&source, &target, PRODUCTS, PRODUCTS_SOURCE_COLUMNS).await;
    create_tables(&source, &target, ORDERS, ORDERS_SOURCE_COLUMNS).await;

    upsert_source_product(&source, 1, "Widget", "9.99", at_minute(1)).await;
    upsert_source_product(&source, 2, "Gadget", "24.50", at_minute(2)).await;
    let config = pipeline_config(&source, &target);

    run_etl(&config, RunOptions::default()).await;
    upsert_source_product(&source, 2, "Gadget Pro", "29.00", at_minute(6)).await;
    let report = run_etl(&config, RunOptions::default()).await;

    assert_eq!(report.tables().get(PRODUCTS), Some(&TableOutcome::success(1, 1)));
    let prices: Vec<String> = target
        .query_table(&TableName::raw(PRODUCTS), "price::text", "id")
        .await
        .unwrap();
    assert_eq!(prices, vec!["9.99", "29.00"]);

    let report = run_etl(
        &config,
        RunOptions {
            full_refresh: true,
            truncate: true,
            tables: Some(vec![PRODUCTS.to_string()]),
        },
    )
    .await;

    assert_eq!(report.status(), RunStatus::Success);
    assert_eq!(report.tables().len(), 1);
    assert_eq!(report.tables().get(PRODUCTS), Some(&TableOutcome::success(2, 2)));
    assert_eq!(stored_watermark(&target, PRODUCTS).await, Some(at_minute(6)));
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_target_table_only_fails_that_table() {
    init_test_tracing();
    let source = spawn_source_database().await;
    let target = spawn_target_database().await;
    create_tables(&source, &target, PRODUCTS, PRODUCTS_SOURCE_COLUMNS).await;
    // `orders` only exists on the source.
    source
        .create_table(&TableName::unqualified(ORDERS), ORDERS_SOURCE_COLUMNS)
        .await
        .unwrap();

    upsert_source_product(&source, 1, "Widget", "9.99", at_minute(1)).await;
    insert_source_order(&source, 1, 10, "pending", "19.98", at_minute(1)).await;

    let report = run_etl(&pipeline_config(&source, &target), RunOptions::default()).await;

    assert_eq!(report.status(), RunStatus::Partial);
    assert_eq!(report.total_rows(), 1);
    assert_eq!(
        report.tables().get(ORDERS).map(|outcome| outcome.status),
        Some(TableStatus::Error)
    );
    assert!(report.errors()[0].starts_with("Error processing table orders: "));
    assert_eq!(stored_watermark(&target, ORDERS).await, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_source_fails_the_run() {
    init_test_tracing();
    let source = spawn_source_database().await;
    let target = spawn_target_database().await;
    let mut config = pipeline_config(&source, &target);
    config.source.name = "does_not_exist".to_string();

    let report = run_etl(&config, RunOptions::default()).await;

    assert_eq!(report.status(), RunStatus::Failed);
    assert!(report.tables().is_empty());
    assert!(report.errors()[0].starts_with("ETL process failed: "));
}
