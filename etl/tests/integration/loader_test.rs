use chrono::{DateTime, Utc};
use etl::destination::Destination;
use etl::destination::postgres::Loader;
use etl::error::ErrorKind;
use etl::store::watermark::WatermarkStore;
use etl::test_utils::database::spawn_target_database;
use etl::test_utils::fixtures::{ORDERS, PRODUCTS, at_minute, order, product, products_batch};
use etl::types::RowBatch;
use postgres::schema::TableName;
use postgres::tokio::test_utils::PgDatabase;
use telemetry::init_test_tracing;
use tracing::Span;

async fn create_raw_products(database: &PgDatabase) {
    database
        .create_table(
            &TableName::raw(PRODUCTS),
            &[
                ("id", "bigint primary key"),
                ("name", "text not null"),
                ("price", "numeric(10, 2) not null"),
                ("updated_at", "timestamptz not null"),
                ("_etl_loaded_at", "timestamptz not null"),
            ],
        )
        .await
        .unwrap();
}

async fn connected_loader(database: &PgDatabase) -> Loader {
    let mut loader = Loader::new(database.config.clone(), &Span::none());
    loader.connect().await.unwrap();
    loader
}

#[tokio::test(flavor = "multi_thread")]
async fn upsert_inserts_then_updates_rows() {
    init_test_tracing();
    let database = spawn_target_database().await;
    create_raw_products(&database).await;
    let loader = connected_loader(&database).await;

    let rows = loader.upsert(PRODUCTS, &products_batch(), "id").await.unwrap();
    assert_eq!(rows, 3);

    let changed =
        RowBatch::from_records(vec![product(2, "Gadget Pro", "29.00", at_minute(10))]).unwrap();
    let rows = loader.upsert(PRODUCTS, &changed, "id").await.unwrap();
    assert_eq!(rows, 1);

    let names: Vec<String> = database
        .query_table(&TableName::raw(PRODUCTS), "name", "id")
        .await
        .unwrap();
    assert_eq!(names, vec!["Widget", "Gadget Pro", "Gizmo"]);

    let prices: Vec<String> = database
        .query_table(&TableName::raw(PRODUCTS), "price::text", "id")
        .await
        .unwrap();
    assert_eq!(prices, vec!["9.99", "29.00", "5.00"]);

    let loaded_at: Vec<DateTime<Utc>> = database
        .query_table(&TableName::raw(PRODUCTS), "_etl_loaded_at", "id")
        .await
        .unwrap();
    assert!(loaded_at[1] >= loaded_at[0]);
}

#[tokio::test(flavor = "multi_thread")]
async fn replaying_a_batch_leaves_the_table_unchanged() {
    init_test_tracing();
    let database = spawn_target_database().await;
    create_raw_products(&database).await;
    let loader = connected_loader(&database).await;

    loader.load(PRODUCTS, &products_batch(), 2, "id").await.unwrap();
    let loaded = loader.load(PRODUCTS, &products_batch(), 2, "id").await.unwrap();

    assert_eq!(loaded, 3);
    let ids: Vec<i64> = database
        .query_table(&TableName::raw(PRODUCTS), "id", "id")
        .await
        .unwrap();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_batch_is_rolled_back_entirely() {
    init_test_tracing();
    let database = spawn_target_database().await;
    create_raw_products(&database).await;
    let loader = connected_loader(&database).await;

    // The second row violates the precision of `price`.
    let batch = RowBatch::from_records(vec![
        product(1, "Widget", "9.99", at_minute(1)),
        product(2, "Gadget", "123456789.00", at_minute(2)),
    ])
    .unwrap();

    let err = loader.upsert(PRODUCTS, &batch, "id").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConversionError);

    let ids: Vec<i64> = database
        .query_table(&TableName::raw(PRODUCTS), "id", "id")
        .await
        .unwrap();
    assert!(ids.is_empty());

    // The connection is usable after the rollback.
    assert_eq!(loader.upsert(PRODUCTS, &products_batch(), "id").await.unwrap(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn failure_on_a_later_statement_rolls_back_earlier_statements() {
    init_test_tracing();
    let database = spawn_target_database().await;
    create_raw_products(&database).await;
    let loader = connected_loader(&database).await.with_max_rows_per_statement(2);

    // Two rows per statement: the third row, which overflows `price`, is in the second one.
    let batch = RowBatch::from_records(vec![
        product(1, "Widget", "9.99", at_minute(1)),
        product(2, "Gadget", "19.99", at_minute(2)),
        product(3, "Gizmo", "123456789.00", at_minute(3)),
    ])
    .unwrap();

    let err = loader.upsert(PRODUCTS, &batch, "id").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConversionError);

    let ids: Vec<i64> = database
        .query_table(&TableName::raw(PRODUCTS), "id", "id")
        .await
        .unwrap();
    assert!(ids.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn rows_of_a_multi_statement_batch_share_the_load_timestamp() {
    init_test_tracing();
    let database = spawn_target_database().await;
    create_raw_products(&database).await;
    let loader = connected_loader(&database).await.with_max_rows_per_statement(2);

    let batch = RowBatch::from_records(
        (1..=5).map(|id| product(id, &format!("Product {id}"), "1.00", at_minute(id as u32))),
    )
    .unwrap();

    assert_eq!(loader.upsert(PRODUCTS, &batch, "id").await.unwrap(), 5);

    let loaded_at: Vec<DateTime<Utc>> = database
        .query_table(&TableName::raw(PRODUCTS), "_etl_loaded_at", "id")
        .await
        .unwrap();
    assert_eq!(loaded_at.len(), 5);
    assert!(loaded_at.iter().all(|at| *at == loaded_at[0]));
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_target_table_is_a_destination_schema_error() {
    init_test_tracing();
    let database = spawn_target_database().await;
    let loader = connected_loader(&database).await;

    let batch =
        RowBatch::from_records(vec![order(1, 10, "pending", "19.98", at_minute(1))]).unwrap();
    let err = loader.upsert(ORDERS, &batch, "id").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DestinationSchemaError);
}

#[tokio::test(flavor = "multi_thread")]
async fn watermarks_are_inserted_and_replaced() {
    init_test_tracing();
    let database = spawn_target_database().await;
    let loader = connected_loader(&database).await;

    assert_eq!(loader.get_watermark(ORDERS).await.unwrap(), None);

    loader
        .update_watermark(ORDERS, at_minute(2), 2)
        .await
        .unwrap();
    loader
        .update_watermark(ORDERS, at_minute(5), 1)
        .await
        .unwrap();

    assert_eq!(loader.get_watermark(ORDERS).await.unwrap(), Some(at_minute(5)));
    let rows_processed: Vec<i64> = database
        .query_table(
            &postgres::watermarks::watermarks_table(),
            "rows_processed",
            "table_name",
        )
        .await
        .unwrap();
    assert_eq!(rows_processed, vec![1]);
}

#[tokio::test(flavor = "multi_thread")]
async fn truncate_empties_the_raw_table() {
    init_test_tracing();
    let database = spawn_target_database().await;
    create_raw_products(&database).await;
    let loader = connected_loader(&database).await;

    loader.upsert(PRODUCTS, &products_batch(), "id").await.unwrap();
    loader.truncate(PRODUCTS).await.unwrap();

    let ids: Vec<i64> = database
        .query_table(&TableName::raw(PRODUCTS), "id", "id")
        .await
        .unwrap();
    assert!(ids.is_empty());
}
