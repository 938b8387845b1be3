use etl::error::ErrorKind;
use etl::source::Source;
use etl::source::postgres::Extractor;
use etl::test_utils::database::spawn_source_database;
use etl::test_utils::fixtures::{
    PRODUCTS, PRODUCTS_SOURCE_COLUMNS, at_minute, upsert_source_product,
};
use etl::types::Cell;
use futures::TryStreamExt;
use postgres::schema::TableName;
use telemetry::init_test_tracing;
use tracing::Span;

#[tokio::test(flavor = "multi_thread")]
async fn full_extraction_is_batched_and_ordered_by_id() {
    init_test_tracing();
    let database = spawn_source_database().await;
    database
        .create_table(&TableName::unqualified(PRODUCTS), PRODUCTS_SOURCE_COLUMNS)
        .await
        .unwrap();
    upsert_source_product(&database, 3, "Gizmo", "5.00", at_minute(1)).await;
    upsert_source_product(&database, 1, "Widget", "9.99", at_minute(3)).await;
    upsert_source_product(&database, 2, "Gadget", "24.50", at_minute(2)).await;

    let mut extractor = Extractor::new(database.config.clone(), &Span::none());
    extractor.connect().await.unwrap();

    let batches: Vec<_> = extractor
        .extract(PRODUCTS, 2, None)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();

    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].len(), 2);
    assert_eq!(batches[1].len(), 1);

    let names: Vec<&str> = batches[0].schema().column_names().collect();
    assert_eq!(names, vec!["id", "name", "price", "updated_at"]);

    let first = batches[0].rows()[0].values();
    assert_eq!(first[0], Cell::I64(1));
    assert_eq!(first[1], Cell::String("Widget".to_string()));
    assert!(matches!(&first[2], Cell::Numeric(price) if price.to_string() == "9.99"));
    assert_eq!(first[3], Cell::TimestampTz(at_minute(3)));
    assert_eq!(batches[1].rows()[0].values()[0], Cell::I64(3));

    extractor.disconnect().await;
    assert!(!extractor.is_connected());
}

#[tokio::test(flavor = "multi_thread")]
async fn incremental_extraction_returns_rows_changed_after_the_watermark() {
    init_test_tracing();
    let database = spawn_source_database().await;
    database
        .create_table(&TableName::unqualified(PRODUCTS), PRODUCTS_SOURCE_COLUMNS)
        .await
        .unwrap();
    upsert_source_product(&database, 1, "Widget", "9.99", at_minute(3)).await;
    upsert_source_product(&database, 2, "Gadget", "24.50", at_minute(1)).await;
    upsert_source_product(&database, 3, "Gizmo", "5.00", at_minute(2)).await;

    let mut extractor = Extractor::new(database.config.clone(), &Span::none());
    extractor.connect().await.unwrap();

    let watermark = Some(at_minute(1));
    assert_eq!(extractor.row_count(PRODUCTS, watermark).await.unwrap(), 2);
    assert_eq!(extractor.row_count(PRODUCTS, None).await.unwrap(), 3);

    let rows = extractor.extract_all(PRODUCTS, watermark).await.unwrap();
    let ids: Vec<Cell> = rows.rows().iter().map(|row| row.values()[0].clone()).collect();
    assert_eq!(ids, vec![Cell::I64(3), Cell::I64(1)]);

    assert_eq!(
        extractor.max_change_timestamp(PRODUCTS).await.unwrap(),
        Some(at_minute(3))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_tables_have_no_change_timestamp() {
    init_test_tracing();
    let database = spawn_source_database().await;
    database
        .create_table(&TableName::unqualified(PRODUCTS), PRODUCTS_SOURCE_COLUMNS)
        .await
        .unwrap();

    let mut extractor = Extractor::new(database.config.clone(), &Span::none());
    extractor.connect().await.unwrap();

    assert_eq!(extractor.max_change_timestamp(PRODUCTS).await.unwrap(), None);
    assert!(extractor.extract_all(PRODUCTS, None).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_tables_and_unsupported_types_are_errors() {
    init_test_tracing();
    let database = spawn_source_database().await;
    database
        .create_table(
            &TableName::unqualified("devices"),
            &[("id", "bigint primary key"), ("address", "inet")],
        )
        .await
        .unwrap();

    let mut extractor = Extractor::new(database.config.clone(), &Span::none());
    extractor.connect().await.unwrap();

    let err = extractor.extract_all("missing", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SourceSchemaError);

    let err = extractor.extract_all("devices", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConversionError);
}
