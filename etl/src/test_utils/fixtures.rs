//! The `products` and `orders` tables used across tests.

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use postgres::schema::TableName;
use postgres::tokio::test_utils::PgDatabase;

use crate::conversions::numeric::PgNumeric;
use crate::types::{Cell, RowBatch};

pub const PRODUCTS: &str = "products";
pub const ORDERS: &str = "orders";

/// Columns of `products` on the source.
pub const PRODUCTS_SOURCE_COLUMNS: &[(&str, &str)] = &[
    ("id", "bigint primary key"),
    ("name", "text not null"),
    ("price", "numeric(10, 2) not null"),
    ("updated_at", "timestamptz not null"),
];

/// Columns of `orders` on the source.
pub const ORDERS_SOURCE_COLUMNS: &[(&str, &str)] = &[
    ("id", "bigint primary key"),
    ("customer_id", "bigint not null"),
    ("status", "text not null"),
    ("total", "numeric(10, 2) not null"),
    ("updated_at", "timestamptz not null"),
];

/// Returns `2024-01-01T00:00:00Z` shifted by `minutes`.
pub fn at_minute(minutes: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(minutes.into())
}

fn numeric(value: &str) -> Cell {
    Cell::Numeric(PgNumeric::from_str(value).unwrap())
}

/// A `products` row.
pub fn product(id: i64, name: &str, price: &str, updated_at: DateTime<Utc>) -> Vec<(String, Cell)> {
    vec![
        ("id".to_string(), Cell::I64(id)),
        ("name".to_string(), Cell::from(name)),
        ("price".to_string(), numeric(price)),
        ("updated_at".to_string(), Cell::TimestampTz(updated_at)),
    ]
}

/// An `orders` row.
pub fn order(
    id: i64,
    customer_id: i64,
    status: &str,
    total: &str,
    updated_at: DateTime<Utc>,
) -> Vec<(String, Cell)> {
    vec![
        ("id".to_string(), Cell::I64(id)),
        ("customer_id".to_string(), Cell::I64(customer_id)),
        ("status".to_string(), Cell::from(status)),
        ("total".to_string(), numeric(total)),
        ("updated_at".to_string(), Cell::TimestampTz(updated_at)),
    ]
}

/// Three products changed at minutes 1, 2 and 3.
pub fn products_batch() -> RowBatch {
    RowBatch::from_records(vec![
        product(1, "Widget", "9.99", at_minute(1)),
        product(2, "Gadget", "24.50", at_minute(2)),
        product(3, "Gizmo", "5.00", at_minute(3)),
    ])
    .unwrap()
}

/// Two orders changed at minutes 1 and 2.
pub fn orders_batch() -> RowBatch {
    RowBatch::from_records(vec![
        order(1, 10, "pending", "19.98", at_minute(1)),
        order(2, 11, "shipped", "24.50", at_minute(2)),
    ])
    .unwrap()
}

/// Creates `table_name` on the source and its counterpart in `raw` on the target.
///
/// The target table has the same columns plus `_etl_loaded_at`.
///
/// # Panics
///
/// Panics if a table cannot be created.
pub async fn create_tables(
    source: &PgDatabase,
    target: &PgDatabase,
    table_name: &str,
    columns: &[(&str, &str)],
) {
    source
        .create_table(&TableName::unqualified(table_name), columns)
        .await
        .expect("Failed to create source table");

    let mut target_columns = columns.to_vec();
    target_columns.push(("_etl_loaded_at", "timestamptz not null"));
    target
        .create_table(&TableName::raw(table_name), &target_columns)
        .await
        .expect("Failed to create target table");
}

/// Inserts or updates a product on the source.
///
/// # Panics
///
/// Panics if the statement fails.
pub async fn upsert_source_product(
    source: &PgDatabase,
    id: i64,
    name: &str,
    price: &str,
    updated_at: DateTime<Utc>,
) {
    source
        .client()
        .execute(
            "insert into products (id, name, price, updated_at) \
             values ($1, $2, $3::text::numeric, $4) \
             on conflict (id) do update set name = excluded.name, \
             price = excluded.price, updated_at = excluded.updated_at",
            &[&id, &name, &price, &updated_at],
        )
        .await
        .expect("Failed to upsert product");
}

/// Inserts an order on the source.
///
/// # Panics
///
/// Panics if the statement fails.
pub async fn insert_source_order(
    source: &PgDatabase,
    id: i64,
    customer_id: i64,
    status: &str,
    total: &str,
    updated_at: DateTime<Utc>,
) {
    source
        .client()
        .execute(
            "insert into orders (id, customer_id, status, total, updated_at) \
             values ($1, $2, $3, $4::text::numeric, $5)",
            &[&id, &customer_id, &status, &total, &updated_at],
        )
        .await
        .expect("Failed to insert order");
}
