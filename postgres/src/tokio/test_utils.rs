use config::shared::{IntoConnectOptions, PgConnectionConfig};
use tokio::runtime::Handle;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls};
use tracing::info;

use crate::schema::{RAW_SCHEMA, TableName};
use crate::watermarks::watermarks_table;

/// Postgres database wrapper for tests.
///
/// Creates a fresh database on construction and drops it, together with every connection still
/// open on it, when the wrapper is dropped.
pub struct PgDatabase {
    pub config: PgConnectionConfig,
    pub client: Option<Client>,
    destroy_on_drop: bool,
}

impl PgDatabase {
    /// Creates a new test database with automatic cleanup.
    pub async fn new(config: PgConnectionConfig) -> Self {
        let client = create_pg_database(&config).await;

        Self {
            config,
            client: Some(client),
            destroy_on_drop: true,
        }
    }

    /// Returns the connected client.
    pub fn client(&self) -> &Client {
        self.client
            .as_ref()
            .expect("the client is only taken when the database is dropped")
    }

    /// Creates the `raw` schema and the watermark metadata table.
    pub async fn create_raw_schema(&self) -> Result<(), tokio_postgres::Error> {
        self.run_sql(&format!("create schema if not exists {RAW_SCHEMA}"))
            .await?;
        self.run_sql(&format!(
            "create table if not exists {} (
                table_name text primary key,
                last_extracted_at timestamptz not null,
                last_loaded_at timestamptz not null,
                rows_processed bigint not null default 0
            )",
            watermarks_table().as_quoted_identifier()
        ))
        .await?;

        Ok(())
    }

    /// Creates a table with the given `(name, definition)` columns.
    pub async fn create_table(
        &self,
        table_name: &TableName,
        columns: &[(&str, &str)],
    ) -> Result<(), tokio_postgres::Error> {
        let columns = columns
            .iter()
            .map(|(name, definition)| format!("{name} {definition}"))
            .collect::<Vec<_>>()
            .join(", ");

        self.run_sql(&format!(
            "create table {} ({columns})",
            table_name.as_quoted_identifier()
        ))
        .await?;

        Ok(())
    }

    /// Inserts a single row of values into the specified table.
    pub async fn insert_values(
        &self,
        table_name: &TableName,
        columns: &[&str],
        values: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, tokio_postgres::Error> {
        let placeholders = (1..=values.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let insert_query = format!(
            "insert into {} ({}) values ({placeholders})",
            table_name.as_quoted_identifier(),
            columns.join(", "),
        );

        self.client().execute(&insert_query, values).await
    }

    /// Queries values from a single column ordered by `order_by`.
    pub async fn query_table<T>(
        &self,
        table_name: &TableName,
        column: &str,
        order_by: &str,
    ) -> Result<Vec<T>, tokio_postgres::Error>
    where
        T: for<'a> tokio_postgres::types::FromSql<'a>,
    {
        let query = format!(
            "select {column} from {} order by {order_by}",
            table_name.as_quoted_identifier()
        );
        let rows = self.client().query(&query, &[]).await?;

        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    /// Executes arbitrary SQL on the database.
    pub async fn run_sql(&self, sql: &str) -> Result<u64, tokio_postgres::Error> {
        self.client().execute(sql, &[]).await
    }
}

impl Drop for PgDatabase {
    fn drop(&mut self) {
        if self.destroy_on_drop {
            // The client must be closed before the database can be dropped.
            self.client.take();

            // To use `block_in_place,` we need a multithreaded runtime since when a blocking
            // task is issued, the runtime will offload existing tasks to another worker.
            tokio::task::block_in_place(move || {
                Handle::current().block_on(async move { drop_pg_database(&self.config).await });
            });
        }
    }
}

/// Creates a new Postgres database and returns a client connected to it.
///
/// # Panics
/// Panics if connection or database creation fails.
pub async fn create_pg_database(config: &PgConnectionConfig) -> Client {
    let client = connect(config.without_db()).await;

    client
        .execute(&*format!(r#"create database "{}";"#, config.name), &[])
        .await
        .expect("Failed to create database");

    connect_to_pg_database(config).await
}

/// Connects to an existing Postgres database.
pub async fn connect_to_pg_database(config: &PgConnectionConfig) -> Client {
    connect(config.with_db()).await
}

/// Drops a Postgres database after terminating every connection to it.
///
/// # Panics
/// Panics if any database operation fails.
pub async fn drop_pg_database(config: &PgConnectionConfig) {
    let client = connect(config.without_db()).await;

    client
        .execute(
            &format!(
                r#"
                select pg_terminate_backend(pg_stat_activity.pid)
                from pg_stat_activity
                where pg_stat_activity.datname = '{}'
                and pid <> pg_backend_pid();"#,
                config.name
            ),
            &[],
        )
        .await
        .expect("Failed to terminate database connections");

    client
        .execute(
            &*format!(r#"drop database if exists "{}";"#, config.name),
            &[],
        )
        .await
        .expect("Failed to destroy database");
}

async fn connect(config: tokio_postgres::Config) -> Client {
    let (client, connection) = config
        .connect(NoTls)
        .await
        .expect("Failed to connect to Postgres");

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            info!("connection error: {e}");
        }
    });

    client
}
