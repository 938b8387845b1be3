use config::shared::{PgConnectionConfig, TlsConfig};
use postgres::tokio::test_utils::PgDatabase;
use uuid::Uuid;

/// Builds the configuration of a uniquely named database on the local test server.
///
/// Configuration is read from environment variables:
/// - `TESTS_DATABASE_HOST`: Postgres server hostname (required)
/// - `TESTS_DATABASE_PORT`: Postgres server port (required)
/// - `TESTS_DATABASE_USERNAME`: Database user (required)
/// - `TESTS_DATABASE_PASSWORD`: Database password (optional)
pub fn local_pg_connection_config() -> PgConnectionConfig {
    PgConnectionConfig {
        host: std::env::var("TESTS_DATABASE_HOST").expect("TESTS_DATABASE_HOST must be set"),
        port: std::env::var("TESTS_DATABASE_PORT")
            .expect("TESTS_DATABASE_PORT must be set")
            .parse()
            .expect("TESTS_DATABASE_PORT must be a valid port number"),
        name: Uuid::new_v4().to_string(),
        username: std::env::var("TESTS_DATABASE_USERNAME")
            .expect("TESTS_DATABASE_USERNAME must be set"),
        password: std::env::var("TESTS_DATABASE_PASSWORD")
            .ok()
            .map(Into::into),
        tls: TlsConfig::default(),
    }
}

/// Creates an empty source database.
pub async fn spawn_source_database() -> PgDatabase {
    PgDatabase::new(local_pg_connection_config()).await
}

/// Creates a target database with the `raw` schema and the watermark table in place.
///
/// # Panics
///
/// Panics if the schema cannot be created.
pub async fn spawn_target_database() -> PgDatabase {
    let database = PgDatabase::new(local_pg_connection_config()).await;

    database
        .create_raw_schema()
        .await
        .expect("Failed to create raw schema");

    database
}
