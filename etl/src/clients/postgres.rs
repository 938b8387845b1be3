use std::io::BufReader;

use config::shared::{IntoConnectOptions, PgConnectionConfig};
use rustls::{ClientConfig, RootCertStore};
use tokio_postgres::tls::MakeTlsConnect;
use tokio_postgres::{Client, Config, Connection, NoTls, Socket};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{Instrument, error, info};

use crate::error::EtlResult;

/// Spawns a background task driving a Postgres connection until it terminates.
///
/// The task ends on its own once the [`Client`] owning the other half is dropped, so callers
/// release a connection simply by dropping the client.
fn spawn_postgres_connection<T>(connection: Connection<Socket, T::Stream>)
where
    T: MakeTlsConnect<Socket>,
    T::Stream: Send + 'static,
{
    let span = tracing::Span::current();
    let task = async move {
        match connection.await {
            Err(err) => error!("an error occurred during the postgres connection: {}", err),
            Ok(()) => info!("postgres connection terminated successfully"),
        }
    }
    .instrument(span);

    tokio::spawn(task);
}

/// Opens a connection to the database described by `pg_connection_config`.
///
/// Uses TLS with the configured trusted roots when enabled, a plain connection otherwise.
pub async fn connect(pg_connection_config: &PgConnectionConfig) -> EtlResult<Client> {
    match pg_connection_config.tls.enabled {
        true => connect_tls(pg_connection_config).await,
        false => connect_no_tls(pg_connection_config).await,
    }
}

async fn connect_no_tls(pg_connection_config: &PgConnectionConfig) -> EtlResult<Client> {
    let config: Config = pg_connection_config.with_db();

    let (client, connection) = config.connect(NoTls).await?;
    spawn_postgres_connection::<NoTls>(connection);

    Ok(client)
}

/// Builds the trusted root store from PEM-encoded certificates.
fn root_cert_store(trusted_root_certs: &str) -> EtlResult<RootCertStore> {
    let mut root_store = RootCertStore::empty();
    let mut root_certs_reader = BufReader::new(trusted_root_certs.as_bytes());
    for cert in rustls_pemfile::certs(&mut root_certs_reader) {
        root_store.add(cert?)?;
    }

    Ok(root_store)
}

async fn connect_tls(pg_connection_config: &PgConnectionConfig) -> EtlResult<Client> {
    let config: Config = pg_connection_config.with_db();

    let root_store = root_cert_store(&pg_connection_config.tls.trusted_root_certs)?;
    let tls_config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    let (client, connection) = config.connect(MakeRustlsConnect::new(tls_config)).await?;
    spawn_postgres_connection::<MakeRustlsConnect>(connection);

    Ok(client)
}
