use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use tokio_postgres::{Config as TokioPgConnectOptions, config::SslMode as TokioPgSslMode};

use crate::shared::ValidationError;

/// Static session options applied to every connection.
///
/// The session time zone is pinned to UTC so `timestamp` columns compare consistently with the
/// `timestamptz` watermarks.
pub struct DefaultPgConnectionOptions;

impl DefaultPgConnectionOptions {
    /// Returns the options as a string suitable for the tokio-postgres options parameter.
    pub fn to_options_string() -> String {
        "-c datestyle=ISO -c intervalstyle=postgres -c extra_float_digits=3 -c client_encoding=UTF8 -c TimeZone=UTC"
            .to_string()
    }
}

/// Immutable descriptor of a Postgres endpoint.
///
/// One descriptor is used for the source and one for the target of a run. The password is
/// kept as a secret and redacted in debug output.
#[derive(Debug, Clone)]
pub struct PgConnectionConfig {
    /// Hostname or IP address of the Postgres server.
    pub host: String,
    /// Port number on which the Postgres server is listening.
    pub port: u16,
    /// Name of the database to connect to.
    pub name: String,
    /// Username for authenticating with the Postgres server.
    pub username: String,
    /// Password for the specified user, if any.
    pub password: Option<SecretString>,
    /// TLS configuration for secure connections.
    pub tls: TlsConfig,
}

impl PgConnectionConfig {
    /// Returns the connection parameters as ordered `(key, value)` pairs.
    ///
    /// Keys follow libpq naming (`host`, `port`, `dbname`, `user`, `password`). The password
    /// is exposed here, so the result must never be logged.
    pub fn connection_params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("host", self.host.clone()),
            ("port", self.port.to_string()),
            ("dbname", self.name.clone()),
            ("user", self.username.clone()),
            (
                "password",
                self.password
                    .as_ref()
                    .map(|password| password.expose_secret().clone())
                    .unwrap_or_default(),
            ),
        ]
    }

    /// Returns a `postgresql://` URL for this endpoint with the password masked.
    pub fn redacted_url(&self) -> String {
        let password = if self.password.is_some() { ":***" } else { "" };

        format!(
            "postgresql://{}{password}@{}:{}/{}",
            self.username, self.host, self.port, self.name
        )
    }
}

impl fmt::Display for PgConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.name)
    }
}

/// TLS settings for secure Postgres connections.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// PEM-encoded trusted root certificates.
    pub trusted_root_certs: String,
    /// Whether TLS is enabled for the connection.
    pub enabled: bool,
}

impl TlsConfig {
    /// Validates the [`TlsConfig`].
    ///
    /// Returns [`ValidationError::MissingTrustedRootCerts`] if TLS is enabled but no certificates
    /// are provided.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled && self.trusted_root_certs.is_empty() {
            return Err(ValidationError::MissingTrustedRootCerts);
        }

        Ok(())
    }
}

/// Converts the endpoint into driver specific connect options.
pub trait IntoConnectOptions<Output> {
    /// Options for connecting to the server without selecting a database, used for
    /// administrative statements such as creating a database.
    fn without_db(&self) -> Output;

    /// Options for connecting to the configured database.
    fn with_db(&self) -> Output;
}

impl IntoConnectOptions<TokioPgConnectOptions> for PgConnectionConfig {
    fn without_db(&self) -> TokioPgConnectOptions {
        let ssl_mode = if self.tls.enabled {
            TokioPgSslMode::Require
        } else {
            TokioPgSslMode::Prefer
        };
        let mut config = TokioPgConnectOptions::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.username)
            .options(&DefaultPgConnectionOptions::to_options_string())
            .ssl_mode(ssl_mode);

        if let Some(password) = &self.password {
            config.password(password.expose_secret());
        }

        config
    }

    fn with_db(&self) -> TokioPgConnectOptions {
        let mut options: TokioPgConnectOptions = self.without_db();
        options.dbname(&self.name);
        options
    }
}
