use std::collections::HashMap;

use rust_cli_config::{Config, ConfigError, Environment as EnvironmentSource};
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

use crate::shared::{
    DEFAULT_BATCH_SIZE, DEFAULT_LOG_LEVEL, DEFAULT_TABLES, PgConnectionConfig, PipelineConfig,
    TlsConfig, ValidationError, WatermarkStrategy,
};

/// Separator of the table names in `ETL_TABLES`.
const LIST_SEPARATOR: &str = ",";

/// Errors that can occur while loading the pipeline configuration.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    /// Defaults or environment overrides could not be merged.
    #[error("failed to build configuration from environment variables: {0}")]
    Builder(#[source] ConfigError),

    /// A variable was present but could not be converted, e.g. a non-numeric port.
    #[error("failed to deserialize configuration: {0}")]
    Deserialization(#[source] ConfigError),

    /// The configuration was parsed but violates an invariant.
    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),
}

/// Flat view of the variables, one field per environment variable (lowercased).
///
/// Values are read as strings; numbers and flags are converted during deserialization so
/// credentials and names keep their exact spelling.
#[derive(Debug, Deserialize)]
struct EnvPipelineConfig {
    source_db_host: String,
    source_db_port: u16,
    source_db_name: String,
    source_db_user: String,
    source_db_password: String,
    source_db_tls_enabled: bool,
    source_db_tls_trusted_root_certs: String,
    target_db_host: String,
    target_db_port: u16,
    target_db_name: String,
    target_db_user: String,
    target_db_password: String,
    target_db_tls_enabled: bool,
    target_db_tls_trusted_root_certs: String,
    etl_batch_size: usize,
    log_level: String,
    etl_tables: String,
    etl_watermark_strategy: WatermarkStrategy,
}

impl From<EnvPipelineConfig> for PipelineConfig {
    fn from(env: EnvPipelineConfig) -> Self {
        PipelineConfig {
            source: endpoint(
                env.source_db_host,
                env.source_db_port,
                env.source_db_name,
                env.source_db_user,
                env.source_db_password,
                TlsConfig {
                    enabled: env.source_db_tls_enabled,
                    trusted_root_certs: env.source_db_tls_trusted_root_certs,
                },
            ),
            target: endpoint(
                env.target_db_host,
                env.target_db_port,
                env.target_db_name,
                env.target_db_user,
                env.target_db_password,
                TlsConfig {
                    enabled: env.target_db_tls_enabled,
                    trusted_root_certs: env.target_db_tls_trusted_root_certs,
                },
            ),
            batch_size: env.etl_batch_size,
            log_level: env.log_level,
            tables: env
                .etl_tables
                .split(LIST_SEPARATOR)
                .map(|table| table.trim().to_string())
                .collect(),
            watermark_strategy: env.etl_watermark_strategy,
        }
    }
}

fn endpoint(
    host: String,
    port: u16,
    name: String,
    username: String,
    password: String,
    tls: TlsConfig,
) -> PgConnectionConfig {
    PgConnectionConfig {
        host,
        port,
        name,
        username,
        // An empty password means no password.
        password: (!password.is_empty()).then(|| SecretString::new(password)),
        tls,
    }
}

/// Loads the [`PipelineConfig`] from the process environment.
///
/// Reads `SOURCE_DB_{HOST,PORT,NAME,USER,PASSWORD}`, `TARGET_DB_{HOST,PORT,NAME,USER,PASSWORD}`,
/// `ETL_BATCH_SIZE`, `LOG_LEVEL`, `ETL_TABLES` (comma-separated) and `ETL_WATERMARK_STRATEGY`.
/// TLS is enabled per endpoint with `{SOURCE,TARGET}_DB_TLS_ENABLED` and the PEM-encoded roots
/// in `{SOURCE,TARGET}_DB_TLS_TRUSTED_ROOT_CERTS`.
/// Every variable has a default suitable for a local setup, so an empty environment yields a
/// runnable configuration.
pub fn load_pipeline_config() -> Result<PipelineConfig, LoadConfigError> {
    build_pipeline_config(environment_source())
}

/// Loads the [`PipelineConfig`] from an explicit variable map instead of the process environment.
pub fn load_pipeline_config_from(
    variables: HashMap<String, String>,
) -> Result<PipelineConfig, LoadConfigError> {
    build_pipeline_config(environment_source().source(Some(variables)))
}

fn environment_source() -> EnvironmentSource {
    EnvironmentSource::default().try_parsing(false)
}

fn build_pipeline_config(source: EnvironmentSource) -> Result<PipelineConfig, LoadConfigError> {
    let default_tables = DEFAULT_TABLES.join(LIST_SEPARATOR);

    let settings = Config::builder()
        .set_default("source_db_host", "localhost")
        .and_then(|b| b.set_default("source_db_port", 5432))
        .and_then(|b| b.set_default("source_db_name", "source_oltp"))
        .and_then(|b| b.set_default("source_db_user", "source_user"))
        .and_then(|b| b.set_default("source_db_password", ""))
        .and_then(|b| b.set_default("source_db_tls_enabled", false))
        .and_then(|b| b.set_default("source_db_tls_trusted_root_certs", ""))
        .and_then(|b| b.set_default("target_db_host", "localhost"))
        .and_then(|b| b.set_default("target_db_port", 5432))
        .and_then(|b| b.set_default("target_db_name", "target_dwh"))
        .and_then(|b| b.set_default("target_db_user", "target_user"))
        .and_then(|b| b.set_default("target_db_password", ""))
        .and_then(|b| b.set_default("target_db_tls_enabled", false))
        .and_then(|b| b.set_default("target_db_tls_trusted_root_certs", ""))
        .and_then(|b| b.set_default("etl_batch_size", DEFAULT_BATCH_SIZE as i64))
        .and_then(|b| b.set_default("log_level", DEFAULT_LOG_LEVEL))
        .and_then(|b| b.set_default("etl_tables", default_tables))
        .and_then(|b| b.set_default("etl_watermark_strategy", "source_max"))
        .map_err(LoadConfigError::Builder)?
        .add_source(source)
        .build()
        .map_err(LoadConfigError::Builder)?;

    let config: PipelineConfig = settings
        .try_deserialize::<EnvPipelineConfig>()
        .map_err(LoadConfigError::Deserialization)?
        .into();

    config.validate()?;

    Ok(config)
}
