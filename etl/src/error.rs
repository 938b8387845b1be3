//! Error types and result definitions for extract-load operations.
//!
//! [`EtlError`] pairs a coarse [`ErrorKind`] classification with a static description, optional
//! dynamic detail, an optional source error and the call site that created it. The plain
//! [`fmt::Display`] rendering (`description: detail`) is what ends up in run reports, while the
//! alternate rendering (`{:#}`) adds the kind and location for logs.

use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use crate::conversions::numeric::ParseNumericError;

/// Convenient result type for extract-load operations using [`EtlError`] as the error type.
pub type EtlResult<T> = Result<T, EtlError>;

/// Main error type for extract-load operations.
#[derive(Debug, Clone)]
pub struct EtlError {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
}

/// Categories of errors that can occur while extracting and loading.
///
/// Kinds are grouped by the side of the run they originate from and by failure mode.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Connection Errors
    SourceConnectionFailed,
    DestinationConnectionFailed,
    NotConnected,

    // Query & Execution Errors
    SourceQueryFailed,
    DestinationQueryFailed,
    SourceLockTimeout,
    SourceOperationCanceled,

    // Schema Errors
    SourceSchemaError,
    DestinationSchemaError,

    // Data & Transformation Errors
    ConversionError,
    InvalidData,
    ValidationError,

    // Configuration Errors
    ConfigError,

    // IO & Serialization Errors
    IoError,
    SourceIoError,
    DestinationIoError,
    SerializationError,

    // Security & Authentication Errors
    EncryptionError,
    AuthenticationError,

    // State Errors
    InvalidState,
    SourceDatabaseShutdown,

    // General Errors
    SourceError,
    DestinationError,

    // Unknown / Uncategorized
    Unknown,

    // Raised by fault injection in tests.
    #[cfg(feature = "failpoints")]
    FailpointTriggered,
}

impl ErrorKind {
    /// Returns the destination-side counterpart of a source-side kind.
    ///
    /// Postgres driver errors are classified as source errors on conversion, since both sides
    /// speak the same protocol. The loader uses this to attribute them to the target.
    fn for_destination(self) -> ErrorKind {
        match self {
            ErrorKind::SourceConnectionFailed => ErrorKind::DestinationConnectionFailed,
            ErrorKind::SourceQueryFailed
            | ErrorKind::SourceLockTimeout
            | ErrorKind::SourceOperationCanceled => ErrorKind::DestinationQueryFailed,
            ErrorKind::SourceSchemaError => ErrorKind::DestinationSchemaError,
            ErrorKind::SourceIoError => ErrorKind::DestinationIoError,
            ErrorKind::SourceError | ErrorKind::SourceDatabaseShutdown => {
                ErrorKind::DestinationError
            }
            kind => kind,
        }
    }
}

impl EtlError {
    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the static description of this error.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the detailed error information if available.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Attaches an originating [`error::Error`] to this error and returns the modified instance.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    /// Reclassifies a source-side error as the equivalent destination-side error.
    pub fn into_destination(mut self) -> Self {
        self.kind = self.kind.for_destination();
        self
    }

    /// Creates an [`EtlError`] from its components.
    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        EtlError {
            kind,
            description,
            detail,
            source,
            location: Location::caller(),
        }
    }

    #[track_caller]
    fn from_source<E>(kind: ErrorKind, description: &'static str, err: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        let detail = err.to_string();
        EtlError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl PartialEq for EtlError {
    fn eq(&self, other: &EtlError) -> bool {
        self.kind == other.kind
    }
}

impl fmt::Display for EtlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            write!(
                f,
                "[{:?}] {} @ {}:{}:{}",
                self.kind,
                self.description,
                self.location.file(),
                self.location.line(),
                self.location.column()
            )?;

            if let Some(detail) = self.detail() {
                for line in detail.lines() {
                    write!(f, "\n  {line}")?;
                }
            }

            return Ok(());
        }

        match self.detail() {
            Some(detail) if !detail.trim().is_empty() => {
                write!(f, "{}: {detail}", self.description)
            }
            _ => f.write_str(&self.description),
        }
    }
}

impl error::Error for EtlError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn error::Error + 'static))
    }
}

/// Creates an [`EtlError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for EtlError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> EtlError {
        EtlError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates an [`EtlError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for EtlError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> EtlError {
        EtlError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

impl From<std::io::Error> for EtlError {
    #[track_caller]
    fn from(err: std::io::Error) -> EtlError {
        EtlError::from_source(ErrorKind::IoError, "I/O operation failed", err)
    }
}

impl From<serde_json::Error> for EtlError {
    #[track_caller]
    fn from(err: serde_json::Error) -> EtlError {
        EtlError::from_source(ErrorKind::SerializationError, "JSON serialization failed", err)
    }
}

impl From<rustls::Error> for EtlError {
    #[track_caller]
    fn from(err: rustls::Error) -> EtlError {
        EtlError::from_source(ErrorKind::EncryptionError, "TLS configuration failed", err)
    }
}

impl From<ParseNumericError> for EtlError {
    #[track_caller]
    fn from(err: ParseNumericError) -> EtlError {
        EtlError::from_source(ErrorKind::ConversionError, "Numeric parsing failed", err)
    }
}

/// Converts [`tokio_postgres::Error`] to [`EtlError`] based on the SQLSTATE class.
///
/// Errors without a SQLSTATE come from the client side of the protocol (closed socket, failed
/// handshake, type mismatch while encoding) and are classified as connection failures unless
/// they are conversion errors.
impl From<tokio_postgres::Error> for EtlError {
    #[track_caller]
    fn from(err: tokio_postgres::Error) -> EtlError {
        let (kind, description) = match err.code() {
            Some(sqlstate) => classify_sqlstate(sqlstate),
            None if is_conversion_error(&err) => {
                (ErrorKind::ConversionError, "PostgreSQL value conversion failed")
            }
            None if err.is_closed() => (
                ErrorKind::SourceConnectionFailed,
                "PostgreSQL connection closed",
            ),
            None => (
                ErrorKind::SourceConnectionFailed,
                "PostgreSQL connection failed",
            ),
        };

        EtlError::from_source(kind, description, err)
    }
}

fn is_conversion_error(err: &tokio_postgres::Error) -> bool {
    use std::error::Error as _;

    err.source()
        .is_some_and(|source| source.is::<tokio_postgres::types::WasNull>()
            || source.is::<tokio_postgres::types::WrongType>())
}

fn classify_sqlstate(sqlstate: &tokio_postgres::error::SqlState) -> (ErrorKind, &'static str) {
    use tokio_postgres::error::SqlState;

    match *sqlstate {
        SqlState::UNDEFINED_TABLE
        | SqlState::UNDEFINED_COLUMN
        | SqlState::UNDEFINED_SCHEMA
        | SqlState::UNDEFINED_FUNCTION
        | SqlState::INVALID_COLUMN_REFERENCE => {
            return (
                ErrorKind::SourceSchemaError,
                "PostgreSQL schema object not found",
            );
        }
        SqlState::LOCK_NOT_AVAILABLE => {
            return (ErrorKind::SourceLockTimeout, "PostgreSQL lock not available");
        }
        SqlState::QUERY_CANCELED => {
            return (ErrorKind::SourceOperationCanceled, "PostgreSQL query canceled");
        }
        SqlState::ADMIN_SHUTDOWN | SqlState::CRASH_SHUTDOWN | SqlState::CANNOT_CONNECT_NOW => {
            return (
                ErrorKind::SourceDatabaseShutdown,
                "PostgreSQL database unavailable",
            );
        }
        _ => {}
    }

    let class = sqlstate.code().get(..2).unwrap_or_default();
    match class {
        // Connection exceptions and insufficient resources.
        "08" | "53" => (ErrorKind::SourceConnectionFailed, "PostgreSQL connection failed"),
        // Invalid authorization.
        "28" => (
            ErrorKind::AuthenticationError,
            "PostgreSQL authentication failed",
        ),
        // Integrity constraint violations.
        "23" => (ErrorKind::ValidationError, "PostgreSQL constraint violation"),
        // Data exceptions.
        "22" => (
            ErrorKind::ConversionError,
            "PostgreSQL data conversion failed",
        ),
        // Syntax errors, access rule violations and program limits.
        "42" | "54" => (
            ErrorKind::SourceQueryFailed,
            "PostgreSQL syntax or access error",
        ),
        // Transaction rollbacks and invalid transaction states.
        "40" | "25" | "55" => (ErrorKind::InvalidState, "PostgreSQL transaction failed"),
        // System and internal errors.
        "58" | "XX" => (ErrorKind::SourceIoError, "PostgreSQL system error"),
        "F0" => (ErrorKind::ConfigError, "PostgreSQL configuration error"),
        _ => (ErrorKind::SourceError, "PostgreSQL error"),
    }
}
