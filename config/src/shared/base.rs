use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The extract-load batch size must be a positive integer.
    #[error("`batch_size` must be greater than zero")]
    BatchSizeZero,
    /// A run needs at least one table to process.
    #[error("`tables` cannot be empty")]
    NoTables,
    /// Table names are used verbatim as identifiers on both sides and must not be blank.
    #[error("table name at position {0} is empty")]
    EmptyTableName(usize),
    /// TLS is enabled but no trusted root certificates are provided.
    #[error("Invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,
}
