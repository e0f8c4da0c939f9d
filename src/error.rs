//! Error types for the Tally context and operation layer.

use thiserror::Error;

/// Raised when ambient state is read outside of a bound call chain.
///
/// This is always an integration bug (a code path that never entered
/// `ambient::run` or a standalone runner), so nothing in the crate recovers
/// from it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("No ambient context bound for `{accessor}`; wrap the call in ambient::run or a standalone runner")]
    Missing { accessor: &'static str },

    #[error("Global context has not been initialized")]
    GlobalNotInitialized,
}

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error for key `{key}`: {message}")]
    Serialization { key: String, message: String },

    #[error("Transaction {0} is already finished")]
    TransactionClosed(u64),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::IoError(std::io::Error::new(
            std::io::ErrorKind::Other,
            err.to_string(),
        ))
    }
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum TallyError {
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transaction aborted: {0}")]
    Transaction(String),

    #[error("Background operation `{operation}` failed: {message}")]
    Operation { operation: String, message: String },

    #[error("Handler error: {0}")]
    Handler(String),
}

impl TallyError {
    /// True when the error comes from reading ambient state with no binding.
    pub fn is_context_missing(&self) -> bool {
        matches!(self, TallyError::Context(ContextError::Missing { .. }))
    }
}

impl From<config::ConfigError> for TallyError {
    fn from(err: config::ConfigError) -> Self {
        TallyError::Config(err.to_string())
    }
}
