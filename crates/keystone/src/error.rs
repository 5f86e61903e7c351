//! Error types for the engine.

use keystone_auth::AuthError;
use keystone_core::CoreError;
use keystone_store::StoreError;
use thiserror::Error;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Authorization or permission-graph error.
    #[error("authorization error: {0}")]
    Auth(#[from] AuthError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Encoding, signature, or structural error in a transaction.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// A transaction failed validation before authorization.
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    /// A transaction's expiration has passed.
    #[error("expired transaction: {0}")]
    ExpiredTransaction(String),

    /// A transaction with the same id was already accepted and has not
    /// expired.
    #[error("duplicate transaction: {0}")]
    DuplicateTransaction(String),

    /// A native action handler rejected its action.
    #[error("action failed: {0}")]
    ActionFailed(String),

    /// An action addressed an account that does not exist.
    #[error("unknown account: {0}")]
    UnknownAccount(String),

    /// Block lifecycle misuse.
    #[error("block error: {0}")]
    Block(String),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// The authorization error, if this is one.
    pub fn as_auth(&self) -> Option<&AuthError> {
        match self {
            EngineError::Auth(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
