//! Error types for Keystone core.

use thiserror::Error;

/// Core errors that can occur while building or decoding primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid name {0}")]
    InvalidName(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    /// Structural authority error: zero or unreachable threshold, unsorted or
    /// duplicate weight entries.
    #[error("invalid authority: {0}")]
    InvalidAuthority(String),

    #[error("malformed transaction: {0}")]
    MalformedTransaction(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
