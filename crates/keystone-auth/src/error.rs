//! Error types for the authorization module.

use thiserror::Error;

/// Errors that can occur while checking or mutating permissions.
#[derive(Debug, Error)]
pub enum AuthError {
    /// A declared authorization is satisfiable, but only with more delay
    /// than the transaction committed to.
    #[error("missing authority: {0}")]
    MissingAuthority(String),

    /// A declared authorization cannot be satisfied by the provided keys and
    /// permission levels under any delay.
    #[error("unsatisfied authorization: {0}")]
    UnsatisfiedAuthorization(String),

    /// A declared authorization is not senior enough for the action.
    #[error("irrelevant authority: {0}")]
    IrrelevantAuthority(String),

    /// A provided signature did not contribute to any satisfied authority.
    #[error("irrelevant signature: {0}")]
    IrrelevantSignature(String),

    /// An action violates a graph, link, or scheduling invariant.
    #[error("action validation failed: {0}")]
    ActionValidate(String),

    /// A permission that must exist does not.
    #[error("permission query failed: {0}")]
    PermissionQuery(String),

    /// An action carries no authorization.
    #[error("no authorizations: {0}")]
    NoAuthorizations(String),

    /// The deferred transaction named by a cancellation does not exist.
    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] keystone_store::StoreError),

    /// Core error.
    #[error("core error: {0}")]
    Core(#[from] keystone_core::CoreError),
}

/// Result type for authorization operations.
pub type Result<T> = std::result::Result<T, AuthError>;
