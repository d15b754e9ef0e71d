//! Saga error types.

use thiserror::Error;
use tx_store::TxStoreError;

/// Errors that can occur while coordinating a saga.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The saga definition could not be interpreted. Fatal to the one
    /// `run` call that supplied it; no other saga is affected.
    #[error("Invalid saga definition: {0}")]
    Definition(String),

    /// Transaction store error.
    #[error("Store error: {0}")]
    Store(#[from] TxStoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
