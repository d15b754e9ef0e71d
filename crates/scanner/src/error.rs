use thiserror::Error;
use tx_store::TxStoreError;

/// Errors surfaced by the compensation scanner.
#[derive(Debug, Error)]
pub enum ScannerError {
    /// A store query or update failed; the tick is abandoned and retried
    /// on the next scheduled delay.
    #[error("Store error: {0}")]
    Store(#[from] TxStoreError),

    /// Configuration was rejected at construction time.
    #[error("Invalid scanner configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for scanner operations.
pub type Result<T> = std::result::Result<T, ScannerError>;
