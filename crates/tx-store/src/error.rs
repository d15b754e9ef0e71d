use thiserror::Error;

/// Errors that can occur when interacting with the transaction store.
#[derive(Debug, Error)]
pub enum TxStoreError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value was not one of the known enum forms.
    #[error("Corrupt stored value: {0}")]
    CorruptRecord(String),
}

/// Result type for transaction store operations.
pub type Result<T> = std::result::Result<T, TxStoreError>;
