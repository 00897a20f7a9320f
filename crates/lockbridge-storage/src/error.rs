use thiserror::Error;

/// Storage-specific error types for the lockbridge gateway.
///
/// These errors cover the preference database and the retained diagnostics
/// region.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database connection or query execution failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration execution failed
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored value does not have the expected encoding
    #[error("Corrupt preference {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Retained region could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] lockbridge_core::Error),
}

impl StorageError {
    pub fn corrupt(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Specialized result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
