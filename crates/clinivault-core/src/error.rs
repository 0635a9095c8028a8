//! Error types for Clinivault core operations.
//!
//! This module defines the error hierarchy for all core operations.
//! Errors are descriptive at the core level; the CLI layer maps these
//! to user-facing messages.
//!
//! A record that belongs to another tenant is deliberately *not* an error:
//! such lookups resolve to `None` or an empty list so that callers cannot
//! probe for the existence of other tenants' data.

use thiserror::Error;

/// Result type alias for Clinivault operations.
pub type Result<T> = std::result::Result<T, VaultError>;

/// Core error type for Clinivault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Backing tier failed to initialize or was closed
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Collection name has no entry in the classification table
    #[error("Unknown collection: {0}")]
    CollectionUnknown(String),

    /// Backup payload is larger than the tenant's configured limit
    #[error("Backup size {size} bytes exceeds limit of {limit} bytes")]
    SizeLimitExceeded { size: u64, limit: u64 },

    /// Backup failed verification; nothing was written
    #[error("Integrity check failed: {0}")]
    IntegrityFailure(String),

    /// Encryption could not be performed
    #[error("Encryption failed: {0}")]
    EncryptionFailure(String),

    /// Ciphertext could not be authenticated or decoded
    #[error("Decryption failed: {0}")]
    DecryptionFailure(String),

    /// No backup with this id exists for the tenant
    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Invalid user input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// Compression codec error
    #[error("Compression error: {0}")]
    Compression(String),

    /// Storage backend error (generic)
    #[error("Storage error: {0}")]
    Storage(String),

    /// SQLite-specific storage error
    #[error("SQLite error: {source}")]
    Sqlite {
        #[from]
        source: rusqlite::Error,
    },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl VaultError {
    /// Whether retrying the same call could succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VaultError::Io { .. } | VaultError::Sqlite { .. })
    }
}
