//! Error types for sudo rule cache operations

use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entry not found: {name} in subtree {subtree}")]
    NotFound { subtree: String, name: String },

    #[error("Principal not found: {name}")]
    PrincipalNotFound { name: String },

    #[error("Store failed for {name} in subtree {subtree}: {reason}")]
    StoreFailed {
        subtree: String,
        name: String,
        reason: String,
    },

    #[error("Delete failed for {target}: {reason}")]
    DeleteFailed { target: String, reason: String },

    #[error("Search failed in subtree {subtree}: {reason}")]
    SearchFailed { subtree: String, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Validation errors for rule attributes, principals and filters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Malformed timestamp in {attribute}: {value:?} ({reason})")]
    MalformedTimestamp {
        attribute: String,
        value: String,
        reason: String,
    },

    #[error("Invalid record {name}: {reason}")]
    InvalidRecord { name: String, reason: String },

    #[error("Invalid filter at offset {position}: {reason}")]
    InvalidFilter { position: usize, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Master error type for all sudo cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SudoCacheError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Resource exhausted while building {what}")]
    ResourceExhausted { what: String },
}

impl SudoCacheError {
    /// True for the recoverable "absent" outcomes (missing entry or principal).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SudoCacheError::Storage(StorageError::NotFound { .. })
                | SudoCacheError::Storage(StorageError::PrincipalNotFound { .. })
        )
    }

    /// True when a validity bound could not be parsed.
    pub fn is_malformed_timestamp(&self) -> bool {
        matches!(
            self,
            SudoCacheError::Validation(ValidationError::MalformedTimestamp { .. })
        )
    }

    pub(crate) fn exhausted(what: impl Into<String>) -> Self {
        SudoCacheError::ResourceExhausted { what: what.into() }
    }
}

/// Result type alias for sudo cache operations.
pub type SudoResult<T> = Result<T, SudoCacheError>;

// =============================================================================
// TESTS
// =============================================================================
