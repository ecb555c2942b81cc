use crate::shortcode::ShortCode;
use thiserror::Error;

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors raised while parsing domain values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid short code: {0}")]
    InvalidShortCode(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid owner id: {0}")]
    InvalidOwner(String),
}

/// Errors reported by storage backends.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The destination is already stored under another short code.
    #[error("destination already shortened as {existing}")]
    DuplicateDestination { existing: ShortCode },
    /// The short code itself is already taken and the backend refuses to overwrite it.
    #[error("short code already exists: {0}")]
    Conflict(String),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
    #[error("storage i/o failed: {0}")]
    Io(String),
    #[error("storage backend is closed")]
    Closed,
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

/// Errors returned by the shortener service to transport adapters.
#[derive(Debug, Clone, Error)]
pub enum ShortenerError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid short code: {0}")]
    InvalidShortCode(String),
    #[error("invalid owner id: {0}")]
    InvalidOwner(String),
    /// Not a hard failure: adapters should answer with the existing code.
    #[error("destination already shortened as {0}")]
    DuplicateDestination(ShortCode),
    #[error("destination appears more than once in batch: {0}")]
    DuplicateInBatch(String),
    /// The code existed but was soft-deleted.
    #[error("short code {0} has been deleted")]
    Gone(ShortCode),
    #[error("generated short code collided: {0}")]
    TokenConflict(String),
    #[error("short code generation failed: {0}")]
    Generator(String),
    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl From<CoreError> for ShortenerError {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::InvalidShortCode(message) => Self::InvalidShortCode(message),
            CoreError::InvalidUrl(message) => Self::InvalidUrl(message),
            CoreError::InvalidOwner(message) => Self::InvalidOwner(message),
        }
    }
}

impl From<StorageError> for ShortenerError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::DuplicateDestination { existing } => Self::DuplicateDestination(existing),
            StorageError::Conflict(code) => Self::TokenConflict(code),
            other => Self::Storage(other),
        }
    }
}
