use thiserror::Error;

/// Errors returned while generating short codes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GeneratorError {
    #[error("entropy source failed: {0}")]
    Entropy(String),
    #[error("invalid generator settings: {0}")]
    InvalidSettings(String),
}
