use crate::{Generator, GeneratorError};
use snip_core::ShortCode;
use std::sync::atomic::{AtomicU64, Ordering};

/// A deterministic generator producing sequential codes like "sn000000", "sn000001".
///
/// Codes are unique within one instance only; the counter is not persisted,
/// so a restarted process starts over. Meant for tests and single-process
/// debugging, not for durable backends.
#[derive(Debug)]
pub struct SeqGenerator {
    counter: AtomicU64,
    prefix: String,
}

impl Clone for SeqGenerator {
    fn clone(&self) -> Self {
        Self {
            counter: AtomicU64::new(self.counter.load(Ordering::SeqCst)),
            prefix: self.prefix.clone(),
        }
    }
}

impl SeqGenerator {
    /// Creates a new sequential generator with a custom prefix.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self::with_offset(prefix, 0)
    }

    /// Creates a new sequential generator starting from a specific counter value.
    pub fn with_offset(prefix: impl Into<String>, offset: u64) -> Self {
        Self {
            counter: AtomicU64::new(offset),
            prefix: prefix.into(),
        }
    }
}

impl Generator for SeqGenerator {
    fn generate(&self) -> Result<ShortCode, GeneratorError> {
        let count = self.counter.fetch_add(1, Ordering::SeqCst);
        let code = format!("{}{:06}", self.prefix, count);
        ShortCode::new(code).map_err(|e| GeneratorError::InvalidSettings(e.to_string()))
    }
}
