use crate::{Generator, GeneratorError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::TryRngCore;
use snip_core::ShortCode;

/// Length of generated codes unless configured otherwise.
pub const DEFAULT_CODE_LENGTH: usize = 8;

const MIN_CODE_LENGTH: usize = 3;
const MAX_CODE_LENGTH: usize = 32;

/// Generates short codes from operating-system entropy.
///
/// Random bytes are encoded with the URL-safe base64 alphabet and truncated
/// to the configured length. With the default 8 characters there are 2^48
/// possible codes, so collisions are left for the repository to detect.
#[derive(Debug, Clone, Copy)]
pub struct RandomGenerator {
    length: usize,
}

impl RandomGenerator {
    pub fn new() -> Self {
        Self {
            length: DEFAULT_CODE_LENGTH,
        }
    }

    /// Creates a generator producing codes of `length` characters.
    pub fn with_length(length: usize) -> Result<Self, GeneratorError> {
        if !(MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&length) {
            return Err(GeneratorError::InvalidSettings(format!(
                "code length must be between {} and {}, got {}",
                MIN_CODE_LENGTH, MAX_CODE_LENGTH, length
            )));
        }
        Ok(Self { length })
    }

    pub fn length(&self) -> usize {
        self.length
    }
}

impl Default for RandomGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Generator for RandomGenerator {
    fn generate(&self) -> Result<ShortCode, GeneratorError> {
        // 6 bits per base64 character
        let mut buf = vec![0u8; (self.length * 6).div_ceil(8)];
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| GeneratorError::Entropy(e.to_string()))?;

        let mut encoded = URL_SAFE_NO_PAD.encode(&buf);
        encoded.truncate(self.length);
        Ok(ShortCode::new_unchecked(encoded))
    }
}
