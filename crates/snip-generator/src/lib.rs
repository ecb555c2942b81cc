pub mod error;
pub mod random;
pub mod seq;

pub use error::GeneratorError;
pub use random::RandomGenerator;
pub use seq::SeqGenerator;

use snip_core::ShortCode;

/// Trait for generating short codes.
///
/// Implementations are pure generators that don't interact with storage;
/// collision handling belongs to the repository.
pub trait Generator: Send + Sync + 'static {
    /// Generates a new short code.
    ///
    /// Failures (e.g. an unavailable entropy source) are returned to the
    /// caller rather than papered over with a weaker fallback.
    fn generate(&self) -> Result<ShortCode, GeneratorError>;
}

impl<G: Generator + ?Sized> Generator for std::sync::Arc<G> {
    fn generate(&self) -> Result<ShortCode, GeneratorError> {
        (**self).generate()
    }
}
