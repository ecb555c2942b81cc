//! URL shortener service implementation.
//!
//! [`ShortenerService`] ties a code [`Generator`](snip_generator::Generator)
//! to a storage [`Repository`](snip_core::Repository). Core types are
//! re-exported from `snip_core`.

pub mod service;

pub use service::ShortenerService;
pub use snip_core::{Shortener, ShortenerError, Stats};
