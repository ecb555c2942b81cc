//! Core types and traits for the snip URL shortener.
//!
//! This crate defines the storage contract shared by every backend
//! (in-memory, file-backed and relational), the shortener contract consumed
//! by transport adapters, and the error taxonomy flowing between them.

pub mod destination;
pub mod error;
pub mod owner;
pub mod repository;
pub mod shortcode;
pub mod shortener;

pub use destination::Destination;
pub use error::{CoreError, ShortenerError, StorageError};
pub use owner::OwnerId;
pub use repository::{BatchItem, Capabilities, LinkEntry, Lookup, Repository};
pub use shortcode::ShortCode;
pub use shortener::{Shortener, Stats};
