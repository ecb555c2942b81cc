//! Storage backends for the snip URL shortener.
//!
//! - [`InMemoryRepository`]: a map behind one lock, for development and tests.
//! - [`FileRepository`]: wraps another backend and mirrors every mutation to
//!   an append-only JSON Lines log that is replayed on startup.
//! - [`PostgresRepository`]: a single `urls` table accessed through `sqlx`.

pub mod file;
pub mod memory;
pub mod postgres;

pub use file::{FileRepository, FileRepositoryOptions};
pub use memory::InMemoryRepository;
pub use postgres::PostgresRepository;
pub use snip_core::repository::{BatchItem, Capabilities, LinkEntry, Lookup, Repository, Result};
pub use snip_core::StorageError;
