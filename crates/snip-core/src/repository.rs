pub use crate::error::Result;

use crate::destination::Destination;
use crate::owner::OwnerId;
use crate::shortcode::ShortCode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One item of a batch insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub code: ShortCode,
    pub destination: Destination,
}

/// A link owned by a caller, as returned by owner listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEntry {
    pub code: ShortCode,
    pub destination: Destination,
}

/// Outcome of looking up a short code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// The code maps to a live destination.
    Active(Destination),
    /// The code exists but was soft-deleted.
    Deleted,
    /// The code has never been stored.
    Missing,
}

/// Optional behaviors a backend may or may not enforce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Whether inserting an already stored destination fails with
    /// [`StorageError::DuplicateDestination`](crate::StorageError::DuplicateDestination).
    pub duplicate_detection: bool,
}

/// The persistence contract every storage backend satisfies.
///
/// Implementations must be safe to call from many tasks at once. Mutations
/// are never hard deletes: a record is created once and can only be
/// soft-deleted by its owner afterwards.
#[async_trait]
pub trait Repository: Send + Sync + 'static {
    /// Stores a new link.
    ///
    /// Returns `Err(DuplicateDestination)` carrying the existing code when the
    /// backend detects duplicates and `destination` is already stored.
    async fn add(&self, code: &ShortCode, destination: &Destination, owner: &OwnerId)
        -> Result<()>;

    /// Stores every item or none of them.
    async fn batch_add(&self, items: &[BatchItem], owner: &OwnerId) -> Result<()>;

    /// Looks up a short code, distinguishing deleted from unknown codes.
    async fn get(&self, code: &ShortCode) -> Result<Lookup>;

    /// Lists the live links created by `owner`. Order is unspecified.
    async fn get_by_owner(&self, owner: &OwnerId) -> Result<Vec<LinkEntry>>;

    /// Soft-deletes the given codes that belong to `owner`.
    ///
    /// Codes that are unknown or owned by someone else are ignored. Returns
    /// how many of the requested codes belong to `owner`.
    async fn soft_delete_by_owner(&self, codes: &[ShortCode], owner: &OwnerId) -> Result<u64>;

    /// Number of stored records, soft-deleted ones included.
    async fn count_records(&self) -> Result<u64>;

    /// Number of distinct owners across all records.
    async fn count_distinct_owners(&self) -> Result<u64>;

    fn capabilities(&self) -> Capabilities;

    /// Releases resources held by the backend.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
