use crate::destination::Destination;
use crate::owner::OwnerId;
use crate::repository::LinkEntry;
use crate::shortcode::ShortCode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

type Result<T> = std::result::Result<T, crate::error::ShortenerError>;

/// Aggregate statistics over a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub urls: u64,
    pub users: u64,
}

/// The operations transport adapters call.
#[async_trait]
pub trait Shortener: Send + Sync + 'static {
    /// Creates a short code for `url` owned by `owner`.
    ///
    /// Returns `Err(DuplicateDestination)` with the existing code when the
    /// backend already stores `url`.
    async fn create_short(&self, url: &str, owner: &OwnerId) -> Result<ShortCode>;

    /// Creates one short code per URL, all or nothing. Codes come back in input order.
    async fn batch_create(&self, urls: &[String], owner: &OwnerId) -> Result<Vec<ShortCode>>;

    /// Resolves a short code.
    ///
    /// Returns `Ok(None)` for unknown codes and `Err(Gone)` for deleted ones.
    async fn resolve(&self, code: &ShortCode) -> Result<Option<Destination>>;

    /// Lists the live links of `owner`.
    async fn list_for_owner(&self, owner: &OwnerId) -> Result<Vec<LinkEntry>>;

    /// Soft-deletes `codes` on behalf of `owner`.
    ///
    /// Returns `true` when every requested code belonged to `owner`.
    async fn delete_for_owner(&self, codes: &[ShortCode], owner: &OwnerId) -> Result<bool>;

    async fn stats(&self) -> Result<Stats>;
}
