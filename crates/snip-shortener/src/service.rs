use async_trait::async_trait;
use snip_core::{
    BatchItem, Destination, LinkEntry, Lookup, OwnerId, Repository, ShortCode, Shortener,
    ShortenerError, Stats, StorageError,
};
use snip_generator::Generator;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A concrete implementation of the `Shortener` trait.
///
/// This service wraps a `Repository` and a `Generator` to handle:
/// - URL validation before anything reaches storage
/// - Short code generation, one code per stored link
/// - Mapping storage outcomes onto [`ShortenerError`]
///
/// Note: The `Generator` implementation is responsible for ensuring
/// uniqueness of generated short codes. A collision surfaces as
/// [`ShortenerError::TokenConflict`]; no retry is performed.
#[derive(Debug)]
pub struct ShortenerService<R, G> {
    repository: Arc<R>,
    generator: Arc<G>,
    timeout: Option<Duration>,
}

impl<R, G> Clone for ShortenerService<R, G> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            generator: Arc::clone(&self.generator),
            timeout: self.timeout,
        }
    }
}

impl<R: Repository, G: Generator> ShortenerService<R, G> {
    pub fn new(repository: R, generator: G) -> Self {
        Self {
            repository: Arc::new(repository),
            generator: Arc::new(generator),
            timeout: None,
        }
    }

    /// Bounds every storage call by `timeout`.
    ///
    /// An expired call is dropped and reported as [`StorageError::Timeout`].
    /// Dropping cancels in-flight backend work, except for file-backed
    /// mutations, which run to completion on their own task so the log stays
    /// in step with the inner repository.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    fn generate_code(&self) -> Result<ShortCode, ShortenerError> {
        self.generator
            .generate()
            .map_err(|e| ShortenerError::Generator(e.to_string()))
    }

    async fn storage<T, F>(&self, operation: &'static str, call: F) -> Result<T, ShortenerError>
    where
        T: Send,
        F: Future<Output = snip_core::repository::Result<T>> + Send,
    {
        let result = match self.timeout {
            None => call.await,
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(operation, timeout_ms = millis(limit), "storage call timed out");
                    Err(StorageError::Timeout(format!(
                        "{operation} did not finish within {limit:?}"
                    )))
                }
            },
        };

        result.map_err(ShortenerError::from)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl<R: Repository, G: Generator> Shortener for ShortenerService<R, G> {
    async fn create_short(&self, url: &str, owner: &OwnerId) -> Result<ShortCode, ShortenerError> {
        let destination = Destination::parse(url)?;
        let code = self.generate_code()?;

        self.storage("add", self.repository.add(&code, &destination, owner))
            .await?;

        debug!(code = %code, owner = %owner, "short link created");
        Ok(code)
    }

    async fn batch_create(
        &self,
        urls: &[String],
        owner: &OwnerId,
    ) -> Result<Vec<ShortCode>, ShortenerError> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        let destinations = urls
            .iter()
            .map(|url| Destination::parse(url))
            .collect::<Result<Vec<_>, _>>()?;

        if self.repository.capabilities().duplicate_detection {
            let mut seen = HashSet::with_capacity(destinations.len());
            if let Some(repeated) = destinations.iter().find(|d| !seen.insert(*d)) {
                return Err(ShortenerError::DuplicateInBatch(repeated.to_string()));
            }
        }

        let items = destinations
            .into_iter()
            .map(|destination| {
                Ok(BatchItem {
                    code: self.generate_code()?,
                    destination,
                })
            })
            .collect::<Result<Vec<_>, ShortenerError>>()?;

        self.storage("batch_add", self.repository.batch_add(&items, owner))
            .await?;

        debug!(count = items.len(), owner = %owner, "short link batch created");
        Ok(items.into_iter().map(|item| item.code).collect())
    }

    async fn resolve(&self, code: &ShortCode) -> Result<Option<Destination>, ShortenerError> {
        match self.storage("get", self.repository.get(code)).await? {
            Lookup::Active(destination) => Ok(Some(destination)),
            Lookup::Missing => Ok(None),
            Lookup::Deleted => Err(ShortenerError::Gone(code.clone())),
        }
    }

    async fn list_for_owner(&self, owner: &OwnerId) -> Result<Vec<LinkEntry>, ShortenerError> {
        self.storage("get_by_owner", self.repository.get_by_owner(owner))
            .await
    }

    async fn delete_for_owner(
        &self,
        codes: &[ShortCode],
        owner: &OwnerId,
    ) -> Result<bool, ShortenerError> {
        let mut seen = HashSet::with_capacity(codes.len());
        let distinct: Vec<ShortCode> = codes
            .iter()
            .filter(|code| seen.insert(*code))
            .cloned()
            .collect();

        if distinct.is_empty() {
            return Ok(true);
        }

        let deleted = self
            .storage(
                "soft_delete_by_owner",
                self.repository.soft_delete_by_owner(&distinct, owner),
            )
            .await?;

        debug!(requested = distinct.len(), deleted, owner = %owner, "soft delete finished");
        Ok(deleted == distinct.len() as u64)
    }

    async fn stats(&self) -> Result<Stats, ShortenerError> {
        let urls = self
            .storage("count_records", self.repository.count_records())
            .await?;
        let users = self
            .storage("count_distinct_owners", self.repository.count_distinct_owners())
            .await?;
        Ok(Stats { urls, users })
    }
}
