use async_trait::async_trait;
use parking_lot::Mutex;
use snip_core::repository::{BatchItem, Capabilities, LinkEntry, Lookup, Repository, Result};
use snip_core::{Destination, OwnerId, ShortCode, StorageError};
use std::collections::{HashMap, HashSet};
use tracing::trace;

/// In-memory storage entry for a URL mapping.
#[derive(Debug, Clone)]
struct Entry {
    destination: Destination,
    owner: OwnerId,
    deleted: bool,
}

#[derive(Debug, Default)]
struct State {
    records: HashMap<ShortCode, Entry>,
    by_destination: HashMap<Destination, ShortCode>,
}

impl State {
    fn existing_code(&self, destination: &Destination, code: &ShortCode) -> Option<&ShortCode> {
        self.by_destination
            .get(destination)
            .filter(|existing| *existing != code)
    }

    fn insert(&mut self, code: &ShortCode, destination: &Destination, owner: &OwnerId) {
        // Re-adding a soft-deleted link must not bring it back.
        if self
            .records
            .get(code)
            .is_some_and(|entry| entry.deleted && entry.destination == *destination)
        {
            return;
        }

        let previous = self.records.insert(
            code.clone(),
            Entry {
                destination: destination.clone(),
                owner: *owner,
                deleted: false,
            },
        );

        // A colliding code replaces the old record; drop its index entry too.
        if let Some(previous) = previous {
            if self.by_destination.get(&previous.destination) == Some(code) {
                self.by_destination.remove(&previous.destination);
            }
        }

        self.by_destination.insert(destination.clone(), code.clone());
    }
}

/// In-memory implementation of the [`Repository`] trait.
///
/// Every operation, full scans included, runs inside one critical section
/// of a single mutex. This keeps batch inserts atomic and makes the
/// destination index consistent with the records at all times. Intended for
/// development and low-volume deployments.
///
/// A code collision overwrites the previous record. Duplicate-destination
/// detection is enabled by default and can be turned off with
/// [`InMemoryRepository::without_duplicate_detection`].
#[derive(Debug)]
pub struct InMemoryRepository {
    state: Mutex<State>,
    duplicate_detection: bool,
}

impl InMemoryRepository {
    /// Creates a new in-memory repository that rejects duplicate destinations.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            duplicate_detection: true,
        }
    }

    /// Creates a repository that stores the same destination under as many codes as asked.
    pub fn without_duplicate_detection() -> Self {
        Self {
            duplicate_detection: false,
            ..Self::new()
        }
    }

    /// Creates a new in-memory repository with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                records: HashMap::with_capacity(capacity),
                by_destination: HashMap::with_capacity(capacity),
            }),
            duplicate_detection: true,
        }
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn add(
        &self,
        code: &ShortCode,
        destination: &Destination,
        owner: &OwnerId,
    ) -> Result<()> {
        let mut state = self.state.lock();

        if self.duplicate_detection {
            if let Some(existing) = state.existing_code(destination, code) {
                return Err(StorageError::DuplicateDestination {
                    existing: existing.clone(),
                });
            }
        }

        state.insert(code, destination, owner);
        trace!(code = %code, "stored link in memory");
        Ok(())
    }

    async fn batch_add(&self, items: &[BatchItem], owner: &OwnerId) -> Result<()> {
        let mut state = self.state.lock();

        // Validate the whole batch before touching the map.
        if self.duplicate_detection {
            let mut seen = HashSet::with_capacity(items.len());
            for item in items {
                if let Some(existing) = state.existing_code(&item.destination, &item.code) {
                    return Err(StorageError::DuplicateDestination {
                        existing: existing.clone(),
                    });
                }
                if !seen.insert(&item.destination) {
                    return Err(StorageError::InvalidData(format!(
                        "destination repeated within batch: {}",
                        item.destination
                    )));
                }
            }
        }

        for item in items {
            state.insert(&item.code, &item.destination, owner);
        }
        trace!(count = items.len(), "stored link batch in memory");
        Ok(())
    }

    async fn get(&self, code: &ShortCode) -> Result<Lookup> {
        let state = self.state.lock();

        Ok(match state.records.get(code) {
            Some(entry) if entry.deleted => Lookup::Deleted,
            Some(entry) => Lookup::Active(entry.destination.clone()),
            None => Lookup::Missing,
        })
    }

    async fn get_by_owner(&self, owner: &OwnerId) -> Result<Vec<LinkEntry>> {
        let state = self.state.lock();

        Ok(state
            .records
            .iter()
            .filter(|(_, entry)| entry.owner == *owner && !entry.deleted)
            .map(|(code, entry)| LinkEntry {
                code: code.clone(),
                destination: entry.destination.clone(),
            })
            .collect())
    }

    async fn soft_delete_by_owner(&self, codes: &[ShortCode], owner: &OwnerId) -> Result<u64> {
        let mut state = self.state.lock();
        let requested: HashSet<&ShortCode> = codes.iter().collect();

        let mut matched = 0;
        for code in requested {
            if let Some(entry) = state.records.get_mut(code) {
                if entry.owner == *owner {
                    entry.deleted = true;
                    matched += 1;
                }
            }
        }
        Ok(matched)
    }

    async fn count_records(&self) -> Result<u64> {
        Ok(self.state.lock().records.len() as u64)
    }

    async fn count_distinct_owners(&self) -> Result<u64> {
        let state = self.state.lock();
        let owners: HashSet<&OwnerId> = state.records.values().map(|entry| &entry.owner).collect();
        Ok(owners.len() as u64)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            duplicate_detection: self.duplicate_detection,
        }
    }
}
