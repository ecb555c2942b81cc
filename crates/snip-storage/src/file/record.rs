use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use snip_core::repository::BatchItem;
use snip_core::{Destination, OwnerId, ShortCode};
use uuid::Uuid;

/// One line of the link log.
///
/// Codes and URLs are kept as raw strings so that a record whose values no
/// longer validate can still be decoded, reported and skipped on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub(crate) enum LogRecord {
    Put {
        id: Uuid,
        short_url: String,
        original_url: String,
        user_id: OwnerId,
        created_at: Timestamp,
    },
    /// Tombstone for a soft deletion.
    Delete {
        id: Uuid,
        short_urls: Vec<String>,
        user_id: OwnerId,
        created_at: Timestamp,
    },
}

impl LogRecord {
    pub(crate) fn put(code: &ShortCode, destination: &Destination, owner: &OwnerId) -> Self {
        LogRecord::Put {
            id: Uuid::new_v4(),
            short_url: code.to_string(),
            original_url: destination.to_string(),
            user_id: *owner,
            created_at: Timestamp::now(),
        }
    }

    pub(crate) fn puts(items: &[BatchItem], owner: &OwnerId) -> Vec<Self> {
        items
            .iter()
            .map(|item| Self::put(&item.code, &item.destination, owner))
            .collect()
    }

    pub(crate) fn delete(codes: &[ShortCode], owner: &OwnerId) -> Self {
        LogRecord::Delete {
            id: Uuid::new_v4(),
            short_urls: codes.iter().map(ToString::to_string).collect(),
            user_id: *owner,
            created_at: Timestamp::now(),
        }
    }

    /// Serializes the record as a single newline-terminated line.
    pub(crate) fn to_line(&self) -> serde_json::Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}
