use async_trait::async_trait;
use snip_core::repository::{BatchItem, Capabilities, LinkEntry, Lookup, Repository, Result};
use snip_core::{Destination, OwnerId, ShortCode, StorageError};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, warn};

/// DDL for the `urls` table, safe to apply repeatedly.
pub const SCHEMA: &str = include_str!("../ddl/postgres/urls.sql");

const URL_UNIQUE_CONSTRAINT: &str = "urls_url_key";

const INSERT_URL: &str = "INSERT INTO urls (key, url, user_id) VALUES ($1, $2, $3)";

/// PostgreSQL implementation of the repository contract.
///
/// Links live in a single `urls` table keyed by short code with a unique
/// constraint on the destination, so duplicate detection is always on.
/// Soft delete flips `is_deleted`; rows are never removed.
///
/// Dropping an in-flight call cancels it; an unfinished batch transaction
/// is rolled back when dropped.
#[derive(Debug, Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

enum UniqueViolation {
    Destination,
    Code,
}

impl PostgresRepository {
    /// Creates a repository from an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates a repository by opening a new connection pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with(PgPoolOptions::new(), database_url).await
    }

    /// Creates a repository from custom pool options.
    pub async fn connect_with(options: PgPoolOptions, database_url: &str) -> Result<Self> {
        let pool = options
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self::new(pool))
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the `urls` table and its index when missing.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn existing_code(&self, destination: &Destination) -> Result<Option<ShortCode>> {
        let row = sqlx::query("SELECT key FROM urls WHERE url = $1 LIMIT 1")
            .bind(destination.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(|row| {
            row.try_get::<String, _>("key")
                .map(ShortCode::new_unchecked)
                .map_err(map_sqlx_error)
        })
        .transpose()
    }

    /// Turns a failed insert into the matching storage error, looking up the
    /// code already holding the destination when that caused the failure.
    async fn insert_error(
        &self,
        err: sqlx::Error,
        code: &ShortCode,
        destination: &Destination,
    ) -> StorageError {
        match unique_violation(&err) {
            Some(UniqueViolation::Destination) => match self.existing_code(destination).await {
                Ok(Some(existing)) => {
                    debug!(code = %code, existing = %existing, "destination already stored");
                    StorageError::DuplicateDestination { existing }
                }
                // Only a destination repeated inside an aborted batch gets here.
                Ok(None) => StorageError::InvalidData(format!(
                    "destination repeated within batch: {destination}"
                )),
                Err(e) => e,
            },
            Some(UniqueViolation::Code) => StorageError::Conflict(code.to_string()),
            None => map_sqlx_error(err),
        }
    }
}

fn unique_violation(err: &sqlx::Error) -> Option<UniqueViolation> {
    let db_err = err.as_database_error()?;
    if !db_err.is_unique_violation() {
        return None;
    }
    match db_err.constraint() {
        Some(URL_UNIQUE_CONSTRAINT) => Some(UniqueViolation::Destination),
        _ => Some(UniqueViolation::Code),
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

fn parse_destination(raw: &str) -> Result<Destination> {
    Destination::parse(raw)
        .map_err(|e| StorageError::InvalidData(format!("stored url is invalid: {e}")))
}

fn count_from_row(row: PgRow) -> Result<u64> {
    let count: i64 = row.try_get("count").map_err(map_sqlx_error)?;
    u64::try_from(count).map_err(|_| StorageError::InvalidData(format!("negative count {count}")))
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn add(
        &self,
        code: &ShortCode,
        destination: &Destination,
        owner: &OwnerId,
    ) -> Result<()> {
        let result = sqlx::query(INSERT_URL)
            .bind(code.as_str())
            .bind(destination.as_str())
            .bind(*owner.as_uuid())
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => Err(self.insert_error(err, code, destination).await),
        }
    }

    async fn batch_add(&self, items: &[BatchItem], owner: &OwnerId) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        for item in items {
            let result = sqlx::query(INSERT_URL)
                .bind(item.code.as_str())
                .bind(item.destination.as_str())
                .bind(*owner.as_uuid())
                .execute(&mut *tx)
                .await;

            if let Err(err) = result {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "failed to roll back batch insert");
                }
                return Err(self.insert_error(err, &item.code, &item.destination).await);
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get(&self, code: &ShortCode) -> Result<Lookup> {
        let row = sqlx::query("SELECT url, is_deleted FROM urls WHERE key = $1")
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Ok(Lookup::Missing);
        };

        let is_deleted: bool = row.try_get("is_deleted").map_err(map_sqlx_error)?;
        if is_deleted {
            return Ok(Lookup::Deleted);
        }

        let url: String = row.try_get("url").map_err(map_sqlx_error)?;
        parse_destination(&url).map(Lookup::Active)
    }

    async fn get_by_owner(&self, owner: &OwnerId) -> Result<Vec<LinkEntry>> {
        let rows = sqlx::query("SELECT key, url FROM urls WHERE user_id = $1 AND NOT is_deleted")
            .bind(*owner.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|row| {
                let key: String = row.try_get("key").map_err(map_sqlx_error)?;
                let url: String = row.try_get("url").map_err(map_sqlx_error)?;
                Ok(LinkEntry {
                    code: ShortCode::new_unchecked(key),
                    destination: parse_destination(&url)?,
                })
            })
            .collect()
    }

    async fn soft_delete_by_owner(&self, codes: &[ShortCode], owner: &OwnerId) -> Result<u64> {
        if codes.is_empty() {
            return Ok(0);
        }

        let keys: Vec<String> = codes.iter().map(ToString::to_string).collect();
        let result =
            sqlx::query("UPDATE urls SET is_deleted = TRUE WHERE key = ANY($1) AND user_id = $2")
                .bind(keys)
                .bind(*owner.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn count_records(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM urls")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        count_from_row(row)
    }

    async fn count_distinct_owners(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(DISTINCT user_id) AS count FROM urls")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        count_from_row(row)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            duplicate_detection: true,
        }
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
