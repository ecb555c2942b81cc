mod record;

use async_trait::async_trait;
use record::LogRecord;
use snip_core::repository::{BatchItem, Capabilities, LinkEntry, Lookup, Repository, Result};
use snip_core::{Destination, OwnerId, ShortCode, StorageError};
use std::future::Future;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};
use typed_builder::TypedBuilder;

/// Settings for opening a [`FileRepository`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct FileRepositoryOptions {
    /// Location of the JSON Lines log. Created when absent.
    #[builder(setter(into))]
    pub path: PathBuf,
    /// Fsync the log after every append instead of only flushing it.
    #[builder(default = false)]
    pub sync_on_write: bool,
}

/// Counters collected while replaying the log.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub loaded: u64,
    pub tombstones: u64,
    pub skipped: u64,
}

/// A repository decorator that makes another backend durable.
///
/// Every successful mutation of the inner repository is mirrored as one
/// JSON line per link (plus tombstones for soft deletions) appended to a
/// log file. On [`open`](Self::open) the log is replayed in file order into
/// the inner repository; after that the log is write-only. Reads, counts and
/// duplicate detection are delegated unchanged.
///
/// Mutations hold the writer lock across the inner call and the append, so
/// log order matches the order in which the inner repository accepted
/// them and lines never interleave. Each mutation runs on its own tokio
/// task: dropping the caller's future (for example on a timeout) does not
/// stop a mutation halfway between the inner call and the append.
///
/// If the append fails after the inner repository accepted a mutation, the
/// mutation is reported as successful and the failure is logged: the link
/// is served until restart but will be missing from the next replay.
#[derive(Debug)]
pub struct FileRepository<R> {
    shared: Arc<Shared<R>>,
    replay: ReplaySummary,
}

#[derive(Debug)]
struct Shared<R> {
    inner: R,
    path: PathBuf,
    sync_on_write: bool,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl<R: Repository> FileRepository<R> {
    /// Opens (creating if needed) the log at `path` and replays it into `inner`.
    pub async fn open(path: impl Into<PathBuf>, inner: R) -> Result<Self> {
        Self::open_with(FileRepositoryOptions::builder().path(path).build(), inner).await
    }

    /// Opens the log described by `options` and replays it into `inner`.
    ///
    /// Failing to open the file is fatal. Undecodable lines are skipped with
    /// a warning; errors from the inner repository other than records it
    /// already holds abort the replay. A partial last line left by a crash
    /// is terminated before new records are appended after it.
    pub async fn open_with(options: FileRepositoryOptions, inner: R) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&options.path)
            .await
            .map_err(|e| {
                StorageError::Io(format!("failed to open {}: {e}", options.path.display()))
            })?;

        let replay = replay(&options.path, &inner).await?;
        info!(
            path = %options.path.display(),
            loaded = replay.loaded,
            tombstones = replay.tombstones,
            skipped = replay.skipped,
            "replayed link log"
        );

        let mut writer = BufWriter::new(file);
        if !ends_with_newline(&options.path).await? {
            warn!(path = %options.path.display(), "link log ends with a partial record; terminating it");
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }

        Ok(Self {
            shared: Arc::new(Shared {
                inner,
                path: options.path,
                sync_on_write: options.sync_on_write,
                writer: Mutex::new(Some(writer)),
            }),
            replay,
        })
    }

    /// Returns a reference to the inner repository.
    pub fn inner(&self) -> &R {
        &self.shared.inner
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// What the startup replay loaded and skipped.
    pub fn replay_summary(&self) -> ReplaySummary {
        self.replay
    }
}

impl<R: Repository> Shared<R> {
    async fn add(&self, code: &ShortCode, destination: &Destination, owner: &OwnerId) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(StorageError::Closed)?;

        self.inner.add(code, destination, owner).await?;
        self.append(writer, &[LogRecord::put(code, destination, owner)])
            .await;
        trace!(code = %code, "logged link");
        Ok(())
    }

    async fn batch_add(&self, items: &[BatchItem], owner: &OwnerId) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(StorageError::Closed)?;

        self.inner.batch_add(items, owner).await?;
        self.append(writer, &LogRecord::puts(items, owner)).await;
        trace!(count = items.len(), "logged link batch");
        Ok(())
    }

    async fn soft_delete_by_owner(&self, codes: &[ShortCode], owner: &OwnerId) -> Result<u64> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(StorageError::Closed)?;

        let deleted = self.inner.soft_delete_by_owner(codes, owner).await?;
        if deleted > 0 {
            self.append(writer, &[LogRecord::delete(codes, owner)]).await;
        }
        Ok(deleted)
    }

    async fn append(&self, writer: &mut BufWriter<File>, records: &[LogRecord]) {
        if let Err(e) = write_records(writer, records, self.sync_on_write).await {
            error!(
                path = %self.path.display(),
                records = records.len(),
                error = %e,
                "failed to append to link log; in-memory state and log have diverged"
            );
        }
    }
}

/// Runs a mutation to completion even if the awaiting future is dropped.
async fn detached<T, F>(mutation: F) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    tokio::spawn(mutation)
        .await
        .map_err(|e| StorageError::Unavailable(format!("link log task failed: {e}")))?
}

async fn write_records(
    writer: &mut BufWriter<File>,
    records: &[LogRecord],
    sync: bool,
) -> std::io::Result<()> {
    for record in records {
        writer.write_all(&record.to_line()?).await?;
    }
    writer.flush().await?;
    if sync {
        writer.get_ref().sync_data().await?;
    }
    Ok(())
}

/// Whether the log is empty or its last byte terminates a line.
async fn ends_with_newline(path: &Path) -> Result<bool> {
    let mut file = File::open(path).await?;
    if file.metadata().await?.len() == 0 {
        return Ok(true);
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1)).await?;
    file.read_exact(&mut last).await?;
    Ok(last[0] == b'\n')
}

async fn replay<R: Repository>(path: &Path, inner: &R) -> Result<ReplaySummary> {
    let file = File::open(path).await.map_err(|e| {
        StorageError::Io(format!("failed to read {}: {e}", path.display()))
    })?;
    let mut reader = BufReader::new(file);
    let mut summary = ReplaySummary::default();
    let mut line = Vec::new();
    let mut line_number = 0usize;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        line_number += 1;

        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let record = match serde_json::from_slice::<LogRecord>(&line) {
            Ok(record) => record,
            Err(e) => {
                warn!(path = %path.display(), line = line_number, error = %e, "skipping malformed log record");
                summary.skipped += 1;
                continue;
            }
        };

        match record {
            LogRecord::Put {
                short_url,
                original_url,
                user_id,
                ..
            } => {
                let parsed = ShortCode::new(short_url.as_str())
                    .and_then(|code| Destination::parse(&original_url).map(|d| (code, d)));
                let (code, destination) = match parsed {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn!(path = %path.display(), line = line_number, error = %e, "skipping invalid log record");
                        summary.skipped += 1;
                        continue;
                    }
                };

                match inner.add(&code, &destination, &user_id).await {
                    Ok(()) => summary.loaded += 1,
                    Err(StorageError::DuplicateDestination { existing }) => {
                        debug!(code = %code, existing = %existing, "log record already present in inner repository");
                        summary.skipped += 1;
                    }
                    // A persistent inner repository may already hold the code itself.
                    Err(StorageError::Conflict(_)) => {
                        debug!(code = %code, "log record code already present in inner repository");
                        summary.skipped += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
            LogRecord::Delete {
                short_urls,
                user_id,
                ..
            } => {
                let codes: Vec<ShortCode> = short_urls
                    .iter()
                    .filter_map(|raw| match ShortCode::new(raw.as_str()) {
                        Ok(code) => Some(code),
                        Err(e) => {
                            warn!(path = %path.display(), line = line_number, error = %e, "ignoring invalid code in tombstone");
                            None
                        }
                    })
                    .collect();
                inner.soft_delete_by_owner(&codes, &user_id).await?;
                summary.tombstones += 1;
            }
        }
    }

    Ok(summary)
}

#[async_trait]
impl<R: Repository> Repository for FileRepository<R> {
    async fn add(
        &self,
        code: &ShortCode,
        destination: &Destination,
        owner: &OwnerId,
    ) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let (code, destination, owner) = (code.clone(), destination.clone(), *owner);
        detached(async move { shared.add(&code, &destination, &owner).await }).await
    }

    async fn batch_add(&self, items: &[BatchItem], owner: &OwnerId) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let (items, owner) = (items.to_vec(), *owner);
        detached(async move { shared.batch_add(&items, &owner).await }).await
    }

    async fn get(&self, code: &ShortCode) -> Result<Lookup> {
        self.shared.inner.get(code).await
    }

    async fn get_by_owner(&self, owner: &OwnerId) -> Result<Vec<LinkEntry>> {
        self.shared.inner.get_by_owner(owner).await
    }

    async fn soft_delete_by_owner(&self, codes: &[ShortCode], owner: &OwnerId) -> Result<u64> {
        let shared = Arc::clone(&self.shared);
        let (codes, owner) = (codes.to_vec(), *owner);
        detached(async move { shared.soft_delete_by_owner(&codes, &owner).await }).await
    }

    async fn count_records(&self) -> Result<u64> {
        self.shared.inner.count_records().await
    }

    async fn count_distinct_owners(&self) -> Result<u64> {
        self.shared.inner.count_distinct_owners().await
    }

    fn capabilities(&self) -> Capabilities {
        self.shared.inner.capabilities()
    }

    async fn close(&self) -> Result<()> {
        let writer = self.shared.writer.lock().await.take();
        if let Some(mut writer) = writer {
            writer.flush().await?;
            writer.shutdown().await?;
            debug!(path = %self.shared.path.display(), "closed link log");
        }
        self.shared.inner.close().await
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRepository;
    use tempfile::TempDir;

    fn code(s: &str) -> ShortCode {
        ShortCode::new_unchecked(s)
    }

    fn url(s: &str) -> Destination {
        Destination::parse(s).unwrap()
    }

    async fn open(dir: &TempDir) -> FileRepository<InMemoryRepository> {
        FileRepository::open(dir.path().join("links.jsonl"), InMemoryRepository::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn creates_missing_file() {
        let dir = TempDir::new().unwrap();
        let repo = open(&dir).await;

        assert!(repo.path().exists());
        assert_eq!(repo.replay_summary(), ReplaySummary::default());
    }

    #[tokio::test]
    async fn links_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let alice = OwnerId::random();
        let bob = OwnerId::random();

        let repo = open(&dir).await;
        repo.add(&code("alice1"), &url("https://a.example"), &alice)
            .await
            .unwrap();
        repo.batch_add(
            &[
                BatchItem {
                    code: code("bob001"),
                    destination: url("https://b1.example"),
                },
                BatchItem {
                    code: code("bob002"),
                    destination: url("https://b2.example"),
                },
            ],
            &bob,
        )
        .await
        .unwrap();
        repo.close().await.unwrap();

        let reopened = open(&dir).await;
        assert_eq!(reopened.replay_summary().loaded, 3);
        assert_eq!(reopened.get_by_owner(&alice).await.unwrap().len(), 1);
        assert_eq!(reopened.get_by_owner(&bob).await.unwrap().len(), 2);
        assert_eq!(
            reopened.get(&code("bob002")).await.unwrap(),
            Lookup::Active(url("https://b2.example"))
        );
    }

    #[tokio::test]
    async fn tombstones_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let owner = OwnerId::random();

        let repo = open(&dir).await;
        repo.add(&code("keep01"), &url("https://keep.example"), &owner)
            .await
            .unwrap();
        repo.add(&code("drop01"), &url("https://drop.example"), &owner)
            .await
            .unwrap();
        assert_eq!(
            repo.soft_delete_by_owner(&[code("drop01")], &owner)
                .await
                .unwrap(),
            1
        );
        repo.close().await.unwrap();

        let reopened = open(&dir).await;
        assert_eq!(reopened.replay_summary().tombstones, 1);
        assert_eq!(reopened.get(&code("drop01")).await.unwrap(), Lookup::Deleted);
        assert_eq!(reopened.get_by_owner(&owner).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn foreign_delete_is_not_logged() {
        let dir = TempDir::new().unwrap();
        let owner = OwnerId::random();

        let repo = open(&dir).await;
        repo.add(&code("abc123"), &url("https://example.com"), &owner)
            .await
            .unwrap();
        let deleted = repo
            .soft_delete_by_owner(&[code("abc123")], &OwnerId::random())
            .await
            .unwrap();
        assert_eq!(deleted, 0);
        repo.close().await.unwrap();

        let contents = std::fs::read_to_string(dir.path().join("links.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[tokio::test]
    async fn failed_mutations_are_not_logged() {
        let dir = TempDir::new().unwrap();
        let owner = OwnerId::random();

        let repo = open(&dir).await;
        repo.add(&code("first1"), &url("https://example.com"), &owner)
            .await
            .unwrap();
        let err = repo
            .add(&code("second"), &url("https://example.com"), &owner)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateDestination { .. }));
        repo.close().await.unwrap();

        let contents = std::fs::read_to_string(dir.path().join("links.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[tokio::test]
    async fn skips_corrupt_and_invalid_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("links.jsonl");
        let owner = OwnerId::random();

        let good = LogRecord::put(&code("good01"), &url("https://good.example"), &owner);
        let bad_scheme = LogRecord::Put {
            id: uuid::Uuid::new_v4(),
            short_url: "bad001".to_string(),
            original_url: "ftp://files.example".to_string(),
            user_id: owner,
            created_at: jiff::Timestamp::now(),
        };
        let mut contents = Vec::new();
        contents.extend(good.to_line().unwrap());
        contents.extend(b"{\"op\":\"put\",\"short_url\":\"trunc");
        contents.push(b'\n');
        contents.extend(bad_scheme.to_line().unwrap());
        contents.extend(b"\n");
        std::fs::write(&path, contents).unwrap();

        let repo = FileRepository::open(&path, InMemoryRepository::new())
            .await
            .unwrap();

        assert_eq!(
            repo.replay_summary(),
            ReplaySummary {
                loaded: 1,
                tombstones: 0,
                skipped: 2,
            }
        );
        assert_eq!(
            repo.get(&code("good01")).await.unwrap(),
            Lookup::Active(url("https://good.example"))
        );
        assert_eq!(repo.get(&code("bad001")).await.unwrap(), Lookup::Missing);
    }

    #[tokio::test]
    async fn appends_after_reopen_keep_earlier_lines() {
        let dir = TempDir::new().unwrap();
        let owner = OwnerId::random();

        let repo = open(&dir).await;
        repo.add(&code("one111"), &url("https://one.example"), &owner)
            .await
            .unwrap();
        repo.close().await.unwrap();

        let repo = open(&dir).await;
        repo.add(&code("two222"), &url("https://two.example"), &owner)
            .await
            .unwrap();
        repo.close().await.unwrap();

        let repo = open(&dir).await;
        assert_eq!(repo.replay_summary().loaded, 2);
        assert_eq!(repo.count_records().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn mutations_after_close_fail() {
        let dir = TempDir::new().unwrap();
        let owner = OwnerId::random();

        let repo = open(&dir).await;
        repo.add(&code("abc123"), &url("https://example.com"), &owner)
            .await
            .unwrap();
        repo.close().await.unwrap();

        let err = repo
            .add(&code("def456"), &url("https://other.example"), &owner)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Closed));
        assert!(matches!(
            repo.soft_delete_by_owner(&[code("abc123")], &owner).await,
            Err(StorageError::Closed)
        ));
        // reads still go to the inner repository
        assert_eq!(
            repo.get(&code("abc123")).await.unwrap(),
            Lookup::Active(url("https://example.com"))
        );
        // closing twice is harmless
        repo.close().await.unwrap();
    }

    #[tokio::test]
    async fn sync_on_write_option() {
        let dir = TempDir::new().unwrap();
        let options = FileRepositoryOptions::builder()
            .path(dir.path().join("synced.jsonl"))
            .sync_on_write(true)
            .build();
        let owner = OwnerId::random();

        let repo = FileRepository::open_with(options, InMemoryRepository::new())
            .await
            .unwrap();
        repo.add(&code("abc123"), &url("https://example.com"), &owner)
            .await
            .unwrap();

        let contents = std::fs::read_to_string(repo.path()).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[tokio::test]
    async fn delegates_capabilities() {
        let dir = TempDir::new().unwrap();
        let repo = FileRepository::open(
            dir.path().join("links.jsonl"),
            InMemoryRepository::without_duplicate_detection(),
        )
        .await
        .unwrap();

        assert!(!repo.capabilities().duplicate_detection);
    }

    #[tokio::test]
    async fn partial_last_line_does_not_swallow_new_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("links.jsonl");
        let owner = OwnerId::random();

        let good = LogRecord::put(&code("good01"), &url("https://good.example"), &owner);
        let mut contents = good.to_line().unwrap();
        contents.extend(b"{\"op\":\"put\",\"short_url\":\"trunc");
        std::fs::write(&path, contents).unwrap();

        let repo = FileRepository::open(&path, InMemoryRepository::new())
            .await
            .unwrap();
        repo.add(&code("after1"), &url("https://after.example"), &owner)
            .await
            .unwrap();
        repo.close().await.unwrap();

        let reopened = FileRepository::open(&path, InMemoryRepository::new())
            .await
            .unwrap();
        assert_eq!(
            reopened.replay_summary(),
            ReplaySummary {
                loaded: 2,
                tombstones: 0,
                skipped: 1,
            }
        );
        assert_eq!(
            reopened.get(&code("after1")).await.unwrap(),
            Lookup::Active(url("https://after.example"))
        );
    }

    /// Rejects a second insert of a known code, like a table keyed by code.
    struct KeyedRepository(InMemoryRepository);

    #[async_trait]
    impl Repository for KeyedRepository {
        async fn add(
            &self,
            code: &ShortCode,
            destination: &Destination,
            owner: &OwnerId,
        ) -> Result<()> {
            if self.0.get(code).await? != Lookup::Missing {
                return Err(StorageError::Conflict(code.to_string()));
            }
            self.0.add(code, destination, owner).await
        }

        async fn batch_add(&self, items: &[BatchItem], owner: &OwnerId) -> Result<()> {
            self.0.batch_add(items, owner).await
        }

        async fn get(&self, code: &ShortCode) -> Result<Lookup> {
            self.0.get(code).await
        }

        async fn get_by_owner(&self, owner: &OwnerId) -> Result<Vec<LinkEntry>> {
            self.0.get_by_owner(owner).await
        }

        async fn soft_delete_by_owner(&self, codes: &[ShortCode], owner: &OwnerId) -> Result<u64> {
            self.0.soft_delete_by_owner(codes, owner).await
        }

        async fn count_records(&self) -> Result<u64> {
            self.0.count_records().await
        }

        async fn count_distinct_owners(&self) -> Result<u64> {
            self.0.count_distinct_owners().await
        }

        fn capabilities(&self) -> Capabilities {
            self.0.capabilities()
        }
    }

    #[tokio::test]
    async fn replay_skips_codes_the_inner_repository_already_holds() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("links.jsonl");
        let owner = OwnerId::random();

        let record = LogRecord::put(&code("abc123"), &url("https://example.com"), &owner);
        std::fs::write(&path, record.to_line().unwrap()).unwrap();

        let inner = KeyedRepository(InMemoryRepository::new());
        inner
            .add(&code("abc123"), &url("https://example.com"), &owner)
            .await
            .unwrap();

        let repo = FileRepository::open(&path, inner).await.unwrap();

        assert_eq!(
            repo.replay_summary(),
            ReplaySummary {
                loaded: 0,
                tombstones: 0,
                skipped: 1,
            }
        );
        assert_eq!(
            repo.get(&code("abc123")).await.unwrap(),
            Lookup::Active(url("https://example.com"))
        );
    }

    /// Takes a while to accept each insert.
    struct SlowRepository(InMemoryRepository);

    #[async_trait]
    impl Repository for SlowRepository {
        async fn add(
            &self,
            code: &ShortCode,
            destination: &Destination,
            owner: &OwnerId,
        ) -> Result<()> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            self.0.add(code, destination, owner).await
        }

        async fn batch_add(&self, items: &[BatchItem], owner: &OwnerId) -> Result<()> {
            self.0.batch_add(items, owner).await
        }

        async fn get(&self, code: &ShortCode) -> Result<Lookup> {
            self.0.get(code).await
        }

        async fn get_by_owner(&self, owner: &OwnerId) -> Result<Vec<LinkEntry>> {
            self.0.get_by_owner(owner).await
        }

        async fn soft_delete_by_owner(&self, codes: &[ShortCode], owner: &OwnerId) -> Result<u64> {
            self.0.soft_delete_by_owner(codes, owner).await
        }

        async fn count_records(&self) -> Result<u64> {
            self.0.count_records().await
        }

        async fn count_distinct_owners(&self) -> Result<u64> {
            self.0.count_distinct_owners().await
        }

        fn capabilities(&self) -> Capabilities {
            self.0.capabilities()
        }
    }

    #[tokio::test]
    async fn abandoned_mutation_is_still_logged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("links.jsonl");
        let owner = OwnerId::random();

        let repo = FileRepository::open(&path, SlowRepository(InMemoryRepository::new()))
            .await
            .unwrap();
        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(5),
            repo.add(&code("slow01"), &url("https://slow.example"), &owner),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert_eq!(
            repo.get(&code("slow01")).await.unwrap(),
            Lookup::Active(url("https://slow.example"))
        );
        repo.close().await.unwrap();

        let reopened = FileRepository::open(&path, InMemoryRepository::new())
            .await
            .unwrap();
        assert_eq!(
            reopened.get(&code("slow01")).await.unwrap(),
            Lookup::Active(url("https://slow.example"))
        );
    }
}
