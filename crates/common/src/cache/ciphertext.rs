//! The local ciphertext cache.
//!
//! Files live at `<root>/<selector>/<id>.<state>` and move between states only
//! by rename inside that directory:
//!
//! ```text
//!   new_writer ──▶ .uploading ────seal──▶ .uploaded ──writeback──▶ .cached
//!                                                                   ▲
//!   open_read (miss) ──▶ .caching ──download complete───────────────┘
//! ```
//!
//! `.cached` files are the only ones the purger may evict, since the
//! permanent store is known to hold them.

use std::collections::{HashMap, HashSet};
use std::io::{self, SeekFrom};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime};

use object_store::{PermanentStore, PermanentStoreError};
use parking_lot::Mutex;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncSeekExt, AsyncWriteExt, ReadBuf};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::puller::RangePuller;
use super::purger::{CachePurger, UsageProbe};
use super::writer::CacheWriter;
use super::{CacheConfig, CacheError, CacheState};
use crate::model::FileId;

const FILE_MODE: u32 = 0o600;
const DIR_MODE: u32 = 0o700;
const EXPUNGE_POLL: Duration = Duration::from_millis(10);

/// What a startup scan found and did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub removed_orphans: usize,
    pub requeued: usize,
    pub cached: usize,
}

/// A reader over one ciphertext, either local or pulled from the permanent store.
#[derive(Debug)]
pub enum CacheRead {
    Local(File),
    Remote(RangePuller),
}

impl AsyncRead for CacheRead {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            CacheRead::Local(file) => Pin::new(file).poll_read(cx, buf),
            CacheRead::Remote(puller) => Pin::new(puller).poll_read(cx, buf),
        }
    }
}

struct CacheInner {
    config: Arc<CacheConfig>,
    dir: PathBuf,
    store: Arc<dyn PermanentStore>,
    purger: CachePurger,
    queue_tx: flume::Sender<FileId>,
    queue_rx: flume::Receiver<FileId>,
    permits: Arc<Semaphore>,
    inflight: Mutex<HashSet<FileId>>,
    fills: Mutex<HashMap<FileId, Arc<tokio::sync::Mutex<()>>>>,
    cancel: CancellationToken,
}

/// Handle to one cache selector. Cheap to clone.
#[derive(Clone)]
pub struct CiphertextCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for CiphertextCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CiphertextCache")
            .field("dir", &self.inner.dir)
            .field("bucket", &self.inner.store.bucket())
            .finish()
    }
}

impl CiphertextCache {
    /// Create the selector directory if needed. Does not scan it; call
    /// [`recover`](Self::recover) once at startup for that.
    pub async fn open(
        config: CacheConfig,
        store: Arc<dyn PermanentStore>,
        probe: Arc<dyn UsageProbe>,
        cancel: CancellationToken,
    ) -> Result<Self, CacheError> {
        let config = Arc::new(config);
        let dir = config.dir();
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::set_permissions(&dir, std::fs::Permissions::from_mode(DIR_MODE)).await?;

        let (queue_tx, queue_rx) = flume::unbounded();
        let permits = Arc::new(Semaphore::new(config.writeback_concurrency.max(1)));
        let purger = CachePurger::new(config.clone(), probe);

        tracing::info!(dir = %dir.display(), bucket = store.bucket(), "ciphertext cache opened");
        Ok(Self {
            inner: Arc::new(CacheInner {
                config,
                dir,
                store,
                purger,
                queue_tx,
                queue_rx,
                permits,
                inflight: Mutex::new(HashSet::new()),
                fills: Mutex::new(HashMap::new()),
                cancel,
            }),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    pub fn purger(&self) -> CachePurger {
        self.inner.purger.clone()
    }

    pub fn store(&self) -> &Arc<dyn PermanentStore> {
        &self.inner.store
    }

    pub fn path(&self, id: FileId, state: CacheState) -> PathBuf {
        self.inner.dir.join(state.file_name(&id))
    }

    /// First state found on disk, preferring `.cached`.
    pub async fn state_of(&self, id: FileId) -> Option<CacheState> {
        for state in [
            CacheState::Cached,
            CacheState::Uploaded,
            CacheState::Uploading,
            CacheState::Caching,
        ] {
            if tokio::fs::try_exists(self.path(id, state))
                .await
                .unwrap_or(false)
            {
                return Some(state);
            }
        }
        None
    }

    // ---- writes ----

    /// Open `<id>.uploading` for a new ciphertext.
    ///
    /// Fails with [`CacheError::QuotaExceeded`] when usage is at or above the
    /// high watermark and a purge pass cannot bring it down.
    pub async fn new_writer(&self, id: FileId) -> Result<CacheWriter, CacheError> {
        self.check_quota().await?;
        let path = self.path(id, CacheState::Uploading);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(FILE_MODE)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => CacheError::WriterBusy(id),
                _ => CacheError::Io(e),
            })?;
        tracing::debug!(file_id = %id, "upload started");
        Ok(CacheWriter::new(self.clone(), id, path, file))
    }

    async fn check_quota(&self) -> Result<(), CacheError> {
        let high_watermark = self.inner.config.high_watermark;
        let purger = &self.inner.purger;
        if purger.usage()? < high_watermark {
            return Ok(());
        }
        let report = purger.sweep().await?;
        let usage = purger.usage()?;
        if usage >= high_watermark {
            tracing::warn!(usage, high_watermark, ?report, "cache full, rejecting upload");
            return Err(CacheError::QuotaExceeded {
                usage,
                high_watermark,
            });
        }
        Ok(())
    }

    pub(super) async fn promote_upload(&self, id: FileId) -> Result<(), CacheError> {
        tokio::fs::rename(
            self.path(id, CacheState::Uploading),
            self.path(id, CacheState::Uploaded),
        )
        .await?;
        Ok(())
    }

    /// Queue an `.uploaded` file for writeback.
    pub fn enqueue(&self, id: FileId) {
        // the receiver lives as long as the cache, so this cannot fail
        let _ = self.inner.queue_tx.send(id);
    }

    /// Upload `<id>.uploaded` and rename it to `.cached`. One attempt; on
    /// error nothing changes and the periodic rescan retries later.
    pub async fn writeback(&self, id: FileId) -> Result<u64, CacheError> {
        let uploaded = self.path(id, CacheState::Uploaded);
        let mut file = match File::open(&uploaded).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(CacheError::NotFound(id)),
            Err(e) => return Err(e.into()),
        };
        let key = self.inner.config.key(&id);
        let size = self.inner.store.upload(&key, &mut file).await?;
        drop(file);

        tokio::fs::rename(&uploaded, self.path(id, CacheState::Cached)).await?;
        tracing::info!(file_id = %id, key = %key, size, "writeback complete");
        Ok(size)
    }

    /// Number of files waiting for writeback.
    pub async fn count_uploaded(&self) -> Result<usize, CacheError> {
        let mut count = 0;
        let mut entries = tokio::fs::read_dir(&self.inner.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some((_, CacheState::Uploaded)) =
                entry.file_name().to_str().and_then(CacheState::parse_file_name)
            {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Mark `id` busy; false if a writeback or expunge already holds it.
    fn claim(&self, id: FileId) -> bool {
        self.inner.inflight.lock().insert(id)
    }

    fn dispatch_writeback(&self, id: FileId) {
        if !self.claim(id) {
            return;
        }
        let cache = self.clone();
        tokio::spawn(async move {
            let permit = cache.inner.permits.clone().acquire_owned().await;
            match cache.writeback(id).await {
                Ok(_) => {}
                Err(CacheError::NotFound(_)) => {
                    tracing::debug!(file_id = %id, "nothing to write back");
                }
                Err(e) => {
                    tracing::warn!(file_id = %id, error = %e, "writeback failed, will retry on rescan");
                }
            }
            cache.inner.inflight.lock().remove(&id);
            drop(permit);
        });
    }

    async fn requeue_uploaded(&self) -> Result<usize, CacheError> {
        let mut requeued = 0;
        let mut entries = tokio::fs::read_dir(&self.inner.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some((id, CacheState::Uploaded)) =
                entry.file_name().to_str().and_then(CacheState::parse_file_name)
            {
                self.enqueue(id);
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    /// Drain the writeback queue until cancelled, rescanning for `.uploaded`
    /// files every `walk_sleep`.
    pub async fn run_writeback(self) {
        let rx = self.inner.queue_rx.clone();
        let cancel = self.inner.cancel.clone();
        let mut rescan = tokio::time::interval(self.inner.config.walk_sleep);
        rescan.tick().await;

        tracing::info!(
            concurrency = self.inner.config.writeback_concurrency,
            "writeback worker started"
        );
        loop {
            tokio::select! {
                job = rx.recv_async() => match job {
                    Ok(id) => self.dispatch_writeback(id),
                    Err(_) => break,
                },
                _ = rescan.tick() => {
                    if let Err(e) = self.requeue_uploaded().await {
                        tracing::error!(error = %e, "writeback rescan failed");
                    }
                }
                _ = cancel.cancelled() => {
                    tracing::info!("writeback worker shutting down");
                    break;
                }
            }
        }
    }

    // ---- reads ----

    async fn open_local(&self, id: FileId) -> Result<Option<File>, CacheError> {
        match File::open(self.path(id, CacheState::Cached)).await {
            Ok(file) => {
                self.touch(id).await?;
                return Ok(Some(file));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        match File::open(self.path(id, CacheState::Uploaded)).await {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Reader over the whole ciphertext, downloading it first on a miss.
    ///
    /// Concurrent misses on the same id share one download: later callers
    /// wait for the first fill and then read the `.cached` file.
    pub async fn open_read(&self, id: FileId, size: u64) -> Result<File, CacheError> {
        if let Some(file) = self.open_local(id).await? {
            return Ok(file);
        }
        self.fill(id, size).await?;
        self.open_local(id).await?.ok_or(CacheError::NotFound(id))
    }

    /// Reader over ciphertext `[begin, end)`, positioned at `begin`.
    ///
    /// On a miss this does not wait for the whole file: bytes come through a
    /// [`RangePuller`] bound to `cancel`. A partial range also starts a
    /// background fill so that neighbouring reads hit locally; a range that
    /// covers the whole file skips it, since the puller already downloads
    /// every byte once.
    pub async fn open_range(
        &self,
        id: FileId,
        size: u64,
        begin: u64,
        end: u64,
        cancel: &CancellationToken,
    ) -> Result<CacheRead, CacheError> {
        if let Some(mut file) = self.open_local(id).await? {
            file.seek(SeekFrom::Start(begin)).await?;
            return Ok(CacheRead::Local(file));
        }
        let end = end.min(size);
        if begin > 0 || end < size {
            self.spawn_fill(id, size);
        }
        Ok(CacheRead::Remote(self.pull_range(id, begin, end, cancel.clone())))
    }

    /// Reader over ciphertext bytes `[begin, end)` straight from the permanent store.
    pub fn pull_range(
        &self,
        id: FileId,
        begin: u64,
        end: u64,
        cancel: CancellationToken,
    ) -> RangePuller {
        RangePuller::new(
            self.inner.store.clone(),
            &self.inner.config,
            id,
            begin,
            end,
            cancel,
        )
    }

    /// Token that fires when the cache shuts down. Request-scoped work
    /// should take a [`child_token`](CancellationToken::child_token).
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    fn spawn_fill(&self, id: FileId, size: u64) {
        if self.inner.fills.lock().contains_key(&id) {
            return;
        }
        let cache = self.clone();
        tokio::spawn(async move {
            if let Err(e) = cache.fill(id, size).await {
                tracing::warn!(file_id = %id, error = %e, "background fill failed");
            }
        });
    }

    async fn fill(&self, id: FileId, size: u64) -> Result<(), CacheError> {
        let lock = self.inner.fills.lock().entry(id).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            self.fill_locked(id, size).await
        };
        self.inner.fills.lock().remove(&id);
        result
    }

    async fn fill_locked(&self, id: FileId, size: u64) -> Result<(), CacheError> {
        let cached = self.path(id, CacheState::Cached);
        if tokio::fs::try_exists(&cached).await? {
            return Ok(());
        }

        let caching = self.path(id, CacheState::Caching);
        let key = self.inner.config.key(&id);
        let store = self.inner.store.clone();
        tracing::debug!(file_id = %id, key = %key, size, "cache miss, downloading");

        let downloaded = self
            .inner
            .config
            .download_retry
            .run(
                &self.inner.cancel,
                &key,
                PermanentStoreError::is_transient,
                |_| {
                    let store = store.clone();
                    let key = key.clone();
                    let caching = caching.clone();
                    async move {
                        let mut file = OpenOptions::new()
                            .write(true)
                            .create(true)
                            .truncate(true)
                            .mode(FILE_MODE)
                            .open(&caching)
                            .await?;
                        let n = store.download(&key, &mut file).await?;
                        file.flush().await?;
                        file.sync_all().await?;
                        Ok::<u64, PermanentStoreError>(n)
                    }
                },
            )
            .await
            .map_err(|e| CacheError::from_retry(id, e));

        let actual = match downloaded {
            Ok(n) => n,
            Err(e) => {
                let _ = tokio::fs::remove_file(&caching).await;
                return Err(e);
            }
        };
        if actual != size {
            let _ = tokio::fs::remove_file(&caching).await;
            return Err(CacheError::Truncated {
                id,
                expected: size,
                actual,
            });
        }

        // a racing fill may already have renamed its copy; replacing it is harmless
        tokio::fs::rename(&caching, &cached).await?;
        tracing::debug!(file_id = %id, size, "cache filled");
        Ok(())
    }

    /// Bump the mtime of a `.cached` file so the purger sees it as recently used.
    pub async fn touch(&self, id: FileId) -> Result<(), CacheError> {
        let path = self.path(id, CacheState::Cached);
        let touched = tokio::task::spawn_blocking(move || -> io::Result<()> {
            let file = std::fs::File::options().write(true).open(&path)?;
            file.set_modified(SystemTime::now())
        })
        .await
        .map_err(io::Error::other)?;
        match touched {
            Ok(()) => Ok(()),
            // evicted between open and touch
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // ---- removal and recovery ----

    /// Delete every local copy of `id`.
    pub async fn remove(&self, id: FileId) -> Result<(), CacheError> {
        for state in CacheState::ALL {
            match tokio::fs::remove_file(self.path(id, state)).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Delete every local copy and the permanent store object.
    ///
    /// Waits out a writeback already uploading `id` and keeps new ones from
    /// starting, so the remote delete cannot be overtaken by an upload.
    pub async fn expunge(&self, id: FileId) -> Result<(), CacheError> {
        while !self.claim(id) {
            tokio::time::sleep(EXPUNGE_POLL).await;
        }
        let result = async {
            self.remove(id).await?;
            self.inner.store.delete(&self.inner.config.key(&id)).await?;
            Ok::<_, CacheError>(())
        }
        .await;
        self.inner.inflight.lock().remove(&id);
        result?;
        tracing::info!(file_id = %id, "ciphertext expunged");
        Ok(())
    }

    /// Startup scan: drop orphaned `.caching` / `.uploading` files left by a
    /// previous process and queue every `.uploaded` file for writeback.
    pub async fn recover(&self) -> Result<RecoveryReport, CacheError> {
        let mut report = RecoveryReport::default();
        let mut entries = tokio::fs::read_dir(&self.inner.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Some((id, state)) = entry.file_name().to_str().and_then(CacheState::parse_file_name)
            else {
                continue;
            };
            match state {
                CacheState::Caching | CacheState::Uploading => {
                    match tokio::fs::remove_file(entry.path()).await {
                        Ok(()) => report.removed_orphans += 1,
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                CacheState::Uploaded => {
                    self.enqueue(id);
                    report.requeued += 1;
                }
                CacheState::Cached => report.cached += 1,
            }
        }
        tracing::info!(?report, "cache recovery scan finished");
        Ok(report)
    }
}
