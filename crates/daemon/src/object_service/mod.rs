//! Metadata operations over objects, their permission rows and revisions.
//!
//! Each mutation runs in one SQLite transaction and checks the caller's
//! change token against the stored one before writing. Events are published
//! only after the transaction commits. Ciphertext is written to the cache
//! before the metadata transaction opens, and discarded again if the
//! transaction fails.

mod create;
mod error;
mod export;
mod listing;
mod read;
mod share;
mod tree;
mod types;
mod update;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::AsyncRead;
use uuid::Uuid;

use common::crypto;
use common::prelude::{
    Caller, Capabilities, CiphertextCache, Event, EventPublisher, FileId, FileKey,
    LabelAuthority, MasterKey, Object, Permission, PermissionPlan, PermissionResolver, StreamIv,
};

use crate::database::{Database, DatabaseConnection, ObjectQueries, PermissionQueries, RevisionQueries};

pub use error::ObjectError;
pub use export::{ZipExport, MANIFEST_NAME};
pub use read::{ContentHandle, ContentStream};
pub use types::{
    GroupSpace, ObjectMetadata, ObjectResponse, ObjectShare, ObjectSummary, Page, Paging,
    PermissionView, RevisionSummary, UpdateProperties, ZipRequest, FILE_TYPE, FOLDER_TYPE,
};

/// Stored and expected schema versions when they differ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaMismatch {
    pub stored: String,
    pub expected: String,
}

#[derive(Debug, Clone, Default)]
pub struct ServiceOptions {
    /// Splits created names into intermediate folders.
    pub name_path_delimiter: Option<char>,
    /// Set when the metadata store was written by another schema; every
    /// mutation is refused.
    pub read_only: Option<SchemaMismatch>,
}

struct Inner {
    db: Database,
    cache: CiphertextCache,
    resolver: PermissionResolver,
    events: Arc<dyn EventPublisher>,
    options: ServiceOptions,
    accepting: AtomicBool,
}

/// Plaintext that has been encrypted into the cache but not yet recorded.
#[derive(Debug, Clone)]
pub(crate) struct StoredContent {
    pub file_id: FileId,
    pub iv: StreamIv,
    pub length: u64,
    pub sha256: String,
}

#[derive(Clone)]
pub struct ObjectService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ObjectService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectService")
            .field("cache", &self.inner.cache)
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl ObjectService {
    pub fn new(
        db: Database,
        cache: CiphertextCache,
        resolver: PermissionResolver,
        events: Arc<dyn EventPublisher>,
        options: ServiceOptions,
    ) -> Self {
        if let Some(mismatch) = &options.read_only {
            tracing::warn!(
                stored = %mismatch.stored,
                expected = %mismatch.expected,
                "schema version mismatch, serving read-only"
            );
        }
        Self {
            inner: Arc::new(Inner {
                db,
                cache,
                resolver,
                events,
                options,
                accepting: AtomicBool::new(true),
            }),
        }
    }

    pub fn database(&self) -> &Database {
        &self.inner.db
    }

    pub fn cache(&self) -> &CiphertextCache {
        &self.inner.cache
    }

    pub fn labels(&self) -> &Arc<dyn LabelAuthority> {
        self.inner.resolver.labels()
    }

    fn master(&self) -> &MasterKey {
        self.inner.resolver.master()
    }

    pub fn read_only(&self) -> Option<&SchemaMismatch> {
        self.inner.options.read_only.as_ref()
    }

    /// Refuse new mutations from now on. Reads keep working.
    pub fn stop_accepting(&self) {
        if self.inner.accepting.swap(false, Ordering::SeqCst) {
            tracing::info!("object service no longer accepting mutations");
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    /// Resolve `dn` to a caller through the label authority.
    pub async fn caller(&self, dn: &str) -> Result<Caller, ObjectError> {
        let snippet = self.labels().snippet(dn).await?;
        Ok(Caller::from_snippet(dn, snippet))
    }

    fn guard_write(&self) -> Result<(), ObjectError> {
        if !self.is_accepting() {
            return Err(ObjectError::ShuttingDown);
        }
        if let Some(mismatch) = &self.inner.options.read_only {
            return Err(ObjectError::ReadOnly {
                stored: mismatch.stored.clone(),
                expected: mismatch.expected.clone(),
            });
        }
        Ok(())
    }

    /// The object and its live permission rows. Expunged objects do not exist.
    async fn load(
        &self,
        conn: &mut DatabaseConnection,
        id: Uuid,
    ) -> Result<(Object, Vec<Permission>), ObjectError> {
        let object = ObjectQueries::get(conn, id)
            .await?
            .filter(|o| !o.flags.is_expunged)
            .ok_or(ObjectError::NotFound(id))?;
        let rows = PermissionQueries::for_object(conn, id).await?;
        Ok((object, rows))
    }

    fn ensure_live(object: &Object) -> Result<(), ObjectError> {
        if object.flags.in_trash() {
            return Err(ObjectError::Deleted(object.id));
        }
        Ok(())
    }

    fn check_token(object: &Object, supplied: &str) -> Result<(), ObjectError> {
        if !object.change_token.matches(supplied) {
            tracing::debug!(object_id = %object.id, "stale change token");
            return Err(ObjectError::Conflict(object.id));
        }
        Ok(())
    }

    /// Whether the caller holds read and is cleared for the object's ACM.
    async fn can_read(
        &self,
        caller: &Caller,
        object: &Object,
        rows: &[Permission],
    ) -> Result<bool, ObjectError> {
        let caps = caller.capabilities(self.master(), rows);
        if !caps.contains(Capabilities::READ) {
            return Ok(false);
        }
        Ok(self.labels().check_access(&caller.dn, &object.acm).await?)
    }

    /// Require `needed` through a MAC-valid row plus clearance for the ACM.
    async fn authorize(
        &self,
        caller: &Caller,
        object: &Object,
        rows: &[Permission],
        needed: Capabilities,
    ) -> Result<Capabilities, ObjectError> {
        let caps = caller.capabilities(self.master(), rows);
        if !caps.contains(needed) {
            return Err(ObjectError::PermissionDenied(format!(
                "{} lacks {needed} on {}",
                caller.dn, object.id
            )));
        }
        if !self.labels().check_access(&caller.dn, &object.acm).await? {
            return Err(ObjectError::PermissionDenied(format!(
                "{} is not cleared for {}",
                caller.dn, object.id
            )));
        }
        Ok(caps)
    }

    fn file_key(&self, caller: &Caller, rows: &[Permission]) -> Result<FileKey, ObjectError> {
        Ok(caller.file_key(self.master(), rows, Capabilities::NONE)?)
    }

    /// Write the object, its permission changes and a revision snapshot.
    async fn save(
        &self,
        conn: &mut DatabaseConnection,
        object: &Object,
        plan: Option<&PermissionPlan>,
    ) -> Result<(), ObjectError> {
        ObjectQueries::update(conn, object).await.map_err(|e| match e {
            sqlx::Error::RowNotFound => ObjectError::NotFound(object.id),
            other => other.into(),
        })?;
        if let Some(plan) = plan {
            PermissionQueries::apply(conn, plan).await?;
        }
        RevisionQueries::insert(conn, &object.revision()).await?;
        Ok(())
    }

    fn publish(&self, action: &str, caller: &Caller, object: &Object) -> Event {
        Event::new(
            action,
            caller.dn.clone(),
            object.id,
            object.change_token.clone(),
            object.acm.clone(),
        )
    }

    fn emit(&self, event: Event) {
        self.inner.events.publish(event);
    }

    fn response(&self, caller: &Caller, object: Object, rows: &[Permission]) -> ObjectResponse {
        let master = self.master();
        ObjectResponse {
            caller_permission: caller.capabilities(master, rows),
            permissions: rows
                .iter()
                .filter(|row| row.is_valid(master))
                .map(PermissionView::from)
                .collect(),
            breadcrumbs: Vec::new(),
            object,
        }
    }

    /// Encrypt `reader` into a sealed `.uploaded` file. Writeback waits for
    /// [`schedule_writeback`](Self::schedule_writeback) so that content whose
    /// metadata never commits is not uploaded.
    async fn store_content(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        key: &FileKey,
    ) -> Result<StoredContent, ObjectError> {
        let file_id = FileId::generate();
        let iv = StreamIv::generate();
        let mut writer = self.inner.cache.new_writer(file_id).await?;
        let summary = match crypto::encrypt(reader, &mut writer, key, &iv).await {
            Ok(summary) => summary,
            Err(e) => {
                writer.abort().await;
                return Err(e.into());
            }
        };
        writer.seal().await?;
        tracing::debug!(file_id = %file_id, length = summary.length, "content encrypted");
        Ok(StoredContent {
            file_id,
            iv,
            length: summary.length,
            sha256: summary.sha256,
        })
    }

    /// Queue committed ciphertext for upload to the permanent store.
    fn schedule_writeback(&self, content: &StoredContent) {
        self.inner.cache.enqueue(content.file_id);
    }

    /// Drop ciphertext whose metadata never committed.
    async fn discard(&self, content: &StoredContent) {
        if let Err(e) = self.inner.cache.expunge(content.file_id).await {
            tracing::warn!(file_id = %content.file_id, error = %e, "failed to discard orphaned ciphertext");
        }
    }
}

#[cfg(test)]
pub(crate) mod testkit {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::json;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    use common::cache::{CacheConfig, FixedUsage};
    use common::label::{Classification, UserProfile};
    use common::prelude::{
        Acm, Caller, CiphertextCache, MasterKey, MemoryLabelAuthority, MemoryPublisher,
        PermissionResolver, ResourceString,
    };
    use object_store::{ByteStream, PermanentStore, Storage};
    use tokio::io::{AsyncRead, AsyncWrite};

    use super::{ObjectService, ServiceOptions};
    use crate::database::Database;

    pub const ALICE: &str = "CN=alice,O=Org";
    pub const BOB: &str = "CN=bob,O=Org";
    pub const CAROL: &str = "CN=carol,O=Org";

    /// In-memory permanent store that remembers which keys it holds.
    /// Ranged reads can be made to fail transiently.
    #[derive(Debug)]
    pub struct LedgerStore {
        inner: Storage,
        keys: std::sync::Mutex<std::collections::BTreeSet<String>>,
        stalled: AtomicBool,
        gets: AtomicUsize,
    }

    impl LedgerStore {
        pub fn keys(&self) -> Vec<String> {
            self.keys.lock().unwrap().iter().cloned().collect()
        }

        pub fn stall_reads(&self, stalled: bool) {
            self.stalled.store(stalled, Ordering::SeqCst);
        }

        pub fn gets(&self) -> usize {
            self.gets.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl PermanentStore for LedgerStore {
        async fn upload(
            &self,
            key: &str,
            reader: &mut (dyn AsyncRead + Send + Unpin),
        ) -> object_store::Result<u64> {
            let n = self.inner.upload(key, reader).await?;
            self.keys.lock().unwrap().insert(key.to_string());
            Ok(n)
        }

        async fn download(
            &self,
            key: &str,
            writer: &mut (dyn AsyncWrite + Send + Unpin),
        ) -> object_store::Result<u64> {
            self.inner.download(key, writer).await
        }

        async fn get_object(
            &self,
            key: &str,
            begin: u64,
            end: Option<u64>,
        ) -> object_store::Result<ByteStream> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            if self.stalled.load(Ordering::SeqCst) {
                return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "stalled").into());
            }
            self.inner.get_object(key, begin, end).await
        }

        async fn size(&self, key: &str) -> object_store::Result<u64> {
            self.inner.size(key).await
        }

        async fn delete(&self, key: &str) -> object_store::Result<()> {
            self.inner.delete(key).await?;
            self.keys.lock().unwrap().remove(key);
            Ok(())
        }

        fn bucket(&self) -> &str {
            self.inner.bucket()
        }
    }

    pub struct Harness {
        pub service: ObjectService,
        pub store: Arc<LedgerStore>,
        pub events: Arc<MemoryPublisher>,
        pub usage: Arc<FixedUsage>,
        pub _dir: TempDir,
    }

    impl Harness {
        pub async fn caller(&self, dn: &str) -> Caller {
            self.service.caller(dn).await.unwrap()
        }
    }

    pub fn unclassified() -> Acm {
        json!({"classif": "U", "dissem_countries": ["USA"]})
            .try_into()
            .unwrap()
    }

    pub async fn harness() -> Harness {
        harness_with(ServiceOptions {
            name_path_delimiter: Some('\u{1e}'),
            read_only: None,
        })
        .await
    }

    pub async fn harness_with(options: ServiceOptions) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            root: dir.path().to_path_buf(),
            ..CacheConfig::default()
        };
        let usage = Arc::new(FixedUsage::new(0.1));
        let store = Arc::new(LedgerStore {
            inner: Storage::memory(),
            keys: Default::default(),
            stalled: AtomicBool::new(false),
            gets: AtomicUsize::new(0),
        });
        let cache = CiphertextCache::open(
            config,
            store.clone(),
            usage.clone(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let labels = MemoryLabelAuthority::new();
        labels.register(
            UserProfile::new(ALICE, Classification::Secret)
                .with_group(ResourceString::group("DCTC", "DCTC", "ODrive_G1")),
        );
        labels.register(UserProfile::new(BOB, Classification::Secret));
        labels.register(UserProfile::new(CAROL, Classification::Unclassified));

        let resolver = PermissionResolver::new(
            Arc::new(MasterKey::derive(b"object-service-tests")),
            Arc::new(labels),
        );
        let events = Arc::new(MemoryPublisher::new());
        let db = Database::in_memory().await.unwrap();
        let service = ObjectService::new(db, cache, resolver, events.clone(), options);
        Harness {
            service,
            store,
            events,
            usage,
            _dir: dir,
        }
    }
}
