use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::cache::StatvfsProbe;
use common::prelude::{
    CacheError, CiphertextCache, MemoryLabelAuthority, PermissionResolver, TracingPublisher,
};
use object_store::{PermanentStoreError, Storage};

use crate::database::{Database, DatabaseSetupError};
use crate::object_service::{ObjectService, SchemaMismatch, ServiceOptions};
use crate::service_config::Config;
use crate::state::ImpersonationHeaders;

/// Who may act on behalf of whom, and which headers carry the DNs.
#[derive(Debug, Clone, Default)]
pub struct Impersonation {
    pub headers: ImpersonationHeaders,
    pub whitelist: Vec<String>,
}

/// Main service state, shared by the HTTP handlers and background tasks.
#[derive(Clone, Debug)]
pub struct State {
    objects: ObjectService,
    impersonation: Arc<Impersonation>,
    cancel: CancellationToken,
    drain_timeout: Duration,
}

impl State {
    pub async fn from_config(config: &Config) -> Result<Self, StateSetupError> {
        // 1. metadata store
        let database = match &config.sqlite_path {
            Some(path) => {
                tracing::info!(path = %path.display(), "opening metadata store");
                Database::connect(path).await?
            }
            None => {
                tracing::info!("using in-memory metadata store");
                Database::in_memory().await?
            }
        };
        let stored = database.schema_version(&config.schema_version).await?;
        let read_only = (stored != config.schema_version).then(|| SchemaMismatch {
            stored,
            expected: config.schema_version.clone(),
        });

        // 2. permanent store and the cache in front of it
        let store = Storage::new(config.permanent_store.clone()).await?;
        let cancel = CancellationToken::new();
        let cache = CiphertextCache::open(
            config.cache.clone(),
            Arc::new(store),
            Arc::new(StatvfsProbe),
            cancel.clone(),
        )
        .await?;
        let report = cache.recover().await?;
        tracing::info!(?report, "cache recovered");

        // 3. label authority and permission resolution
        let labels = MemoryLabelAuthority::new();
        for user in &config.users {
            labels.register(user.clone());
        }
        tracing::debug!(users = config.users.len(), "label authority seeded");
        let resolver =
            PermissionResolver::new(Arc::new(config.master_key.clone()), Arc::new(labels));

        let objects = ObjectService::new(
            database,
            cache,
            resolver,
            Arc::new(TracingPublisher),
            ServiceOptions {
                name_path_delimiter: config.name_path_delimiter,
                read_only,
            },
        );

        Ok(Self {
            objects,
            impersonation: Arc::new(Impersonation {
                headers: config.impersonation_headers.clone(),
                whitelist: config.impersonation_whitelist.clone(),
            }),
            cancel,
            drain_timeout: config.drain_timeout,
        })
    }

    /// Assemble state from already-built parts.
    pub fn new(objects: ObjectService, impersonation: Impersonation, cancel: CancellationToken) -> Self {
        Self {
            objects,
            impersonation: Arc::new(impersonation),
            cancel,
            drain_timeout: Duration::from_secs(30),
        }
    }

    pub fn objects(&self) -> &ObjectService {
        &self.objects
    }

    pub fn cache(&self) -> &CiphertextCache {
        self.objects.cache()
    }

    pub fn impersonation(&self) -> &Impersonation {
        &self.impersonation
    }

    /// Cancelled once the lifecycle manager has drained the writeback queue.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateSetupError {
    #[error("database setup error: {0}")]
    DatabaseSetup(#[from] DatabaseSetupError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("permanent store error: {0}")]
    PermanentStore(#[from] PermanentStoreError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

#[cfg(test)]
mod tests {
    use common::cache::CacheConfig;
    use common::label::{Classification, UserProfile};
    use common::prelude::MasterKey;
    use object_store::ObjectStoreConfig;

    use super::*;
    use crate::database::SCHEMA_VERSION;

    fn config(dir: &std::path::Path) -> Config {
        Config {
            api_port: 0,
            impersonation_headers: ImpersonationHeaders::default(),
            impersonation_whitelist: vec!["CN=proxy,O=Org".to_string()],
            cache: CacheConfig {
                root: dir.join("cache"),
                ..CacheConfig::default()
            },
            permanent_store: ObjectStoreConfig::Memory,
            sqlite_path: Some(dir.join("db.sqlite")),
            schema_version: SCHEMA_VERSION.to_string(),
            master_key: MasterKey::derive(b"state-tests"),
            name_path_delimiter: None,
            users: vec![UserProfile::new("CN=alice,O=Org", Classification::Secret)],
            drain_timeout: Duration::from_secs(5),
            log_level: tracing::Level::INFO,
            log_dir: None,
        }
    }

    #[tokio::test]
    async fn test_from_config_builds_writable_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = State::from_config(&config(dir.path())).await.unwrap();
        assert!(state.objects().read_only().is_none());
        assert_eq!(state.impersonation().whitelist.len(), 1);
        assert!(state.objects().caller("CN=alice,O=Org").await.is_ok());
        assert!(dir.path().join("cache").exists());
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_read_only() {
        let dir = tempfile::tempdir().unwrap();
        State::from_config(&config(dir.path())).await.unwrap();

        let mut newer = config(dir.path());
        newer.schema_version = "29990101".to_string();
        let state = State::from_config(&newer).await.unwrap();
        let mismatch = state.objects().read_only().unwrap();
        assert_eq!(mismatch.stored, SCHEMA_VERSION);
        assert_eq!(mismatch.expected, "29990101");
    }
}
