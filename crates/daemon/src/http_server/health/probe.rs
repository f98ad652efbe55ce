use axum::async_trait;

use crate::object_service::ObjectService;

/// Something `/readyz` can ask whether the daemon should receive traffic.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn probe(&self) -> Result<(), NotReady>;
}

#[derive(Debug, thiserror::Error)]
pub enum NotReady {
    #[error("draining uploads for shutdown")]
    Draining,
    #[error("metadata store is unreachable")]
    MetadataStore,
    #[error("cache directory is unavailable")]
    CacheDir,
}

impl NotReady {
    pub fn component(&self) -> &'static str {
        match self {
            NotReady::Draining => "lifecycle",
            NotReady::MetadataStore => "database",
            NotReady::CacheDir => "cache",
        }
    }
}

/// Probes the live object service: admission, database, cache directory.
pub struct ServiceProbe<'a>(pub &'a ObjectService);

#[async_trait]
impl ReadinessProbe for ServiceProbe<'_> {
    async fn probe(&self) -> Result<(), NotReady> {
        let objects = self.0;
        if !objects.is_accepting() {
            return Err(NotReady::Draining);
        }
        if let Err(e) = objects.database().ping().await {
            tracing::warn!(error = %e, "metadata store ping failed");
            return Err(NotReady::MetadataStore);
        }
        match tokio::fs::metadata(objects.cache().dir()).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(NotReady::CacheDir),
            Err(e) => {
                tracing::warn!(error = %e, "cache directory unavailable");
                Err(NotReady::CacheDir)
            }
        }
    }
}
