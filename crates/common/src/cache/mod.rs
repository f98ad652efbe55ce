mod ciphertext;
mod puller;
mod purger;
mod writer;

use std::path::PathBuf;
use std::time::Duration;

use object_store::{PermanentStoreError, RetryError, RetryPolicy};
use serde::{Deserialize, Serialize};

use crate::model::FileId;

pub use ciphertext::{CacheRead, CiphertextCache, RecoveryReport};
pub use puller::RangePuller;
pub use purger::{
    decide, CachePurger, FixedUsage, PurgeDecision, StatvfsProbe, SweepReport, UsageProbe,
    ORPHAN_AGE,
};
pub use writer::CacheWriter;

/// Default size of one RangePuller fetch (16 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("permanent store error: {0}")]
    Store(#[from] PermanentStoreError),
    #[error("{0:?} is not in the cache")]
    NotFound(FileId),
    #[error("{0:?} already has a writer")]
    WriterBusy(FileId),
    #[error("cache usage {usage:.2} is above the high watermark {high_watermark:.2}")]
    QuotaExceeded { usage: f64, high_watermark: f64 },
    #[error("downloaded {actual} bytes for {id:?}, expected {expected}")]
    Truncated {
        id: FileId,
        expected: u64,
        actual: u64,
    },
    #[error("cancelled while fetching {0:?}")]
    Cancelled(FileId),
}

impl CacheError {
    pub(crate) fn from_retry(id: FileId, err: RetryError<PermanentStoreError>) -> Self {
        match err {
            RetryError::Cancelled { .. } => CacheError::Cancelled(id),
            RetryError::Exhausted { last, .. } | RetryError::Permanent(last) => last.into(),
        }
    }
}

/// Lifecycle state of one cached ciphertext, encoded as the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheState {
    /// Being written by a local writer.
    Uploading,
    /// Complete locally, waiting for writeback.
    Uploaded,
    /// Being filled from the permanent store.
    Caching,
    /// Present both locally and in the permanent store; evictable.
    Cached,
}

impl CacheState {
    pub const ALL: [CacheState; 4] = [
        CacheState::Uploading,
        CacheState::Uploaded,
        CacheState::Caching,
        CacheState::Cached,
    ];

    pub fn extension(&self) -> &'static str {
        match self {
            CacheState::Uploading => "uploading",
            CacheState::Uploaded => "uploaded",
            CacheState::Caching => "caching",
            CacheState::Cached => "cached",
        }
    }

    fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.extension() == ext)
    }

    /// Split a cache file name into its id and state.
    pub fn parse_file_name(name: &str) -> Option<(FileId, CacheState)> {
        let (stem, ext) = name.rsplit_once('.')?;
        let state = Self::from_extension(ext)?;
        let id = stem.parse().ok()?;
        Some((id, state))
    }

    pub fn file_name(&self, id: &FileId) -> String {
        format!("{}.{}", id, self.extension())
    }
}

/// Settings for one cache selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub root: PathBuf,
    pub selector: String,
    pub low_watermark: f64,
    pub high_watermark: f64,
    #[serde(with = "seconds")]
    pub age_eligible_for_eviction: Duration,
    #[serde(with = "seconds")]
    pub walk_sleep: Duration,
    pub chunk_size: u64,
    pub writeback_concurrency: usize,
    #[serde(skip, default = "RetryPolicy::download")]
    pub download_retry: RetryPolicy,
    #[serde(skip, default = "RetryPolicy::stall")]
    pub stall_retry: RetryPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("cache"),
            selector: "S3".to_string(),
            low_watermark: 0.50,
            high_watermark: 0.75,
            age_eligible_for_eviction: Duration::from_secs(300),
            walk_sleep: Duration::from_secs(30),
            chunk_size: DEFAULT_CHUNK_SIZE,
            writeback_concurrency: 8,
            download_retry: RetryPolicy::download(),
            stall_retry: RetryPolicy::stall(),
        }
    }
}

impl CacheConfig {
    /// Directory holding this selector's files.
    pub fn dir(&self) -> PathBuf {
        self.root.join(&self.selector)
    }

    /// Permanent store key of a file id.
    pub fn key(&self, id: &FileId) -> String {
        format!("{}/{}", self.selector, id)
    }

    /// Chunk size rounded down to the cipher block, never zero.
    pub fn aligned_chunk_size(&self) -> u64 {
        crate::crypto::align_down(self.chunk_size).max(crate::crypto::BLOCK_SIZE)
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_names() {
        let id = FileId::generate();
        let name = CacheState::Uploaded.file_name(&id);
        assert_eq!(
            CacheState::parse_file_name(&name),
            Some((id, CacheState::Uploaded))
        );
        assert_eq!(CacheState::parse_file_name("junk.cached"), None);
        assert_eq!(CacheState::parse_file_name(&format!("{id}.tmp")), None);
        assert_eq!(CacheState::parse_file_name("noextension"), None);
    }

    #[test]
    fn test_keys_and_chunks() {
        let config = CacheConfig {
            selector: "sel".into(),
            chunk_size: 1000,
            ..Default::default()
        };
        let id: FileId = "000102030405060708090a0b0c0d0e0f".parse().unwrap();
        assert_eq!(config.key(&id), "sel/000102030405060708090a0b0c0d0e0f");
        assert_eq!(config.aligned_chunk_size(), 992);

        let tiny = CacheConfig {
            chunk_size: 3,
            ..Default::default()
        };
        assert_eq!(tiny.aligned_chunk_size(), 16);
    }
}
