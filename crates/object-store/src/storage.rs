//! Object storage backend abstraction (S3/MinIO/local filesystem/memory).

use std::path::PathBuf;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{GetOptions, GetRange, ObjectStore, WriteMultipart};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{PermanentStoreError, Result};
use crate::permanent::{ByteStream, PermanentStore};

/// Size of each part handed to a multipart upload.
const UPLOAD_PART_SIZE: usize = 8 * 1024 * 1024;
/// Parts allowed in flight during a multipart upload.
const UPLOAD_CONCURRENCY: usize = 4;

/// Configuration for the permanent storage backend.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectStoreConfig {
    /// In-memory storage (for testing)
    #[default]
    Memory,

    /// Local filesystem storage
    Local {
        /// Path to the storage directory
        path: PathBuf,
    },

    /// S3-compatible storage (AWS S3, MinIO, etc.)
    S3 {
        /// S3 endpoint URL (e.g., "http://localhost:9000" for MinIO)
        endpoint: String,
        /// Access key ID
        access_key: String,
        /// Secret access key
        secret_key: String,
        /// Bucket name
        bucket: String,
        /// Optional region (defaults to "us-east-1")
        region: Option<String>,
    },
}

/// Wrapper around different object storage backends.
#[derive(Debug, Clone)]
pub struct Storage {
    inner: Arc<dyn ObjectStore>,
    bucket: String,
}

impl Storage {
    /// Create a new storage backend from configuration.
    pub async fn new(config: ObjectStoreConfig) -> Result<Self> {
        let (inner, bucket): (Arc<dyn ObjectStore>, String) = match &config {
            ObjectStoreConfig::Memory => (Arc::new(InMemory::new()), "memory".to_string()),

            ObjectStoreConfig::Local { path } => {
                // Ensure directory exists
                tokio::fs::create_dir_all(path).await?;
                let store = LocalFileSystem::new_with_prefix(path)
                    .map_err(|e| PermanentStoreError::InvalidConfig(e.to_string()))?;
                (Arc::new(store), path.display().to_string())
            }

            ObjectStoreConfig::S3 {
                endpoint,
                access_key,
                secret_key,
                bucket,
                region,
            } => {
                let builder = AmazonS3Builder::new()
                    .with_endpoint(endpoint)
                    .with_access_key_id(access_key)
                    .with_secret_access_key(secret_key)
                    .with_bucket_name(bucket)
                    .with_region(region.as_deref().unwrap_or("us-east-1"))
                    .with_allow_http(endpoint.starts_with("http://"));

                let store: Arc<dyn ObjectStore> = Arc::new(
                    builder
                        .build()
                        .map_err(|e| PermanentStoreError::InvalidConfig(e.to_string()))?,
                );

                // Fail fast if the bucket doesn't exist
                {
                    let prefix = ObjectPath::from("");
                    let mut stream = store.list(Some(&prefix));
                    match stream.try_next().await {
                        Ok(_) => {}
                        Err(object_store::Error::NotFound { .. }) => {
                            return Err(PermanentStoreError::BucketNotFound(bucket.clone()));
                        }
                        Err(e) => {
                            let msg = e.to_string();
                            if msg.contains("NoSuchBucket")
                                || msg.contains("bucket") && msg.contains("not")
                            {
                                return Err(PermanentStoreError::BucketNotFound(bucket.clone()));
                            }
                            return Err(e.into());
                        }
                    }
                }

                (store, bucket.clone())
            }
        };

        tracing::info!(bucket = %bucket, "permanent store ready");
        Ok(Self { inner, bucket })
    }

    /// Create an in-memory storage backend.
    pub fn memory() -> Self {
        Self {
            inner: Arc::new(InMemory::new()),
            bucket: "memory".to_string(),
        }
    }

    fn path(key: &str) -> ObjectPath {
        ObjectPath::from(key)
    }

    fn map_not_found(key: &str, e: object_store::Error) -> PermanentStoreError {
        match e {
            object_store::Error::NotFound { .. } => PermanentStoreError::NotFound(key.to_string()),
            e => e.into(),
        }
    }
}

#[async_trait::async_trait]
impl PermanentStore for Storage {
    async fn upload(&self, key: &str, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64> {
        let path = Self::path(key);
        let upload = self.inner.put_multipart(&path).await?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, UPLOAD_PART_SIZE);

        let mut buf = vec![0u8; 64 * 1024];
        let mut total = 0u64;
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    writer.abort().await.ok();
                    return Err(e.into());
                }
            };
            if n == 0 {
                break;
            }
            writer.wait_for_capacity(UPLOAD_CONCURRENCY).await?;
            writer.write(&buf[..n]);
            total += n as u64;
        }
        writer.finish().await?;

        tracing::debug!(key = %key, size = total, "uploaded object");
        Ok(total)
    }

    async fn download(
        &self,
        key: &str,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64> {
        let path = Self::path(key);
        let result = self
            .inner
            .get(&path)
            .await
            .map_err(|e| Self::map_not_found(key, e))?;

        let mut stream = result.into_stream();
        let mut total = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            total += chunk.len() as u64;
        }
        writer.flush().await?;

        tracing::debug!(key = %key, size = total, "downloaded object");
        Ok(total)
    }

    async fn get_object(&self, key: &str, begin: u64, end: Option<u64>) -> Result<ByteStream> {
        let range = match end {
            Some(end) if end < begin => {
                return Err(PermanentStoreError::InvalidRange {
                    key: key.to_string(),
                    begin,
                    end,
                })
            }
            Some(end) => GetRange::Bounded(begin as usize..end as usize),
            None => GetRange::Offset(begin as usize),
        };
        let options = GetOptions {
            range: Some(range),
            ..Default::default()
        };

        let path = Self::path(key);
        let result = self
            .inner
            .get_opts(&path, options)
            .await
            .map_err(|e| Self::map_not_found(key, e))?;

        Ok(result.into_stream().map_err(PermanentStoreError::from).boxed())
    }

    async fn size(&self, key: &str) -> Result<u64> {
        let meta = self
            .inner
            .head(&Self::path(key))
            .await
            .map_err(|e| Self::map_not_found(key, e))?;
        Ok(meta.size as u64)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        // Ignore NotFound errors - the object may already be deleted
        match self.inner.delete(&Self::path(key)).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(stream: ByteStream) -> Vec<u8> {
        let chunks: Vec<_> = stream.try_collect().await.unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn test_memory_upload_download() {
        let storage = Storage::memory();
        let mut data: &[u8] = b"hello permanent store";

        let written = storage.upload("sel/abc123", &mut data).await.unwrap();
        assert_eq!(written, 21);
        assert_eq!(storage.size("sel/abc123").await.unwrap(), 21);

        let mut out = Vec::new();
        let read = storage.download("sel/abc123", &mut out).await.unwrap();
        assert_eq!(read, 21);
        assert_eq!(out, b"hello permanent store");
    }

    #[tokio::test]
    async fn test_get_object_ranges() {
        let storage = Storage::memory();
        let mut data: &[u8] = b"0123456789abcdef";
        storage.upload("sel/ranged", &mut data).await.unwrap();

        let bounded = storage.get_object("sel/ranged", 4, Some(10)).await.unwrap();
        assert_eq!(collect(bounded).await, b"456789");

        let open = storage.get_object("sel/ranged", 12, None).await.unwrap();
        assert_eq!(collect(open).await, b"cdef");

        let err = storage.get_object("sel/ranged", 8, Some(2)).await;
        assert!(matches!(err, Err(PermanentStoreError::InvalidRange { .. })));
    }

    #[tokio::test]
    async fn test_missing_object() {
        let storage = Storage::memory();

        let mut out = Vec::new();
        let err = storage.download("sel/missing", &mut out).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!err.is_transient());

        // Deleting a missing key is fine
        storage.delete("sel/missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_local_storage() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = ObjectStoreConfig::Local {
            path: temp_dir.path().to_path_buf(),
        };
        let storage = Storage::new(config).await.unwrap();

        let mut data: &[u8] = b"test data";
        storage.upload("cache/def456", &mut data).await.unwrap();

        // Verify file exists on disk
        assert!(temp_dir.path().join("cache").join("def456").exists());

        storage.delete("cache/def456").await.unwrap();
        assert!(storage.size("cache/def456").await.unwrap_err().is_not_found());
    }
}
