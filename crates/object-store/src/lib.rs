//! Permanent storage for encrypted object ciphertext.
//!
//! This crate provides the [`PermanentStore`] capability used by the ciphertext
//! cache: immutable, key-addressed blobs living in an external object store
//! (S3/MinIO, local filesystem or memory for tests).
//!
//! Transient failures are surfaced to the caller unchanged. Callers own the
//! retry policy and use [`RetryPolicy`] to drive it.
//!
//! # Example
//!
//! ```rust,no_run
//! use drive_object_store::{ObjectStoreConfig, PermanentStore, Storage};
//!
//! # async fn example() -> Result<(), drive_object_store::PermanentStoreError> {
//! let store = Storage::new(ObjectStoreConfig::Memory).await?;
//! let mut data: &[u8] = b"ciphertext";
//! store.upload("selector/0011223344556677", &mut data).await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod permanent;
mod retry;
mod storage;

pub use error::{PermanentStoreError, Result};
pub use permanent::{ByteStream, PermanentStore};
pub use retry::{Backoff, RetryError, RetryPolicy};
pub use storage::{ObjectStoreConfig, Storage};
