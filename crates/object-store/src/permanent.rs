//! The permanent store capability.

use bytes::Bytes;
use futures::stream::BoxStream;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// A body returned by a (ranged) get. Chunks arrive in order.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Uniform upload / download / range-get against an external object store.
///
/// Objects are immutable by key: a successful upload guarantees subsequent
/// downloads succeed. All methods are safe for concurrent use. Transient
/// failures are surfaced to the caller, who owns the retry policy.
#[async_trait::async_trait]
pub trait PermanentStore: Send + Sync + std::fmt::Debug {
    /// Upload everything readable from `reader` under `key`, returning the
    /// number of bytes written.
    async fn upload(&self, key: &str, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64>;

    /// Stream the whole object under `key` into `writer`.
    async fn download(&self, key: &str, writer: &mut (dyn AsyncWrite + Send + Unpin))
        -> Result<u64>;

    /// Open the half-open byte range `[begin, end)` of the object. `None`
    /// for `end` reads to the end of the object.
    async fn get_object(&self, key: &str, begin: u64, end: Option<u64>) -> Result<ByteStream>;

    /// Size of the object under `key`.
    async fn size(&self, key: &str) -> Result<u64>;

    /// Remove the object. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Name of the bucket (or backend label) objects are scoped to.
    fn bucket(&self) -> &str;
}
