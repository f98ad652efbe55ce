use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::ciphertext::CiphertextCache;
use super::CacheError;
use crate::model::FileId;

/// Exclusive writer for `<id>.uploading`.
///
/// [`finish`](CacheWriter::finish) renames the file to `<id>.uploaded` and
/// queues it for writeback; [`seal`](CacheWriter::seal) only renames.
/// Dropping an unfinished writer removes the partial file.
pub struct CacheWriter {
    cache: CiphertextCache,
    id: FileId,
    path: PathBuf,
    file: Option<File>,
    written: u64,
}

impl std::fmt::Debug for CacheWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheWriter")
            .field("id", &self.id)
            .field("written", &self.written)
            .finish()
    }
}

impl CacheWriter {
    pub(super) fn new(cache: CiphertextCache, id: FileId, path: PathBuf, file: File) -> Self {
        Self {
            cache,
            id,
            path,
            file: Some(file),
            written: 0,
        }
    }

    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush to disk, move to `.uploaded` and schedule writeback.
    pub async fn finish(self) -> Result<u64, CacheError> {
        let cache = self.cache.clone();
        let id = self.id;
        let written = self.seal().await?;
        cache.enqueue(id);
        Ok(written)
    }

    /// Flush to disk and move to `.uploaded` without scheduling writeback.
    ///
    /// For content that is not referenced yet: the owner calls
    /// [`CiphertextCache::enqueue`] once it is, or
    /// [`CiphertextCache::expunge`] to drop it.
    pub async fn seal(mut self) -> Result<u64, CacheError> {
        let Some(mut file) = self.file.take() else {
            return Err(CacheError::NotFound(self.id));
        };
        let result = async {
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            self.cache.promote_upload(self.id).await
        }
        .await;
        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&self.path).await;
            return Err(e);
        }
        Ok(self.written)
    }

    /// Throw the partial ciphertext away.
    pub async fn abort(mut self) {
        self.file.take();
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            tracing::warn!(file_id = %self.id, error = %e, "failed to remove aborted upload");
        }
    }

    fn file(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "writer already finished"))
    }
}

impl AsyncWrite for CacheWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let file = match this.file() {
            Ok(file) => file,
            Err(e) => return Poll::Ready(Err(e)),
        };
        match Pin::new(file).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                this.written += n as u64;
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().file() {
            Ok(file) => Pin::new(file).poll_flush(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().file() {
            Ok(file) => Pin::new(file).poll_shutdown(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl Drop for CacheWriter {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            // never finished: the partial ciphertext is useless
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(file_id = %self.id, error = %e, "failed to remove abandoned upload");
                }
            }
        }
    }
}
