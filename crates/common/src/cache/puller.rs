//! A reader that pulls ciphertext from the permanent store chunk by chunk.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use object_store::{ByteStream, PermanentStore, PermanentStoreError, RetryPolicy};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::CancellationToken;

use super::{CacheConfig, CacheError};
use crate::model::FileId;

enum PullState {
    Idle,
    Opening(BoxFuture<'static, Result<ByteStream, CacheError>>),
    Streaming { body: ByteStream, buf: Bytes },
    Done,
}

/// Lazily fetches `[offset, end)` of one ciphertext from the permanent store.
///
/// Each chunk is a separate ranged get of at most `chunk_size` bytes, issued
/// only once the previous one has been drained. The very first get uses the
/// stall schedule and also retries not-found, to ride out a freshly written
/// object that has not propagated yet. Later gets retry transient errors with
/// the download schedule. A body that dies mid-chunk is re-requested from the
/// current offset.
pub struct RangePuller {
    store: Arc<dyn PermanentStore>,
    id: FileId,
    key: String,
    offset: u64,
    end: u64,
    chunk_size: u64,
    download_retry: RetryPolicy,
    stall_retry: RetryPolicy,
    opened_once: bool,
    body_failures: u32,
    cancel: CancellationToken,
    state: PullState,
}

impl std::fmt::Debug for RangePuller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangePuller")
            .field("id", &self.id)
            .field("offset", &self.offset)
            .field("end", &self.end)
            .finish_non_exhaustive()
    }
}

impl RangePuller {
    pub fn new(
        store: Arc<dyn PermanentStore>,
        config: &CacheConfig,
        id: FileId,
        begin: u64,
        end: u64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            id,
            key: config.key(&id),
            offset: begin,
            end: end.max(begin),
            chunk_size: config.aligned_chunk_size(),
            download_retry: config.download_retry,
            stall_retry: config.stall_retry,
            opened_once: false,
            body_failures: 0,
            cancel,
            state: PullState::Idle,
        }
    }

    /// Next ciphertext offset this reader will yield.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn remaining(&self) -> u64 {
        self.end - self.offset
    }

    fn open_chunk(&mut self) -> BoxFuture<'static, Result<ByteStream, CacheError>> {
        let begin = self.offset;
        let end = self.end.min(begin.saturating_add(self.chunk_size));
        let first = !self.opened_once;
        self.opened_once = true;

        let policy = if first {
            self.stall_retry
        } else {
            self.download_retry
        };
        let store = self.store.clone();
        let key = self.key.clone();
        let id = self.id;
        let cancel = self.cancel.clone();

        async move {
            tracing::debug!(file_id = %id, begin, end, "pulling range");
            policy
                .run(
                    &cancel,
                    &key,
                    |e: &PermanentStoreError| e.is_transient() || (first && e.is_not_found()),
                    |_| {
                        let store = store.clone();
                        let key = key.clone();
                        async move { store.get_object(&key, begin, Some(end)).await }
                    },
                )
                .await
                .map_err(|e| CacheError::from_retry(id, e))
        }
        .boxed()
    }
}

impl AsyncRead for RangePuller {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                PullState::Done => return Poll::Ready(Ok(())),
                PullState::Idle => {
                    if this.offset >= this.end {
                        this.state = PullState::Done;
                        continue;
                    }
                    let fut = this.open_chunk();
                    this.state = PullState::Opening(fut);
                }
                PullState::Opening(fut) => match fut.poll_unpin(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Ok(body)) => {
                        this.state = PullState::Streaming {
                            body,
                            buf: Bytes::new(),
                        };
                    }
                    Poll::Ready(Err(e)) => {
                        this.state = PullState::Done;
                        return Poll::Ready(Err(io::Error::other(e)));
                    }
                },
                PullState::Streaming { body, buf } => {
                    if buf.has_remaining() {
                        let wanted = (this.end - this.offset) as usize;
                        let n = buf.len().min(out.remaining()).min(wanted);
                        out.put_slice(&buf[..n]);
                        buf.advance(n);
                        this.offset += n as u64;
                        if this.offset >= this.end {
                            this.state = PullState::Done;
                        }
                        return Poll::Ready(Ok(()));
                    }
                    match body.poll_next_unpin(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Some(Ok(bytes))) => *buf = bytes,
                        Poll::Ready(None) => this.state = PullState::Idle,
                        Poll::Ready(Some(Err(e))) => {
                            this.body_failures += 1;
                            if !e.is_transient()
                                || this.body_failures >= this.download_retry.attempts
                            {
                                this.state = PullState::Done;
                                return Poll::Ready(Err(io::Error::other(e)));
                            }
                            tracing::warn!(file_id = %this.id, offset = this.offset, error = %e, "range body failed, reopening");
                            this.state = PullState::Idle;
                        }
                    }
                }
            }
        }
    }
}
