use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use common::crypto::{self, align_down, align_up};
use common::prelude::{
    Breadcrumb, Caller, Capabilities, ChangeToken, FileId, FileKey, Object, StreamIv,
};

use super::types::{ObjectResponse, RevisionSummary};
use super::{ObjectError, ObjectService};
use crate::database::{ObjectQueries, PermissionQueries, RevisionQueries};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Everything needed to decrypt one stream, resolved after the permission
/// check. Holds the unwrapped file key, so it never leaves the process.
#[derive(Clone)]
pub struct ContentHandle {
    pub object_id: Uuid,
    pub name: String,
    pub content_type: Option<String>,
    pub change_token: ChangeToken,
    pub change_count: i64,
    pub length: u64,
    file_id: Option<FileId>,
    iv: Option<StreamIv>,
    key: FileKey,
}

impl std::fmt::Debug for ContentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentHandle")
            .field("object_id", &self.object_id)
            .field("change_count", &self.change_count)
            .field("file_id", &self.file_id)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

impl ContentHandle {
    pub(super) fn current(object: Object, key: FileKey) -> Self {
        Self {
            object_id: object.id,
            name: object.name,
            content_type: object.content_type,
            change_token: object.change_token,
            change_count: object.change_count,
            length: object.content_length,
            file_id: object.content_connector,
            iv: object.encrypt_iv,
            key,
        }
    }
}

impl ObjectService {
    /// Object metadata, the caller's capabilities, visible rows, and the
    /// ancestor path with unreadable names redacted.
    pub async fn get_properties(
        &self,
        caller: &Caller,
        id: Uuid,
    ) -> Result<ObjectResponse, ObjectError> {
        let mut conn = self.inner.db.acquire().await?;
        let (object, rows) = self.load(&mut conn, id).await?;
        self.authorize(caller, &object, &rows, Capabilities::READ)
            .await?;

        let ancestors = ObjectQueries::ancestors(&mut conn, &object).await?;
        let mut breadcrumbs = Vec::with_capacity(ancestors.len());
        for ancestor in ancestors {
            let ancestor_rows = PermissionQueries::for_object(&mut conn, ancestor.id).await?;
            let readable = self.can_read(caller, &ancestor, &ancestor_rows).await?;
            let crumb = Breadcrumb {
                id: ancestor.id,
                parent_id: ancestor.parent_id,
                name: ancestor.name,
            };
            breadcrumbs.push(if readable { crumb } else { crumb.redacted() });
        }
        drop(conn);

        let mut response = self.response(caller, object, &rows);
        response.breadcrumbs = breadcrumbs;
        Ok(response)
    }

    /// Resolve the current stream of `id` for reading.
    pub async fn open_content(
        &self,
        caller: &Caller,
        id: Uuid,
    ) -> Result<ContentHandle, ObjectError> {
        let mut conn = self.inner.db.acquire().await?;
        let (object, rows) = self.load(&mut conn, id).await?;
        Self::ensure_live(&object)?;
        self.authorize(caller, &object, &rows, Capabilities::READ)
            .await?;
        let key = caller.file_key(self.master(), &rows, Capabilities::READ)?;
        Ok(ContentHandle::current(object, key))
    }

    /// Resolve an older revision's stream. Permission is checked against the
    /// object as it is now.
    pub async fn open_revision_content(
        &self,
        caller: &Caller,
        id: Uuid,
        change_count: i64,
    ) -> Result<ContentHandle, ObjectError> {
        let mut conn = self.inner.db.acquire().await?;
        let (object, rows) = self.load(&mut conn, id).await?;
        Self::ensure_live(&object)?;
        self.authorize(caller, &object, &rows, Capabilities::READ)
            .await?;
        let key = caller.file_key(self.master(), &rows, Capabilities::READ)?;
        let revision = RevisionQueries::get(&mut conn, id, change_count)
            .await?
            .ok_or(ObjectError::RevisionNotFound { id, change_count })?;

        Ok(ContentHandle {
            object_id: id,
            name: revision.name,
            content_type: revision.content_type,
            change_token: revision.change_token,
            change_count: revision.change_count,
            length: revision.content_length,
            file_id: revision.content_connector,
            iv: revision.encrypt_iv,
            key,
        })
    }

    pub async fn list_revisions(
        &self,
        caller: &Caller,
        id: Uuid,
    ) -> Result<Vec<RevisionSummary>, ObjectError> {
        let mut conn = self.inner.db.acquire().await?;
        let (object, rows) = self.load(&mut conn, id).await?;
        self.authorize(caller, &object, &rows, Capabilities::READ)
            .await?;
        let revisions = RevisionQueries::list(&mut conn, id).await?;
        Ok(revisions.iter().map(RevisionSummary::from).collect())
    }

    /// Decrypt plaintext `[start, stop)` of `handle` into `writer`.
    pub async fn read_range<W>(
        &self,
        handle: &ContentHandle,
        start: u64,
        stop: u64,
        writer: &mut W,
    ) -> Result<u64, ObjectError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let cancel = self.inner.cache.cancel_token().child_token();
        self.decrypt_into(handle, start, stop, writer, &cancel).await
    }

    async fn decrypt_into<W>(
        &self,
        handle: &ContentHandle,
        start: u64,
        stop: u64,
        writer: &mut W,
        cancel: &CancellationToken,
    ) -> Result<u64, ObjectError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if start > stop || stop > handle.length {
            return Err(ObjectError::BadRequest(format!(
                "range {start}-{stop} outside 0-{}",
                handle.length
            )));
        }
        let (Some(file_id), Some(iv)) = (handle.file_id, handle.iv) else {
            return Ok(0);
        };
        if start == stop {
            return Ok(0);
        }

        let mut reader = self
            .inner
            .cache
            .open_range(file_id, handle.length, align_down(start), align_up(stop), cancel)
            .await?;
        let emitted =
            crypto::decrypt_range(&mut reader, writer, &handle.key, &iv, start, stop).await?;
        Ok(emitted)
    }

    /// Like [`read_range`](Self::read_range), decrypting on a background task
    /// into the returned stream. A failure mid-stream closes it early;
    /// dropping it stops the task.
    pub fn stream_range(&self, handle: ContentHandle, start: u64, stop: u64) -> ContentStream {
        let (reader, mut writer) = tokio::io::duplex(PIPE_CAPACITY);
        let cancel = self.inner.cache.cancel_token().child_token();
        let service = self.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                result = service.decrypt_into(&handle, start, stop, &mut writer, &task_cancel) => result,
                _ = task_cancel.cancelled() => {
                    tracing::debug!(object_id = %handle.object_id, start, stop, "content stream dropped");
                    return;
                }
            };
            if let Err(e) = result {
                tracing::warn!(
                    object_id = %handle.object_id,
                    start,
                    stop,
                    error = %e,
                    "content stream aborted"
                );
            }
        });
        ContentStream {
            pipe: reader,
            _cancel: cancel.drop_guard(),
        }
    }
}

/// Plaintext produced by [`ObjectService::stream_range`]. Dropping it
/// cancels the decrypting task along with any permanent store retries it
/// is waiting on.
#[derive(Debug)]
pub struct ContentStream {
    pipe: DuplexStream,
    _cancel: DropGuard,
}

impl AsyncRead for ContentStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.pipe).poll_read(cx, buf)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::io::AsyncReadExt;

    use common::prelude::{Capabilities, ResourceString};

    use super::*;
    use crate::object_service::testkit::{harness, unclassified, ALICE, BOB};
    use crate::object_service::{ObjectMetadata, ObjectShare};

    const ALPHABET: &[u8; 64] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ1234567890!@";

    #[tokio::test]
    async fn test_ranges_decrypt_exactly() {
        let h = harness().await;
        let alice = h.caller(ALICE).await;
        let mut body: &[u8] = ALPHABET;
        let created = h
            .service
            .create_object(&alice, ObjectMetadata::new("abc", unclassified()), Some(&mut body))
            .await
            .unwrap();

        let handle = h.service.open_content(&alice, created.object.id).await.unwrap();
        for (start, stop) in [(5, 35), (0, 64), (16, 32), (63, 64), (10, 10)] {
            let mut out = Vec::new();
            h.service.read_range(&handle, start, stop, &mut out).await.unwrap();
            assert_eq!(out, &ALPHABET[start as usize..stop as usize]);
        }

        let mut piped = Vec::new();
        h.service
            .stream_range(handle.clone(), 5, 35)
            .read_to_end(&mut piped)
            .await
            .unwrap();
        assert_eq!(piped, b"fghijklmnopqrstuvwxyzABCDEFGHI");

        assert!(matches!(
            h.service.read_range(&handle, 0, 65, &mut Vec::new()).await,
            Err(ObjectError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_dropped_stream_stops_remote_retries() {
        let h = harness().await;
        let alice = h.caller(ALICE).await;
        let mut body: &[u8] = ALPHABET;
        let created = h
            .service
            .create_object(&alice, ObjectMetadata::new("cold", unclassified()), Some(&mut body))
            .await
            .unwrap();
        let handle = h.service.open_content(&alice, created.object.id).await.unwrap();
        let file_id = handle.file_id.unwrap();
        h.service.cache().writeback(file_id).await.unwrap();
        h.service.cache().remove(file_id).await.unwrap();

        h.store.stall_reads(true);
        let idle = Arc::strong_count(&h.store);
        let stream = h.service.stream_range(handle, 0, 64);
        for _ in 0..100 {
            if h.store.gets() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(h.store.gets() > 0);
        // the stalled puller holds the store while it waits to retry
        assert!(Arc::strong_count(&h.store) > idle);

        drop(stream);
        for _ in 0..100 {
            if Arc::strong_count(&h.store) == idle {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(Arc::strong_count(&h.store), idle);
        assert!(!h.service.cache().cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_breadcrumbs_redact_unreadable_ancestors() {
        let h = harness().await;
        let alice = h.caller(ALICE).await;
        let bob = h.caller(BOB).await;

        let top = h
            .service
            .create_object(&alice, ObjectMetadata::new("private", unclassified()), None)
            .await
            .unwrap();
        // restrict the top folder to alice alone
        h.service
            .add_share(
                &alice,
                top.object.id,
                ObjectShare {
                    grantee: alice.resource(),
                    capabilities: Capabilities::READ,
                },
            )
            .await
            .unwrap();
        let inner = h
            .service
            .create_object(
                &alice,
                ObjectMetadata::new("inner", unclassified()).with_parent(top.object.id),
                None,
            )
            .await
            .unwrap();
        let leaf = h
            .service
            .create_object(
                &alice,
                ObjectMetadata::new("leaf", unclassified()).with_parent(inner.object.id),
                None,
            )
            .await
            .unwrap();

        let props = h.service.get_properties(&bob, leaf.object.id).await.unwrap();
        assert_eq!(props.breadcrumbs.len(), 2);
        assert_eq!(props.breadcrumbs[0].id, top.object.id);
        assert_eq!(props.breadcrumbs[0].parent_id, None);
        assert_eq!(props.breadcrumbs[0].name, common::acl::REDACTED_NAME);
        assert_eq!(props.breadcrumbs[1].parent_id, Some(top.object.id));
        assert_eq!(props.breadcrumbs[1].name, "inner");
        assert_eq!(props.object.owned_by, ResourceString::user(ALICE));
    }

    #[tokio::test]
    async fn test_missing_revision() {
        let h = harness().await;
        let alice = h.caller(ALICE).await;
        let created = h
            .service
            .create_object(&alice, ObjectMetadata::new("doc", unclassified()), None)
            .await
            .unwrap();
        let err = h
            .service
            .open_revision_content(&alice, created.object.id, 7)
            .await
            .unwrap_err();
        assert!(matches!(err, ObjectError::RevisionNotFound { change_count: 7, .. }));
    }
}
