use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use common::prelude::CiphertextCache;

use crate::object_service::ObjectService;

const DRAIN_POLL: Duration = Duration::from_millis(250);

/// How the writeback drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every `.uploaded` file reached the permanent store.
    Drained,
    /// The timeout hit with this many files still pending. The next
    /// process's recovery scan picks them up.
    TimedOut { pending: usize },
}

/// Orderly shutdown of the storage side of the daemon.
#[derive(Debug, Clone)]
pub struct LifecycleManager {
    objects: ObjectService,
    cancel: CancellationToken,
    drain_timeout: Duration,
    poll: Duration,
}

impl LifecycleManager {
    pub fn new(objects: ObjectService, cancel: CancellationToken, drain_timeout: Duration) -> Self {
        Self {
            objects,
            cancel,
            drain_timeout,
            poll: DRAIN_POLL,
        }
    }

    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    fn cache(&self) -> &CiphertextCache {
        self.objects.cache()
    }

    /// Refuse new registrations, wait for pending writebacks, then stop the
    /// writeback worker and the purger.
    pub async fn shutdown(&self) -> DrainOutcome {
        self.objects.stop_accepting();
        let outcome = self.drain().await;
        match outcome {
            DrainOutcome::Drained => tracing::info!("writeback queue drained"),
            DrainOutcome::TimedOut { pending } => tracing::warn!(
                pending,
                timeout_secs = self.drain_timeout.as_secs(),
                "drain timed out, leaving uploads for the next start"
            ),
        }
        self.cancel.cancel();
        outcome
    }

    async fn drain(&self) -> DrainOutcome {
        let deadline = Instant::now() + self.drain_timeout;
        loop {
            let pending = match self.cache().count_uploaded().await {
                Ok(pending) => pending,
                Err(e) => {
                    tracing::error!(error = %e, "failed to count pending uploads");
                    return DrainOutcome::TimedOut { pending: 0 };
                }
            };
            if pending == 0 {
                return DrainOutcome::Drained;
            }
            if Instant::now() >= deadline {
                return DrainOutcome::TimedOut { pending };
            }
            tracing::debug!(pending, "waiting for writeback");
            tokio::time::sleep(self.poll).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_service::testkit::{harness, unclassified, ALICE};
    use crate::object_service::{ObjectError, ObjectMetadata};

    #[tokio::test]
    async fn test_shutdown_drains_pending_uploads() {
        let h = harness().await;
        let alice = h.caller(ALICE).await;
        let mut body: &[u8] = b"pending ciphertext";
        h.service
            .create_object(&alice, ObjectMetadata::new("doc", unclassified()), Some(&mut body))
            .await
            .unwrap();
        assert_eq!(h.service.cache().count_uploaded().await.unwrap(), 1);

        let cancel = CancellationToken::new();
        let worker = tokio::spawn(h.service.cache().clone().run_writeback());
        let manager = LifecycleManager::new(h.service.clone(), cancel.clone(), Duration::from_secs(10))
            .with_poll_interval(Duration::from_millis(10));

        assert_eq!(manager.shutdown().await, DrainOutcome::Drained);
        assert!(cancel.is_cancelled());
        assert!(!h.service.is_accepting());
        worker.abort();

        let err = h
            .service
            .create_object(&alice, ObjectMetadata::new("late", unclassified()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ObjectError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_shutdown_times_out_without_writeback() {
        let h = harness().await;
        let alice = h.caller(ALICE).await;
        let mut body: &[u8] = b"stuck";
        h.service
            .create_object(&alice, ObjectMetadata::new("doc", unclassified()), Some(&mut body))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let manager = LifecycleManager::new(h.service.clone(), cancel.clone(), Duration::from_millis(50))
            .with_poll_interval(Duration::from_millis(10));
        assert_eq!(manager.shutdown().await, DrainOutcome::TimedOut { pending: 1 });
        assert!(cancel.is_cancelled());
    }
}
