//! Retry schedules for outbound, idempotent permanent store requests.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Shape of the delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// base, base, 2·base, 3·base, 5·base, ...
    Fibonacci,
    /// base, 2·base, 4·base, ...
    Exponential,
}

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },
    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: E },
    #[error("{0}")]
    Permanent(E),
}

impl<E> RetryError<E> {
    /// The last error seen, if any attempt ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Cancelled { .. } => None,
            RetryError::Exhausted { last, .. } | RetryError::Permanent(last) => Some(last),
        }
    }
}

impl RetryPolicy {
    /// Schedule for full downloads and chunk fetches: 22 attempts,
    /// Fibonacci-spaced from one second, about two minutes in total.
    pub const fn download() -> Self {
        Self {
            attempts: 22,
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            backoff: Backoff::Fibonacci,
        }
    }

    /// Schedule for the first fetch of a freshly written object that may not
    /// have propagated yet: 20 attempts, doubling from one second.
    pub const fn stall() -> Self {
        Self {
            attempts: 20,
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            backoff: Backoff::Exponential,
        }
    }

    /// Same shape with a different base delay. Tests use millisecond bases.
    pub const fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self.max_delay = Duration::from_nanos(base.as_nanos() as u64 * 8);
        self
    }

    pub const fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Delay to sleep after the failed attempt with the given zero-based index.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor: u64 = match self.backoff {
            Backoff::Fibonacci => {
                let (mut a, mut b) = (1u64, 1u64);
                for _ in 0..attempt {
                    let next = a.saturating_add(b);
                    a = b;
                    b = next;
                }
                a
            }
            Backoff::Exponential => 1u64.checked_shl(attempt.min(63)).unwrap_or(u64::MAX),
        };
        let delay = self
            .base
            .checked_mul(factor.min(u32::MAX as u64) as u32)
            .unwrap_or(self.max_delay);
        delay.min(self.max_delay)
    }

    /// Sum of every delay the schedule may sleep.
    pub fn budget(&self) -> Duration {
        (0..self.attempts.saturating_sub(1)).map(|i| self.delay(i)).sum()
    }

    /// Run `op` until it succeeds, returns an error `retryable` rejects, the
    /// attempts run out, or `cancel` fires. Cancellation is observed between
    /// attempts and during back-off sleeps.
    pub async fn run<T, E, F, Fut, R>(
        &self,
        cancel: &CancellationToken,
        what: &str,
        retryable: R,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let attempts = self.attempts.max(1);
        for attempt in 0..attempts {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled { attempts: attempt });
            }
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !retryable(&e) => return Err(RetryError::Permanent(e)),
                Err(e) if attempt + 1 == attempts => {
                    tracing::error!(what, attempts, error = %e, "retry budget exhausted");
                    return Err(RetryError::Exhausted { attempts, last: e });
                }
                Err(e) => {
                    let delay = self.delay(attempt);
                    tracing::warn!(what, attempt, ?delay, error = %e, "attempt failed, backing off");
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(RetryError::Cancelled { attempts: attempt + 1 });
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        Err(RetryError::Cancelled { attempts })
    }
}
