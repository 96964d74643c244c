//! Retries for event sends
//!
//! A failed send is attempted again after an exponentially growing delay
//! until it succeeds, fails with a non-retryable error, runs out of retries
//! or the process is asked to stop. The backoff sleep is cut short by the
//! shutdown signal.

use crate::consumer::shutdown::ShutdownSignal;
use crate::error::{BridgeError, BridgeResult};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Retries after the first failed attempt
pub const DEFAULT_SEND_RETRIES: u32 = 3;

/// Delay before the first retry
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Upper bound for a single delay
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Random extra delay, as a fraction of the computed one
const JITTER_FACTOR: f64 = 0.1;

/// How often and how patiently a send is retried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry, doubled for each further one
    pub initial_backoff: Duration,
    /// Cap on a single delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_RETRIES, DEFAULT_INITIAL_BACKOFF)
    }
}

impl RetryPolicy {
    /// Policy with the given retry budget and first delay, capped at 30 s
    pub fn new(max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff: MAX_BACKOFF.max(initial_backoff),
        }
    }

    /// Delay before retry number `retry` (starting at 1), without jitter
    pub fn base_backoff(&self, retry: u32) -> Duration {
        let factor = 1u32
            .checked_shl(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Delay before retry number `retry`, with up to 10% jitter
    pub fn backoff(&self, retry: u32) -> Duration {
        let base = self.base_backoff(retry);
        base + base.mul_f64(JITTER_FACTOR * rand::random::<f64>())
    }
}

/// Why the executor stopped retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUp {
    /// The error cannot be fixed by trying again
    NotRetryable,
    /// Every retry failed
    Exhausted,
    /// Shutdown was requested
    Cancelled,
}

/// Outcome of a retried operation
#[derive(Debug)]
pub enum RetryResult<T> {
    /// The operation succeeded
    Success {
        /// Value returned by the successful attempt
        value: T,
        /// Retries it took
        retries: u32,
    },
    /// The executor gave up
    Failed {
        /// Error of the last attempt
        error: BridgeError,
        /// Retries made before giving up
        retries: u32,
        /// Why no further retry was made
        reason: GiveUp,
    },
}

/// Runs an operation under a [`RetryPolicy`], honoring the shutdown signal
pub struct RetryExecutor {
    policy: RetryPolicy,
    shutdown: Arc<ShutdownSignal>,
}

impl RetryExecutor {
    /// Executor that stops retrying once `shutdown` is set
    pub fn new(policy: RetryPolicy, shutdown: Arc<ShutdownSignal>) -> Self {
        Self { policy, shutdown }
    }

    /// Run `operation` until it succeeds or the executor gives up
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> RetryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BridgeResult<T>>,
    {
        let mut retries = 0;

        loop {
            let error = match operation().await {
                Ok(value) => return RetryResult::Success { value, retries },
                Err(error) => error,
            };

            let give_up = if !error.is_retryable() {
                Some(GiveUp::NotRetryable)
            } else if self.shutdown.is_cancelled() {
                Some(GiveUp::Cancelled)
            } else if retries >= self.policy.max_retries {
                Some(GiveUp::Exhausted)
            } else {
                None
            };
            if let Some(reason) = give_up {
                return RetryResult::Failed {
                    error,
                    retries,
                    reason,
                };
            }

            let delay = self.policy.backoff(retries + 1);
            warn!(retry = retries + 1, delay = ?delay, error = %error, "Send failed, retrying");

            tokio::select! {
                _ = tokio::time::sleep(delay) => retries += 1,
                _ = self.shutdown.cancelled() => {
                    return RetryResult::Failed {
                        error,
                        retries,
                        reason: GiveUp::Cancelled,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::shutdown::ShutdownTrigger;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn executor(policy: RetryPolicy) -> (RetryExecutor, Arc<ShutdownSignal>) {
        let signal = Arc::new(ShutdownSignal::new());
        (RetryExecutor::new(policy, signal.clone()), signal)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100));

        assert_eq!(policy.base_backoff(1), Duration::from_millis(100));
        assert_eq!(policy.base_backoff(2), Duration::from_millis(200));
        assert_eq!(policy.base_backoff(4), Duration::from_millis(800));
        assert_eq!(policy.base_backoff(40), MAX_BACKOFF);

        let jittered = policy.backoff(2);
        assert!(jittered >= Duration::from_millis(200));
        assert!(jittered <= Duration::from_millis(220));
    }

    #[test]
    fn test_large_initial_backoff_raises_cap() {
        let policy = RetryPolicy::new(1, Duration::from_secs(60));
        assert_eq!(policy.base_backoff(3), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let (executor, _signal) = executor(RetryPolicy::new(3, Duration::from_millis(1)));
        let count = AtomicU32::new(0);

        let result = executor
            .run(|| async {
                if count.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(BridgeError::SendError("busy".into()))
                } else {
                    Ok("sent")
                }
            })
            .await;

        assert!(matches!(
            result,
            RetryResult::Success { value: "sent", retries: 2 }
        ));
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let (executor, _signal) = executor(RetryPolicy::new(2, Duration::from_millis(1)));
        let count = AtomicU32::new(0);

        let result: RetryResult<()> = executor
            .run(|| async {
                count.fetch_add(1, Ordering::SeqCst);
                Err(BridgeError::ConnectionError("down".into()))
            })
            .await;

        assert!(matches!(
            result,
            RetryResult::Failed { retries: 2, reason: GiveUp::Exhausted, .. }
        ));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_not_retried() {
        let (executor, _signal) = executor(RetryPolicy::new(5, Duration::from_millis(1)));
        let count = AtomicU32::new(0);

        let result: RetryResult<()> = executor
            .run(|| async {
                count.fetch_add(1, Ordering::SeqCst);
                Err(BridgeError::EventTooLarge { size: 10, limit: 1 })
            })
            .await;

        assert!(matches!(
            result,
            RetryResult::Failed { retries: 0, reason: GiveUp::NotRetryable, .. }
        ));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_backoff() {
        let (executor, signal) = executor(RetryPolicy::new(5, Duration::from_secs(20)));

        let trigger = {
            let signal = signal.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                signal.trigger(ShutdownTrigger::Interrupt);
            })
        };

        let started = Instant::now();
        let result: RetryResult<()> = executor
            .run(|| async { Err(BridgeError::SendError("timeout".into())) })
            .await;
        trigger.await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(matches!(
            result,
            RetryResult::Failed { retries: 0, reason: GiveUp::Cancelled, .. }
        ));
    }
}
