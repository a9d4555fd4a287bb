//! Upload retry policy with exponential backoff

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{Result, SyncError};

/// Ceiling for a single backoff delay
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt, &mut rng)
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let shift = attempt.min(16);
        let exp = base_ms.saturating_mul(1u64 << shift).min(max_ms);
        let delay_ms = if self.jitter {
            rng.gen_range(exp / 2..=exp)
        } else {
            exp
        };
        Duration::from_millis(delay_ms)
    }
}

/// How an upload is bounded and retried
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub timeout: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, timeout: Duration, base_delay: Duration) -> Self {
        Self {
            max_retries,
            timeout,
            backoff: Backoff::new(base_delay, MAX_BACKOFF, true),
        }
    }

    /// Run `op` with a per-attempt timeout, retrying retryable errors.
    /// `label` identifies the work in logs.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            let result = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout(self.timeout)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.backoff.delay(attempt);
                    attempt += 1;
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        label,
                        attempt,
                        self.max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_without_jitter_is_exponential() {
        let backoff = Backoff::new(
            Duration::from_millis(100),
            Duration::from_millis(800),
            false,
        );
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            backoff.delay_with_rng(0, &mut rng),
            Duration::from_millis(100)
        );
        assert_eq!(
            backoff.delay_with_rng(2, &mut rng),
            Duration::from_millis(400)
        );
        assert_eq!(
            backoff.delay_with_rng(10, &mut rng),
            Duration::from_millis(800)
        );
    }

    #[test]
    fn backoff_with_jitter_stays_in_upper_half() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(5), true);
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 0..6 {
            let delay = backoff.delay_with_rng(attempt, &mut rng);
            let exp = Duration::from_millis(100 * (1 << attempt));
            assert!(delay <= exp);
            assert!(delay >= exp / 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_millis(10));
        let calls = AtomicU32::new(0);

        let result = policy
            .run("upload", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(SyncError::Upload {
                            message: "503".into(),
                            transient: true,
                        })
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_is_not_retried() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_millis(10));
        let calls = AtomicU32::new(0);

        let result: Result<()> = policy
            .run("upload", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(SyncError::Upload {
                        message: "AccessDenied".into(),
                        transient: false,
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(SyncError::Upload { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_surfaces_after_retries_exhausted() {
        let policy = RetryPolicy::new(1, Duration::from_millis(50), Duration::from_millis(10));
        let calls = AtomicU32::new(0);

        let result: Result<()> = policy
            .run("upload", || {
                calls.fetch_add(1, Ordering::SeqCst);
                std::future::pending()
            })
            .await;

        assert!(matches!(result, Err(SyncError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
