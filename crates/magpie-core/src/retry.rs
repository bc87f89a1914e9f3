use std::future::Future;
use std::time::Duration;

use crate::error::HarvestError;

/// Exponential backoff policy for transient remote failures.
///
/// Delay schedule with defaults: 2s, 4s, 8s, 16s (capped at `max_delay`),
/// five attempts total. Jitter is uniform `[0, jitter]` on top of each
/// delay and defaults to zero.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base: Duration,
    /// Multiplier applied per retry (2.0 doubles the wait).
    pub multiplier: f64,
    /// Ceiling for a single wait.
    pub max_delay: Duration,
    /// Maximum random jitter added to each wait.
    pub jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: Duration::ZERO,
        }
    }
}

impl BackoffPolicy {
    /// A policy with near-zero waits, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Wait before retry number `retry` (1-indexed).
    fn delay_for(&self, retry: u32) -> Duration {
        let exp = self.multiplier.powi(retry.saturating_sub(1) as i32);
        let raw = self.base.as_secs_f64() * exp;
        let capped = raw.min(self.max_delay.as_secs_f64());
        let mut delay = Duration::from_secs_f64(capped);
        if !self.jitter.is_zero() {
            delay += Duration::from_millis(rand_jitter_ms(self.jitter.as_millis() as u64));
        }
        delay
    }
}

/// Run a remote-call thunk under the backoff policy.
///
/// Only errors classified transient by [`HarvestError::is_transient`] are
/// retried; anything else propagates immediately. Once the attempt
/// ceiling is hit, the last error is wrapped in
/// [`HarvestError::RetryExhausted`]. Every remote call in every stage
/// goes through this wrapper.
pub async fn retry<T, F, Fut>(policy: &BackoffPolicy, mut op: F) -> Result<T, HarvestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HarvestError>>,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => {
                if attempt >= policy.max_attempts {
                    return Err(HarvestError::RetryExhausted {
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                let delay = policy.delay_for(attempt);
                tracing::debug!(
                    attempt,
                    delay_ms = %delay.as_millis(),
                    error = %err,
                    "Transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Deterministic jitter based on std — avoids pulling in the `rand` crate.
// Uses a simple xorshift seeded from the current time.
// ---------------------------------------------------------------------------

fn rand_jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    // xorshift64
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max_ms
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn transient() -> HarvestError {
        HarvestError::Network("connection reset".into())
    }

    #[test]
    fn delay_schedule_doubles_and_caps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(4), Duration::from_secs(16));
        assert_eq!(policy.delay_for(5), Duration::from_secs(30));
        assert_eq!(policy.delay_for(9), Duration::from_secs(30));
    }

    #[test]
    fn jitter_is_bounded() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(100),
            ..BackoffPolicy::default()
        }
        .with_jitter(Duration::from_millis(50));
        for _ in 0..100 {
            let d = policy.delay_for(1);
            assert!(d >= Duration::from_millis(100));
            assert!(d < Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn succeeds_first_try() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let out = retry(&BackoffPolicy::immediate(5), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, HarvestError>(42)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let out = retry(&BackoffPolicy::immediate(5), move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok(7)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_wraps_the_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let err = retry(&BackoffPolicy::immediate(3), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(transient())
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            HarvestError::RetryExhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, HarvestError::Network(_)));
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_transient_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let err = retry(&BackoffPolicy::immediate(5), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(HarvestError::Payload("wrong node type".into()))
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, HarvestError::Payload(_)));
    }
}
