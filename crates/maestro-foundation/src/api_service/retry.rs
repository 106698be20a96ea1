//! Retry policy and async retry combinator.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{Instrument, info_span, warn};

use crate::config::ApiConfig;

/// Delay between attempts. `retry` counts retries from 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay every retry.
    Fixed { delay_ms: u64 },
    /// `base_ms × 2^(retry−1)`, capped at `max_ms`.
    Exponential { base_ms: u64, max_ms: u64 },
    /// Exponential, then uniformly reduced to 75–100 % of the delay.
    ExponentialWithJitter { base_ms: u64, max_ms: u64 },
}

fn exponential_ms(base_ms: u64, max_ms: u64, retry: u32) -> u64 {
    let shift = retry.saturating_sub(1);
    1u64.checked_shl(shift)
        .and_then(|factor| base_ms.checked_mul(factor))
        .unwrap_or(max_ms)
        .min(max_ms)
}

impl BackoffStrategy {
    pub fn delay_for(&self, retry: u32) -> Duration {
        let ms = match self {
            Self::Fixed { delay_ms } => *delay_ms,
            Self::Exponential { base_ms, max_ms } => exponential_ms(*base_ms, *max_ms, retry),
            Self::ExponentialWithJitter { base_ms, max_ms } => {
                let capped = exponential_ms(*base_ms, *max_ms, retry);
                let floor = capped.saturating_mul(3) / 4;
                if floor >= capped {
                    capped
                } else {
                    rand::thread_rng().gen_range(floor..=capped)
                }
            }
        };
        Duration::from_millis(ms)
    }
}

/// How many attempts to make and how long to wait between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts (1 = no retry)
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ApiConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: BackoffStrategy) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    pub fn from_config(config: &ApiConfig) -> Self {
        let (base_ms, max_ms) = (config.base_delay_ms, config.max_delay_ms);
        Self {
            max_attempts: config.max_retries.saturating_add(1),
            backoff: if config.jitter {
                BackoffStrategy::ExponentialWithJitter { base_ms, max_ms }
            } else {
                BackoffStrategy::Exponential { base_ms, max_ms }
            },
        }
    }

    pub fn no_retry() -> Self {
        Self::new(1, BackoffStrategy::Fixed { delay_ms: 0 })
    }
}

/// Run `operation` until it succeeds, fails non-retryably, or attempts run
/// out. `operation` receives the 1-based attempt number.
pub async fn retry_with_policy<T, E, F, Fut>(
    policy: &RetryPolicy,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let span = info_span!("attempt", attempt, max_attempts);
        match operation(attempt).instrument(span).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && is_retryable(&e) => {
                let delay = policy.backoff.delay_for(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retryable failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_kernel::OrchestratorError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn exponential_doubles_and_caps() {
        let b = BackoffStrategy::Exponential {
            base_ms: 1_000,
            max_ms: 30_000,
        };
        assert_eq!(b.delay_for(1), Duration::from_millis(1_000));
        assert_eq!(b.delay_for(2), Duration::from_millis(2_000));
        assert_eq!(b.delay_for(3), Duration::from_millis(4_000));
        assert_eq!(b.delay_for(6), Duration::from_millis(30_000));
        assert_eq!(b.delay_for(200), Duration::from_millis(30_000));
    }

    #[test]
    fn jitter_stays_in_band() {
        let b = BackoffStrategy::ExponentialWithJitter {
            base_ms: 400,
            max_ms: 10_000,
        };
        for _ in 0..100 {
            let d = b.delay_for(2).as_millis();
            assert!((600..=800).contains(&d), "delay {d}");
        }
    }

    #[test]
    fn policy_from_config_counts_first_attempt() {
        let policy = RetryPolicy::from_config(&ApiConfig::default());
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.backoff.delay_for(1), Duration::from_secs(1));

        let jittered = RetryPolicy::from_config(&ApiConfig {
            jitter: true,
            ..ApiConfig::default()
        });
        assert_eq!(
            jittered.backoff,
            BackoffStrategy::ExponentialWithJitter {
                base_ms: 1_000,
                max_ms: 30_000
            }
        );
        let d = jittered.backoff.delay_for(3).as_millis();
        assert!((3_000..=4_000).contains(&d), "delay {d}");
    }

    fn unavailable() -> OrchestratorError {
        OrchestratorError::Http {
            status: 503,
            message: "busy".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds_with_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(
            3,
            BackoffStrategy::Exponential {
                base_ms: 100,
                max_ms: 1_000,
            },
        );

        let started = tokio::time::Instant::now();
        let c = calls.clone();
        let result = retry_with_policy(&policy, OrchestratorError::is_transient, move |attempt| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 { Err(unavailable()) } else { Ok(attempt) }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100 + 200
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> =
            retry_with_policy(&RetryPolicy::default(), OrchestratorError::is_transient, move |_| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(OrchestratorError::Http {
                        status: 403,
                        message: "forbidden".into(),
                    })
                }
            })
            .await;

        assert_eq!(result.unwrap_err().status_code(), Some(403));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_return_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> = retry_with_policy(
            &RetryPolicy::new(2, BackoffStrategy::Fixed { delay_ms: 10 }),
            OrchestratorError::is_transient,
            move |_| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(unavailable())
                }
            },
        )
        .await;

        assert_eq!(result.unwrap_err().status_code(), Some(503));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
