use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::repositories::errors::match_repository_errors::MatchRepositoryError;
use crate::repositories::errors::queue_repository_errors::QueueRepositoryError;

/// Errors that can tell a passing infrastructure fault from a definite answer.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for QueueRepositoryError {
    fn is_transient(&self) -> bool {
        QueueRepositoryError::is_transient(self)
    }
}

impl Retryable for MatchRepositoryError {
    fn is_transient(&self) -> bool {
        MatchRepositoryError::is_transient(self)
    }
}

/// Bounded exponential backoff with jitter for store round-trips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Retries without sleeping. Meant for tests and the in-memory store.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Un-jittered delay after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// `delay_for(attempt)` plus up to half of it again at random, so
    /// engines that collided once do not collide again in lockstep.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        let spread = (delay.as_millis() / 2) as u64;
        if spread == 0 {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0..=spread);
        delay + Duration::from_millis(extra)
    }

    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.jittered_delay(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                        operation, attempt, max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        error!(
                            "{} failed after {} attempts: {}",
                            operation, max_attempts, e
                        );
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_half_the_delay() {
        let policy = RetryPolicy::default();
        for attempt in 1..6 {
            let base = policy.delay_for(attempt);
            let jittered = policy.jittered_delay(attempt);
            assert!(jittered >= base);
            assert!(jittered <= base + base / 2);
        }
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::immediate(3);

        let result = policy
            .run("scan", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(QueueRepositoryError::Unavailable("down".to_string()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::immediate(3);

        let result: Result<(), _> = policy
            .run("enqueue", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(QueueRepositoryError::DynamoDb("timeout".to_string()))
            })
            .await;

        assert!(matches!(result, Err(QueueRepositoryError::DynamoDb(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_contention_is_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::immediate(5);

        let result: Result<(), _> = policy
            .run("dequeue", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(QueueRepositoryError::NotFound)
            })
            .await;

        assert!(matches!(result, Err(QueueRepositoryError::NotFound)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
