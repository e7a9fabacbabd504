//! Retry with exponential backoff for external calls
//!
//! Wraps any zero-argument async operation. Only errors whose message matches
//! the transient vocabulary in [`crate::error::RETRYABLE_MARKERS`] are retried;
//! everything else is returned immediately.

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use crate::config::RetryConfig;
use crate::error::{DeskError, Result};

/// How an error was classified by the policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Fatal,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Retryable => write!(f, "retryable"),
            ErrorClass::Fatal => write!(f, "fatal"),
        }
    }
}

/// Per-attempt bookkeeping handed to the attempt hook
#[derive(Debug, Clone, PartialEq)]
pub struct RetryContext {
    /// Zero-based index of the attempt that just failed
    pub attempt: u32,
    pub class: ErrorClass,
    /// Delay before the next attempt (zero when no retry follows)
    pub delay: Duration,
}

/// Retry/backoff wrapper
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            backoff_factor: cfg.backoff_factor,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_retries,
            base_delay,
            backoff_factor,
        }
    }

    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// `base_delay * backoff_factor^attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt as i32);
        self.base_delay.mul_f64(factor)
    }

    pub fn classify(err: &DeskError) -> ErrorClass {
        if err.is_retryable() {
            ErrorClass::Retryable
        } else {
            ErrorClass::Fatal
        }
    }

    /// Run `op` under the policy
    pub async fn run<T, F, Fut>(&self, label: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_with_hook(label, op, |_| {}).await
    }

    /// Run `op` under the policy, reporting every failed attempt to `on_attempt`
    pub async fn run_with_hook<T, F, Fut, H>(&self, label: &str, mut op: F, mut on_attempt: H) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        H: FnMut(&RetryContext),
    {
        let mut attempt: u32 = 0;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let class = Self::classify(&err);
            if class == ErrorClass::Fatal {
                on_attempt(&RetryContext {
                    attempt,
                    class,
                    delay: Duration::ZERO,
                });
                return Err(err);
            }

            if attempt >= self.max_retries {
                on_attempt(&RetryContext {
                    attempt,
                    class,
                    delay: Duration::ZERO,
                });
                error!(
                    call = label,
                    attempts = attempt + 1,
                    "Call failed, retries exhausted: {}",
                    err
                );
                return Err(err);
            }

            let delay = self.delay_for(attempt);
            on_attempt(&RetryContext {
                attempt,
                class,
                delay,
            });
            warn!(
                call = label,
                attempt = attempt + 1,
                of = self.max_retries + 1,
                delay_ms = delay.as_millis() as u64,
                "Transient failure, retrying: {}",
                truncate(&err.to_string(), 100)
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(100), 2.0)
    }

    #[test]
    fn delay_grows_exponentially() {
        let policy = fast_policy();
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = fast_policy()
            .run("flaky", move || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(DeskError::Llm("connection reset".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<()> = RetryPolicy::none()
            .run("once", move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(DeskError::Llm("timeout".into()))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
