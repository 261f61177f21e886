//! [`RetryEngine`]: drives an operation through bounded retries with
//! exponential backoff, consulting a [`CircuitBreaker`] before every
//! attempt and an optional recovery hook (e.g. "reconnect") between a
//! recoverable failure and the next attempt.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::circuit::{Admission, CircuitBreaker};
use crate::error::Error;
use crate::metrics::Metrics;

/// Per-operation-class retry policy. Distinct operation classes (connect,
/// transfer, directory listing, ...) typically want distinct attempt
/// budgets, so this is constructed per class rather than shared globally.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub name: String,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
    pub log_each_attempt: bool,
}

impl RetryPolicy {
    pub fn new(name: impl Into<String>) -> Self {
        RetryPolicy {
            name: name.into(),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(10),
            log_each_attempt: true,
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let millis = (self.initial_backoff.as_millis() as f64 * factor) as u64;
        Duration::from_millis(millis).min(self.max_backoff)
    }
}

pub struct RetryEngine {
    metrics: Arc<dyn Metrics>,
}

impl RetryEngine {
    pub fn new(metrics: Arc<dyn Metrics>) -> Self {
        RetryEngine { metrics }
    }

    /// Runs `op` under `policy`, gated by `breaker`. Between a recoverable
    /// failure and the next attempt, `recovery` (when given) is awaited; if
    /// it succeeds the next attempt fires immediately without consuming a
    /// backoff delay, otherwise the normal backoff applies. A
    /// non-recoverable failure or an exhausted attempt budget propagates
    /// immediately.
    pub async fn execute<T, Fut, Op, RecFut, Rec>(
        &self,
        policy: &RetryPolicy,
        breaker: &CircuitBreaker,
        mut op: Op,
        mut recovery: Option<Rec>,
    ) -> Result<T, Error>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
        Rec: FnMut() -> RecFut,
        RecFut: Future<Output = Result<(), Error>>,
    {
        let mut attempt = 0u32;
        loop {
            let admission = breaker.try_acquire();
            let is_trial = match admission {
                Admission::Denied => return Err(breaker.denied_error()),
                Admission::Trial => true,
                Admission::Allowed => false,
            };

            if policy.log_each_attempt {
                tracing::debug!(policy = %policy.name, attempt, trial = is_trial, "attempting operation");
            }

            match op().await {
                Ok(value) => {
                    breaker.on_success();
                    return Ok(value);
                }
                Err(err) => {
                    breaker.on_failure();
                    attempt += 1;

                    if !err.recoverable() {
                        tracing::debug!(policy = %policy.name, kind = %err.kind, "non-recoverable failure, not retrying");
                        return Err(err);
                    }
                    if attempt >= policy.max_attempts {
                        tracing::warn!(policy = %policy.name, attempts = attempt, "retry budget exhausted");
                        return Err(err);
                    }

                    self.metrics.record_retry();

                    let recovered = if let Some(rec) = recovery.as_mut() {
                        rec().await.is_ok()
                    } else {
                        false
                    };

                    if !recovered {
                        let delay = policy.backoff_for(attempt);
                        tracing::debug!(policy = %policy.name, attempt, delay_ms = delay.as_millis() as u64, "backing off before retry");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}
