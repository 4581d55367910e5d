//! Bounded retry with exponential backoff.
//!
//! Only used for calls that fail transiently before a scenario starts, such
//! as building the kube client while an API server port-forward comes up.
//! Condition waits inside a scenario go through [`crate::poll`] instead.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

/// Attempt budget and delay growth
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Total attempts, first one included; never below 1
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Ceiling for any single delay
    pub max_delay: Duration,
    /// Growth factor between delays
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Default delays with a different attempt budget
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts.max(1),
            ..Default::default()
        }
    }

    /// Un-jittered delays between attempts, one per retry
    pub fn delays(&self) -> Backoff {
        Backoff {
            next: self.initial_delay,
            max: self.max_delay,
            multiplier: self.backoff_multiplier,
            remaining: self.max_attempts.max(1) - 1,
        }
    }
}

/// Iterator over the delays of a [`RetryConfig`]
#[derive(Clone, Debug)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    multiplier: f64,
    remaining: u32,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let current = self.next.min(self.max);
        self.next = current.mul_f64(self.multiplier).min(self.max);
        Some(current)
    }
}

/// Run `operation` until it succeeds or the attempt budget is spent, then
/// return the last error. Delays are jittered between 0.5x and 1.5x.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delays = config.delays();
    let mut attempt = 1u32;
    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        let Some(delay) = delays.next() else {
            error!(operation = operation_name, attempt, error = %err, "retries exhausted");
            return Err(err);
        };
        let delay = delay.mul_f64(rand::thread_rng().gen_range(0.5..1.5));
        warn!(
            operation = operation_name,
            attempt,
            error = %err,
            delay_ms = delay.as_millis() as u64,
            "transient failure, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
