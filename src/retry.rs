// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Retry utilities with exponential backoff and jitter, plus polling helpers.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Configuration for operations that may fail transiently.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Delay after the given number of consecutive failures, without jitter.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(32) as i32;
        let delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

/// Execute an async operation with exponential backoff and jitter.
///
/// Every error is retried until `max_attempts` is exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_backoff_if(config, operation_name, |_| true, operation).await
}

/// Like [`retry_with_backoff`], but stops immediately on errors `retryable` rejects.
pub async fn retry_with_backoff_if<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !retryable(&e) {
                    debug!(operation = %operation_name, attempt, error = %e, "Error is not retryable");
                    return Err(e);
                }
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    warn!(
                        operation = %operation_name,
                        attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                // 0.5x to 1.5x of the delay
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let jittered_delay = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

                debug!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = jittered_delay.as_millis() as u64,
                    "Operation failed, retrying"
                );

                tokio::time::sleep(jittered_delay).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}

/// Outcome of a single poll of [`poll_until`].
#[derive(Debug)]
pub enum PollResult<E> {
    /// The awaited condition holds
    Ready,
    /// Not there yet; the message is kept for the timeout error
    NotReady(String),
    /// Stop polling immediately
    Failed(E),
}

/// Error returned by [`poll_until`].
#[derive(Debug, thiserror::Error)]
pub enum PollError<E: std::fmt::Display> {
    #[error("{operation} did not succeed within {timeout:?}: {last}")]
    Timeout {
        operation: String,
        timeout: Duration,
        last: String,
    },
    #[error("{0}")]
    Failed(E),
}

/// Poll `check` every `interval` until it is ready, fails, or `timeout` elapses.
pub async fn poll_until<F, Fut, E>(
    operation_name: &str,
    interval: Duration,
    timeout: Duration,
    mut check: F,
) -> Result<(), PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PollResult<E>>,
    E: std::fmt::Display,
{
    let deadline = Instant::now() + timeout;
    let mut last = String::from("not checked yet");

    loop {
        match check().await {
            PollResult::Ready => return Ok(()),
            PollResult::Failed(e) => return Err(PollError::Failed(e)),
            PollResult::NotReady(message) => {
                debug!(operation = %operation_name, %message, "Condition not met yet");
                last = message;
            }
        }

        if Instant::now() + interval > deadline {
            return Err(PollError::Timeout {
                operation: operation_name.to_string(),
                timeout,
                last,
            });
        }
        tokio::time::sleep(interval).await;
    }
}
