//! Bounded retry for remote calls
//!
//! Model endpoints and tool APIs fail transiently, so every remote call in a
//! conversation goes through [`RetryPolicy::attempt`]. An exhausted policy
//! yields `None` instead of an error: the caller degrades the current turn
//! and keeps whatever partial trace it already has.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Shape of the wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Backoff {
    #[default]
    Constant,
    Exponential { factor: f64, max_delay_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub backoff: Backoff,
}

fn default_max_attempts() -> usize {
    3
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: 0,
            backoff: Backoff::Constant,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let base = self.delay_ms as f64;
        let millis = match self.backoff {
            Backoff::Constant => base,
            Backoff::Exponential {
                factor,
                max_delay_ms,
            } => {
                let exponent = attempt.saturating_sub(1).min(32) as i32;
                (base * factor.powi(exponent)).min(max_delay_ms as f64)
            }
        };
        Duration::from_millis(millis.max(0.0) as u64)
    }

    /// Runs `operation` up to `max_attempts` times and returns the first
    /// success. Every error is treated as retryable. Returns `None` once all
    /// attempts have failed; a policy with zero attempts never calls the
    /// operation.
    pub async fn attempt<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        for attempt in 1..=self.max_attempts {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        log::info!("{} succeeded on attempt {}", label, attempt);
                    }
                    return Some(value);
                }
                Err(e) => {
                    log::warn!(
                        "{} failed (attempt {}/{}): {}",
                        label,
                        attempt,
                        self.max_attempts,
                        e
                    );
                    if attempt < self.max_attempts {
                        let delay = self.delay_after(attempt);
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        log::error!("{} gave up after {} attempts", label, self.max_attempts);
        None
    }
}
