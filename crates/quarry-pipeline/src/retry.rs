//! Retry logic with configurable backoff for calls that cross a collaborator
//! boundary. The generate→validate loop has its own budget in the controller.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use quarry_types::{QuarryError, Result};

use crate::collaborators::{Prompt, TextGenerator};

/// Delay between provider retries. Deserialised from `{"kind": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffPolicy {
    Fixed { delay_ms: u64 },
    /// `base_ms * 2^attempt`, capped at `max_ms`.
    Exponential { base_ms: u64, max_ms: u64 },
    None,
}

impl BackoffPolicy {
    /// `attempt` counts retries already made, starting at 0.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        match self {
            BackoffPolicy::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            BackoffPolicy::Exponential { base_ms, max_ms } => {
                let millis = base_ms.saturating_mul(2u64.saturating_pow(attempt as u32));
                Duration::from_millis(millis.min(*max_ms))
            }
            BackoffPolicy::None => Duration::ZERO,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base_ms: 500,
            max_ms: 30_000,
        }
    }
}

/// Run `f` up to `max_retries + 1` times, retrying only errors that satisfy
/// [`QuarryError::is_retryable`]. Non-retryable errors return immediately.
pub async fn execute_with_retry<T, F, Fut>(
    f: F,
    max_retries: usize,
    policy: &BackoffPolicy,
    operation: &str,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 0..=max_retries {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                let delay = match &e {
                    QuarryError::RateLimited { retry_after_ms, .. } if *retry_after_ms > 0 => {
                        Duration::from_millis(*retry_after_ms)
                    }
                    _ => policy.delay_for_attempt(attempt),
                };
                tracing::warn!(
                    operation = %operation,
                    attempt,
                    delay_ms = %delay.as_millis(),
                    error = %e,
                    "Retryable error, retrying"
                );
                last_err = Some(e);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| QuarryError::RetriesExhausted {
        operation: operation.to_string(),
        attempts: max_retries + 1,
    }))
}

// ---------------------------------------------------------------------------
// RetryingGenerator
// ---------------------------------------------------------------------------

/// Wraps a [`TextGenerator`] so transient provider failures are retried
/// before they reach the pipeline.
pub struct RetryingGenerator {
    inner: Arc<dyn TextGenerator>,
    max_retries: usize,
    policy: BackoffPolicy,
}

impl RetryingGenerator {
    pub fn new(inner: Arc<dyn TextGenerator>, max_retries: usize, policy: BackoffPolicy) -> Self {
        Self {
            inner,
            max_retries,
            policy,
        }
    }
}

#[async_trait]
impl TextGenerator for RetryingGenerator {
    async fn generate(&self, prompt: &Prompt, temperature: f32) -> Result<String> {
        execute_with_retry(
            || self.inner.generate(prompt, temperature),
            self.max_retries,
            &self.policy,
            "generate",
        )
        .await
    }
}
