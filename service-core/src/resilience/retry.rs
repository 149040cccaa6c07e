//! Retry utilities for calls to eventually consistent backing systems.
//!
//! Provides configurable retry logic with capped exponential backoff. Each
//! invocation of [`retry`] is independent; no state is kept between calls.

use super::error::{FailureKind, RemoteFailure, TRANSIENT_KINDS, VISIBILITY_KINDS};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

/// Configuration for retry behavior.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Backoff before the second attempt.
    pub base_delay: Duration,
    /// Upper bound for any single backoff.
    pub max_delay: Duration,
    /// Whether to add up to 25% jitter to each backoff.
    pub add_jitter: bool,
    /// Failure kinds worth another attempt. Everything else is terminal.
    pub retry_on: &'static [FailureKind],
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::mutation()
    }
}

impl RetryPolicy {
    /// Policy for confirming that a just-created resource has propagated and
    /// is readable. Retries "not found" and spans tens of seconds in total.
    pub fn verification() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            add_jitter: true,
            retry_on: VISIBILITY_KINDS,
        }
    }

    /// Policy for a single add/remove inside a bulk operation. Short, so one
    /// stubborn identity does not stall the batch.
    pub fn mutation() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            add_jitter: true,
            retry_on: TRANSIENT_KINDS,
        }
    }

    /// Create a policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::mutation()
        }
    }

    /// Replace the set of retryable failure kinds.
    pub fn retrying(mut self, kinds: &'static [FailureKind]) -> Self {
        self.retry_on = kinds;
        self
    }

    /// Override attempt count and delays, keeping the retryable kinds.
    pub fn with_schedule(mut self, max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Disable jitter, making the schedule exact.
    pub fn without_jitter(mut self) -> Self {
        self.add_jitter = false;
        self
    }

    /// Whether a failure of this kind gets another attempt.
    pub fn is_retryable(&self, kind: FailureKind) -> bool {
        self.retry_on.contains(&kind)
    }

    /// Backoff after the given failed attempt (1-based):
    /// `min(base * 2^(attempt-1), max)`.
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let backoff = self
            .base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if self.add_jitter && !backoff.is_zero() {
            let factor = rand::thread_rng().gen_range(0.0..0.25);
            (backoff + backoff.mul_f64(factor)).min(self.max_delay)
        } else {
            backoff
        }
    }
}

/// Why a retried operation gave up.
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// The operation failed in a way retrying cannot fix.
    #[error(transparent)]
    Terminal(E),

    /// Every attempt failed with a retryable error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: E,
    },
}

impl<E> RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// True if the attempts ran out rather than hitting a terminal failure.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }

    /// The last error observed.
    pub fn last_error(&self) -> &E {
        match self {
            RetryError::Terminal(e) => e,
            RetryError::Exhausted { last, .. } => last,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Terminal(e) => e,
            RetryError::Exhausted { last, .. } => last,
        }
    }
}

/// Execute a remote call with retry logic.
///
/// # Arguments
/// * `policy` - Retry schedule and retryable failure kinds
/// * `operation_name` - Name of the operation for logging
/// * `f` - The async function that performs the call
///
/// # Example
/// ```ignore
/// let id = retry(&RetryPolicy::verification(), "get_group", || async {
///     directory.get_group(&group_id).await
/// })
/// .await?;
/// ```
pub async fn retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut f: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RemoteFailure,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match f().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        operation = operation_name,
                        attempt, "Remote call succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(error) => {
                let kind = error.kind();
                metrics::counter!(
                    "resilience_call_failures_total",
                    "operation" => operation_name.to_string(),
                    "kind" => kind.to_string()
                )
                .increment(1);

                if !policy.is_retryable(kind) {
                    warn!(
                        operation = operation_name,
                        attempt,
                        kind = %kind,
                        error = %error,
                        "Remote call failed with terminal error, not retrying"
                    );
                    return Err(RetryError::Terminal(error));
                }

                if attempt >= max_attempts {
                    warn!(
                        operation = operation_name,
                        attempt,
                        kind = %kind,
                        error = %error,
                        "Remote call failed after max attempts"
                    );
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: error,
                    });
                }

                let mut backoff = policy.backoff_duration(attempt);
                if let Some(hint) = error.retry_after() {
                    backoff = backoff.max(hint).min(policy.max_delay);
                }

                warn!(
                    operation = operation_name,
                    attempt,
                    kind = %kind,
                    error = %error,
                    backoff_ms = backoff.as_millis() as u64,
                    "Remote call failed, retrying after backoff"
                );

                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
