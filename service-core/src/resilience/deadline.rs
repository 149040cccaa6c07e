//! Outer time limit for a whole multi-step operation.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Error)]
#[error("operation '{operation}' exceeded its {}s deadline", deadline.as_secs())]
pub struct DeadlineElapsed {
    pub operation: String,
    pub deadline: Duration,
}

#[derive(Debug, Error)]
pub enum DeadlineError {
    #[error(transparent)]
    Elapsed(#[from] DeadlineElapsed),

    /// The spawned operation panicked or was cancelled by the runtime.
    #[error("operation '{operation}' aborted: {reason}")]
    Aborted { operation: String, reason: String },
}

/// Run `fut` on its own task and wait at most `deadline` for it.
///
/// On expiry the caller gets `DeadlineElapsed` but the task keeps running to
/// completion and its result is dropped, so a remote call that was already
/// sent is never cut off halfway.
pub async fn run_with_deadline<F, T>(
    operation: &str,
    deadline: Duration,
    fut: F,
) -> Result<T, DeadlineError>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::spawn(fut);

    match tokio::time::timeout(deadline, handle).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(join_error)) => Err(DeadlineError::Aborted {
            operation: operation.to_string(),
            reason: join_error.to_string(),
        }),
        Err(_) => {
            warn!(
                operation,
                deadline_secs = deadline.as_secs(),
                "Deadline elapsed, detaching in-flight operation"
            );
            Err(DeadlineElapsed {
                operation: operation.to_string(),
                deadline,
            }
            .into())
        }
    }
}
