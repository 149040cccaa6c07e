//! Two-phase delete for resources that go to a recycle bin when deleted.
//!
//! The soft delete moves the item to the recycle bin; the purge removes it
//! from there. The recycle bin lags behind the delete, so the purge is
//! retried a few times with a fixed delay.

use super::error::{FailureKind, RemoteFailure, TRANSIENT_KINDS};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PurgePolicy {
    /// Purge calls, including the first.
    pub attempts: u32,
    /// Fixed delay between purge calls.
    pub delay: Duration,
}

impl Default for PurgePolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,
    /// Nothing existed under the id. Deleting is idempotent, so this is a
    /// success.
    NotFound,
}

#[derive(Debug, Error)]
pub enum DeleteError<E>
where
    E: std::error::Error + 'static,
{
    #[error("soft delete failed: {0}")]
    SoftDelete(#[source] E),

    #[error("purge failed: {0}")]
    Purge(#[source] E),

    /// The item is soft-deleted but still in the recycle bin.
    #[error("purge gave up after {attempts} attempts: {last}")]
    PurgeExhausted {
        attempts: u32,
        #[source]
        last: E,
    },
}

/// Soft-delete `id`, then purge it from the recycle bin.
pub async fn two_phase_delete<E, S, SF, P, PF>(
    id: &str,
    soft_delete: S,
    mut purge: P,
    policy: &PurgePolicy,
) -> Result<DeleteOutcome, DeleteError<E>>
where
    E: RemoteFailure,
    S: FnOnce() -> SF,
    SF: Future<Output = Result<(), E>>,
    P: FnMut() -> PF,
    PF: Future<Output = Result<(), E>>,
{
    let soft_deleted = match soft_delete().await {
        Ok(()) => {
            info!(id, "Soft delete succeeded");
            true
        }
        Err(e) if e.kind() == FailureKind::NotFound => {
            debug!(id, "Nothing to soft delete, checking recycle bin");
            false
        }
        Err(e) => {
            warn!(id, error = %e, "Soft delete failed");
            return Err(DeleteError::SoftDelete(e));
        }
    };

    let attempts = policy.attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match purge().await {
            Ok(()) => {
                info!(id, attempt, "Purged from recycle bin");
                return Ok(DeleteOutcome::Deleted);
            }
            Err(e) if e.kind() == FailureKind::NotFound => {
                if !soft_deleted {
                    info!(id, "Not found in directory or recycle bin");
                    return Ok(DeleteOutcome::NotFound);
                }
                if attempt >= attempts {
                    info!(
                        id,
                        attempts, "Not in recycle bin after soft delete, treating as purged"
                    );
                    return Ok(DeleteOutcome::Deleted);
                }
                debug!(id, attempt, "Not in recycle bin yet");
            }
            Err(e) if TRANSIENT_KINDS.contains(&e.kind()) => {
                if attempt >= attempts {
                    warn!(id, attempts, error = %e, "Purge gave up");
                    return Err(DeleteError::PurgeExhausted { attempts, last: e });
                }
                warn!(id, attempt, error = %e, "Purge failed, retrying");
            }
            Err(e) => {
                warn!(id, attempt, error = %e, "Purge failed");
                return Err(DeleteError::Purge(e));
            }
        }

        sleep(policy.delay).await;
    }
}
