//! Bounded wait for a resource that materializes asynchronously after its
//! parent is created (e.g. the site behind a newly created group).

use super::error::{RemoteFailure, VISIBILITY_KINDS};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_ATTEMPTS: u32 = 12;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeState<T> {
    Pending { attempts: u32 },
    Visible(T),
    TimedOut { attempts: u32 },
}

/// Tracks attempts against one target with a fixed spacing between calls.
#[derive(Debug, Clone)]
pub struct ProvisioningProbe {
    target: String,
    max_attempts: u32,
    interval: Duration,
    attempts: u32,
}

impl ProvisioningProbe {
    pub fn new(target: impl Into<String>, max_attempts: u32, interval: Duration) -> Self {
        Self {
            target: target.into(),
            max_attempts: max_attempts.max(1),
            interval,
            attempts: 0,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Record the result of one probe call and return the new state.
    pub fn observe<T>(&mut self, observation: Option<T>) -> ProbeState<T> {
        self.attempts += 1;
        match observation {
            Some(value) => ProbeState::Visible(value),
            None if self.attempts >= self.max_attempts => ProbeState::TimedOut {
                attempts: self.attempts,
            },
            None => ProbeState::Pending {
                attempts: self.attempts,
            },
        }
    }
}

/// The resource did not appear in time. Its parent may still exist.
#[derive(Debug, Clone, Error)]
#[error("'{target}' was not provisioned after {attempts} checks over {}s", waited.as_secs())]
pub struct ProvisioningTimeout {
    pub target: String,
    pub attempts: u32,
    pub waited: Duration,
}

#[derive(Debug, Error)]
pub enum PollError<E>
where
    E: std::error::Error + 'static,
{
    #[error(transparent)]
    Timeout(ProvisioningTimeout),

    #[error(transparent)]
    Probe(E),
}

/// Call `probe_fn` until it yields a value or the probe's attempts run out.
///
/// `Ok(None)` and not-found or transient errors count as "not yet". Any other
/// error ends the wait. There is no sleep after the final call.
pub async fn await_visible<T, E, F, Fut>(
    mut probe: ProvisioningProbe,
    mut probe_fn: F,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
    E: RemoteFailure,
{
    let started = Instant::now();

    loop {
        let observation = match probe_fn().await {
            Ok(observation) => observation,
            Err(e) if VISIBILITY_KINDS.contains(&e.kind()) => {
                debug!(target_id = probe.target(), error = %e, "Probe failed, treating as pending");
                None
            }
            Err(e) => return Err(PollError::Probe(e)),
        };

        match probe.observe(observation) {
            ProbeState::Visible(value) => {
                info!(
                    target_id = probe.target(),
                    attempts = probe.attempts(),
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Resource became visible"
                );
                return Ok(value);
            }
            ProbeState::TimedOut { attempts } => {
                warn!(target_id = probe.target(), attempts, "Resource not visible, giving up");
                return Err(PollError::Timeout(ProvisioningTimeout {
                    target: probe.target().to_string(),
                    attempts,
                    waited: started.elapsed(),
                }));
            }
            ProbeState::Pending { attempts } => {
                debug!(target_id = probe.target(), attempts, "Resource not visible yet");
                sleep(probe.interval()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::FailureKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Error)]
    #[error("{0}")]
    struct TestFailure(FailureKind);

    impl RemoteFailure for TestFailure {
        fn kind(&self) -> FailureKind {
            self.0
        }
    }

    #[test]
    fn test_probe_state_machine() {
        let mut probe = ProvisioningProbe::new("group-1", 2, Duration::from_secs(1));
        assert_eq!(probe.observe::<()>(None), ProbeState::Pending { attempts: 1 });
        assert_eq!(probe.observe::<()>(None), ProbeState::TimedOut { attempts: 2 });

        let mut probe = ProvisioningProbe::new("group-2", 2, Duration::from_secs(1));
        assert_eq!(probe.observe(Some("url")), ProbeState::Visible("url"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_visible_on_fifth_call() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let probe = ProvisioningProbe::new("group-1", 12, Duration::from_secs(5));

        let site = await_visible(probe, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                match n {
                    1 | 2 => Err(TestFailure(FailureKind::NotFound)),
                    5 => Ok(Some("https://contoso.sharepoint.com/sites/team")),
                    _ => Ok(None),
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(site, "https://contoso.sharepoint.com/sites/team");
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_visible_times_out_after_max_calls() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let probe = ProvisioningProbe::new("group-1", 12, Duration::from_secs(5));

        let result: Result<(), _> = await_visible(probe, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, TestFailure>(None) }
        })
        .await;

        match result {
            Err(PollError::Timeout(timeout)) => {
                assert_eq!(timeout.target, "group-1");
                assert_eq!(timeout.attempts, 12);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 12);
        assert_eq!(start.elapsed(), Duration::from_secs(55));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_probe_error_propagates() {
        let calls = AtomicU32::new(0);
        let probe = ProvisioningProbe::new("group-1", 12, Duration::from_secs(5));

        let result: Result<(), _> = await_visible(probe, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestFailure(FailureKind::PermissionDenied)) }
        })
        .await;

        assert!(matches!(result, Err(PollError::Probe(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
