//! Primitives for calling eventually consistent, rate-limited remote systems.

pub mod cache;
pub mod credential;
pub mod deadline;
pub mod error;
pub mod poller;
pub mod purge;
pub mod retry;
pub mod sync;

pub use cache::{Resolution, ValidationCache};
pub use credential::{Credential, CredentialBroker, CredentialSource, CredentialUnavailable};
pub use deadline::{DeadlineElapsed, DeadlineError, run_with_deadline};
pub use error::{FailureKind, RemoteFailure, THROTTLE_KINDS, TRANSIENT_KINDS, VISIBILITY_KINDS};
pub use poller::{PollError, ProbeState, ProvisioningProbe, ProvisioningTimeout, await_visible};
pub use purge::{DeleteError, DeleteOutcome, PurgePolicy, two_phase_delete};
pub use retry::{RetryError, RetryPolicy, retry};
pub use sync::{
    MemberOutcome, OutcomeStatus, SyncAction, SyncOptions, SyncPlan, SyncReport, apply,
    plan_and_apply,
};
