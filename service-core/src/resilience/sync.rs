//! Differential membership sync: plan the minimal set of adds and removes
//! that converge an observed set to a desired one, then apply them.

use super::error::{FailureKind, RemoteFailure};
use super::retry::{RetryPolicy, retry};
use futures::future::Either;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use tracing::{info, warn};

/// Default number of in-flight remote calls while applying a plan.
pub const DEFAULT_SYNC_CONCURRENCY: usize = 10;

/// Actions that take `observed` to `desired`.
///
/// `to_add` and `to_remove` are always disjoint, and an identity present in
/// both inputs appears in neither.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan<T: Ord> {
    pub to_add: BTreeSet<T>,
    pub to_remove: BTreeSet<T>,
}

impl<T: Ord + Clone> SyncPlan<T> {
    pub fn new(desired: &BTreeSet<T>, observed: &BTreeSet<T>) -> Self {
        Self {
            to_add: desired.difference(observed).cloned().collect(),
            to_remove: observed.difference(desired).cloned().collect(),
        }
    }

    /// Plan that only adds the identities of `wanted` not yet observed.
    pub fn additions(wanted: &BTreeSet<T>, observed: &BTreeSet<T>) -> Self {
        Self {
            to_add: wanted.difference(observed).cloned().collect(),
            to_remove: BTreeSet::new(),
        }
    }

    /// Plan that only removes the identities of `unwanted` still observed.
    pub fn removals(unwanted: &BTreeSet<T>, observed: &BTreeSet<T>) -> Self {
        Self {
            to_add: BTreeSet::new(),
            to_remove: unwanted.intersection(observed).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    pub fn len(&self) -> usize {
        self.to_add.len() + self.to_remove.len()
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub policy: RetryPolicy,
    /// Run every add before any remove, e.g. so a role never drops to zero
    /// holders mid-sync.
    pub add_before_remove: bool,
    pub concurrency: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::mutation(),
            add_before_remove: false,
            concurrency: DEFAULT_SYNC_CONCURRENCY,
        }
    }
}

impl SyncOptions {
    pub fn adds_first(mut self) -> Self {
        self.add_before_remove = true;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Add,
    Remove,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncAction::Add => f.write_str("add"),
            SyncAction::Remove => f.write_str("remove"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Applied,
    /// The remote side was already in the desired state.
    Unchanged,
    Failed {
        reason: String,
        /// Retries ran out, as opposed to a terminal rejection.
        timed_out: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberOutcome<T> {
    pub identity: T,
    pub action: SyncAction,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

impl<T> MemberOutcome<T> {
    pub fn is_success(&self) -> bool {
        !matches!(self.status, OutcomeStatus::Failed { .. })
    }
}

/// Per-identity results of applying a plan. Successes are committed even
/// when other identities fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport<T> {
    pub outcomes: Vec<MemberOutcome<T>>,
}

impl<T> Default for SyncReport<T> {
    fn default() -> Self {
        Self {
            outcomes: Vec::new(),
        }
    }
}

impl<T> SyncReport<T> {
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(MemberOutcome::is_success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &MemberOutcome<T>> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn applied(&self) -> impl Iterator<Item = &MemberOutcome<T>> {
        self.outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Applied)
    }

    pub fn merge(&mut self, other: SyncReport<T>) {
        self.outcomes.extend(other.outcomes);
    }
}

async fn run_action<T, E, A, AF, R, RF>(
    identity: T,
    action: SyncAction,
    add: &A,
    remove: &R,
    policy: &RetryPolicy,
) -> MemberOutcome<T>
where
    T: Clone + fmt::Display,
    E: RemoteFailure,
    A: Fn(T) -> AF,
    AF: Future<Output = Result<(), E>>,
    R: Fn(T) -> RF,
    RF: Future<Output = Result<(), E>>,
{
    let operation = match action {
        SyncAction::Add => "sync_add",
        SyncAction::Remove => "sync_remove",
    };

    let result = retry(policy, operation, || match action {
        SyncAction::Add => Either::Left(add(identity.clone())),
        SyncAction::Remove => Either::Right(remove(identity.clone())),
    })
    .await;

    let status = match result {
        Ok(()) => OutcomeStatus::Applied,
        Err(e) => match (action, e.last_error().kind()) {
            (SyncAction::Add, FailureKind::AlreadyExists)
            | (SyncAction::Remove, FailureKind::NotFound) => OutcomeStatus::Unchanged,
            _ => {
                warn!(%identity, %action, error = %e, "Sync action failed");
                OutcomeStatus::Failed {
                    reason: e.last_error().to_string(),
                    timed_out: e.is_exhausted(),
                }
            }
        },
    };

    let outcome = match &status {
        OutcomeStatus::Applied => "applied",
        OutcomeStatus::Unchanged => "unchanged",
        OutcomeStatus::Failed { .. } => "failed",
    };
    metrics::counter!("sync_actions_total", "action" => action.to_string(), "outcome" => outcome)
        .increment(1);

    MemberOutcome {
        identity,
        action,
        status,
    }
}

async fn run_batch<T, E, A, AF, R, RF>(
    actions: Vec<(T, SyncAction)>,
    add: &A,
    remove: &R,
    options: &SyncOptions,
) -> Vec<MemberOutcome<T>>
where
    T: Clone + fmt::Display,
    E: RemoteFailure,
    A: Fn(T) -> AF,
    AF: Future<Output = Result<(), E>>,
    R: Fn(T) -> RF,
    RF: Future<Output = Result<(), E>>,
{
    stream::iter(actions)
        .map(|(identity, action)| run_action(identity, action, add, remove, &options.policy))
        .buffer_unordered(options.concurrency.max(1))
        .collect()
        .await
}

/// Execute `plan`, retrying each action independently under
/// `options.policy`.
///
/// An add answered "already exists" and a remove answered "not found" count
/// as unchanged successes. Nothing is rolled back when some actions fail.
pub async fn apply<T, E, A, AF, R, RF>(
    plan: &SyncPlan<T>,
    add: A,
    remove: R,
    options: &SyncOptions,
) -> SyncReport<T>
where
    T: Ord + Clone + fmt::Display,
    E: RemoteFailure,
    A: Fn(T) -> AF,
    AF: Future<Output = Result<(), E>>,
    R: Fn(T) -> RF,
    RF: Future<Output = Result<(), E>>,
{
    if plan.is_empty() {
        return SyncReport::default();
    }

    let adds = plan.to_add.iter().cloned().map(|id| (id, SyncAction::Add));
    let removes = plan
        .to_remove
        .iter()
        .cloned()
        .map(|id| (id, SyncAction::Remove));

    let outcomes = if options.add_before_remove {
        let mut outcomes = run_batch(adds.collect(), &add, &remove, options).await;
        outcomes.extend(run_batch(removes.collect(), &add, &remove, options).await);
        outcomes
    } else {
        run_batch(adds.chain(removes).collect(), &add, &remove, options).await
    };

    let report = SyncReport { outcomes };
    info!(
        planned = plan.len(),
        applied = report.applied().count(),
        failed = report.failures().count(),
        "Membership sync finished"
    );
    report
}

/// Plan from `desired` and `observed`, then apply.
pub async fn plan_and_apply<T, E, A, AF, R, RF>(
    desired: &BTreeSet<T>,
    observed: &BTreeSet<T>,
    add: A,
    remove: R,
    options: &SyncOptions,
) -> SyncReport<T>
where
    T: Ord + Clone + fmt::Display,
    E: RemoteFailure,
    A: Fn(T) -> AF,
    AF: Future<Output = Result<(), E>>,
    R: Fn(T) -> RF,
    RF: Future<Output = Result<(), E>>,
{
    let plan = SyncPlan::new(desired, observed);
    apply(&plan, add, remove, options).await
}
