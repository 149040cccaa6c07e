//! Failure classification shared by every resilience primitive.

use std::fmt;
use std::time::Duration;

/// Category of a failed remote call.
///
/// Whether a category is worth retrying depends on the caller: a `NotFound`
/// right after a create is usually replication lag, while the same answer for
/// a resolved identity is final. Retry policies therefore carry the set of
/// kinds they retry instead of the kinds deciding for themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The target does not exist (or is not visible yet).
    NotFound,
    /// The change is already in place (duplicate add, existing alias).
    AlreadyExists,
    /// The request was malformed or rejected by validation.
    Invalid,
    /// The credential was rejected; a refresh may fix it.
    Unauthenticated,
    /// The caller is not allowed to perform the operation.
    PermissionDenied,
    /// The remote side throttled the call.
    RateLimited,
    /// Network failure or 5xx from the remote side.
    Transient,
    /// No credential could be obtained for the call. Never retried.
    CredentialUnavailable,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::NotFound => "not_found",
            FailureKind::AlreadyExists => "already_exists",
            FailureKind::Invalid => "invalid",
            FailureKind::Unauthenticated => "unauthenticated",
            FailureKind::PermissionDenied => "permission_denied",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Transient => "transient",
            FailureKind::CredentialUnavailable => "credential_unavailable",
        };
        f.write_str(name)
    }
}

/// Kinds that are retried under every policy unless a caller opts out.
pub const TRANSIENT_KINDS: &[FailureKind] = &[
    FailureKind::RateLimited,
    FailureKind::Transient,
    FailureKind::Unauthenticated,
];

/// Kinds retried while waiting for a freshly created resource to propagate.
pub const VISIBILITY_KINDS: &[FailureKind] = &[
    FailureKind::NotFound,
    FailureKind::RateLimited,
    FailureKind::Transient,
    FailureKind::Unauthenticated,
];

/// Kinds that are safe to retry for non-idempotent calls: the remote side
/// refused the request before acting on it.
pub const THROTTLE_KINDS: &[FailureKind] = &[FailureKind::RateLimited];

/// An error returned by a call to a backing system.
pub trait RemoteFailure: std::error::Error + Send + Sync + 'static {
    /// Classify the failure.
    fn kind(&self) -> FailureKind;

    /// Server-provided hint for how long to wait before the next attempt.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}
