use super::remote::RemoteError;
use service_core::error::AppError;
use service_core::resilience::{
    CredentialUnavailable, DeadlineElapsed, DeadlineError, DeleteError, FailureKind,
    ProvisioningTimeout, RemoteFailure, RetryError,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("The following users do not exist: {}", .0.join(", "))]
    IdentityNotFound(Vec<String>),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Remote(RemoteError),

    /// No access token could be obtained for a backing system.
    #[error(transparent)]
    CredentialUnavailable(CredentialUnavailable),

    #[error("remote call did not succeed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: RemoteError },

    /// The group exists but its site did not appear in time.
    #[error("group {group_id} was created but its site is not ready yet: {source}")]
    Provisioning {
        group_id: String,
        #[source]
        source: ProvisioningTimeout,
    },

    #[error(transparent)]
    Deadline(#[from] DeadlineElapsed),

    #[error("group {group_id} was deleted but is still in the recycle bin: {last}")]
    PurgeIncomplete { group_id: String, last: RemoteError },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<RemoteError> for DirectoryError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Credential(e) => DirectoryError::CredentialUnavailable(e),
            other => DirectoryError::Remote(other),
        }
    }
}

impl From<RetryError<RemoteError>> for DirectoryError {
    fn from(err: RetryError<RemoteError>) -> Self {
        match err {
            RetryError::Terminal(e) => DirectoryError::from(e),
            RetryError::Exhausted { attempts, last } => {
                DirectoryError::RetriesExhausted { attempts, last }
            }
        }
    }
}

impl From<DeadlineError> for DirectoryError {
    fn from(err: DeadlineError) -> Self {
        match err {
            DeadlineError::Elapsed(e) => DirectoryError::Deadline(e),
            aborted @ DeadlineError::Aborted { .. } => DirectoryError::Internal(aborted.to_string()),
        }
    }
}

impl DirectoryError {
    pub fn from_delete(group_id: &str, err: DeleteError<RemoteError>) -> Self {
        match err {
            DeleteError::SoftDelete(e) | DeleteError::Purge(e) => DirectoryError::from(e),
            DeleteError::PurgeExhausted { last, .. } => DirectoryError::PurgeIncomplete {
                group_id: group_id.to_string(),
                last,
            },
        }
    }

    /// Replace a remote "not found" with a `NotFound` naming the resource.
    pub fn or_not_found(self, resource: impl Into<String>) -> Self {
        match &self {
            DirectoryError::Remote(e) if e.is_not_found() => DirectoryError::NotFound(resource.into()),
            _ => self,
        }
    }
}

impl From<DirectoryError> for AppError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::IdentityNotFound(_) | DirectoryError::InvalidRequest(_) => {
                AppError::BadRequest(anyhow::anyhow!(err.to_string()))
            }
            DirectoryError::NotFound(_) => AppError::NotFound(anyhow::anyhow!(err.to_string())),
            DirectoryError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            DirectoryError::Remote(e) => match e.kind() {
                FailureKind::NotFound => AppError::NotFound(anyhow::anyhow!(e.message())),
                FailureKind::AlreadyExists => AppError::Conflict(anyhow::anyhow!(e.message())),
                FailureKind::Invalid => AppError::BadRequest(anyhow::anyhow!(e.message())),
                _ => AppError::BadGateway(e.to_string()),
            },
            DirectoryError::CredentialUnavailable(e) => {
                tracing::error!(scope = %e.scope, reason = %e.reason, "No credential for backing system");
                AppError::ServiceUnavailable
            }
            DirectoryError::RetriesExhausted { .. }
            | DirectoryError::Provisioning { .. }
            | DirectoryError::Deadline(_)
            | DirectoryError::PurgeIncomplete { .. } => AppError::GatewayTimeout(err.to_string()),
            DirectoryError::Internal(msg) => AppError::InternalError(anyhow::anyhow!(msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    fn status_of(err: DirectoryError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn test_http_mapping() {
        assert_eq!(
            status_of(DirectoryError::IdentityNotFound(vec!["a@x.com".into()])),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(DirectoryError::NotFound("Distribution list 'x'".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(DirectoryError::Remote(RemoteError::status("graph", 409, "exists"))),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(DirectoryError::Remote(RemoteError::status("graph", 403, "denied"))),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(DirectoryError::RetriesExhausted {
                attempts: 3,
                last: RemoteError::status("graph", 503, "busy"),
            }),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_credential_failure_is_not_reported_as_timeout() {
        let err = DirectoryError::from(RetryError::Terminal(RemoteError::Credential(
            CredentialUnavailable::new("graph", "invalid_client"),
        )));
        assert!(matches!(err, DirectoryError::CredentialUnavailable(_)));
        assert_eq!(status_of(err), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_identity_not_found_lists_every_address() {
        let err = DirectoryError::IdentityNotFound(vec!["a@x.com".into(), "b@x.com".into()]);
        assert_eq!(
            err.to_string(),
            "The following users do not exist: a@x.com, b@x.com"
        );
    }
}
