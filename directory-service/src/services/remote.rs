//! Error type shared by the HTTP clients for the backing systems.

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use service_core::resilience::{
    CredentialBroker, CredentialUnavailable, FailureKind, RemoteFailure,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Body fragments the remote APIs use instead of a dedicated status code.
const ALREADY_EXISTS_MARKERS: &[&str] = &["already exist", "already a member", "is already"];
const NOT_FOUND_MARKERS: &[&str] = &[
    "couldn't be found",
    "could not be found",
    "isn't a member",
    "is not a member",
    "does not exist",
    "resource not found",
];

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("{system} returned {status}: {message}")]
    Status {
        system: &'static str,
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("{system} request failed: {source}")]
    Transport {
        system: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{system} returned an unexpected response: {message}")]
    Decode {
        system: &'static str,
        message: String,
    },

    #[error(transparent)]
    Credential(#[from] CredentialUnavailable),
}

impl RemoteError {
    pub fn status(system: &'static str, status: u16, message: impl Into<String>) -> Self {
        RemoteError::Status {
            system,
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn not_found(system: &'static str, message: impl Into<String>) -> Self {
        Self::status(system, StatusCode::NOT_FOUND.as_u16(), message)
    }

    pub fn transport(system: &'static str, source: reqwest::Error) -> Self {
        RemoteError::Transport { system, source }
    }

    pub fn decode(system: &'static str, message: impl Into<String>) -> Self {
        RemoteError::Decode {
            system,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == FailureKind::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind() == FailureKind::AlreadyExists
    }

    /// The remote message, without the system/status prefix.
    pub fn message(&self) -> String {
        match self {
            RemoteError::Status { message, .. } | RemoteError::Decode { message, .. } => {
                message.clone()
            }
            other => other.to_string(),
        }
    }
}

/// Classify an HTTP failure from its status and body.
pub fn classify(status: u16, message: &str) -> FailureKind {
    match status {
        401 => return FailureKind::Unauthenticated,
        403 => return FailureKind::PermissionDenied,
        404 => return FailureKind::NotFound,
        408 => return FailureKind::Transient,
        409 => return FailureKind::AlreadyExists,
        429 => return FailureKind::RateLimited,
        _ => {}
    }

    let lowered = message.to_lowercase();
    if ALREADY_EXISTS_MARKERS.iter().any(|m| lowered.contains(m)) {
        FailureKind::AlreadyExists
    } else if NOT_FOUND_MARKERS.iter().any(|m| lowered.contains(m)) {
        FailureKind::NotFound
    } else if status >= 500 {
        FailureKind::Transient
    } else {
        FailureKind::Invalid
    }
}

impl RemoteFailure for RemoteError {
    fn kind(&self) -> FailureKind {
        match self {
            RemoteError::Status {
                status, message, ..
            } => classify(*status, message),
            RemoteError::Transport { .. } => FailureKind::Transient,
            RemoteError::Decode { .. } => FailureKind::Invalid,
            RemoteError::Credential(_) => FailureKind::CredentialUnavailable,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            RemoteError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Pass successful responses through; turn anything else into a
/// `RemoteError::Status` carrying the body and any `Retry-After` hint.
pub async fn check_status(system: &'static str, response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    let body = response
        .text()
        .await
        .map_err(|e| RemoteError::transport(system, e))?;

    tracing::debug!(system, status = %status, body = %body, "Remote call failed");

    Err(RemoteError::Status {
        system,
        status: status.as_u16(),
        message: body,
        retry_after,
    })
}

/// HTTP client that attaches a broker-issued bearer token for one scope.
///
/// A 401 drops the rejected token so the next attempt refreshes it.
#[derive(Clone)]
pub struct BearerClient {
    system: &'static str,
    http: Client,
    broker: Arc<CredentialBroker>,
    scope: String,
}

impl BearerClient {
    pub fn new(
        system: &'static str,
        http: Client,
        broker: Arc<CredentialBroker>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            system,
            http,
            broker,
            scope: scope.into(),
        }
    }

    pub fn system(&self) -> &'static str {
        self.system
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let credential = self.broker.acquire(&self.scope).await?;

        let response = request
            .bearer_auth(credential.token())
            .send()
            .await
            .map_err(|e| RemoteError::transport(self.system, e))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            self.broker.reject(&self.scope, &credential).await;
        }

        check_status(self.system, response).await
    }

    pub async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RemoteError> {
        let response = self.send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::decode(self.system, e.to_string()))
    }
}
