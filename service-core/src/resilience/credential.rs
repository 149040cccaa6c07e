//! Per-scope access credential cache with serialized refresh.

use async_trait::async_trait;
use dashmap::DashMap;
use secrecy::{ExposeSecret, Secret};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default safety margin before expiry at which a credential is refreshed.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// A bearer token for one backing system.
///
/// Credentials are replaced wholesale on refresh and never mutated.
#[derive(Debug)]
pub struct Credential {
    scope: String,
    token: Secret<String>,
    expires_at: Instant,
}

impl Credential {
    /// Create a credential that expires `expires_in` from now.
    pub fn new(scope: impl Into<String>, token: impl Into<String>, expires_in: Duration) -> Self {
        Self {
            scope: scope.into(),
            token: Secret::new(token.into()),
            expires_at: Instant::now() + expires_in,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// The raw token, for building an `Authorization` header.
    pub fn token(&self) -> &str {
        self.token.expose_secret()
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// A credential is usable until `expires_at - margin`.
    pub fn is_valid(&self, margin: Duration) -> bool {
        Instant::now() + margin < self.expires_at
    }
}

#[derive(Debug, Error)]
#[error("credential unavailable for scope '{scope}': {reason}")]
pub struct CredentialUnavailable {
    pub scope: String,
    pub reason: String,
}

impl CredentialUnavailable {
    pub fn new(scope: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            reason: reason.into(),
        }
    }
}

/// Issues new credentials, typically by calling an identity provider.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch(&self, scope: &str) -> Result<Credential, CredentialUnavailable>;
}

#[derive(Default)]
struct CredentialSlot {
    current: RwLock<Option<Arc<Credential>>>,
    refresh: Mutex<()>,
}

impl CredentialSlot {
    async fn snapshot(&self, margin: Duration) -> Option<Arc<Credential>> {
        let guard = self.current.read().await;
        guard.as_ref().filter(|c| c.is_valid(margin)).cloned()
    }
}

/// Holds at most one live credential per scope.
///
/// Callers that find a valid credential never wait on a refresh. When the
/// credential is stale, exactly one caller per scope performs the refresh
/// while the others wait for its result.
pub struct CredentialBroker {
    source: Arc<dyn CredentialSource>,
    margin: Duration,
    slots: DashMap<String, Arc<CredentialSlot>>,
}

impl CredentialBroker {
    pub fn new(source: Arc<dyn CredentialSource>) -> Self {
        Self::with_margin(source, DEFAULT_REFRESH_MARGIN)
    }

    pub fn with_margin(source: Arc<dyn CredentialSource>, margin: Duration) -> Self {
        Self {
            source,
            margin,
            slots: DashMap::new(),
        }
    }

    pub fn margin(&self) -> Duration {
        self.margin
    }

    fn slot(&self, scope: &str) -> Arc<CredentialSlot> {
        self.slots
            .entry(scope.to_string())
            .or_insert_with(|| Arc::new(CredentialSlot::default()))
            .clone()
    }

    /// Return a credential for `scope` that is valid for at least the
    /// configured margin, refreshing it if necessary.
    pub async fn acquire(&self, scope: &str) -> Result<Arc<Credential>, CredentialUnavailable> {
        let slot = self.slot(scope);

        if let Some(credential) = slot.snapshot(self.margin).await {
            return Ok(credential);
        }

        let _refresh = slot.refresh.lock().await;

        // Another caller may have refreshed while we waited for the lock
        if let Some(credential) = slot.snapshot(self.margin).await {
            debug!(scope, "Credential refreshed by concurrent caller");
            return Ok(credential);
        }

        info!(scope, "Refreshing credential");
        let fresh = match self.source.fetch(scope).await {
            Ok(credential) => credential,
            Err(e) => {
                warn!(scope, error = %e, "Credential refresh failed");
                metrics::counter!("credential_refresh_total", "scope" => scope.to_string(), "status" => "failure")
                    .increment(1);
                return Err(e);
            }
        };

        if !fresh.is_valid(self.margin) {
            warn!(
                scope,
                margin_secs = self.margin.as_secs(),
                "Issued credential expires within the refresh margin"
            );
            metrics::counter!("credential_refresh_total", "scope" => scope.to_string(), "status" => "failure")
                .increment(1);
            return Err(CredentialUnavailable::new(
                scope,
                "issued credential expires within the refresh margin",
            ));
        }

        metrics::counter!("credential_refresh_total", "scope" => scope.to_string(), "status" => "success")
            .increment(1);

        let fresh = Arc::new(fresh);
        *slot.current.write().await = Some(fresh.clone());
        Ok(fresh)
    }

    /// Drop the current credential for `scope` so the next `acquire`
    /// refreshes. Used when the backing system rejects the token.
    pub async fn invalidate(&self, scope: &str) {
        let slot = self.slots.get(scope).map(|s| Arc::clone(s.value()));
        if let Some(slot) = slot {
            *slot.current.write().await = None;
            info!(scope, "Credential invalidated");
        }
    }

    /// Drop `rejected` if it is still the current credential for `scope`.
    ///
    /// A request that was slow to come back with a 401 must not discard a
    /// credential another caller refreshed in the meantime.
    pub async fn reject(&self, scope: &str, rejected: &Arc<Credential>) {
        let Some(slot) = self.slots.get(scope).map(|s| Arc::clone(s.value())) else {
            return;
        };

        let mut current = slot.current.write().await;
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, rejected)) {
            *current = None;
            info!(scope, "Rejected credential invalidated");
        } else {
            debug!(scope, "Rejected credential was already replaced");
        }
    }
}
