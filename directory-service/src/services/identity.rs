//! Cached resolution between user principal names and directory object ids.

use super::error::DirectoryError;
use super::graph::GroupDirectory;
use futures::stream::{self, StreamExt, TryStreamExt};
use service_core::resilience::{retry, Resolution, RetryPolicy, SyncReport, ValidationCache};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct IdentityResolver {
    directory: Arc<dyn GroupDirectory>,
    /// Lowercased UPN to object id.
    users: Arc<ValidationCache<String>>,
    /// Object id to UPN.
    names: Arc<ValidationCache<String>>,
    policy: RetryPolicy,
    concurrency: usize,
}

impl IdentityResolver {
    pub fn new(
        directory: Arc<dyn GroupDirectory>,
        users: Arc<ValidationCache<String>>,
        names: Arc<ValidationCache<String>>,
        concurrency: usize,
    ) -> Self {
        Self {
            directory,
            users,
            names,
            policy: RetryPolicy::mutation(),
            concurrency: concurrency.max(1),
        }
    }

    /// Background purge of expired entries in both caches.
    pub fn spawn_sweepers(&self, interval: Duration) -> Vec<JoinHandle<()>> {
        vec![
            self.users.spawn_sweeper(interval),
            self.names.spawn_sweeper(interval),
        ]
    }

    /// Object id for `upn`, if the user exists.
    pub async fn resolve(&self, upn: &str) -> Result<Resolution<String>, DirectoryError> {
        let key = normalize(upn);
        let resolution = self
            .users
            .resolve(&key, || async {
                retry(&self.policy, "resolve_user", || self.directory.find_user(&key))
                    .await
                    .map(|found| found.map_or(Resolution::NotFound, Resolution::Found))
            })
            .await?;
        Ok(resolution)
    }

    /// Resolve every address, failing with `IdentityNotFound` naming all the
    /// unknown ones. Keys of the result are lowercased.
    pub async fn resolve_all<'a, I>(&self, upns: I) -> Result<BTreeMap<String, String>, DirectoryError>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let unique: BTreeSet<String> = upns.into_iter().map(|u| normalize(u)).collect();

        let resolved: Vec<(String, Resolution<String>)> = stream::iter(unique)
            .map(|upn| async move {
                let resolution = self.resolve(&upn).await?;
                Ok::<_, DirectoryError>((upn, resolution))
            })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;

        let mut found = BTreeMap::new();
        let mut missing = Vec::new();
        for (upn, resolution) in resolved {
            match resolution {
                Resolution::Found(id) => {
                    found.insert(upn, id);
                }
                Resolution::NotFound => missing.push(upn),
            }
        }

        if !missing.is_empty() {
            missing.sort();
            tracing::warn!(missing = ?missing, "Unknown users in request");
            return Err(DirectoryError::IdentityNotFound(missing));
        }

        Ok(found)
    }

    /// User principal name for an object id, if the user exists.
    pub async fn principal_name(&self, object_id: &str) -> Result<Option<String>, DirectoryError> {
        let resolution = self
            .names
            .resolve(object_id, || async {
                retry(&self.policy, "resolve_principal_name", || {
                    self.directory.user_principal_name(object_id)
                })
                .await
                .map(|found| found.map_or(Resolution::NotFound, Resolution::Found))
            })
            .await?;
        Ok(resolution.found())
    }

    /// Principal names for several object ids, skipping unknown ones.
    pub async fn principal_names(&self, object_ids: &[String]) -> Result<Vec<String>, DirectoryError> {
        let names: Vec<Option<String>> = stream::iter(object_ids.to_vec())
            .map(|id| async move { self.principal_name(&id).await })
            .buffered(self.concurrency)
            .try_collect()
            .await?;
        Ok(names.into_iter().flatten().collect())
    }
}

pub fn normalize(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Replace canonical ids in a sync report with the addresses callers used.
pub fn relabel(report: SyncReport<String>, labels: &BTreeMap<String, String>) -> SyncReport<String> {
    SyncReport {
        outcomes: report
            .outcomes
            .into_iter()
            .map(|mut outcome| {
                if let Some(label) = labels.get(&outcome.identity) {
                    outcome.identity = label.clone();
                }
                outcome
            })
            .collect(),
    }
}
