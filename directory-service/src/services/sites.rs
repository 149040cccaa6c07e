//! Collaboration sites: a unified group plus the site the platform
//! provisions for it in the background.

use super::error::DirectoryError;
use super::graph::{DirectoryUser, GroupDirectory, GroupRole, NewGroup, SiteInfo};
use super::identity::{normalize, relabel, IdentityResolver};
use super::remote::RemoteError;
use crate::dtos::site::{CreateSiteRequest, MembershipChanged, MembershipRequest, SiteCreated};
use crate::utils::{random_suffix, slugify};
use service_core::resilience::{
    apply, await_visible, retry, run_with_deadline, two_phase_delete,
    DeleteOutcome, FailureKind, MemberOutcome, OutcomeStatus, PollError, ProvisioningProbe,
    PurgePolicy, RemoteFailure, RetryError, RetryPolicy, SyncAction, SyncOptions, SyncPlan,
    SyncReport, THROTTLE_KINDS,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

const MAX_ALIAS_ATTEMPTS: usize = 5;

#[derive(Debug, Clone)]
pub struct SiteSettings {
    pub poll_attempts: u32,
    pub poll_interval: Duration,
    pub purge: PurgePolicy,
    /// Upper bound on a whole create request.
    pub deadline: Duration,
}

fn is_nickname_collision(err: &RemoteError) -> bool {
    match err.kind() {
        FailureKind::AlreadyExists => true,
        FailureKind::Invalid => err.message().to_lowercase().contains("mailnickname"),
        _ => false,
    }
}

const OWNER_FLOOR_REASON: &str = "A group must keep at least one owner";

/// Failed outcomes for removals withheld so the group keeps an owner.
fn withheld(ids: impl IntoIterator<Item = String>) -> SyncReport<String> {
    SyncReport {
        outcomes: ids
            .into_iter()
            .map(|identity| MemberOutcome {
                identity,
                action: SyncAction::Remove,
                status: OutcomeStatus::Failed {
                    reason: OWNER_FLOOR_REASON.to_string(),
                    timed_out: false,
                },
            })
            .collect(),
    }
}

/// Outcomes for requested identities the plan skipped because the
/// directory was already in the wanted state.
fn unchanged(ids: impl IntoIterator<Item = String>, action: SyncAction) -> SyncReport<String> {
    SyncReport {
        outcomes: ids
            .into_iter()
            .map(|identity| MemberOutcome {
                identity,
                action,
                status: OutcomeStatus::Unchanged,
            })
            .collect(),
    }
}

pub struct SiteService {
    directory: Arc<dyn GroupDirectory>,
    identities: Arc<IdentityResolver>,
    sync: SyncOptions,
    verification: RetryPolicy,
    settings: SiteSettings,
}

impl SiteService {
    pub fn new(
        directory: Arc<dyn GroupDirectory>,
        identities: Arc<IdentityResolver>,
        sync: SyncOptions,
        settings: SiteSettings,
    ) -> Self {
        Self {
            directory,
            identities,
            sync,
            verification: RetryPolicy::verification(),
            settings,
        }
    }

    /// Create the group and wait for its site, bounded by the request
    /// deadline. Work still in flight at the deadline runs on in the
    /// background.
    pub async fn create(self: &Arc<Self>, req: CreateSiteRequest) -> Result<SiteCreated, DirectoryError> {
        let service = Arc::clone(self);
        run_with_deadline("create_site", self.settings.deadline, async move {
            service.provision(req).await
        })
        .await?
    }

    #[tracing::instrument(skip(self, req), fields(name = %req.name))]
    async fn provision(&self, req: CreateSiteRequest) -> Result<SiteCreated, DirectoryError> {
        let owner = normalize(&req.owner_email);
        let members: Vec<String> = req.member_emails.iter().map(|m| normalize(m)).collect();
        let visitors: Vec<String> = req.visitor_emails.iter().map(|v| normalize(v)).collect();

        let resolved = self
            .identities
            .resolve_all(std::iter::once(&owner).chain(&members).chain(&visitors))
            .await?;
        let owner_id = resolved
            .get(&owner)
            .cloned()
            .ok_or_else(|| DirectoryError::Internal(format!("owner '{}' was not resolved", owner)))?;

        let group_id = self.create_group(&req).await?;

        // A fresh group can take a while to accept references.
        match retry(&self.verification, "add_site_owner", || {
            self.directory.add_to_role(&group_id, GroupRole::Owner, &owner_id)
        })
        .await
        {
            Ok(()) => {}
            Err(RetryError::Terminal(e)) if e.is_already_exists() => {}
            Err(e) => return Err(e.into()),
        }

        let site = self.await_site(&group_id).await?;

        let (member_ids, mut labels) = pick(&resolved, &members);
        let directory = self.directory.as_ref();
        let group = group_id.as_str();
        let report = apply(
            &SyncPlan::additions(&member_ids, &BTreeSet::new()),
            |id: String| async move { directory.add_to_role(group, GroupRole::Member, &id).await },
            |_id: String| async { Ok::<(), RemoteError>(()) },
            &self.sync,
        )
        .await;
        let members_report = relabel(report, &labels);

        let (visitor_ids, visitor_labels) = pick(&resolved, &visitors);
        labels.extend(visitor_labels);
        let site_id = site.id.as_str();
        let report = apply(
            &SyncPlan::additions(&visitor_ids, &BTreeSet::new()),
            |id: String| async move { directory.grant_site_read(site_id, &id).await },
            |_id: String| async { Ok::<(), RemoteError>(()) },
            &self.sync,
        )
        .await;
        let visitors_report = relabel(report, &labels);

        tracing::info!(group_id = %group_id, site_url = %site.web_url, "Site provisioned");

        Ok(SiteCreated {
            group_id,
            site_id: site.id,
            site_url: site.web_url,
            members: members_report,
            visitors: visitors_report,
        })
    }

    async fn create_group(&self, req: &CreateSiteRequest) -> Result<String, DirectoryError> {
        let base = slugify(&req.name, "");
        if base.is_empty() {
            return Err(DirectoryError::InvalidRequest(
                "Name must contain at least one letter or digit".to_string(),
            ));
        }

        let policy = RetryPolicy::mutation().retrying(THROTTLE_KINDS);
        for attempt in 1..=MAX_ALIAS_ATTEMPTS {
            let group = NewGroup {
                display_name: req.name.clone(),
                mail_nickname: format!("{}-{}", base, random_suffix()),
                visibility: req.privacy.clone(),
                description: req.description.clone(),
            };

            match retry(&policy, "create_group", || self.directory.create_group(&group)).await {
                Ok(id) => return Ok(id),
                Err(RetryError::Terminal(e)) if is_nickname_collision(&e) => {
                    tracing::warn!(
                        attempt,
                        mail_nickname = %group.mail_nickname,
                        "Mail nickname taken, trying another"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(DirectoryError::Conflict(format!(
            "No free mail nickname for '{}' after {} attempts",
            req.name, MAX_ALIAS_ATTEMPTS
        )))
    }

    async fn await_site(&self, group_id: &str) -> Result<SiteInfo, DirectoryError> {
        let probe = ProvisioningProbe::new(
            group_id,
            self.settings.poll_attempts,
            self.settings.poll_interval,
        );
        let result = await_visible(probe, || self.directory.root_site(group_id)).await;

        let outcome = match &result {
            Ok(_) => "ready",
            Err(PollError::Timeout(_)) => "timeout",
            Err(PollError::Probe(_)) => "error",
        };
        metrics::counter!("site_provisioning_total", "outcome" => outcome).increment(1);

        result.map_err(|e| match e {
            PollError::Timeout(timeout) => DirectoryError::Provisioning {
                group_id: group_id.to_string(),
                source: timeout,
            },
            PollError::Probe(e) => e.into(),
        })
    }

    async fn observed(
        &self,
        group_id: &str,
        role: GroupRole,
    ) -> Result<(BTreeSet<String>, BTreeMap<String, String>), DirectoryError> {
        let users: Vec<DirectoryUser> = retry(&RetryPolicy::mutation(), "list_group_role", || {
            self.directory.list_role(group_id, role)
        })
        .await
        .map_err(|e| DirectoryError::from(e).or_not_found(format!("Group '{}'", group_id)))?;

        let mut ids = BTreeSet::new();
        let mut labels = BTreeMap::new();
        for user in users {
            if let Some(upn) = user.user_principal_name {
                labels.insert(user.id.clone(), upn);
            }
            ids.insert(user.id);
        }
        Ok((ids, labels))
    }

    async fn converge_role(
        &self,
        group_id: &str,
        role: GroupRole,
        plan: &SyncPlan<String>,
        options: &SyncOptions,
    ) -> SyncReport<String> {
        let directory = self.directory.as_ref();
        apply(
            plan,
            |id: String| async move { directory.add_to_role(group_id, role, &id).await },
            |id: String| async move { directory.remove_from_role(group_id, role, &id).await },
            options,
        )
        .await
    }

    /// Converge owners to `desired` without ever dropping the last one.
    ///
    /// Adds run first. Removes only run if the owners kept from `observed`
    /// plus the adds that went through leave at least one owner; otherwise
    /// they are reported as failed.
    async fn converge_owners(
        &self,
        group_id: &str,
        desired: &BTreeSet<String>,
        observed: &BTreeSet<String>,
    ) -> SyncReport<String> {
        let plan = SyncPlan::new(desired, observed);
        let options = self.options_for(GroupRole::Owner);

        let mut report = self
            .converge_role(
                group_id,
                GroupRole::Owner,
                &SyncPlan::additions(&plan.to_add, observed),
                &options,
            )
            .await;
        if plan.to_remove.is_empty() {
            return report;
        }

        let kept = observed.len() - plan.to_remove.len();
        let added = report.outcomes.iter().filter(|o| o.is_success()).count();
        if kept + added == 0 {
            tracing::warn!(
                group_id,
                withheld = plan.to_remove.len(),
                "No new owner was added; keeping the current owners"
            );
            report.merge(withheld(plan.to_remove));
            return report;
        }

        report.merge(
            self.converge_role(
                group_id,
                GroupRole::Owner,
                &SyncPlan::removals(&plan.to_remove, observed),
                &options,
            )
            .await,
        );
        report
    }

    fn options_for(&self, role: GroupRole) -> SyncOptions {
        match role {
            GroupRole::Owner => self.sync.clone().adds_first(),
            GroupRole::Member => self.sync.clone(),
        }
    }

    /// Add the given users to `role`. Users already holding it are reported
    /// as unchanged.
    #[tracing::instrument(skip(self, upns), fields(count = upns.len()))]
    pub async fn add_to_role(
        &self,
        group_id: &str,
        role: GroupRole,
        upns: &[String],
    ) -> Result<SyncReport<String>, DirectoryError> {
        let requested: Vec<String> = upns.iter().map(|u| normalize(u)).collect();
        let resolved = self.identities.resolve_all(&requested).await?;
        let (wanted, labels) = pick(&resolved, &requested);
        let (observed, _) = self.observed(group_id, role).await?;

        let plan = SyncPlan::additions(&wanted, &observed);
        let mut report = self
            .converge_role(group_id, role, &plan, &self.options_for(role))
            .await;
        report.merge(unchanged(
            wanted.intersection(&observed).cloned(),
            SyncAction::Add,
        ));
        Ok(relabel(report, &labels))
    }

    /// Remove the given users from `role`. A group is never left without
    /// an owner.
    #[tracing::instrument(skip(self, upns), fields(count = upns.len()))]
    pub async fn remove_from_role(
        &self,
        group_id: &str,
        role: GroupRole,
        upns: &[String],
    ) -> Result<SyncReport<String>, DirectoryError> {
        let requested: Vec<String> = upns.iter().map(|u| normalize(u)).collect();
        let resolved = self.identities.resolve_all(&requested).await?;
        let (unwanted, labels) = pick(&resolved, &requested);
        let (observed, _) = self.observed(group_id, role).await?;

        if role == GroupRole::Owner && !observed.is_empty() && observed.is_subset(&unwanted) {
            return Err(DirectoryError::InvalidRequest(OWNER_FLOOR_REASON.to_string()));
        }

        let plan = SyncPlan::removals(&unwanted, &observed);
        let mut report = self
            .converge_role(group_id, role, &plan, &self.options_for(role))
            .await;
        report.merge(unchanged(
            unwanted.difference(&observed).cloned(),
            SyncAction::Remove,
        ));
        Ok(relabel(report, &labels))
    }

    /// Converge owners and members to the requested sets. Owners are added
    /// before any are removed, and the last owner is never removed.
    #[tracing::instrument(skip(self, req))]
    pub async fn set_membership(
        &self,
        group_id: &str,
        req: MembershipRequest,
    ) -> Result<MembershipChanged, DirectoryError> {
        let owners: Option<Vec<String>> = req
            .owners
            .map(|list| list.iter().map(|o| normalize(o)).collect());
        let members: Option<Vec<String>> = req
            .members
            .map(|list| list.iter().map(|m| normalize(m)).collect());

        if matches!(&owners, Some(list) if list.is_empty()) {
            return Err(DirectoryError::InvalidRequest(OWNER_FLOOR_REASON.to_string()));
        }

        let resolved = self
            .identities
            .resolve_all(owners.iter().flatten().chain(members.iter().flatten()))
            .await?;

        let mut result = MembershipChanged {
            group_id: group_id.to_string(),
            owners: SyncReport::default(),
            members: SyncReport::default(),
        };

        for (role, requested) in [(GroupRole::Owner, &owners), (GroupRole::Member, &members)] {
            let Some(requested) = requested else {
                continue;
            };
            let (desired, mut labels) = pick(&resolved, requested);
            let (observed, observed_labels) = self.observed(group_id, role).await?;
            for (id, upn) in observed_labels {
                labels.entry(id).or_insert(upn);
            }

            let report = match role {
                GroupRole::Owner => self.converge_owners(group_id, &desired, &observed).await,
                GroupRole::Member => {
                    let plan = SyncPlan::new(&desired, &observed);
                    self.converge_role(group_id, role, &plan, &self.options_for(role))
                        .await
                }
            };
            let report = relabel(report, &labels);

            match role {
                GroupRole::Owner => result.owners = report,
                GroupRole::Member => result.members = report,
            }
        }

        Ok(result)
    }

    /// Soft-delete the group, then purge it from the recycle bin.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, group_id: &str) -> Result<DeleteOutcome, DirectoryError> {
        let directory = self.directory.as_ref();
        two_phase_delete(
            group_id,
            || async move {
                retry(&RetryPolicy::mutation(), "delete_group", || {
                    directory.delete_group(group_id)
                })
                .await
                .map_err(RetryError::into_inner)
            },
            || directory.purge_deleted_group(group_id),
            &self.settings.purge,
        )
        .await
        .map_err(|e| DirectoryError::from_delete(group_id, e))
    }
}

/// Object ids for `addresses`, with each id labelled by its address.
fn pick(
    resolved: &BTreeMap<String, String>,
    addresses: &[String],
) -> (BTreeSet<String>, BTreeMap<String, String>) {
    let mut ids = BTreeSet::new();
    let mut labels = BTreeMap::new();
    for address in addresses {
        if let Some(id) = resolved.get(address) {
            ids.insert(id.clone());
            labels.insert(id.clone(), address.clone());
        }
    }
    (ids, labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nickname_collision_detection() {
        assert!(is_nickname_collision(&RemoteError::status(
            "graph",
            400,
            "Another object with the same value for property mailNickname already exists."
        )));
        assert!(is_nickname_collision(&RemoteError::status(
            "graph",
            400,
            "Invalid value specified for property 'mailNickname' of resource 'Group'."
        )));
        assert!(!is_nickname_collision(&RemoteError::status(
            "graph",
            400,
            "Invalid value specified for property 'visibility'."
        )));
        assert!(!is_nickname_collision(&RemoteError::status("graph", 503, "busy")));
    }

    #[test]
    fn test_pick_labels_ids_with_addresses() {
        let resolved = BTreeMap::from([
            ("a@contoso.com".to_string(), "oid-a".to_string()),
            ("b@contoso.com".to_string(), "oid-b".to_string()),
        ]);
        let (ids, labels) = pick(&resolved, &["b@contoso.com".to_string()]);
        assert_eq!(ids, BTreeSet::from(["oid-b".to_string()]));
        assert_eq!(labels["oid-b"], "b@contoso.com");
    }
}
