use super::error::DirectoryError;
use super::exchange::{DistributionGroup, DistributionGroupChanges, MailDirectory, NewDistributionGroup, Recipient};
use super::identity::{normalize, relabel, IdentityResolver};
use super::remote::RemoteError;
use crate::dtos::distribution_list::{
    CreateDistributionListRequest, DistributionListCreated, DistributionListDetails,
    DistributionListUpdated, UpdateDistributionListRequest,
};
use crate::utils::slugify;
use service_core::resilience::{
    apply, plan_and_apply, retry, DeleteOutcome, RetryError, RetryPolicy, SyncOptions, SyncPlan,
    SyncReport, THROTTLE_KINDS,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Canonical identity and display address of the current members.
///
/// Members without a directory object id (contacts, nested groups) are keyed
/// by their lowercased address.
fn observed_members(recipients: Vec<Recipient>) -> (BTreeSet<String>, BTreeMap<String, String>) {
    let mut observed = BTreeSet::new();
    let mut labels = BTreeMap::new();
    for recipient in recipients {
        let address = recipient.primary_smtp_address.unwrap_or_default();
        let canonical = match recipient.external_directory_object_id {
            Some(id) if !id.is_empty() => id,
            _ if !address.is_empty() => format!("smtp:{}", normalize(&address)),
            _ => continue,
        };
        labels.insert(canonical.clone(), address);
        observed.insert(canonical);
    }
    (observed, labels)
}

pub struct DistributionListService {
    mail: Arc<dyn MailDirectory>,
    identities: Arc<IdentityResolver>,
    custom_domain: String,
    owners_as_members: bool,
    sync: SyncOptions,
    verification: RetryPolicy,
}

impl DistributionListService {
    pub fn new(
        mail: Arc<dyn MailDirectory>,
        identities: Arc<IdentityResolver>,
        custom_domain: impl Into<String>,
        owners_as_members: bool,
        sync: SyncOptions,
    ) -> Self {
        Self {
            mail,
            identities,
            custom_domain: custom_domain.into(),
            owners_as_members,
            sync,
            verification: RetryPolicy::verification(),
        }
    }

    fn alias_for(name: &str) -> Result<String, DirectoryError> {
        let alias = slugify(name, "-");
        if alias.is_empty() {
            return Err(DirectoryError::InvalidRequest(
                "Name must contain at least one letter or digit".to_string(),
            ));
        }
        Ok(alias)
    }

    fn address_for(&self, alias: &str) -> String {
        format!("{}@{}", alias, self.custom_domain)
    }

    async fn fetch_group(&self, dl_id: &str) -> Result<DistributionGroup, DirectoryError> {
        retry(&RetryPolicy::mutation(), "get_distribution_group", || {
            self.mail.get_group(dl_id)
        })
        .await
        .map_err(|e| DirectoryError::from(e).or_not_found(format!("Distribution list '{}'", dl_id)))
    }

    async fn fetch_members(&self, dl_id: &str) -> Result<Vec<Recipient>, DirectoryError> {
        Ok(retry(&RetryPolicy::mutation(), "list_distribution_group_members", || {
            self.mail.list_members(dl_id)
        })
        .await?)
    }

    /// Add and remove members so the group holds exactly `desired`.
    ///
    /// `labels` maps canonical ids to the address used when adding.
    async fn converge_members(
        &self,
        alias: &str,
        desired: &BTreeSet<String>,
        observed: &BTreeSet<String>,
        labels: &BTreeMap<String, String>,
    ) -> SyncReport<String> {
        let mail = self.mail.as_ref();
        let report = plan_and_apply(
            desired,
            observed,
            |id: String| {
                let member = labels.get(&id).cloned().unwrap_or(id);
                async move { mail.add_member(alias, &member).await }
            },
            |id: String| {
                let member = labels.get(&id).cloned().unwrap_or(id);
                async move { mail.remove_member(alias, &member).await }
            },
            &self.sync,
        )
        .await;
        relabel(report, labels)
    }

    #[tracing::instrument(skip(self, req), fields(name = %req.name))]
    pub async fn create(
        &self,
        req: CreateDistributionListRequest,
    ) -> Result<DistributionListCreated, DirectoryError> {
        let alias = Self::alias_for(&req.name)?;
        let owners: Vec<String> = req.owner_emails.iter().map(|o| normalize(o)).collect();
        let members: Vec<String> = req
            .member_emails
            .unwrap_or_default()
            .iter()
            .map(|m| normalize(m))
            .collect();
        let anchor = owners.first().cloned().ok_or_else(|| {
            DirectoryError::InvalidRequest("At least one owner is required".to_string())
        })?;

        let resolved = self.identities.resolve_all(owners.iter().chain(members.iter())).await?;

        let primary_email = self.address_for(&alias);
        let group = NewDistributionGroup {
            name: alias.clone(),
            display_name: req.name.clone(),
            alias: alias.clone(),
            managed_by: owners.clone(),
            primary_smtp_address: primary_email.clone(),
            require_sender_authentication_enabled: !req.allow_external_senders,
        };

        // Creation is not idempotent: only throttling is safe to retry.
        let created = retry(
            &RetryPolicy::mutation().retrying(THROTTLE_KINDS),
            "create_distribution_group",
            || self.mail.create_group(&group, &anchor),
        )
        .await;
        match created {
            Ok(()) => {}
            Err(RetryError::Terminal(e)) if e.is_already_exists() => {
                return Err(DirectoryError::Conflict(format!(
                    "Distribution list '{}' already exists",
                    alias
                )));
            }
            Err(e) => return Err(e.into()),
        }

        retry(&self.verification, "verify_distribution_group", || {
            self.mail.get_group(&alias)
        })
        .await?;

        let mut wanted: BTreeSet<&String> = members.iter().collect();
        if self.owners_as_members {
            wanted.extend(owners.iter());
        }
        let mut desired = BTreeSet::new();
        let mut labels = BTreeMap::new();
        for address in wanted {
            if let Some(id) = resolved.get(address) {
                desired.insert(id.clone());
                labels.insert(id.clone(), address.clone());
            }
        }

        let mail = self.mail.as_ref();
        let alias_ref = alias.as_str();
        let labels_ref = &labels;
        let report = apply(
            &SyncPlan::additions(&desired, &BTreeSet::new()),
            |id: String| {
                let member = labels_ref.get(&id).cloned().unwrap_or(id);
                async move { mail.add_member(alias_ref, &member).await }
            },
            |_id: String| async { Ok::<(), RemoteError>(()) },
            &self.sync,
        )
        .await;
        let members = relabel(report, &labels);

        if !members.is_complete() {
            tracing::warn!(
                dl_id = %alias,
                failed = members.failures().count(),
                "Distribution list created with missing members"
            );
        }

        metrics::counter!("distribution_lists_created_total").increment(1);

        Ok(DistributionListCreated {
            dl_id: alias,
            primary_email,
            members,
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn get(&self, dl_id: &str) -> Result<DistributionListDetails, DirectoryError> {
        let group = self.fetch_group(dl_id).await?;
        let members = self
            .fetch_members(dl_id)
            .await?
            .into_iter()
            .filter_map(|m| m.primary_smtp_address)
            .collect();
        let owners = self.identities.principal_names(&group.managed_by).await?;

        Ok(DistributionListDetails {
            dl_id: group.name.clone(),
            name: group.name,
            display_name: group.display_name,
            primary_email: group.primary_smtp_address,
            owners,
            members,
            allow_external_senders: !group.require_sender_authentication_enabled,
        })
    }

    #[tracing::instrument(skip(self, req))]
    pub async fn update(
        &self,
        dl_id: &str,
        req: UpdateDistributionListRequest,
    ) -> Result<DistributionListUpdated, DirectoryError> {
        // Reject unknown users before changing anything.
        let owners: Option<Vec<String>> = req
            .owner_emails
            .as_ref()
            .map(|list| list.iter().map(|o| normalize(o)).collect());
        let members: Option<Vec<String>> = req
            .member_emails
            .as_ref()
            .map(|list| list.iter().map(|m| normalize(m)).collect());
        let resolved = self
            .identities
            .resolve_all(owners.iter().flatten().chain(members.iter().flatten()))
            .await?;

        let current = self.fetch_group(dl_id).await?;
        let mut alias = current.name.clone();
        let mut changes = DistributionGroupChanges::default();

        if let Some(name) = req.name.as_deref() {
            let new_alias = Self::alias_for(name)?;
            changes.name = Some(new_alias.clone());
            changes.alias = Some(new_alias.clone());
            changes.primary_smtp_address = Some(self.address_for(&new_alias));
            alias = new_alias;
        }
        changes.display_name = req.display_name.clone();
        changes.require_sender_authentication_enabled = req.allow_external_senders.map(|allow| !allow);

        if !changes.is_empty() {
            retry(&RetryPolicy::mutation(), "set_distribution_group", || {
                self.mail.set_group(&current.name, &changes)
            })
            .await?;
        }

        if let Some(owners) = owners.as_ref() {
            let managed_by = DistributionGroupChanges {
                managed_by: Some(owners.clone()),
                ..Default::default()
            };
            retry(&RetryPolicy::mutation(), "set_distribution_group_owners", || {
                self.mail.set_group(&alias, &managed_by)
            })
            .await?;
        }

        let mut report = SyncReport::default();
        if let Some(members) = members.as_ref() {
            let mut desired = BTreeSet::new();
            let mut labels = BTreeMap::new();
            for address in members {
                if let Some(id) = resolved.get(address) {
                    desired.insert(id.clone());
                    labels.insert(id.clone(), address.clone());
                }
            }

            if self.owners_as_members {
                match owners.as_ref() {
                    Some(owners) => {
                        for address in owners {
                            if let Some(id) = resolved.get(address) {
                                desired.insert(id.clone());
                                labels.insert(id.clone(), address.clone());
                            }
                        }
                    }
                    // ManagedBy already holds object ids.
                    None => {
                        for id in &current.managed_by {
                            if let Some(upn) = self.identities.principal_name(id).await? {
                                desired.insert(id.clone());
                                labels.insert(id.clone(), upn);
                            }
                        }
                    }
                }
            }

            let (observed, observed_labels) = observed_members(self.fetch_members(&alias).await?);
            for (id, address) in observed_labels {
                labels.entry(id).or_insert(address);
            }

            report = self.converge_members(&alias, &desired, &observed, &labels).await;
        }

        Ok(DistributionListUpdated {
            dl_id: alias,
            message: "Distribution list updated successfully".to_string(),
            members: report,
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, dl_id: &str) -> Result<DeleteOutcome, DirectoryError> {
        let removed = retry(&RetryPolicy::mutation(), "remove_distribution_group", || {
            self.mail.remove_group(dl_id)
        })
        .await;

        match removed {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(RetryError::Terminal(e)) if e.is_not_found() => {
                tracing::info!(dl_id, "Distribution list already absent");
                Ok(DeleteOutcome::NotFound)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observed_members_prefers_object_id() {
        let (observed, labels) = observed_members(vec![
            Recipient {
                primary_smtp_address: Some("Jane@Contoso.com".to_string()),
                external_directory_object_id: Some("oid-jane".to_string()),
            },
            Recipient {
                primary_smtp_address: Some("Partner@Fabrikam.com".to_string()),
                external_directory_object_id: None,
            },
            Recipient {
                primary_smtp_address: None,
                external_directory_object_id: None,
            },
        ]);

        assert_eq!(
            observed,
            BTreeSet::from(["oid-jane".to_string(), "smtp:partner@fabrikam.com".to_string()])
        );
        assert_eq!(labels["oid-jane"], "Jane@Contoso.com");
        assert_eq!(labels["smtp:partner@fabrikam.com"], "Partner@Fabrikam.com");
    }

    #[test]
    fn test_alias_requires_alphanumerics() {
        assert_eq!(DistributionListService::alias_for("Sales Team").unwrap(), "sales-team");
        assert!(matches!(
            DistributionListService::alias_for("!!!"),
            Err(DirectoryError::InvalidRequest(_))
        ));
    }
}
