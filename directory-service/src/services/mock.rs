//! In-memory backends for tests and local runs.
//!
//! Users are identified by UPN; each known user's object id is `oid-<upn>`.

use super::exchange::{
    DistributionGroup, DistributionGroupChanges, MailDirectory, NewDistributionGroup, Recipient,
};
use super::graph::{DirectoryUser, GroupDirectory, GroupRole, NewGroup, SiteInfo};
use super::helpdesk::{NewTicket, TicketChanges, TicketDesk, TicketRecord};
use super::remote::RemoteError;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Take one unit from `counter` if any remain.
fn take(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn throttled(system: &'static str) -> RemoteError {
    RemoteError::Status {
        system,
        status: 429,
        message: "Too many requests".to_string(),
        retry_after: None,
    }
}

#[derive(Default)]
pub struct MockUsers {
    upns: Mutex<BTreeSet<String>>,
}

impl MockUsers {
    pub fn with(upns: &[&str]) -> Arc<Self> {
        let users = Self::default();
        for upn in upns {
            users.add(upn);
        }
        Arc::new(users)
    }

    pub fn add(&self, upn: &str) {
        self.upns.lock().unwrap().insert(upn.to_lowercase());
    }

    pub fn object_id(upn: &str) -> String {
        format!("oid-{}", upn.to_lowercase())
    }

    fn id_of(&self, upn: &str) -> Option<String> {
        let upn = upn.to_lowercase();
        self.upns
            .lock()
            .unwrap()
            .contains(&upn)
            .then(|| Self::object_id(&upn))
    }

    fn upn_of(&self, object_id: &str) -> Option<String> {
        let upn = object_id.strip_prefix("oid-")?;
        self.upns.lock().unwrap().contains(upn).then(|| upn.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockGroup {
    pub display_name: String,
    pub mail_nickname: String,
    pub visibility: String,
    pub owners: BTreeSet<String>,
    pub members: BTreeSet<String>,
    pub readers: BTreeSet<String>,
}

/// Unified groups whose sites appear after a configurable number of probes.
pub struct MockGroupDirectory {
    users: Arc<MockUsers>,
    groups: Mutex<BTreeMap<String, MockGroup>>,
    recycle_bin: Mutex<BTreeSet<String>>,
    site_probes: Mutex<BTreeMap<String, u32>>,
    site_ready_after: u32,
    nickname_collisions: AtomicU32,
    forbidden: Mutex<BTreeSet<String>>,
    next_id: AtomicU32,
    user_lookups: AtomicU32,
    purge_calls: AtomicU32,
}

impl MockGroupDirectory {
    pub fn new(users: Arc<MockUsers>) -> Self {
        Self {
            users,
            groups: Mutex::new(BTreeMap::new()),
            recycle_bin: Mutex::new(BTreeSet::new()),
            site_probes: Mutex::new(BTreeMap::new()),
            site_ready_after: 0,
            nickname_collisions: AtomicU32::new(0),
            forbidden: Mutex::new(BTreeSet::new()),
            next_id: AtomicU32::new(1),
            user_lookups: AtomicU32::new(0),
            purge_calls: AtomicU32::new(0),
        }
    }

    /// The root site stays invisible for the first `probes` lookups.
    pub fn with_site_ready_after(mut self, probes: u32) -> Self {
        self.site_ready_after = probes;
        self
    }

    /// Reject the next `count` group creations with a nickname clash.
    pub fn with_nickname_collisions(self, count: u32) -> Self {
        self.nickname_collisions.store(count, Ordering::SeqCst);
        self
    }

    /// Adding this user to any role fails with 403.
    pub fn forbid(&self, upn: &str) {
        self.forbidden.lock().unwrap().insert(MockUsers::object_id(upn));
    }

    /// Insert a group directly, owned by `owners`.
    pub fn seed_group(&self, group_id: &str, owners: &[&str], members: &[&str]) {
        let group = MockGroup {
            display_name: group_id.to_string(),
            mail_nickname: group_id.to_string(),
            visibility: "Private".to_string(),
            owners: owners.iter().map(|u| MockUsers::object_id(u)).collect(),
            members: members.iter().map(|u| MockUsers::object_id(u)).collect(),
            readers: BTreeSet::new(),
        };
        self.groups.lock().unwrap().insert(group_id.to_string(), group);
    }

    pub fn group(&self, group_id: &str) -> Option<MockGroup> {
        self.groups.lock().unwrap().get(group_id).cloned()
    }

    pub fn group_ids(&self) -> Vec<String> {
        self.groups.lock().unwrap().keys().cloned().collect()
    }

    pub fn in_recycle_bin(&self, group_id: &str) -> bool {
        self.recycle_bin.lock().unwrap().contains(group_id)
    }

    pub fn site_probes(&self, group_id: &str) -> u32 {
        self.site_probes
            .lock()
            .unwrap()
            .get(group_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn user_lookups(&self) -> u32 {
        self.user_lookups.load(Ordering::SeqCst)
    }

    pub fn purge_calls(&self) -> u32 {
        self.purge_calls.load(Ordering::SeqCst)
    }

    fn missing_group(group_id: &str) -> RemoteError {
        RemoteError::not_found("graph", format!("Resource '{}' does not exist", group_id))
    }

    fn role_set(group: &mut MockGroup, role: GroupRole) -> &mut BTreeSet<String> {
        match role {
            GroupRole::Owner => &mut group.owners,
            GroupRole::Member => &mut group.members,
        }
    }
}

#[async_trait]
impl GroupDirectory for MockGroupDirectory {
    async fn find_user(&self, upn: &str) -> Result<Option<String>, RemoteError> {
        self.user_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.users.id_of(upn))
    }

    async fn user_principal_name(&self, object_id: &str) -> Result<Option<String>, RemoteError> {
        Ok(self.users.upn_of(object_id))
    }

    async fn create_group(&self, group: &NewGroup) -> Result<String, RemoteError> {
        if take(&self.nickname_collisions) {
            return Err(RemoteError::status(
                "graph",
                400,
                "Another object with the same value for property mailNickname already exists.",
            ));
        }

        let id = format!("group-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let created = MockGroup {
            display_name: group.display_name.clone(),
            mail_nickname: group.mail_nickname.clone(),
            visibility: group.visibility.clone(),
            ..Default::default()
        };
        self.groups.lock().unwrap().insert(id.clone(), created);
        Ok(id)
    }

    async fn list_role(&self, group_id: &str, role: GroupRole) -> Result<Vec<DirectoryUser>, RemoteError> {
        let mut groups = self.groups.lock().unwrap();
        let group = groups
            .get_mut(group_id)
            .ok_or_else(|| Self::missing_group(group_id))?;
        Ok(Self::role_set(group, role)
            .iter()
            .map(|id| DirectoryUser {
                id: id.clone(),
                user_principal_name: self.users.upn_of(id),
            })
            .collect())
    }

    async fn add_to_role(&self, group_id: &str, role: GroupRole, object_id: &str) -> Result<(), RemoteError> {
        if self.forbidden.lock().unwrap().contains(object_id) {
            return Err(RemoteError::status(
                "graph",
                403,
                "Insufficient privileges to complete the operation.",
            ));
        }

        let mut groups = self.groups.lock().unwrap();
        let group = groups
            .get_mut(group_id)
            .ok_or_else(|| Self::missing_group(group_id))?;
        if !Self::role_set(group, role).insert(object_id.to_string()) {
            return Err(RemoteError::status(
                "graph",
                400,
                "One or more added object references already exist for the following modified properties: 'members'.",
            ));
        }
        Ok(())
    }

    async fn remove_from_role(&self, group_id: &str, role: GroupRole, object_id: &str) -> Result<(), RemoteError> {
        let mut groups = self.groups.lock().unwrap();
        let group = groups
            .get_mut(group_id)
            .ok_or_else(|| Self::missing_group(group_id))?;
        if !Self::role_set(group, role).remove(object_id) {
            return Err(Self::missing_group(object_id));
        }
        Ok(())
    }

    async fn root_site(&self, group_id: &str) -> Result<Option<SiteInfo>, RemoteError> {
        let probes = {
            let mut counts = self.site_probes.lock().unwrap();
            let count = counts.entry(group_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        let groups = self.groups.lock().unwrap();
        let group = groups
            .get(group_id)
            .ok_or_else(|| Self::missing_group(group_id))?;
        if probes <= self.site_ready_after {
            return Ok(None);
        }
        Ok(Some(SiteInfo {
            id: format!("site-{}", group_id),
            web_url: format!("https://contoso.sharepoint.com/sites/{}", group.mail_nickname),
        }))
    }

    async fn grant_site_read(&self, site_id: &str, object_id: &str) -> Result<(), RemoteError> {
        let group_id = site_id.strip_prefix("site-").unwrap_or(site_id);
        let mut groups = self.groups.lock().unwrap();
        let group = groups
            .get_mut(group_id)
            .ok_or_else(|| Self::missing_group(site_id))?;
        group.readers.insert(object_id.to_string());
        Ok(())
    }

    async fn delete_group(&self, group_id: &str) -> Result<(), RemoteError> {
        self.groups
            .lock()
            .unwrap()
            .remove(group_id)
            .ok_or_else(|| Self::missing_group(group_id))?;
        self.recycle_bin.lock().unwrap().insert(group_id.to_string());
        Ok(())
    }

    async fn purge_deleted_group(&self, group_id: &str) -> Result<(), RemoteError> {
        self.purge_calls.fetch_add(1, Ordering::SeqCst);
        if self.recycle_bin.lock().unwrap().remove(group_id) {
            Ok(())
        } else {
            Err(Self::missing_group(group_id))
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockDistributionList {
    pub name: String,
    pub display_name: String,
    pub primary_smtp_address: String,
    /// Owner object ids, as the admin API reports them.
    pub managed_by: Vec<String>,
    pub require_sender_authentication_enabled: bool,
    /// Lowercased member addresses.
    pub members: BTreeSet<String>,
    reads: u32,
}

/// Distribution groups that only become readable after `visible_after` reads.
pub struct MockMailDirectory {
    users: Arc<MockUsers>,
    groups: Mutex<BTreeMap<String, MockDistributionList>>,
    visible_after: u32,
    throttled_creates: AtomicU32,
    create_calls: AtomicU32,
    rejected: Mutex<BTreeSet<String>>,
}

impl MockMailDirectory {
    pub fn new(users: Arc<MockUsers>) -> Self {
        Self {
            users,
            groups: Mutex::new(BTreeMap::new()),
            visible_after: 0,
            throttled_creates: AtomicU32::new(0),
            create_calls: AtomicU32::new(0),
            rejected: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn with_visible_after(mut self, reads: u32) -> Self {
        self.visible_after = reads;
        self
    }

    pub fn with_throttled_creates(self, count: u32) -> Self {
        self.throttled_creates.store(count, Ordering::SeqCst);
        self
    }

    pub fn group(&self, identity: &str) -> Option<MockDistributionList> {
        let groups = self.groups.lock().unwrap();
        Self::key_for(&groups, identity).and_then(|key| groups.get(&key).cloned())
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Adding this address as a member fails with 403.
    pub fn reject_member(&self, address: &str) {
        self.rejected.lock().unwrap().insert(address.to_lowercase());
    }

    /// Add a member address directly, e.g. a contact with no directory user.
    pub fn seed_member(&self, identity: &str, address: &str) {
        let mut groups = self.groups.lock().unwrap();
        if let Some(key) = Self::key_for(&groups, identity) {
            if let Some(group) = groups.get_mut(&key) {
                group.members.insert(address.to_lowercase());
            }
        }
    }

    fn key_for(groups: &BTreeMap<String, MockDistributionList>, identity: &str) -> Option<String> {
        let identity = identity.to_lowercase();
        groups
            .iter()
            .find(|(name, g)| **name == identity || g.primary_smtp_address.to_lowercase() == identity)
            .map(|(name, _)| name.clone())
    }

    fn missing(identity: &str) -> RemoteError {
        RemoteError::status(
            "exchange",
            400,
            format!(
                "The operation couldn't be performed because object '{}' couldn't be found.",
                identity
            ),
        )
    }

    fn owner_ids(&self, owners: &[String]) -> Vec<String> {
        owners.iter().filter_map(|o| self.users.id_of(o)).collect()
    }
}

#[async_trait]
impl MailDirectory for MockMailDirectory {
    async fn create_group(&self, group: &NewDistributionGroup, _anchor: &str) -> Result<(), RemoteError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if take(&self.throttled_creates) {
            return Err(throttled("exchange"));
        }

        let mut groups = self.groups.lock().unwrap();
        if Self::key_for(&groups, &group.alias).is_some() {
            return Err(RemoteError::status(
                "exchange",
                400,
                format!(
                    "The name '{}' is already being used. Please try another name.",
                    group.alias
                ),
            ));
        }

        groups.insert(
            group.alias.to_lowercase(),
            MockDistributionList {
                name: group.name.clone(),
                display_name: group.display_name.clone(),
                primary_smtp_address: group.primary_smtp_address.clone(),
                managed_by: self.owner_ids(&group.managed_by),
                require_sender_authentication_enabled: group.require_sender_authentication_enabled,
                members: BTreeSet::new(),
                reads: 0,
            },
        );
        Ok(())
    }

    async fn get_group(&self, identity: &str) -> Result<DistributionGroup, RemoteError> {
        let mut groups = self.groups.lock().unwrap();
        let key = Self::key_for(&groups, identity).ok_or_else(|| Self::missing(identity))?;
        let group = groups.get_mut(&key).ok_or_else(|| Self::missing(identity))?;
        group.reads += 1;
        if group.reads <= self.visible_after {
            return Err(Self::missing(identity));
        }
        Ok(DistributionGroup {
            name: group.name.clone(),
            display_name: group.display_name.clone(),
            primary_smtp_address: group.primary_smtp_address.clone(),
            managed_by: group.managed_by.clone(),
            require_sender_authentication_enabled: group.require_sender_authentication_enabled,
        })
    }

    async fn set_group(&self, identity: &str, changes: &DistributionGroupChanges) -> Result<(), RemoteError> {
        let mut groups = self.groups.lock().unwrap();
        let key = Self::key_for(&groups, identity).ok_or_else(|| Self::missing(identity))?;
        let mut group = groups.remove(&key).ok_or_else(|| Self::missing(identity))?;

        if let Some(name) = &changes.name {
            group.name = name.clone();
        }
        if let Some(address) = &changes.primary_smtp_address {
            group.primary_smtp_address = address.clone();
        }
        if let Some(display_name) = &changes.display_name {
            group.display_name = display_name.clone();
        }
        if let Some(required) = changes.require_sender_authentication_enabled {
            group.require_sender_authentication_enabled = required;
        }
        if let Some(owners) = &changes.managed_by {
            group.managed_by = self.owner_ids(owners);
        }

        let key = changes.alias.as_deref().unwrap_or(&key).to_lowercase();
        groups.insert(key, group);
        Ok(())
    }

    async fn list_members(&self, identity: &str) -> Result<Vec<Recipient>, RemoteError> {
        let group = self.group(identity).ok_or_else(|| Self::missing(identity))?;
        Ok(group
            .members
            .iter()
            .map(|address| Recipient {
                primary_smtp_address: Some(address.clone()),
                external_directory_object_id: self.users.id_of(address),
            })
            .collect())
    }

    async fn add_member(&self, identity: &str, member: &str) -> Result<(), RemoteError> {
        if self.rejected.lock().unwrap().contains(&member.to_lowercase()) {
            return Err(RemoteError::status(
                "exchange",
                403,
                "Access denied. The user isn't allowed to manage this group.",
            ));
        }
        if self.users.id_of(member).is_none() {
            return Err(RemoteError::status(
                "exchange",
                400,
                format!("Couldn't find object \"{}\".", member),
            ));
        }

        let mut groups = self.groups.lock().unwrap();
        let key = Self::key_for(&groups, identity).ok_or_else(|| Self::missing(identity))?;
        let group = groups.get_mut(&key).ok_or_else(|| Self::missing(identity))?;
        if !group.members.insert(member.to_lowercase()) {
            return Err(RemoteError::status(
                "exchange",
                400,
                format!("The recipient \"{}\" is already a member of the group.", member),
            ));
        }
        Ok(())
    }

    async fn remove_member(&self, identity: &str, member: &str) -> Result<(), RemoteError> {
        let mut groups = self.groups.lock().unwrap();
        let key = Self::key_for(&groups, identity).ok_or_else(|| Self::missing(identity))?;
        let group = groups.get_mut(&key).ok_or_else(|| Self::missing(identity))?;
        if !group.members.remove(&member.to_lowercase()) {
            return Err(RemoteError::status(
                "exchange",
                400,
                format!("The recipient \"{}\" isn't a member of the group.", member),
            ));
        }
        Ok(())
    }

    async fn remove_group(&self, identity: &str) -> Result<(), RemoteError> {
        let mut groups = self.groups.lock().unwrap();
        let key = Self::key_for(&groups, identity).ok_or_else(|| Self::missing(identity))?;
        groups.remove(&key);
        Ok(())
    }
}

/// Ticket store that can throttle or fail the next calls.
#[derive(Default)]
pub struct MockTicketDesk {
    tickets: Mutex<BTreeMap<u64, TicketRecord>>,
    next_id: AtomicU64,
    throttled_calls: AtomicU32,
    unavailable_calls: AtomicU32,
    create_calls: AtomicU32,
}

impl MockTicketDesk {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            ..Default::default()
        }
    }

    /// Answer the next `count` calls with 429.
    pub fn with_throttled_calls(self, count: u32) -> Self {
        self.throttled_calls.store(count, Ordering::SeqCst);
        self
    }

    /// Answer the next `count` calls with 503.
    pub fn with_unavailable_calls(self, count: u32) -> Self {
        self.make_unavailable(count);
        self
    }

    pub fn make_unavailable(&self, count: u32) {
        self.unavailable_calls.store(count, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn ticket(&self, id: u64) -> Option<TicketRecord> {
        self.tickets.lock().unwrap().get(&id).cloned()
    }

    fn injected_failure(&self) -> Option<RemoteError> {
        if take(&self.throttled_calls) {
            return Some(throttled("helpdesk"));
        }
        if take(&self.unavailable_calls) {
            return Some(RemoteError::status("helpdesk", 503, "Service Unavailable"));
        }
        None
    }
}

#[async_trait]
impl TicketDesk for MockTicketDesk {
    async fn create_ticket(&self, ticket: &NewTicket) -> Result<TicketRecord, RemoteError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.injected_failure() {
            return Err(err);
        }

        let now = chrono::Utc::now();
        let record = TicketRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            subject: ticket.subject.clone(),
            priority: ticket.priority,
            status: ticket.status,
            requester_id: Some(7),
            tags: ticket.tags.clone(),
            created_at: Some(now),
            updated_at: Some(now),
        };
        self.tickets.lock().unwrap().insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_ticket(&self, id: u64, changes: &TicketChanges) -> Result<TicketRecord, RemoteError> {
        if let Some(err) = self.injected_failure() {
            return Err(err);
        }

        let mut tickets = self.tickets.lock().unwrap();
        let record = tickets
            .get_mut(&id)
            .ok_or_else(|| RemoteError::not_found("helpdesk", "Resource not found"))?;
        if let Some(subject) = &changes.subject {
            record.subject = subject.clone();
        }
        if let Some(priority) = changes.priority {
            record.priority = priority;
        }
        if let Some(status) = changes.status {
            record.status = status;
        }
        if let Some(tags) = &changes.tags {
            record.tags = tags.clone();
        }
        record.updated_at = Some(chrono::Utc::now());
        Ok(record.clone())
    }
}
