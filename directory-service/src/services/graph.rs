//! Microsoft Graph client for users, unified groups and group sites.

use super::remote::{BearerClient, RemoteError};
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

const SYSTEM: &str = "graph";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    Owner,
    Member,
}

impl GroupRole {
    fn segment(self) -> &'static str {
        match self {
            GroupRole::Owner => "owners",
            GroupRole::Member => "members",
        }
    }
}

impl fmt::Display for GroupRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupRole::Owner => f.write_str("owner"),
            GroupRole::Member => f.write_str("member"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUser {
    pub id: String,
    #[serde(default)]
    pub user_principal_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGroup {
    pub display_name: String,
    pub mail_nickname: String,
    pub visibility: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteInfo {
    pub id: String,
    pub web_url: String,
}

/// Operations on users and unified groups.
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    /// Object id for a user principal name, `None` if no such user.
    async fn find_user(&self, upn: &str) -> Result<Option<String>, RemoteError>;

    /// User principal name for an object id, `None` if no such user.
    async fn user_principal_name(&self, object_id: &str) -> Result<Option<String>, RemoteError>;

    /// Create a unified group, returning its id.
    async fn create_group(&self, group: &NewGroup) -> Result<String, RemoteError>;

    async fn list_role(&self, group_id: &str, role: GroupRole) -> Result<Vec<DirectoryUser>, RemoteError>;

    async fn add_to_role(&self, group_id: &str, role: GroupRole, object_id: &str) -> Result<(), RemoteError>;

    async fn remove_from_role(&self, group_id: &str, role: GroupRole, object_id: &str) -> Result<(), RemoteError>;

    /// The group's root site, `None` while it is still being provisioned.
    async fn root_site(&self, group_id: &str) -> Result<Option<SiteInfo>, RemoteError>;

    async fn grant_site_read(&self, site_id: &str, object_id: &str) -> Result<(), RemoteError>;

    /// Soft delete: the group moves to the directory recycle bin.
    async fn delete_group(&self, group_id: &str) -> Result<(), RemoteError>;

    /// Permanently remove a soft-deleted group from the recycle bin.
    async fn purge_deleted_group(&self, group_id: &str) -> Result<(), RemoteError>;
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpnOnly {
    user_principal_name: String,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink", default)]
    next_link: Option<String>,
}

#[derive(Clone)]
pub struct GraphClient {
    client: BearerClient,
    base_url: String,
}

impl GraphClient {
    pub fn new(client: BearerClient, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| RemoteError::decode(SYSTEM, format!("invalid base url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| RemoteError::decode(SYSTEM, "base url cannot have a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn directory_object_ref(&self, object_id: &str) -> serde_json::Value {
        json!({ "@odata.id": format!("{}/directoryObjects/{}", self.base_url, object_id) })
    }

    /// Treat a 404 as "absent" rather than an error.
    fn optional<T>(result: Result<T, RemoteError>) -> Result<Option<T>, RemoteError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl GroupDirectory for GraphClient {
    async fn find_user(&self, upn: &str) -> Result<Option<String>, RemoteError> {
        let url = self.url(&["users", upn])?;
        let request = self.client.http().get(url).query(&[("$select", "id")]);
        let user = Self::optional(self.client.send_json::<IdOnly>(request).await)?;
        Ok(user.map(|u| u.id))
    }

    async fn user_principal_name(&self, object_id: &str) -> Result<Option<String>, RemoteError> {
        let url = self.url(&["users", object_id])?;
        let request = self
            .client
            .http()
            .get(url)
            .query(&[("$select", "userPrincipalName")]);
        let user = Self::optional(self.client.send_json::<UpnOnly>(request).await)?;
        Ok(user.map(|u| u.user_principal_name))
    }

    async fn create_group(&self, group: &NewGroup) -> Result<String, RemoteError> {
        let mut body = json!({
            "displayName": group.display_name,
            "mailNickname": group.mail_nickname,
            "mailEnabled": true,
            "securityEnabled": false,
            "visibility": group.visibility,
            "groupTypes": ["Unified"],
        });
        if let Some(description) = group.description.as_deref().filter(|d| !d.trim().is_empty()) {
            body["description"] = json!(description);
        }

        let request = self.client.http().post(self.url(&["groups"])?).json(&body);
        let created: IdOnly = self.client.send_json(request).await?;
        tracing::info!(group_id = %created.id, mail_nickname = %group.mail_nickname, "Unified group created");
        Ok(created.id)
    }

    async fn list_role(&self, group_id: &str, role: GroupRole) -> Result<Vec<DirectoryUser>, RemoteError> {
        let mut users = Vec::new();
        let first = self.url(&["groups", group_id, role.segment()])?;
        let mut request = self
            .client
            .http()
            .get(first)
            .query(&[("$select", "id,userPrincipalName")]);

        loop {
            let page: Page<DirectoryUser> = self.client.send_json(request).await?;
            users.extend(page.value);
            match page.next_link {
                Some(next) => request = self.client.http().get(next),
                None => break,
            }
        }

        Ok(users)
    }

    async fn add_to_role(&self, group_id: &str, role: GroupRole, object_id: &str) -> Result<(), RemoteError> {
        let url = self.url(&["groups", group_id, role.segment(), "$ref"])?;
        let request = self
            .client
            .http()
            .post(url)
            .json(&self.directory_object_ref(object_id));
        self.client.send(request).await?;
        Ok(())
    }

    async fn remove_from_role(&self, group_id: &str, role: GroupRole, object_id: &str) -> Result<(), RemoteError> {
        let url = self.url(&["groups", group_id, role.segment(), object_id, "$ref"])?;
        self.client.send(self.client.http().delete(url)).await?;
        Ok(())
    }

    async fn root_site(&self, group_id: &str) -> Result<Option<SiteInfo>, RemoteError> {
        let url = self.url(&["groups", group_id, "sites", "root"])?;
        let request = self
            .client
            .http()
            .get(url)
            .query(&[("$select", "webUrl,id")]);
        Self::optional(self.client.send_json::<SiteInfo>(request).await)
    }

    async fn grant_site_read(&self, site_id: &str, object_id: &str) -> Result<(), RemoteError> {
        let url = self.url(&["sites", site_id, "permissions"])?;
        let body = json!({
            "roles": ["read"],
            "grantee": { "@odata.type": "microsoft.graph.user", "id": object_id },
        });
        self.client.send(self.client.http().post(url).json(&body)).await?;
        Ok(())
    }

    async fn delete_group(&self, group_id: &str) -> Result<(), RemoteError> {
        let url = self.url(&["groups", group_id])?;
        self.client.send(self.client.http().delete(url)).await?;
        Ok(())
    }

    async fn purge_deleted_group(&self, group_id: &str) -> Result<(), RemoteError> {
        let url = self.url(&["directory", "deletedItems", group_id])?;
        self.client.send(self.client.http().delete(url)).await?;
        Ok(())
    }
}
