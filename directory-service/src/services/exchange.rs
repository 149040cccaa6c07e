//! Exchange Online admin API client for distribution groups.
//!
//! Every operation is a cmdlet invocation posted to the tenant's
//! `InvokeCommand` endpoint.

use super::remote::{BearerClient, RemoteError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const SYSTEM: &str = "exchange";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DistributionGroup {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub primary_smtp_address: String,
    #[serde(default)]
    pub managed_by: Vec<String>,
    #[serde(default = "default_true")]
    pub require_sender_authentication_enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Recipient {
    #[serde(default)]
    pub primary_smtp_address: Option<String>,
    #[serde(default)]
    pub external_directory_object_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NewDistributionGroup {
    pub name: String,
    pub display_name: String,
    pub alias: String,
    pub managed_by: Vec<String>,
    pub primary_smtp_address: String,
    pub require_sender_authentication_enabled: bool,
}

/// Properties to change on an existing group. `None` leaves a property as is.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DistributionGroupChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_smtp_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_sender_authentication_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub managed_by: Option<Vec<String>>,
}

impl DistributionGroupChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.alias.is_none()
            && self.primary_smtp_address.is_none()
            && self.display_name.is_none()
            && self.require_sender_authentication_enabled.is_none()
            && self.managed_by.is_none()
    }
}

/// Distribution group operations.
#[async_trait]
pub trait MailDirectory: Send + Sync {
    /// `anchor` routes the call to the mailbox of the first owner.
    async fn create_group(&self, group: &NewDistributionGroup, anchor: &str) -> Result<(), RemoteError>;

    async fn get_group(&self, identity: &str) -> Result<DistributionGroup, RemoteError>;

    async fn set_group(&self, identity: &str, changes: &DistributionGroupChanges) -> Result<(), RemoteError>;

    async fn list_members(&self, identity: &str) -> Result<Vec<Recipient>, RemoteError>;

    async fn add_member(&self, identity: &str, member: &str) -> Result<(), RemoteError>;

    async fn remove_member(&self, identity: &str, member: &str) -> Result<(), RemoteError>;

    async fn remove_group(&self, identity: &str) -> Result<(), RemoteError>;
}

#[derive(Debug, Deserialize)]
struct CommandOutput<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Clone)]
pub struct ExchangeClient {
    client: BearerClient,
    command_url: String,
}

impl ExchangeClient {
    pub fn new(client: BearerClient, command_url: impl Into<String>) -> Self {
        Self {
            client,
            command_url: command_url.into(),
        }
    }

    /// Run one cmdlet and return its raw JSON output.
    pub async fn invoke_command(
        &self,
        cmdlet: &str,
        parameters: Value,
        anchor_mailbox: Option<&str>,
    ) -> Result<Value, RemoteError> {
        let payload = json!({
            "CmdletInput": {
                "CmdletName": cmdlet,
                "Parameters": parameters,
            }
        });

        let mut request = self.client.http().post(&self.command_url).json(&payload);
        if let Some(anchor) = anchor_mailbox {
            request = request.header("X-AnchorMailbox", anchor);
        }

        tracing::debug!(cmdlet, "Invoking Exchange command");
        let response = self.client.send(request).await?;
        let text = response
            .text()
            .await
            .map_err(|e| RemoteError::transport(SYSTEM, e))?;

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| RemoteError::decode(SYSTEM, e.to_string()))
    }

    async fn invoke_for<T: serde::de::DeserializeOwned>(
        &self,
        cmdlet: &str,
        parameters: Value,
    ) -> Result<Vec<T>, RemoteError> {
        let raw = self.invoke_command(cmdlet, parameters, None).await?;
        if raw.is_null() {
            return Ok(Vec::new());
        }
        let output: CommandOutput<T> =
            serde_json::from_value(raw).map_err(|e| RemoteError::decode(SYSTEM, e.to_string()))?;
        Ok(output.value)
    }
}

fn with_identity(identity: &str, body: Value) -> Value {
    let mut parameters = body;
    if let Value::Object(map) = &mut parameters {
        map.insert("Identity".to_string(), json!(identity));
    }
    parameters
}

#[async_trait]
impl MailDirectory for ExchangeClient {
    async fn create_group(&self, group: &NewDistributionGroup, anchor: &str) -> Result<(), RemoteError> {
        let parameters =
            serde_json::to_value(group).map_err(|e| RemoteError::decode(SYSTEM, e.to_string()))?;
        self.invoke_command("New-DistributionGroup", parameters, Some(anchor))
            .await?;
        tracing::info!(alias = %group.alias, address = %group.primary_smtp_address, "Distribution group created");
        Ok(())
    }

    async fn get_group(&self, identity: &str) -> Result<DistributionGroup, RemoteError> {
        self.invoke_for::<DistributionGroup>("Get-DistributionGroup", json!({ "Identity": identity }))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                RemoteError::not_found(SYSTEM, format!("distribution group '{}' couldn't be found", identity))
            })
    }

    async fn set_group(&self, identity: &str, changes: &DistributionGroupChanges) -> Result<(), RemoteError> {
        let body =
            serde_json::to_value(changes).map_err(|e| RemoteError::decode(SYSTEM, e.to_string()))?;
        self.invoke_command("Set-DistributionGroup", with_identity(identity, body), None)
            .await?;
        Ok(())
    }

    async fn list_members(&self, identity: &str) -> Result<Vec<Recipient>, RemoteError> {
        self.invoke_for("Get-DistributionGroupMember", json!({ "Identity": identity }))
            .await
    }

    async fn add_member(&self, identity: &str, member: &str) -> Result<(), RemoteError> {
        self.invoke_command(
            "Add-DistributionGroupMember",
            json!({ "Identity": identity, "Member": member }),
            None,
        )
        .await?;
        Ok(())
    }

    async fn remove_member(&self, identity: &str, member: &str) -> Result<(), RemoteError> {
        self.invoke_command(
            "Remove-DistributionGroupMember",
            json!({ "Identity": identity, "Member": member, "Confirm": false }),
            None,
        )
        .await?;
        Ok(())
    }

    async fn remove_group(&self, identity: &str) -> Result<(), RemoteError> {
        self.invoke_command(
            "Remove-DistributionGroup",
            json!({ "Identity": identity, "Confirm": false }),
            None,
        )
        .await?;
        tracing::info!(identity, "Distribution group removed");
        Ok(())
    }
}
