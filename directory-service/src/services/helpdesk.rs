//! Helpdesk REST client (Freshdesk-style v2 tickets API).

use super::remote::{check_status, RemoteError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};

const SYSTEM: &str = "helpdesk";

/// Ticket as the helpdesk expects it: requester fields are flat and
/// priority/status are numeric codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewTicket {
    pub subject: String,
    pub description: String,
    pub name: String,
    pub email: String,
    pub priority: u8,
    pub status: u8,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TicketChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TicketRecord {
    pub id: u64,
    pub subject: String,
    pub priority: u8,
    pub status: u8,
    #[serde(default)]
    pub requester_id: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait TicketDesk: Send + Sync {
    async fn create_ticket(&self, ticket: &NewTicket) -> Result<TicketRecord, RemoteError>;

    async fn update_ticket(&self, id: u64, changes: &TicketChanges) -> Result<TicketRecord, RemoteError>;
}

/// Authenticates with the API key as basic-auth username.
#[derive(Clone)]
pub struct HelpdeskClient {
    client: Client,
    base_url: String,
    api_key: Secret<String>,
}

impl HelpdeskClient {
    pub fn new(client: Client, base_url: &str, api_key: Secret<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<TicketRecord, RemoteError> {
        let response = request
            .basic_auth(self.api_key.expose_secret(), Some("X"))
            .send()
            .await
            .map_err(|e| RemoteError::transport(SYSTEM, e))?;

        check_status(SYSTEM, response)
            .await?
            .json::<TicketRecord>()
            .await
            .map_err(|e| RemoteError::decode(SYSTEM, e.to_string()))
    }
}

#[async_trait]
impl TicketDesk for HelpdeskClient {
    async fn create_ticket(&self, ticket: &NewTicket) -> Result<TicketRecord, RemoteError> {
        let url = format!("{}/api/v2/tickets", self.base_url);
        let record = self.send(self.client.post(url).json(ticket)).await?;
        tracing::info!(ticket_id = record.id, "Ticket created");
        Ok(record)
    }

    async fn update_ticket(&self, id: u64, changes: &TicketChanges) -> Result<TicketRecord, RemoteError> {
        let url = format!("{}/api/v2/tickets/{}", self.base_url, id);
        self.send(self.client.put(url).json(changes)).await
    }
}
