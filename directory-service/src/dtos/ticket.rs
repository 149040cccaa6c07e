//! Client-facing ticket shapes. The helpdesk takes a flat requester and
//! numeric priority/status codes; the conversions live here.

use crate::services::helpdesk::{NewTicket, TicketChanges, TicketRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketPriority {
    #[default]
    Low,
    Medium,
    High,
    Urgent,
}

impl TicketPriority {
    pub fn code(self) -> u8 {
        match self {
            TicketPriority::Low => 1,
            TicketPriority::Medium => 2,
            TicketPriority::High => 3,
            TicketPriority::Urgent => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(TicketPriority::Low),
            2 => Some(TicketPriority::Medium),
            3 => Some(TicketPriority::High),
            4 => Some(TicketPriority::Urgent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    #[default]
    Open,
    Pending,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn code(self) -> u8 {
        match self {
            TicketStatus::Open => 2,
            TicketStatus::Pending => 3,
            TicketStatus::Resolved => 4,
            TicketStatus::Closed => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            2 => Some(TicketStatus::Open),
            3 => Some(TicketStatus::Pending),
            4 => Some(TicketStatus::Resolved),
            5 => Some(TicketStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Requester {
    #[validate(length(min = 1, message = "Requester name is required"))]
    pub name: String,

    #[validate(email(message = "Invalid requester email"))]
    pub email: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateTicketRequest {
    #[validate(length(min = 1, max = 255, message = "Subject is required"))]
    pub subject: String,

    #[validate(length(min = 1, message = "Description is required"))]
    pub description: String,

    #[validate(nested)]
    pub requester: Requester,

    #[serde(default)]
    pub priority: TicketPriority,

    #[serde(default)]
    pub status: TicketStatus,

    #[serde(default)]
    pub tags: Vec<String>,
}

impl From<CreateTicketRequest> for NewTicket {
    fn from(req: CreateTicketRequest) -> Self {
        Self {
            subject: req.subject,
            description: req.description,
            name: req.requester.name,
            email: req.requester.email,
            priority: req.priority.code(),
            status: req.status.code(),
            tags: req.tags,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateTicketRequest {
    #[validate(length(min = 1, max = 255))]
    pub subject: Option<String>,

    #[validate(length(min = 1))]
    pub description: Option<String>,

    pub priority: Option<TicketPriority>,

    pub status: Option<TicketStatus>,

    pub tags: Option<Vec<String>>,
}

impl From<UpdateTicketRequest> for TicketChanges {
    fn from(req: UpdateTicketRequest) -> Self {
        Self {
            subject: req.subject,
            description: req.description,
            priority: req.priority.map(TicketPriority::code),
            status: req.status.map(TicketStatus::code),
            tags: req.tags,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketResponse {
    pub ticket_id: u64,
    pub subject: String,
    pub priority: Option<TicketPriority>,
    pub status: Option<TicketStatus>,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<TicketRecord> for TicketResponse {
    fn from(record: TicketRecord) -> Self {
        Self {
            ticket_id: record.id,
            subject: record.subject,
            priority: TicketPriority::from_code(record.priority),
            status: TicketStatus::from_code(record.status),
            tags: record.tags,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_request_flattens_requester() {
        let req: CreateTicketRequest = serde_json::from_value(json!({
            "subject": "VPN down",
            "description": "Cannot connect since 9am",
            "requester": { "name": "Jane Doe", "email": "jane@contoso.com" },
            "priority": "high"
        }))
        .unwrap();
        assert!(req.validate().is_ok());

        let ticket = NewTicket::from(req);
        assert_eq!(ticket.name, "Jane Doe");
        assert_eq!(ticket.email, "jane@contoso.com");
        assert_eq!(ticket.priority, 3);
        assert_eq!(ticket.status, 2);

        let wire = serde_json::to_value(&ticket).unwrap();
        assert!(wire.get("requester").is_none());
        assert_eq!(wire["email"], "jane@contoso.com");
    }

    #[test]
    fn test_nested_requester_is_validated() {
        let req: CreateTicketRequest = serde_json::from_value(json!({
            "subject": "VPN down",
            "description": "Cannot connect",
            "requester": { "name": "Jane", "email": "nope" }
        }))
        .unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_unknown_codes_map_to_none() {
        assert_eq!(TicketStatus::from_code(6), None);
        assert_eq!(TicketPriority::from_code(4), Some(TicketPriority::Urgent));
    }
}
