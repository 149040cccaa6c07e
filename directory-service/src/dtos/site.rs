use crate::utils::validate_emails;
use serde::{Deserialize, Serialize};
use service_core::resilience::SyncReport;
use validator::{Validate, ValidationError};

fn validate_privacy(privacy: &str) -> Result<(), ValidationError> {
    match privacy {
        "Private" | "Public" => Ok(()),
        _ => {
            let mut err = ValidationError::new("privacy");
            err.message = Some("Privacy must be Private or Public".into());
            Err(err)
        }
    }
}

fn default_privacy() -> String {
    "Private".to_string()
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSiteRequest {
    #[validate(length(min = 1, max = 256, message = "Name is required"))]
    pub name: String,

    #[validate(email(message = "Invalid owner email"))]
    pub owner_email: String,

    #[validate(custom(function = "validate_privacy"))]
    #[serde(default = "default_privacy")]
    pub privacy: String,

    #[validate(length(max = 1024))]
    pub description: Option<String>,

    #[validate(custom(function = "validate_emails"))]
    #[serde(default)]
    pub member_emails: Vec<String>,

    #[validate(custom(function = "validate_emails"))]
    #[serde(default)]
    pub visitor_emails: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteCreated {
    pub group_id: String,
    pub site_id: String,
    pub site_url: String,
    pub members: SyncReport<String>,
    pub visitors: SyncReport<String>,
}

impl SiteCreated {
    pub fn is_complete(&self) -> bool {
        self.members.is_complete() && self.visitors.is_complete()
    }
}

/// Owners or members to add to, or remove from, a group.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GroupChangeRequest {
    #[serde(rename = "groupId")]
    #[validate(length(min = 1))]
    pub group_id: String,

    #[validate(
        length(min = 1, message = "At least one user is required"),
        custom(function = "validate_emails")
    )]
    pub user_upns: Vec<String>,
}

/// Desired owners and members of a group. A missing list is left as is.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct MembershipRequest {
    #[validate(
        length(min = 1, message = "A group needs at least one owner"),
        custom(function = "validate_emails")
    )]
    pub owners: Option<Vec<String>>,

    #[validate(custom(function = "validate_emails"))]
    pub members: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipChanged {
    pub group_id: String,
    pub owners: SyncReport<String>,
    pub members: SyncReport<String>,
}

impl MembershipChanged {
    pub fn is_complete(&self) -> bool {
        self.owners.is_complete() && self.members.is_complete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_site_request_defaults_to_private() {
        let req: CreateSiteRequest = serde_json::from_value(json!({
            "name": "Project X",
            "ownerEmail": "owner@contoso.com"
        }))
        .unwrap();
        assert_eq!(req.privacy, "Private");
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_site_request_rejects_unknown_privacy() {
        let req: CreateSiteRequest = serde_json::from_value(json!({
            "name": "Project X",
            "ownerEmail": "owner@contoso.com",
            "privacy": "Secret"
        }))
        .unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_group_change_uses_group_id_key() {
        let req: GroupChangeRequest = serde_json::from_value(json!({
            "groupId": "g-1",
            "user_upns": ["a@contoso.com"]
        }))
        .unwrap();
        assert_eq!(req.group_id, "g-1");
        assert!(req.validate().is_ok());
    }
}
