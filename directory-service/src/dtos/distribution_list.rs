use crate::utils::validate_emails;
use serde::{Deserialize, Serialize};
use service_core::resilience::SyncReport;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateDistributionListRequest {
    #[validate(length(min = 1, max = 256, message = "Name is required"))]
    pub name: String,

    #[validate(
        length(min = 1, message = "At least one owner is required"),
        custom(function = "validate_emails")
    )]
    pub owner_emails: Vec<String>,

    #[validate(custom(function = "validate_emails"))]
    #[serde(default)]
    pub member_emails: Option<Vec<String>>,

    #[serde(default)]
    pub allow_external_senders: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDistributionListRequest {
    #[validate(length(min = 1, max = 256))]
    pub name: Option<String>,

    #[validate(length(min = 1, max = 256))]
    pub display_name: Option<String>,

    #[validate(
        length(min = 1, message = "A distribution list needs at least one owner"),
        custom(function = "validate_emails")
    )]
    pub owner_emails: Option<Vec<String>>,

    #[validate(custom(function = "validate_emails"))]
    pub member_emails: Option<Vec<String>>,

    pub allow_external_senders: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionListCreated {
    pub dl_id: String,
    pub primary_email: String,
    pub members: SyncReport<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionListDetails {
    pub dl_id: String,
    pub name: String,
    pub display_name: String,
    pub primary_email: String,
    pub owners: Vec<String>,
    pub members: Vec<String>,
    pub allow_external_senders: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionListUpdated {
    pub dl_id: String,
    pub message: String,
    pub members: SyncReport<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_request_defaults() {
        let req: CreateDistributionListRequest = serde_json::from_value(json!({
            "name": "Sales Team",
            "ownerEmails": ["owner@contoso.com"]
        }))
        .unwrap();
        assert!(req.validate().is_ok());
        assert!(!req.allow_external_senders);
        assert!(req.member_emails.is_none());
    }

    #[test]
    fn test_create_request_rejects_missing_owner_and_bad_email() {
        let req: CreateDistributionListRequest = serde_json::from_value(json!({
            "name": "Sales",
            "ownerEmails": [],
            "memberEmails": ["not-an-email"]
        }))
        .unwrap();
        let errors = req.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("owner_emails"));
        assert!(fields.contains_key("member_emails"));
    }
}
