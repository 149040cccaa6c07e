mod common;

use common::azure_config;
use directory_service::services::exchange::{MailDirectory, NewDistributionGroup};
use directory_service::services::graph::{GroupDirectory, GroupRole};
use directory_service::services::helpdesk::{NewTicket, TicketDesk};
use directory_service::services::{
    AzureTokenSource, BearerClient, ExchangeClient, GraphClient, HelpdeskClient,
};
use secrecy::Secret;
use serde_json::json;
use service_core::resilience::{CredentialBroker, FailureKind, RemoteFailure};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{basic_auth, bearer_token, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN_PATH: &str = "/tenant-1/oauth2/v2.0/token";

async fn mount_token(server: &MockServer, token: &str, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer",
            "access_token": token,
            "expires_in": 3599
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn bearer(server: &MockServer, system: &'static str, scope: &str) -> BearerClient {
    let http = reqwest::Client::new();
    let source = Arc::new(AzureTokenSource::new(http.clone(), &azure_config(&server.uri())));
    let broker = Arc::new(CredentialBroker::new(source));
    BearerClient::new(system, http, broker, scope)
}

fn graph(server: &MockServer) -> GraphClient {
    GraphClient::new(
        bearer(server, "graph", "https://graph.microsoft.com/.default"),
        &format!("{}/v1.0", server.uri()),
    )
}

#[tokio::test]
async fn test_graph_reuses_token_across_calls() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", 1).await;
    Mock::given(method("GET"))
        .and(path("/v1.0/users/alice@contoso.com"))
        .and(bearer_token("tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "oid-1" })))
        .expect(2)
        .mount(&server)
        .await;

    let client = graph(&server);
    for _ in 0..2 {
        let id = client.find_user("alice@contoso.com").await.unwrap();
        assert_eq!(id.as_deref(), Some("oid-1"));
    }
}

#[tokio::test]
async fn test_graph_missing_user_is_none() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", 1).await;
    Mock::given(method("GET"))
        .and(path("/v1.0/users/ghost@contoso.com"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "code": "Request_ResourceNotFound", "message": "Resource does not exist" }
        })))
        .mount(&server)
        .await;

    let id = graph(&server).find_user("ghost@contoso.com").await.unwrap();

    assert!(id.is_none());
}

#[tokio::test]
async fn test_graph_unauthorized_refreshes_token() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", 2).await;
    Mock::given(method("GET"))
        .and(path("/v1.0/groups/g1/sites/root"))
        .respond_with(ResponseTemplate::new(401).set_body_string("InvalidAuthenticationToken"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/groups/g1/sites/root"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "contoso.sharepoint.com,1,2",
            "webUrl": "https://contoso.sharepoint.com/sites/apollo"
        })))
        .mount(&server)
        .await;

    let client = graph(&server);
    let err = client.root_site("g1").await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Unauthenticated);

    let site = client.root_site("g1").await.unwrap().unwrap();
    assert_eq!(site.web_url, "https://contoso.sharepoint.com/sites/apollo");
}

#[tokio::test]
async fn test_graph_throttling_carries_retry_after() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", 1).await;
    Mock::given(method("POST"))
        .and(path("/v1.0/groups/g1/members/$ref"))
        .and(body_string_contains("directoryObjects/oid-1"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "7")
                .set_body_string("Too many requests"),
        )
        .mount(&server)
        .await;

    let err = graph(&server)
        .add_to_role("g1", GroupRole::Member, "oid-1")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::RateLimited);
    assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
}

#[tokio::test]
async fn test_graph_lists_role_across_pages() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-1", 1).await;
    Mock::given(method("GET"))
        .and(path("/v1.0/groups/g1/owners"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "id": "oid-1", "userPrincipalName": "alice@contoso.com" }],
            "@odata.nextLink": format!("{}/v1.0/page-2", server.uri())
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "id": "oid-2" }]
        })))
        .mount(&server)
        .await;

    let owners = graph(&server).list_role("g1", GroupRole::Owner).await.unwrap();

    assert_eq!(owners.len(), 2);
    assert_eq!(owners[0].user_principal_name.as_deref(), Some("alice@contoso.com"));
    assert!(owners[1].user_principal_name.is_none());
}

fn exchange(server: &MockServer) -> ExchangeClient {
    ExchangeClient::new(
        bearer(server, "exchange", "https://outlook.office365.com/.default"),
        azure_config(&server.uri()).exchange_command_url(),
    )
}

#[tokio::test]
async fn test_exchange_create_is_anchored_to_owner() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-x", 1).await;
    Mock::given(method("POST"))
        .and(path("/adminapi/beta/tenant-1/InvokeCommand"))
        .and(header("X-AnchorMailbox", "owner@contoso.com"))
        .and(body_string_contains("New-DistributionGroup"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let group = NewDistributionGroup {
        name: "sales".to_string(),
        display_name: "Sales".to_string(),
        alias: "sales".to_string(),
        managed_by: vec!["owner@contoso.com".to_string()],
        primary_smtp_address: "sales@contoso.com".to_string(),
        require_sender_authentication_enabled: true,
    };
    exchange(&server)
        .create_group(&group, "owner@contoso.com")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_exchange_reads_command_output() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-x", 1).await;
    Mock::given(method("POST"))
        .and(path("/adminapi/beta/tenant-1/InvokeCommand"))
        .and(body_string_contains("Get-DistributionGroupMember"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                { "PrimarySmtpAddress": "alice@contoso.com", "ExternalDirectoryObjectId": "oid-1" },
                { "PrimarySmtpAddress": "partner@fabrikam.com" }
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/adminapi/beta/tenant-1/InvokeCommand"))
        .and(body_string_contains("\"Get-DistributionGroup\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": [] })))
        .mount(&server)
        .await;

    let client = exchange(&server);

    let members = client.list_members("sales").await.unwrap();
    assert_eq!(members.len(), 2);
    assert_eq!(members[0].external_directory_object_id.as_deref(), Some("oid-1"));
    assert!(members[1].external_directory_object_id.is_none());

    let err = client.get_group("sales").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_exchange_member_errors_are_classified() {
    let server = MockServer::start().await;
    mount_token(&server, "tok-x", 1).await;
    Mock::given(method("POST"))
        .and(path("/adminapi/beta/tenant-1/InvokeCommand"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "message": "The recipient \"alice@contoso.com\" is already a member of the group."
            }
        })))
        .mount(&server)
        .await;

    let err = exchange(&server)
        .add_member("sales", "alice@contoso.com")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::AlreadyExists);
}

#[tokio::test]
async fn test_helpdesk_uses_basic_auth_and_flat_requester() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/tickets"))
        .and(basic_auth("helpdesk-key", "X"))
        .and(body_string_contains("\"email\":\"jane@contoso.com\""))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": 42,
            "subject": "VPN down",
            "priority": 3,
            "status": 2,
            "requester_id": 9,
            "tags": ["vpn"],
            "created_at": "2024-05-01T09:00:00Z",
            "updated_at": "2024-05-01T09:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HelpdeskClient::new(
        reqwest::Client::new(),
        &server.uri(),
        Secret::new("helpdesk-key".to_string()),
    );
    let record = client
        .create_ticket(&NewTicket {
            subject: "VPN down".to_string(),
            description: "Cannot connect".to_string(),
            name: "Jane Doe".to_string(),
            email: "jane@contoso.com".to_string(),
            priority: 3,
            status: 2,
            tags: vec!["vpn".to_string()],
        })
        .await
        .unwrap();

    assert_eq!(record.id, 42);
    assert_eq!(record.requester_id, Some(9));
    assert!(record.created_at.is_some());
}
