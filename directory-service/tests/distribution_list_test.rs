mod common;

use axum::http::StatusCode;
use common::{oid, TestApp, ALICE, BOB, CAROL, OWNER};
use serde_json::{json, Value};
use std::collections::BTreeSet;

fn outcome_for<'a>(report: &'a Value, identity: &str) -> &'a Value {
    report["outcomes"]
        .as_array()
        .unwrap()
        .iter()
        .find(|o| o["identity"] == identity)
        .unwrap_or_else(|| panic!("no outcome for {}", identity))
}

fn members(app: &TestApp, dl_id: &str) -> BTreeSet<String> {
    app.mail.group(dl_id).unwrap().members
}

async fn create_sales(app: &TestApp) -> Value {
    let (status, body) = app
        .post(
            "/api/dl",
            json!({
                "name": "Sales Team",
                "ownerEmails": [OWNER],
                "memberEmails": [ALICE, BOB]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body
}

#[tokio::test(start_paused = true)]
async fn test_create_adds_members_and_owners() {
    let app = TestApp::spawn();

    let body = create_sales(&app).await;

    assert_eq!(body["dlId"], "sales-team");
    assert_eq!(body["primaryEmail"], "sales-team@contoso.com");
    assert_eq!(outcome_for(&body["members"], ALICE)["status"], "applied");
    assert_eq!(outcome_for(&body["members"], OWNER)["action"], "add");

    let group = app.mail.group("sales-team").unwrap();
    assert_eq!(group.display_name, "Sales Team");
    assert_eq!(group.managed_by, vec![oid(OWNER)]);
    assert!(group.require_sender_authentication_enabled);
    assert_eq!(
        group.members,
        BTreeSet::from([ALICE.to_string(), BOB.to_string(), OWNER.to_string()])
    );
}

#[tokio::test(start_paused = true)]
async fn test_create_without_owner_membership() {
    let app = TestApp::builder()
        .config(|c| c.mail.owners_as_members = false)
        .build();

    create_sales(&app).await;

    assert_eq!(
        members(&app, "sales-team"),
        BTreeSet::from([ALICE.to_string(), BOB.to_string()])
    );
}

#[tokio::test(start_paused = true)]
async fn test_create_rejects_unknown_users_before_creating() {
    let app = TestApp::spawn();

    let (status, body) = app
        .post(
            "/api/dl",
            json!({
                "name": "Sales Team",
                "ownerEmails": [OWNER],
                "memberEmails": [ALICE, "ghost@contoso.com"]
            }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("ghost@contoso.com"));
    assert_eq!(app.mail.create_calls(), 0);
}

#[tokio::test]
async fn test_create_validates_body() {
    let app = TestApp::spawn();

    let (status, _) = app
        .post("/api/dl", json!({ "name": "Sales", "ownerEmails": [] }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = app
        .post(
            "/api/dl",
            json!({ "name": "Sales", "ownerEmails": ["not-an-address"] }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test(start_paused = true)]
async fn test_create_waits_for_new_list_to_become_visible() {
    let app = TestApp::builder().mail(|m| m.with_visible_after(3)).build();

    let body = create_sales(&app).await;

    assert_eq!(body["dlId"], "sales-team");
    assert_eq!(members(&app, "sales-team").len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_create_retries_throttled_creation() {
    let app = TestApp::builder()
        .mail(|m| m.with_throttled_creates(2))
        .build();

    create_sales(&app).await;

    assert_eq!(app.mail.create_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_create_duplicate_is_conflict() {
    let app = TestApp::spawn();
    create_sales(&app).await;

    let (status, _) = app
        .post(
            "/api/dl",
            json!({ "name": "Sales Team", "ownerEmails": [OWNER] }),
        )
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(app.mail.create_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_create_reports_rejected_member() {
    let app = TestApp::spawn();
    app.mail.reject_member(BOB);

    let (status, body) = app
        .post(
            "/api/dl",
            json!({
                "name": "Sales Team",
                "ownerEmails": [OWNER],
                "memberEmails": [ALICE, BOB]
            }),
        )
        .await;

    assert_eq!(status, StatusCode::MULTI_STATUS);
    let bob = outcome_for(&body["members"], BOB);
    assert_eq!(bob["status"], "failed");
    assert_eq!(bob["timed_out"], false);
    assert_eq!(outcome_for(&body["members"], ALICE)["status"], "applied");

    // The list and the other members stay in place.
    assert_eq!(
        members(&app, "sales-team"),
        BTreeSet::from([ALICE.to_string(), OWNER.to_string()])
    );
}

#[tokio::test(start_paused = true)]
async fn test_get_returns_owner_addresses() {
    let app = TestApp::spawn();
    create_sales(&app).await;

    let (status, body) = app.get("/api/dl/sales-team").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dlId"], "sales-team");
    assert_eq!(body["displayName"], "Sales Team");
    assert_eq!(body["owners"], json!([OWNER]));
    assert_eq!(body["allowExternalSenders"], false);
    assert_eq!(body["members"].as_array().unwrap().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_get_unknown_list_is_not_found() {
    let app = TestApp::spawn();

    let (status, body) = app.get("/api/dl/nobody-here").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Distribution list 'nobody-here' not found");
}

#[tokio::test]
async fn test_invalid_list_id_is_rejected() {
    let app = TestApp::spawn();

    let (status, _) = app.get("/api/dl/sales!team").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(start_paused = true)]
async fn test_update_converges_members() {
    let app = TestApp::spawn();
    create_sales(&app).await;
    app.mail.seed_member("sales-team", "partner@fabrikam.com");

    let (status, body) = app
        .patch("/api/dl/sales-team", json!({ "memberEmails": [CAROL] }))
        .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(outcome_for(&body["members"], CAROL)["action"], "add");
    assert_eq!(outcome_for(&body["members"], ALICE)["action"], "remove");
    assert_eq!(
        outcome_for(&body["members"], "partner@fabrikam.com")["status"],
        "applied"
    );

    // The owner keeps its membership.
    assert_eq!(
        members(&app, "sales-team"),
        BTreeSet::from([CAROL.to_string(), OWNER.to_string()])
    );
}

#[tokio::test(start_paused = true)]
async fn test_update_replaces_owners() {
    let app = TestApp::spawn();
    create_sales(&app).await;

    let (status, _) = app
        .patch(
            "/api/dl/sales-team",
            json!({ "ownerEmails": [CAROL], "memberEmails": [ALICE] }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    let group = app.mail.group("sales-team").unwrap();
    assert_eq!(group.managed_by, vec![oid(CAROL)]);
    assert_eq!(
        group.members,
        BTreeSet::from([ALICE.to_string(), CAROL.to_string()])
    );
}

#[tokio::test(start_paused = true)]
async fn test_update_renames_list() {
    let app = TestApp::spawn();
    create_sales(&app).await;

    let (status, body) = app
        .patch(
            "/api/dl/sales-team",
            json!({ "name": "Sales EMEA", "allowExternalSenders": true }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dlId"], "sales-emea");

    let (status, body) = app.get("/api/dl/sales-emea").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["primaryEmail"], "sales-emea@contoso.com");
    assert_eq!(body["allowExternalSenders"], true);

    let (status, _) = app.get("/api/dl/sales-team").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn test_update_with_unknown_user_changes_nothing() {
    let app = TestApp::spawn();
    create_sales(&app).await;

    let (status, _) = app
        .patch(
            "/api/dl/sales-team",
            json!({ "name": "Renamed", "memberEmails": ["ghost@contoso.com"] }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.mail.group("sales-team").is_some());
    assert_eq!(members(&app, "sales-team").len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_delete_is_idempotent() {
    let app = TestApp::spawn();
    create_sales(&app).await;

    let (status, body) = app.delete("/api/dl/sales-team", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["message"],
        "Distribution list 'sales-team' deleted successfully"
    );
    assert!(app.mail.group("sales-team").is_none());

    let (status, body) = app.delete("/api/dl/sales-team", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Distribution list 'sales-team' does not exist");
}
