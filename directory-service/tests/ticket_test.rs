mod common;

use axum::http::StatusCode;
use common::TestApp;
use directory_service::services::mock::MockTicketDesk;
use serde_json::{json, Value};

fn vpn_ticket() -> Value {
    json!({
        "subject": "VPN down",
        "description": "Cannot connect since 9am",
        "requester": { "name": "Jane Doe", "email": "jane@contoso.com" },
        "priority": "high",
        "tags": ["vpn"]
    })
}

#[tokio::test]
async fn test_create_ticket() {
    let app = TestApp::spawn();

    let (status, body) = app.post("/api/tickets", vpn_ticket()).await;

    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["ticketId"], 1);
    assert_eq!(body["priority"], "high");
    assert_eq!(body["status"], "open");
    assert_eq!(body["tags"], json!(["vpn"]));

    let stored = app.desk.ticket(1).unwrap();
    assert_eq!(stored.priority, 3);
    assert_eq!(stored.status, 2);
}

#[tokio::test(start_paused = true)]
async fn test_create_ticket_retries_when_throttled() {
    let app = TestApp::builder()
        .desk(MockTicketDesk::new().with_throttled_calls(2))
        .build();

    let (status, _) = app.post("/api/tickets", vpn_ticket()).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(app.desk.create_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_create_ticket_is_not_repeated_on_server_error() {
    let app = TestApp::builder()
        .desk(MockTicketDesk::new().with_unavailable_calls(1))
        .build();

    let (status, _) = app.post("/api/tickets", vpn_ticket()).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(app.desk.create_calls(), 1);
}

#[tokio::test]
async fn test_create_ticket_validates_requester() {
    let app = TestApp::spawn();

    let (status, body) = app
        .post(
            "/api/tickets",
            json!({
                "subject": "VPN down",
                "description": "Cannot connect",
                "requester": { "name": "Jane Doe", "email": "not-an-address" }
            }),
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "Validation error");
    assert_eq!(app.desk.create_calls(), 0);
}

#[tokio::test]
async fn test_create_ticket_rejects_unknown_priority() {
    let app = TestApp::spawn();
    let mut ticket = vpn_ticket();
    ticket["priority"] = json!("critical");

    let (status, _) = app.post("/api/tickets", ticket).await;

    assert!(status.is_client_error());
    assert_eq!(app.desk.create_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_update_ticket() {
    let app = TestApp::spawn();
    app.post("/api/tickets", vpn_ticket()).await;

    let (status, body) = app
        .patch(
            "/api/tickets/1",
            json!({ "status": "resolved", "tags": ["vpn", "fixed"] }),
        )
        .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], "resolved");
    assert_eq!(body["priority"], "high");
    assert_eq!(app.desk.ticket(1).unwrap().status, 4);
}

#[tokio::test(start_paused = true)]
async fn test_update_retries_unavailable_helpdesk() {
    let app = TestApp::spawn();
    app.post("/api/tickets", vpn_ticket()).await;

    app.desk.make_unavailable(2);

    let (status, _) = app
        .patch("/api/tickets/1", json!({ "subject": "VPN flaky" }))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.desk.ticket(1).unwrap().subject, "VPN flaky");
}

#[tokio::test(start_paused = true)]
async fn test_update_unknown_ticket_is_not_found() {
    let app = TestApp::spawn();

    let (status, body) = app
        .patch("/api/tickets/99", json!({ "status": "closed" }))
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Ticket 99 not found");
}
