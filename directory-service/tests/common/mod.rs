//! Shared setup for directory-service integration tests.

#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use directory_service::config::{
    AzureConfig, DirectoryConfig, HelpdeskConfig, MailConfig, ResilienceConfig,
};
use directory_service::services::mock::{
    MockGroupDirectory, MockMailDirectory, MockTicketDesk, MockUsers,
};
use directory_service::{build_router, AppState, Backends};
use secrecy::Secret;
use serde_json::Value;
use std::sync::Arc;
use tower::util::ServiceExt;

pub const OWNER: &str = "owner@contoso.com";
pub const ALICE: &str = "alice@contoso.com";
pub const BOB: &str = "bob@contoso.com";
pub const CAROL: &str = "carol@contoso.com";

pub fn test_config() -> DirectoryConfig {
    DirectoryConfig {
        common: service_core::config::Config {
            port: 0,
            log_level: "error".to_string(),
            otlp_endpoint: None,
        },
        azure: azure_config("http://localhost:1"),
        mail: MailConfig {
            custom_domain: "contoso.com".to_string(),
            owners_as_members: true,
        },
        helpdesk: HelpdeskConfig {
            base_url: "http://localhost:1".to_string(),
            api_key: Secret::new("helpdesk-key".to_string()),
        },
        resilience: ResilienceConfig::default(),
        cors_origin: "*".to_string(),
    }
}

pub fn azure_config(base: &str) -> AzureConfig {
    AzureConfig {
        tenant_id: "tenant-1".to_string(),
        client_id: "client-1".to_string(),
        client_secret: Secret::new("secret".to_string()),
        authority_host: base.to_string(),
        graph_base_url: format!("{}/v1.0", base),
        graph_scope: "https://graph.microsoft.com/.default".to_string(),
        exchange_base_url: base.to_string(),
        exchange_scope: "https://outlook.office365.com/.default".to_string(),
    }
}

/// Router over in-memory backends, plus handles to inspect them.
pub struct TestApp {
    pub router: Router,
    pub users: Arc<MockUsers>,
    pub directory: Arc<MockGroupDirectory>,
    pub mail: Arc<MockMailDirectory>,
    pub desk: Arc<MockTicketDesk>,
}

pub struct TestAppBuilder {
    users: Arc<MockUsers>,
    directory: MockGroupDirectory,
    mail: MockMailDirectory,
    desk: MockTicketDesk,
    config: DirectoryConfig,
}

impl TestAppBuilder {
    pub fn directory(mut self, f: impl FnOnce(MockGroupDirectory) -> MockGroupDirectory) -> Self {
        self.directory = f(self.directory);
        self
    }

    pub fn mail(mut self, f: impl FnOnce(MockMailDirectory) -> MockMailDirectory) -> Self {
        self.mail = f(self.mail);
        self
    }

    pub fn desk(mut self, desk: MockTicketDesk) -> Self {
        self.desk = desk;
        self
    }

    pub fn config(mut self, f: impl FnOnce(&mut DirectoryConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn build(self) -> TestApp {
        let directory = Arc::new(self.directory);
        let mail = Arc::new(self.mail);
        let desk = Arc::new(self.desk);

        let state = AppState::new(
            self.config,
            Backends {
                mail: mail.clone(),
                directory: directory.clone(),
                tickets: desk.clone(),
            },
        );
        let router = build_router(state).expect("Failed to build router");

        TestApp {
            router,
            users: self.users,
            directory,
            mail,
            desk,
        }
    }
}

impl TestApp {
    /// Known users: OWNER, ALICE, BOB and CAROL.
    pub fn builder() -> TestAppBuilder {
        let users = MockUsers::with(&[OWNER, ALICE, BOB, CAROL]);
        TestAppBuilder {
            directory: MockGroupDirectory::new(users.clone()),
            mail: MockMailDirectory::new(users.clone()),
            desk: MockTicketDesk::new(),
            users,
            config: test_config(),
        }
    }

    pub fn spawn() -> TestApp {
        Self::builder().build()
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body)).await
    }

    pub async fn patch(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::PATCH, uri, Some(body)).await
    }

    pub async fn put(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::PUT, uri, Some(body)).await
    }

    pub async fn delete(&self, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.request(Method::DELETE, uri, body).await
    }
}

pub fn oid(upn: &str) -> String {
    MockUsers::object_id(upn)
}
