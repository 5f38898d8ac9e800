// Shared fixtures for API integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use calsync::api::{create_calendar_router, CalendarAppState};
use calsync::credentials::CredentialStore;
use calsync::db::Database;
use calsync::error::ProviderError;
use calsync::events::EventStore;
use calsync::oauth::{AuthorizationFlow, StateManager};
use calsync::provider::{CalendarProvider, EventPage, RemoteEvent, RemoteEventTime, TokenGrant};
use calsync::service::CalendarSync;
use calsync::sync::{SyncEngine, SyncSettings, SyncWindow, TokenManager};
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

/// Provider double: fixed token endpoints, scriptable event list.
pub struct StubProvider {
    pub events: Mutex<Vec<RemoteEvent>>,
    pub revoked: Mutex<bool>,
}

impl StubProvider {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            revoked: Mutex::new(false),
        }
    }

    pub fn set_events(&self, events: Vec<RemoteEvent>) {
        *self.events.lock().unwrap() = events;
    }

    pub fn revoke(&self) {
        *self.revoked.lock().unwrap() = true;
    }
}

#[async_trait]
impl CalendarProvider for StubProvider {
    fn authorization_url(&self, state: &str) -> String {
        format!("https://accounts.test/auth?prompt=consent&state={}", state)
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ProviderError> {
        if code == "bad-code" {
            return Err(ProviderError::InvalidGrant("Bad Request".to_string()));
        }
        Ok(TokenGrant {
            access_token: "access-1".to_string(),
            refresh_token: Some("refresh-1".to_string()),
            expires_at: Utc::now() + Duration::hours(1),
        })
    }

    async fn refresh_access_token(&self, _refresh_token: &str) -> Result<TokenGrant, ProviderError> {
        if *self.revoked.lock().unwrap() {
            return Err(ProviderError::InvalidGrant("Token has been expired or revoked.".to_string()));
        }
        Ok(TokenGrant {
            access_token: "access-2".to_string(),
            refresh_token: None,
            expires_at: Utc::now() + Duration::hours(1),
        })
    }

    async fn primary_calendar_id(&self, _access_token: &str) -> Result<Option<String>, ProviderError> {
        Ok(Some("owner@example.com".to_string()))
    }

    async fn list_events_page(
        &self,
        _access_token: &str,
        _calendar_id: &str,
        _window: &SyncWindow,
        _page_token: Option<&str>,
        _page_size: usize,
    ) -> Result<EventPage, ProviderError> {
        Ok(EventPage {
            items: self.events.lock().unwrap().clone(),
            next_page_token: None,
        })
    }
}

pub fn timed_event(id: &str, title: &str, start: DateTime<Utc>) -> RemoteEvent {
    RemoteEvent {
        id: Some(id.to_string()),
        status: Some("confirmed".to_string()),
        summary: Some(title.to_string()),
        start: Some(RemoteEventTime {
            date_time: Some(start.to_rfc3339()),
            date: None,
        }),
        end: Some(RemoteEventTime {
            date_time: Some((start + Duration::minutes(30)).to_rfc3339()),
            date: None,
        }),
        ..RemoteEvent::default()
    }
}

pub struct TestApp {
    pub router: Router,
    pub provider: Arc<StubProvider>,
    pub credentials: Arc<CredentialStore>,
    pub events: Arc<EventStore>,
}

pub fn create_test_app(auth_enabled: bool) -> TestApp {
    let db = Arc::new(Database::open(":memory:").unwrap());
    let key = BASE64.encode([0u8; 32]);
    let credentials = Arc::new(CredentialStore::new(Arc::clone(&db), &key).unwrap());
    let events = Arc::new(EventStore::new(Arc::clone(&db)));
    let provider = Arc::new(StubProvider::new());

    let tokens = Arc::new(TokenManager::new(Arc::clone(&credentials), provider.clone()));
    let engine = Arc::new(SyncEngine::new(
        Arc::clone(&credentials),
        Arc::clone(&events),
        Arc::clone(&tokens),
        provider.clone(),
        SyncSettings::default(),
    ));
    let authorization = AuthorizationFlow::new(
        provider.clone(),
        Arc::clone(&credentials),
        StateManager::new(600),
    );
    let service = Arc::new(CalendarSync::new(
        Arc::clone(&credentials),
        Arc::clone(&events),
        tokens,
        engine,
        authorization,
        30,
    ));

    let router = create_calendar_router(CalendarAppState {
        service,
        auth_enabled,
        success_redirect: "/settings?calendar=connected".to_string(),
        error_redirect: "/settings?calendar=error".to_string(),
    });

    TestApp {
        router,
        provider,
        credentials,
        events,
    }
}

pub fn get(uri: &str, owner: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(owner) = owner {
        builder = builder.header("authorization", format!("Bearer {}", owner));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn post(uri: &str, owner: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(owner) = owner {
        builder = builder.header("authorization", format!("Bearer {}", owner));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub async fn send(router: &Router, request: Request<Body>) -> Response<Body> {
    router.clone().oneshot(request).await.unwrap()
}

pub async fn json_of(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

pub fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get("location")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

/// Authorize plus callback for `owner`.
pub async fn connect(app: &TestApp, owner: &str) {
    let response = send(&app.router, get("/api/calendar/authorize", Some(owner))).await;
    let json = json_of(response).await;
    let url = json["authorizationUrl"].as_str().unwrap().to_string();
    let state = url.split("state=").nth(1).unwrap().to_string();

    let response = send(
        &app.router,
        get(&format!("/api/calendar/callback?code=good&state={}", state), None),
    )
    .await;
    assert_eq!(location(&response), "/settings?calendar=connected");
}
