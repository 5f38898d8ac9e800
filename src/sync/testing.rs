//! In-process provider and store fixtures for engine tests.

use super::SyncWindow;
use crate::credentials::CredentialStore;
use crate::db::Database;
use crate::error::ProviderError;
use crate::events::EventStore;
use crate::provider::{CalendarProvider, EventPage, RemoteEvent, RemoteEventTime, TokenGrant};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn test_stores_with_db() -> (Arc<Database>, Arc<CredentialStore>, Arc<EventStore>) {
    let db = Arc::new(Database::open(":memory:").unwrap());
    let credentials = CredentialStore::new(Arc::clone(&db), &BASE64.encode([7u8; 32])).unwrap();
    let events = EventStore::new(Arc::clone(&db));
    (db, Arc::new(credentials), Arc::new(events))
}

pub fn test_stores() -> (Arc<CredentialStore>, Arc<EventStore>) {
    let (_db, credentials, events) = test_stores_with_db();
    (credentials, events)
}

pub fn remote_event(id: &str, title: &str, start: DateTime<Utc>) -> RemoteEvent {
    RemoteEvent {
        id: Some(id.to_string()),
        status: Some("confirmed".to_string()),
        summary: Some(title.to_string()),
        start: Some(RemoteEventTime {
            date_time: Some(start.to_rfc3339()),
            date: None,
        }),
        end: Some(RemoteEventTime {
            date_time: Some((start + Duration::hours(1)).to_rfc3339()),
            date: None,
        }),
        ..RemoteEvent::default()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RefreshBehavior {
    Succeed,
    Rotate,
    InvalidGrant,
    Transient,
}

/// Scriptable provider. Events are served unfiltered, in pages of `page_size`.
pub struct FakeProvider {
    events: Mutex<Vec<RemoteEvent>>,
    refresh_behavior: Mutex<RefreshBehavior>,
    refresh_delay: Mutex<Option<std::time::Duration>>,
    list_delay: Mutex<Option<std::time::Duration>>,
    list_failure: Mutex<Option<String>>,
    refresh_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            refresh_behavior: Mutex::new(RefreshBehavior::Succeed),
            refresh_delay: Mutex::new(None),
            list_delay: Mutex::new(None),
            list_failure: Mutex::new(None),
            refresh_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_events(&self, events: Vec<RemoteEvent>) {
        *self.events.lock().unwrap() = events;
    }

    pub fn set_refresh_behavior(&self, behavior: RefreshBehavior) {
        *self.refresh_behavior.lock().unwrap() = behavior;
    }

    pub fn set_refresh_delay(&self, delay: std::time::Duration) {
        *self.refresh_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_list_delay(&self, delay: std::time::Duration) {
        *self.list_delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_listing(&self, message: &str) {
        *self.list_failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CalendarProvider for FakeProvider {
    fn authorization_url(&self, state: &str) -> String {
        format!("https://provider.test/auth?state={}&prompt=consent", state)
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ProviderError> {
        match code {
            "no-refresh" => Ok(TokenGrant {
                access_token: "initial-access".to_string(),
                refresh_token: None,
                expires_at: Utc::now() + Duration::hours(1),
            }),
            "bad-code" => Err(ProviderError::InvalidGrant("Malformed auth code.".to_string())),
            _ => Ok(TokenGrant {
                access_token: "initial-access".to_string(),
                refresh_token: Some("initial-refresh".to_string()),
                expires_at: Utc::now() + Duration::hours(1),
            }),
        }
    }

    async fn refresh_access_token(&self, _refresh_token: &str) -> Result<TokenGrant, ProviderError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.refresh_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let behavior = *self.refresh_behavior.lock().unwrap();
        match behavior {
            RefreshBehavior::Succeed | RefreshBehavior::Rotate => Ok(TokenGrant {
                access_token: format!("refreshed-access-{}", n),
                refresh_token: (behavior == RefreshBehavior::Rotate)
                    .then(|| format!("rotated-refresh-{}", n)),
                expires_at: Utc::now() + Duration::hours(1),
            }),
            RefreshBehavior::InvalidGrant => Err(ProviderError::InvalidGrant(
                "Token has been expired or revoked.".to_string(),
            )),
            RefreshBehavior::Transient => {
                Err(ProviderError::Transient("token endpoint returned 503".to_string()))
            }
        }
    }

    async fn primary_calendar_id(&self, access_token: &str) -> Result<Option<String>, ProviderError> {
        if access_token == "initial-access" {
            Ok(Some("primary".to_string()))
        } else {
            Ok(None)
        }
    }

    async fn list_events_page(
        &self,
        _access_token: &str,
        _calendar_id: &str,
        _window: &SyncWindow,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<EventPage, ProviderError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.list_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.list_failure.lock().unwrap().clone();
        if let Some(message) = failure {
            return Err(ProviderError::Transient(message));
        }

        let events = self.events.lock().unwrap().clone();
        let offset: usize = page_token.map(|t| t.parse().unwrap()).unwrap_or(0);
        let end = (offset + page_size).min(events.len());
        let next_page_token = (end < events.len()).then(|| end.to_string());

        Ok(EventPage {
            items: events[offset..end].to_vec(),
            next_page_token,
        })
    }
}
