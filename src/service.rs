//! Owner-facing operations: authorization, sync, status and disconnection.
//!
//! `CalendarSync` ties the stores, the token manager, the reconciliation
//! engine and the authorization flow together. Every method is scoped to a
//! single owner id and is an independent unit of work.

use crate::credentials::CredentialStore;
use crate::error::SyncError;
use crate::events::{EventStore, MirroredEvent};
use crate::oauth::AuthorizationFlow;
use crate::sync::{SyncEngine, SyncStats, SyncWindow, TokenManager};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Read-only view of an owner's connection.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationStatus {
    /// Mirrors the integration's active flag
    pub connected: bool,
    /// Stored expiry has passed. Never triggers a refresh.
    pub token_expired: bool,
    pub integration: Option<IntegrationSummary>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationSummary {
    pub calendar_id: String,
    pub connected_at: DateTime<Utc>,
    pub token_expiry: DateTime<Utc>,
    pub is_active: bool,
}

pub struct CalendarSync {
    credentials: Arc<CredentialStore>,
    events: Arc<EventStore>,
    tokens: Arc<TokenManager>,
    engine: Arc<SyncEngine>,
    authorization: AuthorizationFlow,
    default_window_days: i64,
}

impl CalendarSync {
    pub fn new(
        credentials: Arc<CredentialStore>,
        events: Arc<EventStore>,
        tokens: Arc<TokenManager>,
        engine: Arc<SyncEngine>,
        authorization: AuthorizationFlow,
        default_window_days: i64,
    ) -> Self {
        Self {
            credentials,
            events,
            tokens,
            engine,
            authorization,
            default_window_days,
        }
    }

    pub fn begin_authorization(&self, owner_id: &str) -> String {
        self.authorization.begin(owner_id)
    }

    /// Returns the owner the completed authorization belongs to.
    pub async fn complete_authorization(&self, code: &str, state: &str) -> Result<String, SyncError> {
        let integration = self.authorization.complete(code, state).await?;
        Ok(integration.owner_id)
    }

    /// Reconciles over `[time_min, time_max)`; missing bounds default to now
    /// and now plus the configured number of days.
    pub async fn reconcile(
        &self,
        owner_id: &str,
        time_min: Option<DateTime<Utc>>,
        time_max: Option<DateTime<Utc>>,
    ) -> Result<SyncStats, SyncError> {
        let window = SyncWindow::with_defaults(time_min, time_max, Utc::now(), self.default_window_days)?;
        self.engine.reconcile(owner_id, window).await
    }

    pub fn get_status(&self, owner_id: &str) -> Result<IntegrationStatus, SyncError> {
        let status = match self.credentials.get(owner_id)? {
            Some(integration) => IntegrationStatus {
                connected: integration.is_active,
                token_expired: integration.is_token_expired(Utc::now()),
                integration: Some(IntegrationSummary {
                    calendar_id: integration.remote_calendar_id,
                    connected_at: integration.created_at,
                    token_expiry: integration.token_expiry,
                    is_active: integration.is_active,
                }),
            },
            None => IntegrationStatus {
                connected: false,
                token_expired: false,
                integration: None,
            },
        };
        Ok(status)
    }

    /// Deletes the integration and every mirrored event. Succeeds when
    /// nothing was connected.
    ///
    /// Waits for an in-flight sync of the same owner to finish first.
    pub async fn disconnect(&self, owner_id: &str) -> Result<(), SyncError> {
        let _exclusive = self.engine.exclusive(owner_id).await;

        let removed = self.credentials.delete(owner_id)?;
        self.tokens.forget(owner_id);
        self.engine.forget(owner_id);

        if removed {
            info!(owner_id = %owner_id, "Calendar disconnected");
        } else {
            info!(owner_id = %owner_id, "Disconnect requested with no integration");
        }
        Ok(())
    }

    /// Mirrored events starting in the window, ordered by start time.
    pub fn list_events(
        &self,
        owner_id: &str,
        time_min: Option<DateTime<Utc>>,
        time_max: Option<DateTime<Utc>>,
    ) -> Result<Vec<MirroredEvent>, SyncError> {
        let integration = self.credentials.get(owner_id)?.ok_or(SyncError::NotConnected)?;
        let window = SyncWindow::with_defaults(time_min, time_max, Utc::now(), self.default_window_days)?;
        Ok(self.events.list_in_window(integration.id, &window)?)
    }
}
