//! Remote calendar provider seam.
//!
//! The engine only needs two capabilities from a provider: the OAuth2
//! authorization-code + refresh-token flow, and "list events in a time
//! window". [`CalendarProvider`] captures exactly that; [`GoogleCalendarProvider`]
//! implements it over HTTP.
//!
//! Providers are stateless with respect to owners: process-wide client
//! credentials live in the provider, per-owner tokens are passed on every call.

use crate::error::ProviderError;
use crate::sync::SyncWindow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

mod google;

pub use google::{GoogleCalendarProvider, ProviderSettings};

/// Result of a token exchange or refresh.
#[derive(Clone, PartialEq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Present on first consent and whenever the provider rotates it.
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Start or end of a remote event: either a timestamp or an all-day date.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEventTime {
    /// RFC 3339 timestamp
    #[serde(default)]
    pub date_time: Option<String>,
    /// `YYYY-MM-DD`, set for all-day events
    #[serde(default)]
    pub date: Option<String>,
}

/// An attendee as reported by the provider.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct RemoteAttendee {
    #[serde(default)]
    pub email: Option<String>,
}

/// One event occurrence as returned by the provider.
///
/// Every field is optional; malformed items are filtered during normalization.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct RemoteEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub start: Option<RemoteEventTime>,
    #[serde(default)]
    pub end: Option<RemoteEventTime>,
    #[serde(default)]
    pub attendees: Vec<RemoteAttendee>,
}

/// One bounded page of events.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventPage {
    #[serde(default)]
    pub items: Vec<RemoteEvent>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Capabilities the sync engine needs from a calendar provider.
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// Builds the consent URL for `state`.
    ///
    /// Requests calendar read/write plus basic identity scopes, offline access,
    /// and forces the consent screen so a refresh token is always issued.
    fn authorization_url(&self, state: &str) -> String;

    /// Exchanges an authorization code for a token pair.
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ProviderError>;

    /// Obtains a new access token with a refresh token.
    ///
    /// A revoked or invalid refresh token is reported as
    /// [`ProviderError::InvalidGrant`].
    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError>;

    /// Returns the id of the account's primary calendar, if it has one.
    async fn primary_calendar_id(&self, access_token: &str) -> Result<Option<String>, ProviderError>;

    /// Lists single event occurrences starting in `window`, ordered by start time.
    ///
    /// Recurring events are expanded. Pass the previous page's
    /// `next_page_token` to continue.
    async fn list_events_page(
        &self,
        access_token: &str,
        calendar_id: &str,
        window: &SyncWindow,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<EventPage, ProviderError>;
}
