//! Google Calendar provider over HTTP.
//!
//! Endpoints are configurable so tests can point the client at a mock server.

use super::{CalendarProvider, EventPage, TokenGrant};
use crate::error::ProviderError;
use crate::sync::SyncWindow;
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Longest `expires_in` accepted from the token endpoint (one year).
const MAX_TOKEN_LIFETIME_SECS: i64 = 86_400 * 365;

/// Process-wide provider settings. Contains the client secret; never log it.
#[derive(Clone)]
pub struct ProviderSettings {
    /// OAuth authorization endpoint URL
    pub auth_url: String,
    /// OAuth token endpoint URL
    pub token_url: String,
    /// Calendar REST API base URL
    pub api_base_url: String,
    pub scopes: Vec<String>,
    pub client_id: String,
    pub client_secret: String,
    /// Callback URL registered with the provider
    pub redirect_uri: String,
    /// Upper bound for every provider call
    pub request_timeout: std::time::Duration,
}

/// Standard OAuth 2.0 token response.
#[derive(Deserialize, Debug)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Standard OAuth 2.0 error response.
#[derive(Deserialize, Debug)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Deserialize, Debug)]
struct CalendarListEntry {
    id: String,
    #[serde(default)]
    primary: bool,
}

#[derive(Deserialize, Debug)]
struct CalendarList {
    #[serde(default)]
    items: Vec<CalendarListEntry>,
}

/// Stateless Google Calendar client.
///
/// One instance serves every owner: the `reqwest::Client` carries the
/// per-request timeout, tokens arrive as call arguments.
pub struct GoogleCalendarProvider {
    settings: ProviderSettings,
    http_client: Client,
}

impl GoogleCalendarProvider {
    pub fn new(settings: ProviderSettings) -> Result<Self, ProviderError> {
        let http_client = Client::builder()
            .user_agent("calsync/0.1")
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| ProviderError::Malformed(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            settings,
            http_client,
        })
    }

    /// POSTs a form to the token endpoint and classifies failures.
    async fn token_request(&self, form: &HashMap<&str, &str>) -> Result<TokenGrant, ProviderError> {
        let response = self
            .http_client
            .post(&self.settings.token_url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(classify_token_error(status, &body));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Malformed(format!("token response: {}", e)))?;

        let access_token = token
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ProviderError::Malformed("token response without access_token".into()))?;

        let lifetime = token.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        if !(0..=MAX_TOKEN_LIFETIME_SECS).contains(&lifetime) {
            return Err(ProviderError::Malformed(format!(
                "token response with out-of-range expires_in {}",
                lifetime
            )));
        }

        Ok(TokenGrant {
            access_token,
            refresh_token: token.refresh_token.filter(|t| !t.is_empty()),
            expires_at: Utc::now() + Duration::seconds(lifetime),
        })
    }
}

// Query bounds are sent at whole seconds and may only widen the local window;
// the engine drops anything starting outside it.
fn whole_second_floor(instant: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(instant.timestamp(), 0).single().unwrap_or(instant)
}

fn whole_second_ceil(instant: DateTime<Utc>) -> DateTime<Utc> {
    if instant.timestamp_subsec_nanos() == 0 {
        return instant;
    }
    Utc.timestamp_opt(instant.timestamp() + 1, 0)
        .single()
        .unwrap_or(instant)
}

/// Maps a failed token endpoint response to a provider error.
///
/// - `invalid_grant` → revoked/invalid grant
/// - 429 and 5xx → transient
/// - anything else → rejected
fn classify_token_error(status: StatusCode, body: &str) -> ProviderError {
    if let Ok(err) = serde_json::from_str::<TokenErrorResponse>(body) {
        if err.error == "invalid_grant" {
            return ProviderError::InvalidGrant(err.error_description.unwrap_or(err.error));
        }
    }
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return ProviderError::Transient(format!("token endpoint returned {}", status));
    }
    ProviderError::Rejected {
        status: status.as_u16(),
        body: body.to_string(),
    }
}

/// Checks a calendar API response status.
///
/// 401 is transient: the stored expiry decides when to refresh.
async fn check_api_response(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(ProviderError::Transient("access token rejected by calendar API".into()));
    }
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return Err(ProviderError::Transient(format!("calendar API returned {}", status)));
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read body>".to_string());
    Err(ProviderError::Rejected {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl CalendarProvider for GoogleCalendarProvider {
    fn authorization_url(&self, state: &str) -> String {
        let scopes = self.settings.scopes.join(" ");
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&access_type=offline&prompt=consent&include_granted_scopes=true",
            self.settings.auth_url,
            urlencoding::encode(&self.settings.client_id),
            urlencoding::encode(&self.settings.redirect_uri),
            urlencoding::encode(&scopes),
            urlencoding::encode(state)
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ProviderError> {
        debug!("Exchanging authorization code at {}", self.settings.token_url);

        let mut form = HashMap::new();
        form.insert("grant_type", "authorization_code");
        form.insert("code", code);
        form.insert("redirect_uri", self.settings.redirect_uri.as_str());
        form.insert("client_id", self.settings.client_id.as_str());
        form.insert("client_secret", self.settings.client_secret.as_str());

        let grant = self.token_request(&form).await?;
        debug!(has_refresh_token = grant.refresh_token.is_some(), "Authorization code exchanged");
        Ok(grant)
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError> {
        let mut form = HashMap::new();
        form.insert("grant_type", "refresh_token");
        form.insert("refresh_token", refresh_token);
        form.insert("client_id", self.settings.client_id.as_str());
        form.insert("client_secret", self.settings.client_secret.as_str());

        self.token_request(&form).await
    }

    async fn primary_calendar_id(&self, access_token: &str) -> Result<Option<String>, ProviderError> {
        let url = format!("{}/users/me/calendarList", self.settings.api_base_url);
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("maxResults", "250")])
            .send()
            .await?;

        let list: CalendarList = check_api_response(response).await?.json().await?;

        Ok(list
            .items
            .into_iter()
            .find(|entry| entry.primary)
            .map(|entry| entry.id))
    }

    async fn list_events_page(
        &self,
        access_token: &str,
        calendar_id: &str,
        window: &SyncWindow,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<EventPage, ProviderError> {
        let url = format!(
            "{}/calendars/{}/events",
            self.settings.api_base_url,
            urlencoding::encode(calendar_id)
        );

        let mut query: Vec<(&str, String)> = vec![
            (
                "timeMin",
                whole_second_floor(window.time_min()).to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            (
                "timeMax",
                whole_second_ceil(window.time_max()).to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
            ("maxResults", page_size.to_string()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(access_token)
            .query(&query)
            .send()
            .await?;

        let page: EventPage = check_api_response(response).await?.json().await?;
        debug!(
            calendar_id = %calendar_id,
            items = page.items.len(),
            has_more = page.next_page_token.is_some(),
            "Fetched event page"
        );
        Ok(page)
    }
}
