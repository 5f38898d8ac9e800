//! Calendar endpoints.
//!
//! ```text
//! GET  /api/calendar/authorize   -> { authorizationUrl }
//! GET  /api/calendar/callback    -> redirect to the success or error page
//! POST /api/calendar/sync        -> { stats }
//! POST /api/calendar/disconnect  -> { message }
//! GET  /api/calendar/status      -> { connected, tokenExpired, integration }
//! GET  /api/calendar/events      -> { events }
//! ```

use super::AppError;
use crate::auth::resolve_owner;
use crate::error::SyncError;
use crate::events::MirroredEvent;
use crate::service::{CalendarSync, IntegrationStatus};
use crate::sync::SyncStats;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    response::{Json, Redirect},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared application state for the calendar API
#[derive(Clone)]
pub struct CalendarAppState {
    pub service: Arc<CalendarSync>,
    pub auth_enabled: bool,
    pub success_redirect: String,
    pub error_redirect: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeResponse {
    authorization_url: String,
}

/// OAuth callback query parameters
#[derive(Deserialize, Debug, Default)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// Sync window; both bounds optional.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct WindowParams {
    time_min: Option<DateTime<Utc>>,
    time_max: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct SyncResponse {
    stats: SyncStats,
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

#[derive(Serialize)]
struct EventsResponse {
    events: Vec<MirroredEvent>,
}

/// Create calendar API router
pub fn create_calendar_router(state: CalendarAppState) -> Router {
    Router::new()
        .route("/api/calendar/authorize", get(authorize))
        .route("/api/calendar/callback", get(callback))
        .route("/api/calendar/sync", post(sync))
        .route("/api/calendar/disconnect", post(disconnect))
        .route("/api/calendar/status", get(status))
        .route("/api/calendar/events", get(events))
        .with_state(Arc::new(state))
}

/// Appends `reason` to a redirect destination.
fn with_reason(destination: &str, reason: &str) -> String {
    let separator = if destination.contains('?') { '&' } else { '?' };
    format!(
        "{}{}reason={}",
        destination,
        separator,
        urlencoding::encode(reason)
    )
}

fn failure_reason(err: &SyncError) -> &'static str {
    match err {
        SyncError::InvalidState => "invalid_state",
        SyncError::TokenExchange(_) => "token_exchange",
        SyncError::NoPrimaryCalendar => "no_primary_calendar",
        SyncError::TransientProvider(_) => "provider_unavailable",
        _ => "internal",
    }
}

/// GET /api/calendar/authorize
async fn authorize(
    State(state): State<Arc<CalendarAppState>>,
    headers: HeaderMap,
) -> Result<Json<AuthorizeResponse>, AppError> {
    let owner_id = resolve_owner(&headers, state.auth_enabled)?;
    let authorization_url = state.service.begin_authorization(&owner_id);

    info!(owner_id = %owner_id, "Authorization started");

    Ok(Json(AuthorizeResponse { authorization_url }))
}

/// GET /api/calendar/callback
///
/// Reached by the provider's browser redirect, so failures redirect to the
/// error page rather than returning an error status.
async fn callback(
    State(state): State<Arc<CalendarAppState>>,
    Query(query): Query<CallbackQuery>,
) -> Redirect {
    if let Some(error) = query.error {
        warn!(error = %error, "Provider reported authorization failure");
        return Redirect::to(&with_reason(&state.error_redirect, &error));
    }

    let (Some(code), Some(csrf_state)) = (query.code, query.state) else {
        warn!("Authorization callback without code or state");
        return Redirect::to(&with_reason(&state.error_redirect, "missing_parameters"));
    };

    match state.service.complete_authorization(&code, &csrf_state).await {
        Ok(owner_id) => {
            debug!(owner_id = %owner_id, "Authorization callback complete");
            Redirect::to(&state.success_redirect)
        }
        Err(e) => {
            warn!(error = %e, "Authorization callback failed");
            Redirect::to(&with_reason(&state.error_redirect, failure_reason(&e)))
        }
    }
}

/// POST /api/calendar/sync
///
/// Body `{ "timeMin"?, "timeMax"? }`; an empty body uses the default window.
async fn sync(
    State(state): State<Arc<CalendarAppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SyncResponse>, AppError> {
    let owner_id = resolve_owner(&headers, state.auth_enabled)?;

    let params: WindowParams = if body.iter().all(u8::is_ascii_whitespace) {
        WindowParams::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid sync request: {}", e)))?
    };

    let stats = state
        .service
        .reconcile(&owner_id, params.time_min, params.time_max)
        .await?;

    Ok(Json(SyncResponse { stats }))
}

/// POST /api/calendar/disconnect
async fn disconnect(
    State(state): State<Arc<CalendarAppState>>,
    headers: HeaderMap,
) -> Result<Json<MessageResponse>, AppError> {
    let owner_id = resolve_owner(&headers, state.auth_enabled)?;
    state.service.disconnect(&owner_id).await?;

    Ok(Json(MessageResponse {
        message: "Calendar disconnected".to_string(),
    }))
}

/// GET /api/calendar/status
async fn status(
    State(state): State<Arc<CalendarAppState>>,
    headers: HeaderMap,
) -> Result<Json<IntegrationStatus>, AppError> {
    let owner_id = resolve_owner(&headers, state.auth_enabled)?;
    Ok(Json(state.service.get_status(&owner_id)?))
}

/// GET /api/calendar/events?timeMin&timeMax
async fn events(
    State(state): State<Arc<CalendarAppState>>,
    headers: HeaderMap,
    Query(params): Query<WindowParams>,
) -> Result<Json<EventsResponse>, AppError> {
    let owner_id = resolve_owner(&headers, state.auth_enabled)?;
    let events = state
        .service
        .list_events(&owner_id, params.time_min, params.time_max)?;

    Ok(Json(EventsResponse { events }))
}
