//! HTTP surface under `/api/calendar`.

mod calendar;

pub use calendar::{create_calendar_router, CalendarAppState};

use crate::auth::TokenError;
use crate::error::SyncError;
use axum::{
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, warn};

/// Error response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error: String,
    /// Set when the owner has to connect the calendar again
    needs_reauth: bool,
}

/// Application error types for calendar endpoints
pub(crate) enum AppError {
    BadRequest(String),
    Unauthorized(String),
    Sync(SyncError),
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        AppError::Sync(err)
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        AppError::Unauthorized(format!("Invalid token: {}", err))
    }
}

pub(crate) fn sync_error_status(err: &SyncError) -> StatusCode {
    match err {
        SyncError::NotConnected => StatusCode::NOT_FOUND,
        SyncError::ReauthorizationRequired => StatusCode::UNAUTHORIZED,
        SyncError::TokenExchange(_) | SyncError::NoPrimaryCalendar => StatusCode::BAD_GATEWAY,
        SyncError::TransientProvider(_) => StatusCode::BAD_GATEWAY,
        SyncError::SyncInProgress => StatusCode::CONFLICT,
        SyncError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
        SyncError::InvalidWindow(_) | SyncError::InvalidState => StatusCode::BAD_REQUEST,
        SyncError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, needs_reauth) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, false),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, false),
            AppError::Sync(err) => {
                let status = sync_error_status(&err);
                let message = match &err {
                    SyncError::Storage(inner) => {
                        error!(error = %format!("{:#}", inner), "Storage failure");
                        "Internal storage error".to_string()
                    }
                    other => {
                        warn!(status = status.as_u16(), error = %other, "Calendar request failed");
                        other.to_string()
                    }
                };
                (status, message, err.needs_reauth())
            }
        };

        let body = Json(ErrorResponse {
            error: message,
            needs_reauth,
        });

        (status, body).into_response()
    }
}

/// CORS for the calendar API. An empty origin list means permissive CORS.
pub fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<_> = allowed_origins
        .iter()
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    if origins.is_empty() {
        warn!("No CORS origins configured, using permissive CORS");
        return CorsLayer::permissive();
    }

    tracing::info!("CORS configured for origins: {:?}", origins);
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
