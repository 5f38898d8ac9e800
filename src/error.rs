//! Error taxonomy for the calendar synchronization engine.
//!
//! `SyncError` is what every public engine operation returns. The HTTP layer
//! maps each variant to a distinct response so callers can tell "reconnect
//! your calendar" apart from "try again later".

use thiserror::Error;

/// Errors surfaced by the authorization, token, reconciliation and status operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No integration exists for the owner.
    #[error("calendar is not connected")]
    NotConnected,

    /// The authorization code could not be exchanged for a usable token pair.
    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    /// The provider reported no primary calendar for the authorized account.
    #[error("no primary calendar found for the authorized account")]
    NoPrimaryCalendar,

    /// The refresh grant was revoked or is invalid. The integration has been
    /// deactivated and the owner must authorize again.
    #[error("calendar authorization expired, reconnect required")]
    ReauthorizationRequired,

    /// Network failure, timeout, rate limit or 5xx from the provider.
    #[error("calendar provider unavailable: {0}")]
    TransientProvider(String),

    /// Another reconciliation run for the same owner is in flight.
    #[error("sync already in progress")]
    SyncInProgress,

    /// The run deadline expired before the run completed.
    #[error("sync deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// `timeMin` is not strictly before `timeMax`.
    #[error("invalid sync window: {0}")]
    InvalidWindow(String),

    /// OAuth `state` was unknown, expired or already consumed.
    #[error("invalid or expired authorization state")]
    InvalidState,

    /// Local persistence failure.
    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl SyncError {
    /// True when the owner has to run the authorization flow again.
    pub fn needs_reauth(&self) -> bool {
        matches!(self, SyncError::ReauthorizationRequired)
    }
}

/// Errors from a single call to the remote calendar provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The grant (authorization code or refresh token) is revoked or invalid.
    #[error("invalid grant: {0}")]
    InvalidGrant(String),

    /// Network error, timeout, 429 or 5xx. Safe to retry later.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// Non-retryable rejection that is not a grant problem.
    #[error("provider rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The provider answered with a body we could not interpret.
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Transient(format!("request timed out: {}", err))
        } else if err.is_decode() {
            ProviderError::Malformed(err.to_string())
        } else {
            ProviderError::Transient(err.to_string())
        }
    }
}
