//! Authorization Flow Handler.
//!
//! Implements the authorization code flow for one owner:
//! 1. `begin` issues a state nonce and returns the provider consent URL
//! 2. The owner consents on the provider's site
//! 3. The provider redirects back with `code` and `state`
//! 4. `complete` exchanges the code, discovers the primary calendar and
//!    stores the integration
//!
//! No events are mirrored here; the first sync is a separate call.

mod state_manager;

pub use state_manager::{run_state_cleanup, PendingAuthorization, StateManager};

use crate::credentials::{CredentialStore, Integration, NewIntegration};
use crate::error::{ProviderError, SyncError};
use crate::provider::CalendarProvider;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct AuthorizationFlow {
    provider: Arc<dyn CalendarProvider>,
    credentials: Arc<CredentialStore>,
    states: StateManager,
}

impl AuthorizationFlow {
    pub fn new(
        provider: Arc<dyn CalendarProvider>,
        credentials: Arc<CredentialStore>,
        states: StateManager,
    ) -> Self {
        Self {
            provider,
            credentials,
            states,
        }
    }

    pub fn state_manager(&self) -> &StateManager {
        &self.states
    }

    /// Returns the consent URL for `owner_id`.
    pub fn begin(&self, owner_id: &str) -> String {
        let state = self.states.issue(owner_id);
        debug!(owner_id = %owner_id, "Issued authorization state");
        self.provider.authorization_url(&state)
    }

    /// Completes the flow for the owner that `state` was issued to.
    ///
    /// # Errors
    /// * `InvalidState` - Unknown, expired or replayed state; provider not contacted
    /// * `TokenExchange` - Code rejected, or no refresh token in the grant
    /// * `TransientProvider` - Calendar discovery failed for a retryable reason
    /// * `NoPrimaryCalendar` - Account has no primary calendar
    pub async fn complete(&self, code: &str, state: &str) -> Result<Integration, SyncError> {
        let pending = self.states.consume(state).ok_or_else(|| {
            warn!("Invalid or expired OAuth state");
            SyncError::InvalidState
        })?;
        let owner_id = pending.owner_id;

        let grant = self
            .provider
            .exchange_code(code)
            .await
            .map_err(|e| {
                warn!(owner_id = %owner_id, error = %e, "Authorization code exchange failed");
                SyncError::TokenExchange(e.to_string())
            })?;

        let refresh_token = grant.refresh_token.ok_or_else(|| {
            warn!(owner_id = %owner_id, "Provider returned no refresh token");
            SyncError::TokenExchange("provider did not return a refresh token".to_string())
        })?;

        let calendar_id = match self.provider.primary_calendar_id(&grant.access_token).await {
            Ok(Some(id)) => id,
            Ok(None) => return Err(SyncError::NoPrimaryCalendar),
            Err(ProviderError::Transient(msg)) => return Err(SyncError::TransientProvider(msg)),
            Err(e) => return Err(SyncError::TokenExchange(e.to_string())),
        };

        let integration = self.credentials.upsert(&NewIntegration {
            owner_id: owner_id.clone(),
            access_token: grant.access_token,
            refresh_token,
            token_expiry: grant.expires_at,
            remote_calendar_id: calendar_id,
        })?;

        info!(
            owner_id = %owner_id,
            calendar_id = %integration.remote_calendar_id,
            "Calendar connected"
        );

        Ok(integration)
    }
}
