//! Token Lifecycle Manager.
//!
//! Hands out a currently-valid access token per owner, refreshing it against
//! the provider when the stored expiry has passed. Refreshes are single-flight
//! per owner: concurrent callers queue on a per-owner lock and the ones that
//! arrive after a successful refresh reuse the stored result.

use crate::credentials::{CredentialStore, Integration};
use crate::error::{ProviderError, SyncError};
use crate::provider::CalendarProvider;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct TokenManager {
    credentials: Arc<CredentialStore>,
    provider: Arc<dyn CalendarProvider>,
    /// One lock per owner that has needed a refresh
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TokenManager {
    pub fn new(credentials: Arc<CredentialStore>, provider: Arc<dyn CalendarProvider>) -> Self {
        Self {
            credentials,
            provider,
            refresh_locks: DashMap::new(),
        }
    }

    fn load(&self, owner_id: &str) -> Result<Integration, SyncError> {
        let integration = self.credentials.get(owner_id)?.ok_or(SyncError::NotConnected)?;
        if !integration.is_active {
            return Err(SyncError::ReauthorizationRequired);
        }
        Ok(integration)
    }

    /// Returns a valid access token for `owner_id`.
    ///
    /// # Errors
    /// * `NotConnected` - No integration for this owner
    /// * `ReauthorizationRequired` - Integration inactive, or the refresh grant
    ///   was revoked (the integration is deactivated as a side effect)
    /// * `TransientProvider` - Refresh failed for a retryable reason; nothing stored changed
    pub async fn get_valid_access_token(&self, owner_id: &str) -> Result<String, SyncError> {
        let integration = self.load(owner_id)?;
        if !integration.is_token_expired(Utc::now()) {
            return Ok(integration.access_token);
        }

        let lock = Arc::clone(&self.refresh_locks.entry(owner_id.to_string()).or_default());
        let _guard = lock.lock().await;

        // Whoever held the lock before us may already have refreshed
        let integration = self.load(owner_id)?;
        if !integration.is_token_expired(Utc::now()) {
            debug!(owner_id = %owner_id, "Reusing token refreshed by concurrent caller");
            return Ok(integration.access_token);
        }

        info!(owner_id = %owner_id, "Refreshing expired access token");

        match self
            .provider
            .refresh_access_token(&integration.refresh_token)
            .await
        {
            Ok(grant) => {
                let stored = self.credentials.update_tokens(
                    owner_id,
                    &grant.access_token,
                    grant.refresh_token.as_deref(),
                    grant.expires_at,
                )?;
                if !stored {
                    // Disconnected while the refresh was in flight
                    return Err(SyncError::NotConnected);
                }
                info!(
                    owner_id = %owner_id,
                    rotated_refresh_token = grant.refresh_token.is_some(),
                    "Access token refreshed"
                );
                Ok(grant.access_token)
            }
            Err(ProviderError::InvalidGrant(reason)) => {
                warn!(
                    owner_id = %owner_id,
                    reason = %reason,
                    "Refresh grant revoked, deactivating integration"
                );
                self.credentials.deactivate(owner_id)?;
                Err(SyncError::ReauthorizationRequired)
            }
            Err(e) => {
                warn!(owner_id = %owner_id, error = %e, "Token refresh failed");
                Err(SyncError::TransientProvider(e.to_string()))
            }
        }
    }

    /// Drops the refresh lock of a disconnected owner.
    pub fn forget(&self, owner_id: &str) {
        self.refresh_locks.remove(owner_id);
    }
}
