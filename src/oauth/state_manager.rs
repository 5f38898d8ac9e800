//! Single-use OAuth `state` nonces.
//!
//! `begin` hands the provider a random nonce instead of the owner id; the
//! callback trades it back for the owner id exactly once.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct PendingAuthorization {
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
}

/// Nonce to owner map with expiry.
#[derive(Clone)]
pub struct StateManager {
    states: Arc<Mutex<HashMap<String, PendingAuthorization>>>,
    expiry: Duration,
}

impl StateManager {
    pub fn new(expiry_seconds: i64) -> Self {
        Self {
            states: Arc::new(Mutex::new(HashMap::new())),
            expiry: Duration::seconds(expiry_seconds),
        }
    }

    // The map holds no invariants a panicking holder could break
    fn states(&self) -> MutexGuard<'_, HashMap<String, PendingAuthorization>> {
        self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Issues a fresh nonce bound to `owner_id`.
    pub fn issue(&self, owner_id: &str) -> String {
        let state = Uuid::new_v4().to_string();
        self.states().insert(
            state.clone(),
            PendingAuthorization {
                owner_id: owner_id.to_string(),
                created_at: Utc::now(),
            },
        );
        state
    }

    /// Removes the nonce and returns its owner if it was issued and has not expired.
    pub fn consume(&self, state: &str) -> Option<PendingAuthorization> {
        let entry = self.states().remove(state)?;
        if Utc::now() - entry.created_at > self.expiry {
            return None;
        }
        Some(entry)
    }

    /// Drops expired nonces and returns how many were purged.
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let expiry = self.expiry;
        let mut states = self.states();
        let before = states.len();
        states.retain(|_, entry| now - entry.created_at <= expiry);
        before - states.len()
    }
}

/// Purges expired nonces every `interval_seconds`.
pub async fn run_state_cleanup(manager: StateManager, interval_seconds: u64) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_seconds.max(1)));

    loop {
        interval.tick().await;
        let purged = manager.cleanup_expired();
        if purged > 0 {
            tracing::debug!(purged, "Expired OAuth states purged");
        }
    }
}
