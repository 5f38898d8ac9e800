//! Credential Store: one OAuth integration per owner.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore                    │
//! │  - upsert by owner                       │
//! │  - token rotation / deactivation         │
//! └─────────────────────────────────────────┘
//!          ↓ seal              ↑ open
//! ┌─────────────────────────────────────────┐
//! │       TokenCipher (AES-256-GCM)          │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       Database (SQLite, shared)          │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use calsync::credentials::{CredentialStore, NewIntegration};
//! use calsync::db::Database;
//! use chrono::{Duration, Utc};
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let key = std::env::var("CALSYNC_ENCRYPTION_KEY")?;
//! let db = Arc::new(Database::open("calsync.db")?);
//! let store = CredentialStore::new(db, &key)?;
//!
//! store.upsert(&NewIntegration {
//!     owner_id: "user-1".to_string(),
//!     access_token: "ya29.a0".to_string(),
//!     refresh_token: "1//0g".to_string(),
//!     token_expiry: Utc::now() + Duration::hours(1),
//!     remote_calendar_id: "primary".to_string(),
//! })?;
//!
//! if let Some(integration) = store.get("user-1")? {
//!     println!("syncing {}", integration.remote_calendar_id);
//! }
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use std::fmt;

mod encryption;
mod storage;

pub use encryption::TokenCipher;
pub use storage::CredentialStore;

/// The persisted OAuth connection and calendar selection for one owner.
#[derive(Clone, PartialEq)]
pub struct Integration {
    pub id: i64,
    pub owner_id: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Instant after which `access_token` must be refreshed before use.
    pub token_expiry: DateTime<Utc>,
    pub remote_calendar_id: String,
    /// False once refresh is unrecoverable.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Integration {
    /// True when `now` is at or past the stored expiry.
    pub fn is_token_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.token_expiry
    }
}

// Tokens stay out of logs.
impl fmt::Debug for Integration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Integration")
            .field("id", &self.id)
            .field("owner_id", &self.owner_id)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("token_expiry", &self.token_expiry)
            .field("remote_calendar_id", &self.remote_calendar_id)
            .field("is_active", &self.is_active)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Fields written when an owner completes authorization.
#[derive(Clone)]
pub struct NewIntegration {
    pub owner_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub token_expiry: DateTime<Utc>,
    pub remote_calendar_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn integration(expiry: DateTime<Utc>) -> Integration {
        let now = Utc::now();
        Integration {
            id: 1,
            owner_id: "alice".to_string(),
            access_token: "secret-access".to_string(),
            refresh_token: "secret-refresh".to_string(),
            token_expiry: expiry,
            remote_calendar_id: "primary".to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_token_expiry_comparison() {
        let now = Utc::now();
        assert!(!integration(now + Duration::minutes(5)).is_token_expired(now));
        assert!(integration(now).is_token_expired(now));
        assert!(integration(now - Duration::seconds(1)).is_token_expired(now));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let rendered = format!("{:?}", integration(Utc::now()));
        assert!(!rendered.contains("secret-access"));
        assert!(!rendered.contains("secret-refresh"));
        assert!(rendered.contains("alice"));
    }
}
