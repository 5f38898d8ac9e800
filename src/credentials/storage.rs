//! SQLite-backed integration records with encrypted tokens.

use super::{encryption::TokenCipher, Integration, NewIntegration};
use crate::db::{self, Database};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;

/// Raw row as stored, before token decryption.
struct IntegrationRow {
    id: i64,
    owner_id: String,
    access_token: String,
    access_token_nonce: String,
    refresh_token: String,
    refresh_token_nonce: String,
    token_expiry_ms: i64,
    remote_calendar_id: String,
    is_active: bool,
    created_at: String,
    updated_at: String,
}

impl IntegrationRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            access_token: row.get(2)?,
            access_token_nonce: row.get(3)?,
            refresh_token: row.get(4)?,
            refresh_token_nonce: row.get(5)?,
            token_expiry_ms: row.get(6)?,
            remote_calendar_id: row.get(7)?,
            is_active: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

const SELECT_INTEGRATION: &str = r#"
    SELECT id, owner_id,
           access_token, access_token_nonce,
           refresh_token, refresh_token_nonce,
           token_expiry_ms, remote_calendar_id, is_active,
           created_at, updated_at
    FROM integrations
    WHERE owner_id = ?1
"#;

/// Integration storage, scoped by owner id.
///
/// # Thread Safety
/// - The shared connection is behind a mutex held for one statement or transaction
/// - Upsert and token rotation are single statements, so readers never see
///   a half-written token pair
pub struct CredentialStore {
    db: Arc<Database>,
    cipher: TokenCipher,
}

impl CredentialStore {
    /// Creates a store over a shared database.
    ///
    /// # Arguments
    /// * `db` - Shared database (also used by the event store)
    /// * `encryption_key` - Base64-encoded 32-byte master key
    pub fn new(db: Arc<Database>, encryption_key: &str) -> Result<Self> {
        let cipher = TokenCipher::from_base64_key(encryption_key).context("Invalid encryption key")?;
        Ok(Self { db, cipher })
    }

    /// Creates or replaces the integration for an owner and marks it active.
    ///
    /// The row id is kept on replacement. When the remote calendar changes,
    /// the events mirrored from the previous calendar are removed in the same
    /// transaction.
    pub fn upsert(&self, new: &NewIntegration) -> Result<Integration> {
        let (access_token, access_token_nonce) = self
            .cipher
            .seal(&new.access_token)
            .context("Failed to encrypt access token")?;
        let (refresh_token, refresh_token_nonce) = self
            .cipher
            .seal(&new.refresh_token)
            .context("Failed to encrypt refresh token")?;
        let now = Utc::now().to_rfc3339();

        {
            let mut conn = self.db.lock()?;
            let tx = conn.transaction().context("Failed to begin transaction")?;

            let previous: Option<(i64, String)> = tx
                .query_row(
                    "SELECT id, remote_calendar_id FROM integrations WHERE owner_id = ?1",
                    params![new.owner_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .context("Failed to read existing integration")?;

            if let Some((id, calendar_id)) = &previous {
                if *calendar_id != new.remote_calendar_id {
                    tx.execute(
                        "DELETE FROM mirrored_events WHERE integration_id = ?1",
                        params![id],
                    )
                    .context("Failed to clear events of replaced calendar")?;
                }
            }

            tx.execute(
                r#"
                INSERT INTO integrations (
                    owner_id,
                    access_token, access_token_nonce,
                    refresh_token, refresh_token_nonce,
                    token_expiry_ms, remote_calendar_id, is_active,
                    created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?8)
                ON CONFLICT(owner_id) DO UPDATE SET
                    access_token = excluded.access_token,
                    access_token_nonce = excluded.access_token_nonce,
                    refresh_token = excluded.refresh_token,
                    refresh_token_nonce = excluded.refresh_token_nonce,
                    token_expiry_ms = excluded.token_expiry_ms,
                    remote_calendar_id = excluded.remote_calendar_id,
                    is_active = 1,
                    updated_at = excluded.updated_at
                "#,
                params![
                    new.owner_id,
                    access_token,
                    access_token_nonce,
                    refresh_token,
                    refresh_token_nonce,
                    new.token_expiry.timestamp_millis(),
                    new.remote_calendar_id,
                    now,
                ],
            )
            .context("Failed to store integration")?;

            tx.commit().context("Failed to commit integration")?;
        }

        self.get(&new.owner_id)?
            .context("Integration missing immediately after upsert")
    }

    /// Reads and decrypts the integration for an owner.
    pub fn get(&self, owner_id: &str) -> Result<Option<Integration>> {
        let row = {
            let conn = self.db.lock()?;
            conn.query_row(SELECT_INTEGRATION, params![owner_id], IntegrationRow::from_row)
                .optional()
                .context("Failed to query integration")?
        };

        row.map(|row| self.decrypt_row(row)).transpose()
    }

    fn decrypt_row(&self, row: IntegrationRow) -> Result<Integration> {
        let access_token = self
            .cipher
            .open(&row.access_token, &row.access_token_nonce)
            .context("Failed to decrypt access token")?;
        let refresh_token = self
            .cipher
            .open(&row.refresh_token, &row.refresh_token_nonce)
            .context("Failed to decrypt refresh token")?;

        Ok(Integration {
            id: row.id,
            owner_id: row.owner_id,
            access_token,
            refresh_token,
            token_expiry: db::from_millis(row.token_expiry_ms)?,
            remote_calendar_id: row.remote_calendar_id,
            is_active: row.is_active,
            created_at: db::parse_rfc3339(&row.created_at)?,
            updated_at: db::parse_rfc3339(&row.updated_at)?,
        })
    }

    /// Persists a refreshed access token.
    ///
    /// `refresh_token` overwrites the stored one only when the provider rotated it.
    ///
    /// # Returns
    /// * `Ok(true)` - Tokens updated
    /// * `Ok(false)` - No integration for this owner
    pub fn update_tokens(
        &self,
        owner_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        token_expiry: DateTime<Utc>,
    ) -> Result<bool> {
        let (access_enc, access_nonce) = self
            .cipher
            .seal(access_token)
            .context("Failed to encrypt access token")?;
        let expiry_ms = token_expiry.timestamp_millis();
        let now = Utc::now().to_rfc3339();

        let rows = match refresh_token {
            Some(refresh) => {
                let (refresh_enc, refresh_nonce) = self
                    .cipher
                    .seal(refresh)
                    .context("Failed to encrypt refresh token")?;
                self.db.lock()?.execute(
                    r#"
                    UPDATE integrations SET
                        access_token = ?2, access_token_nonce = ?3,
                        refresh_token = ?4, refresh_token_nonce = ?5,
                        token_expiry_ms = ?6, updated_at = ?7
                    WHERE owner_id = ?1
                    "#,
                    params![
                        owner_id,
                        access_enc,
                        access_nonce,
                        refresh_enc,
                        refresh_nonce,
                        expiry_ms,
                        now
                    ],
                )
            }
            None => self.db.lock()?.execute(
                r#"
                UPDATE integrations SET
                    access_token = ?2, access_token_nonce = ?3,
                    token_expiry_ms = ?4, updated_at = ?5
                WHERE owner_id = ?1
                "#,
                params![owner_id, access_enc, access_nonce, expiry_ms, now],
            ),
        }
        .context("Failed to update tokens")?;

        Ok(rows > 0)
    }

    /// Marks the integration inactive (refresh grant revoked).
    pub fn deactivate(&self, owner_id: &str) -> Result<bool> {
        let rows = self
            .db
            .lock()?
            .execute(
                "UPDATE integrations SET is_active = 0, updated_at = ?2 WHERE owner_id = ?1",
                params![owner_id, Utc::now().to_rfc3339()],
            )
            .context("Failed to deactivate integration")?;

        Ok(rows > 0)
    }

    /// Deletes the integration; mirrored events go with it.
    ///
    /// # Returns
    /// * `Ok(true)` - Integration deleted
    /// * `Ok(false)` - Nothing to delete
    pub fn delete(&self, owner_id: &str) -> Result<bool> {
        let rows = self
            .db
            .lock()?
            .execute(
                "DELETE FROM integrations WHERE owner_id = ?1",
                params![owner_id],
            )
            .context("Failed to delete integration")?;

        Ok(rows > 0)
    }

    /// Lists owners with an active integration, for the periodic trigger.
    pub fn list_active_owners(&self) -> Result<Vec<String>> {
        let conn = self.db.lock()?;
        let mut stmt = conn
            .prepare("SELECT owner_id FROM integrations WHERE is_active = 1 ORDER BY owner_id")
            .context("Failed to prepare query")?;

        let owners = stmt
            .query_map([], |row| row.get(0))
            .context("Failed to execute query")?
            .collect::<Result<Vec<String>, _>>()
            .context("Failed to read results")?;

        Ok(owners)
    }
}
