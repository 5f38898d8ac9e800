//! Shared SQLite database for integrations and mirrored events.
//!
//! Both stores live in one database so that deleting an integration cascades
//! to its mirrored events through a foreign key.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite connection shared by [`CredentialStore`](crate::credentials::CredentialStore)
/// and [`EventStore`](crate::events::EventStore).
///
/// # Schema
/// ```sql
/// CREATE TABLE integrations (
///     id INTEGER PRIMARY KEY,
///     owner_id TEXT NOT NULL UNIQUE,
///     access_token TEXT NOT NULL,        -- Encrypted
///     access_token_nonce TEXT NOT NULL,
///     refresh_token TEXT NOT NULL,       -- Encrypted
///     refresh_token_nonce TEXT NOT NULL,
///     token_expiry_ms INTEGER NOT NULL,
///     remote_calendar_id TEXT NOT NULL,
///     is_active INTEGER NOT NULL,
///     created_at TEXT NOT NULL,
///     updated_at TEXT NOT NULL
/// );
///
/// CREATE TABLE mirrored_events (
///     id TEXT PRIMARY KEY,
///     integration_id INTEGER NOT NULL REFERENCES integrations(id) ON DELETE CASCADE,
///     external_event_id TEXT NOT NULL,
///     title TEXT NOT NULL,
///     description TEXT,
///     location TEXT,
///     start_time_ms INTEGER NOT NULL,
///     end_time_ms INTEGER NOT NULL,
///     is_all_day INTEGER NOT NULL,
///     attendees TEXT NOT NULL,           -- Sorted JSON array
///     created_at TEXT NOT NULL,
///     updated_at TEXT NOT NULL,
///     UNIQUE(integration_id, external_event_id)
/// );
/// ```
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Opens (or creates) the database and applies the schema.
    ///
    /// Pass `":memory:"` for an ephemeral database.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS integrations (
                id INTEGER PRIMARY KEY,
                owner_id TEXT NOT NULL UNIQUE,
                access_token TEXT NOT NULL,
                access_token_nonce TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                refresh_token_nonce TEXT NOT NULL,
                token_expiry_ms INTEGER NOT NULL,
                remote_calendar_id TEXT NOT NULL,
                is_active INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS mirrored_events (
                id TEXT PRIMARY KEY,
                integration_id INTEGER NOT NULL
                    REFERENCES integrations(id) ON DELETE CASCADE,
                external_event_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                location TEXT,
                start_time_ms INTEGER NOT NULL,
                end_time_ms INTEGER NOT NULL,
                is_all_day INTEGER NOT NULL,
                attendees TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(integration_id, external_event_id)
            );

            CREATE INDEX IF NOT EXISTS idx_events_window
                ON mirrored_events(integration_id, start_time_ms);
            "#,
        )
        .context("Failed to create schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Locks the connection for the duration of one statement or transaction.
    ///
    /// Never hold the guard across an `.await`.
    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Database connection mutex poisoned"))
    }
}

/// Converts a stored epoch-milliseconds column back into an instant.
pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| anyhow!("Invalid stored timestamp: {}", ms))
}

/// Parses an RFC 3339 audit column.
pub(crate) fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Failed to parse timestamp '{}'", value))
}
