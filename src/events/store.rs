//! SQLite-backed mirrored events.

use super::{EventRecord, MirroredEvent, UpsertOutcome};
use crate::db::{self, Database};
use crate::sync::SyncWindow;
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use uuid::Uuid;

const EVENT_COLUMNS: &str = r#"
    id, integration_id, external_event_id, title, description, location,
    start_time_ms, end_time_ms, is_all_day, attendees, created_at, updated_at
"#;

/// Raw row as stored.
struct EventRow {
    id: String,
    integration_id: i64,
    external_event_id: String,
    title: String,
    description: Option<String>,
    location: Option<String>,
    start_time_ms: i64,
    end_time_ms: i64,
    is_all_day: bool,
    attendees: String,
    created_at: String,
    updated_at: String,
}

impl EventRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            integration_id: row.get(1)?,
            external_event_id: row.get(2)?,
            title: row.get(3)?,
            description: row.get(4)?,
            location: row.get(5)?,
            start_time_ms: row.get(6)?,
            end_time_ms: row.get(7)?,
            is_all_day: row.get(8)?,
            attendees: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn into_event(self) -> Result<MirroredEvent> {
        let attendees: BTreeSet<String> = serde_json::from_str(&self.attendees)
            .context("Failed to decode attendees column")?;

        Ok(MirroredEvent {
            id: self.id,
            integration_id: self.integration_id,
            external_event_id: self.external_event_id,
            title: self.title,
            description: self.description,
            location: self.location,
            start_time: db::from_millis(self.start_time_ms)?,
            end_time: db::from_millis(self.end_time_ms)?,
            is_all_day: self.is_all_day,
            attendees,
            created_at: db::parse_rfc3339(&self.created_at)?,
            updated_at: db::parse_rfc3339(&self.updated_at)?,
        })
    }
}

fn find_event(
    conn: &Connection,
    integration_id: i64,
    external_event_id: &str,
) -> Result<Option<MirroredEvent>> {
    let sql = format!(
        "SELECT {} FROM mirrored_events WHERE integration_id = ?1 AND external_event_id = ?2",
        EVENT_COLUMNS
    );
    conn.query_row(&sql, params![integration_id, external_event_id], EventRow::from_row)
        .optional()
        .context("Failed to query mirrored event")?
        .map(EventRow::into_event)
        .transpose()
}

/// Mirrored event storage, always scoped by integration id.
pub struct EventStore {
    db: Arc<Database>,
}

impl EventStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Inserts or updates one event keyed by `(integration_id, external_event_id)`.
    ///
    /// Existence is checked inside the same transaction as the write, so the
    /// returned outcome is exact. A row that already matches is left untouched.
    pub fn upsert(&self, integration_id: i64, record: &EventRecord) -> Result<UpsertOutcome> {
        let attendees =
            serde_json::to_string(&record.attendees).context("Failed to encode attendees")?;
        let now = Utc::now().to_rfc3339();

        let mut conn = self.db.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;

        let outcome = match find_event(&tx, integration_id, &record.external_event_id)? {
            Some(existing) if existing.matches(record) => UpsertOutcome::Unchanged,
            Some(existing) => {
                tx.execute(
                    r#"
                    UPDATE mirrored_events SET
                        title = ?2, description = ?3, location = ?4,
                        start_time_ms = ?5, end_time_ms = ?6, is_all_day = ?7,
                        attendees = ?8, updated_at = ?9
                    WHERE id = ?1
                    "#,
                    params![
                        existing.id,
                        record.title,
                        record.description,
                        record.location,
                        record.start_time.timestamp_millis(),
                        record.end_time.timestamp_millis(),
                        record.is_all_day,
                        attendees,
                        now,
                    ],
                )
                .context("Failed to update mirrored event")?;
                UpsertOutcome::Updated
            }
            None => {
                tx.execute(
                    r#"
                    INSERT INTO mirrored_events (
                        id, integration_id, external_event_id, title, description, location,
                        start_time_ms, end_time_ms, is_all_day, attendees, created_at, updated_at
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
                    "#,
                    params![
                        Uuid::now_v7().to_string(),
                        integration_id,
                        record.external_event_id,
                        record.title,
                        record.description,
                        record.location,
                        record.start_time.timestamp_millis(),
                        record.end_time.timestamp_millis(),
                        record.is_all_day,
                        attendees,
                        now,
                    ],
                )
                .context("Failed to insert mirrored event")?;
                UpsertOutcome::Created
            }
        };

        tx.commit().context("Failed to commit event upsert")?;
        Ok(outcome)
    }

    /// Deletes events of this integration that start inside `window` and
    /// whose external id is not in `keep`.
    ///
    /// Runs as one transaction: either every orphan is removed or none is.
    ///
    /// # Returns
    /// Number of deleted rows
    pub fn delete_orphans(
        &self,
        integration_id: i64,
        window: &SyncWindow,
        keep: &HashSet<String>,
    ) -> Result<usize> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;

        let candidates: Vec<(String, String)> = {
            let mut stmt = tx
                .prepare(
                    r#"
                    SELECT id, external_event_id FROM mirrored_events
                    WHERE integration_id = ?1 AND start_time_ms >= ?2 AND start_time_ms < ?3
                    "#,
                )
                .context("Failed to prepare orphan query")?;
            let rows = stmt
                .query_map(
                    params![
                        integration_id,
                        window.time_min().timestamp_millis(),
                        window.time_max().timestamp_millis()
                    ],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .context("Failed to query orphan candidates")?
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read orphan candidates")?;
            rows
        };

        let mut deleted = 0;
        for (id, external_event_id) in candidates {
            if keep.contains(&external_event_id) {
                continue;
            }
            deleted += tx
                .execute("DELETE FROM mirrored_events WHERE id = ?1", params![id])
                .context("Failed to delete orphaned event")?;
        }

        tx.commit().context("Failed to commit orphan deletion")?;
        Ok(deleted)
    }

    /// Looks up one mirrored event by its provider id.
    pub fn get(&self, integration_id: i64, external_event_id: &str) -> Result<Option<MirroredEvent>> {
        let conn = self.db.lock()?;
        find_event(&conn, integration_id, external_event_id)
    }

    /// Lists events of this integration that start inside `window`, by start time.
    pub fn list_in_window(
        &self,
        integration_id: i64,
        window: &SyncWindow,
    ) -> Result<Vec<MirroredEvent>> {
        let conn = self.db.lock()?;
        let sql = format!(
            r#"
            SELECT {} FROM mirrored_events
            WHERE integration_id = ?1 AND start_time_ms >= ?2 AND start_time_ms < ?3
            ORDER BY start_time_ms, external_event_id
            "#,
            EVENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql).context("Failed to prepare query")?;
        let rows = stmt
            .query_map(
                params![
                    integration_id,
                    window.time_min().timestamp_millis(),
                    window.time_max().timestamp_millis()
                ],
                EventRow::from_row,
            )
            .context("Failed to execute query")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read results")?;

        rows.into_iter().map(EventRow::into_event).collect()
    }

    /// Counts all events of an integration, regardless of window.
    pub fn count(&self, integration_id: i64) -> Result<usize> {
        let conn = self.db.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM mirrored_events WHERE integration_id = ?1",
                params![integration_id],
                |row| row.get(0),
            )
            .context("Failed to count events")?;
        Ok(count as usize)
    }
}
