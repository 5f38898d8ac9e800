//! Event Store: the local mirror of remote calendar events.
//!
//! Rows are keyed by `(integration_id, external_event_id)` and are only ever
//! written by the reconciliation engine.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

mod store;

pub use store::EventStore;

/// A remote event after normalization, ready to be upserted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRecord {
    pub external_event_id: String,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_all_day: bool,
    /// De-duplicated attendee emails; ordered so comparisons ignore input order.
    pub attendees: BTreeSet<String>,
}

/// Local copy of one remote calendar event.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MirroredEvent {
    pub id: String,
    pub integration_id: i64,
    pub external_event_id: String,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_all_day: bool,
    pub attendees: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MirroredEvent {
    /// True when the stored row already matches `record` field for field.
    ///
    /// Instants compare at the millisecond precision they are stored with.
    pub fn matches(&self, record: &EventRecord) -> bool {
        self.external_event_id == record.external_event_id
            && self.title == record.title
            && self.description == record.description
            && self.location == record.location
            && self.start_time.timestamp_millis() == record.start_time.timestamp_millis()
            && self.end_time.timestamp_millis() == record.end_time.timestamp_millis()
            && self.is_all_day == record.is_all_day
            && self.attendees == record.attendees
    }
}

/// What an upsert did to the mirror.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    /// Row existed and already matched; nothing written.
    Unchanged,
}
