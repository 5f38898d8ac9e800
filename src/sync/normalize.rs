//! Maps provider events onto the canonical mirrored shape.

use crate::events::EventRecord;
use crate::provider::{RemoteEvent, RemoteEventTime};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeSet;

/// Title used when the provider event has no summary.
pub const UNTITLED_EVENT: &str = "Untitled Event";

/// Parsed start or end of an event.
struct ParsedTime {
    instant: DateTime<Utc>,
    date_only: bool,
}

fn parse_time(time: &RemoteEventTime) -> Option<ParsedTime> {
    if let Some(date_time) = time.date_time.as_deref() {
        let instant = DateTime::parse_from_rfc3339(date_time).ok()?.with_timezone(&Utc);
        return Some(ParsedTime {
            instant,
            date_only: false,
        });
    }

    // All-day dates are anchored at UTC midnight
    let date = NaiveDate::parse_from_str(time.date.as_deref()?, "%Y-%m-%d").ok()?;
    Some(ParsedTime {
        instant: date.and_hms_opt(0, 0, 0)?.and_utc(),
        date_only: true,
    })
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// True for occurrences the provider reports as cancelled.
pub fn is_cancelled(event: &RemoteEvent) -> bool {
    event.status.as_deref() == Some("cancelled")
}

/// Normalizes one remote event.
///
/// Returns `None` for items that cannot be mirrored: missing id, missing or
/// unparseable start/end, or cancelled occurrences.
pub fn normalize(event: &RemoteEvent) -> Option<EventRecord> {
    if is_cancelled(event) {
        return None;
    }

    let external_event_id = non_empty(&event.id)?;
    let start = parse_time(event.start.as_ref()?)?;
    let end = parse_time(event.end.as_ref()?)?;

    let attendees: BTreeSet<String> = event
        .attendees
        .iter()
        .filter_map(|attendee| non_empty(&attendee.email))
        .collect();

    Some(EventRecord {
        external_event_id,
        title: non_empty(&event.summary).unwrap_or_else(|| UNTITLED_EVENT.to_string()),
        description: non_empty(&event.description),
        location: non_empty(&event.location),
        start_time: start.instant,
        end_time: end.instant,
        is_all_day: start.date_only,
        attendees,
    })
}
