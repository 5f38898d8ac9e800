use crate::error::SyncError;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Half-open reconciliation window `[time_min, time_max)`.
///
/// A run may only create, update or delete events whose start falls inside it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncWindow {
    time_min: DateTime<Utc>,
    time_max: DateTime<Utc>,
}

impl SyncWindow {
    pub fn new(time_min: DateTime<Utc>, time_max: DateTime<Utc>) -> Result<Self, SyncError> {
        if time_min >= time_max {
            return Err(SyncError::InvalidWindow(format!(
                "timeMin ({}) must be before timeMax ({})",
                time_min.to_rfc3339(),
                time_max.to_rfc3339()
            )));
        }
        Ok(Self { time_min, time_max })
    }

    /// Window starting at `now` and spanning `days`.
    pub fn starting_at(now: DateTime<Utc>, days: i64) -> Result<Self, SyncError> {
        Self::new(now, now + Duration::days(days))
    }

    /// Fills in missing bounds: `time_min` defaults to `now`, `time_max` to
    /// `time_min + default_days`.
    pub fn with_defaults(
        time_min: Option<DateTime<Utc>>,
        time_max: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        default_days: i64,
    ) -> Result<Self, SyncError> {
        let time_min = time_min.unwrap_or(now);
        let time_max = time_max.unwrap_or(time_min + Duration::days(default_days));
        Self::new(time_min, time_max)
    }

    pub fn time_min(&self) -> DateTime<Utc> {
        self.time_min
    }

    pub fn time_max(&self) -> DateTime<Utc> {
        self.time_max
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.time_min <= instant && instant < self.time_max
    }
}
