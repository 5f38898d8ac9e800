//! Calendar synchronization: token lifecycle, reconciliation and the
//! periodic trigger.

mod engine;
mod normalize;
pub mod scheduler;
mod token;
mod window;

#[cfg(test)]
pub(crate) mod testing;
#[cfg(test)]
mod tests;

pub use engine::{SyncEngine, SyncSettings};
pub use normalize::{normalize, UNTITLED_EVENT};
pub use token::TokenManager;
pub use window::SyncWindow;

use serde::Serialize;

/// Aggregate counts for one reconciliation run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    /// Events successfully upserted (created + updated + unchanged)
    pub synced: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Malformed or cancelled remote items excluded from the sync set
    pub skipped: usize,
    /// Events whose upsert failed; the run continued without them
    pub failed: usize,
}
