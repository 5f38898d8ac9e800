//! Event Reconciliation Engine.
//!
//! One run, for one owner and one window:
//! 1. Obtain a valid access token
//! 2. Page through the remote events of the integration's calendar
//! 3. Normalize and upsert every well-formed event, isolating per-event failures
//! 4. Delete mirrored events in the window that the remote no longer lists
//!
//! Steps 1-2 run under the run deadline and touch nothing locally. Step 4
//! only starts after step 3 has seen the complete remote list, and is skipped
//! when the fetch stopped at the result cap.

use super::normalize::{is_cancelled, normalize};
use super::token::TokenManager;
use super::{SyncStats, SyncWindow};
use crate::credentials::{CredentialStore, Integration};
use crate::error::{ProviderError, SyncError};
use crate::events::{EventStore, UpsertOutcome};
use crate::provider::{CalendarProvider, RemoteEvent};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// Upper bound on pages per run, independent of page contents.
const MAX_PAGES: usize = 100;

/// Limits applied to every run.
#[derive(Clone, Debug)]
pub struct SyncSettings {
    /// Occurrence cap per run
    pub max_results: usize,
    /// Requested page size
    pub page_size: usize,
    /// Wall-clock budget for one run
    pub run_deadline: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_results: 250,
            page_size: 250,
            run_deadline: Duration::from_secs(120),
        }
    }
}

pub struct SyncEngine {
    credentials: Arc<CredentialStore>,
    events: Arc<EventStore>,
    tokens: Arc<TokenManager>,
    provider: Arc<dyn CalendarProvider>,
    settings: SyncSettings,
    /// Serializes runs (and disconnects) per owner
    run_locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Remote events of one run. `truncated` is set when the provider had more
/// occurrences than were fetched.
struct RemoteList {
    events: Vec<RemoteEvent>,
    truncated: bool,
}

fn provider_failure(err: ProviderError) -> SyncError {
    SyncError::TransientProvider(err.to_string())
}

impl SyncEngine {
    pub fn new(
        credentials: Arc<CredentialStore>,
        events: Arc<EventStore>,
        tokens: Arc<TokenManager>,
        provider: Arc<dyn CalendarProvider>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            credentials,
            events,
            tokens,
            provider,
            settings,
            run_locks: DashMap::new(),
        }
    }

    fn run_lock(&self, owner_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(&self.run_locks.entry(owner_id.to_string()).or_default())
    }

    /// Waits for any in-flight run of `owner_id` and blocks new ones while held.
    pub async fn exclusive(&self, owner_id: &str) -> OwnedMutexGuard<()> {
        self.run_lock(owner_id).lock_owned().await
    }

    /// Drops the run lock of a disconnected owner.
    pub fn forget(&self, owner_id: &str) {
        self.run_locks.remove(owner_id);
    }

    /// Reconciles the mirror of `owner_id` with the remote calendar over `window`,
    /// using the configured run deadline.
    pub async fn reconcile(&self, owner_id: &str, window: SyncWindow) -> Result<SyncStats, SyncError> {
        let deadline = Instant::now() + self.settings.run_deadline;
        self.reconcile_until(owner_id, window, deadline).await
    }

    /// Reconciles with an explicit deadline.
    ///
    /// # Errors
    /// * `SyncInProgress` - Another run for this owner holds the run lock
    /// * `NotConnected` / `ReauthorizationRequired` - From the token manager, unchanged
    /// * `TransientProvider` - Token refresh or event listing failed; mirror untouched
    /// * `DeadlineExceeded` - Remote phase timed out (mirror untouched), or the
    ///   deadline passed after upserts (orphan cleanup skipped)
    /// * `Storage` - Orphan deletion failed
    pub async fn reconcile_until(
        &self,
        owner_id: &str,
        window: SyncWindow,
        deadline: Instant,
    ) -> Result<SyncStats, SyncError> {
        let _run = self
            .run_lock(owner_id)
            .try_lock_owned()
            .map_err(|_| SyncError::SyncInProgress)?;

        let (integration, remote) =
            match timeout_at(deadline, self.fetch_remote(owner_id, &window)).await {
                Ok(fetched) => fetched?,
                Err(_) => {
                    warn!(owner_id = %owner_id, "Sync deadline expired while fetching remote events");
                    return Err(SyncError::DeadlineExceeded(
                        "remote fetch did not complete; mirror unchanged".to_string(),
                    ));
                }
            };

        let mut stats = SyncStats::default();
        let remote_ids = self.apply_upserts(&integration, &window, &remote.events, &mut stats);

        if Instant::now() >= deadline {
            warn!(
                owner_id = %owner_id,
                created = stats.created,
                updated = stats.updated,
                "Sync deadline expired before orphan cleanup"
            );
            return Err(SyncError::DeadlineExceeded(format!(
                "upserted {} events, orphan cleanup skipped",
                stats.synced
            )));
        }

        // Anything past the cap may still exist remotely
        if remote.truncated {
            warn!(
                owner_id = %owner_id,
                fetched = remote.events.len(),
                "Remote list incomplete, orphan cleanup skipped"
            );
        } else {
            stats.deleted = self
                .events
                .delete_orphans(integration.id, &window, &remote_ids)?;
        }

        info!(
            owner_id = %owner_id,
            calendar_id = %integration.remote_calendar_id,
            synced = stats.synced,
            created = stats.created,
            updated = stats.updated,
            deleted = stats.deleted,
            skipped = stats.skipped,
            failed = stats.failed,
            "Calendar sync complete"
        );

        Ok(stats)
    }

    /// Steps 1 and 2: token, then every page of remote events.
    async fn fetch_remote(
        &self,
        owner_id: &str,
        window: &SyncWindow,
    ) -> Result<(Integration, RemoteList), SyncError> {
        let access_token = self.tokens.get_valid_access_token(owner_id).await?;
        let integration = self
            .credentials
            .get(owner_id)?
            .ok_or(SyncError::NotConnected)?;

        let max_results = self.settings.max_results;
        let mut events: Vec<RemoteEvent> = Vec::new();
        let mut page_token: Option<String> = None;

        for page_number in 1..=MAX_PAGES {
            let page_size = self.settings.page_size.min(max_results - events.len()).max(1);
            let page = self
                .provider
                .list_events_page(
                    &access_token,
                    &integration.remote_calendar_id,
                    window,
                    page_token.as_deref(),
                    page_size,
                )
                .await
                .map_err(provider_failure)?;

            debug!(
                owner_id = %owner_id,
                page = page_number,
                items = page.items.len(),
                "Fetched remote page"
            );
            events.extend(page.items);

            if events.len() >= max_results {
                let truncated = events.len() > max_results || page.next_page_token.is_some();
                if truncated {
                    warn!(
                        owner_id = %owner_id,
                        max_results,
                        "Remote event cap reached, remaining occurrences not fetched"
                    );
                }
                events.truncate(max_results);
                return Ok((integration, RemoteList { events, truncated }));
            }

            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => {
                    return Ok((
                        integration,
                        RemoteList {
                            events,
                            truncated: false,
                        },
                    ))
                }
            }
        }

        warn!(
            owner_id = %owner_id,
            max_pages = MAX_PAGES,
            "Remote page limit reached, remaining occurrences not fetched"
        );
        Ok((
            integration,
            RemoteList {
                events,
                truncated: true,
            },
        ))
    }

    /// Step 3. Returns the set of remote ids that protects mirrored rows from
    /// orphan cleanup.
    fn apply_upserts(
        &self,
        integration: &Integration,
        window: &SyncWindow,
        remote_events: &[RemoteEvent],
        stats: &mut SyncStats,
    ) -> HashSet<String> {
        let mut remote_ids = HashSet::new();
        let mut processed = HashSet::new();

        for remote in remote_events {
            if let Some(id) = remote.id.as_deref().filter(|id| !id.is_empty()) {
                if !is_cancelled(remote) {
                    remote_ids.insert(id.to_string());
                }
            }

            let Some(record) = normalize(remote) else {
                debug!(event_id = ?remote.id, "Skipping malformed or cancelled remote event");
                stats.skipped += 1;
                continue;
            };

            if !window.contains(record.start_time) {
                debug!(event_id = %record.external_event_id, "Skipping event starting outside window");
                continue;
            }

            if !processed.insert(record.external_event_id.clone()) {
                continue;
            }

            match self.events.upsert(integration.id, &record) {
                Ok(outcome) => {
                    stats.synced += 1;
                    match outcome {
                        UpsertOutcome::Created => stats.created += 1,
                        UpsertOutcome::Updated => stats.updated += 1,
                        UpsertOutcome::Unchanged => {}
                    }
                }
                Err(e) => {
                    warn!(
                        integration_id = integration.id,
                        event_id = %record.external_event_id,
                        error = %format!("{:#}", e),
                        "Failed to upsert event, continuing"
                    );
                    stats.failed += 1;
                }
            }
        }

        remote_ids
    }
}
