//! Periodic reconciliation of every active integration.

use super::{SyncEngine, SyncWindow};
use crate::credentials::CredentialStore;
use crate::error::SyncError;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug)]
pub struct ScheduleSettings {
    pub interval: Duration,
    /// Length of the window starting at "now" on each tick
    pub window_days: i64,
    pub max_concurrent_runs: usize,
}

/// Spawns the periodic trigger. The first cycle runs one full interval after
/// startup.
pub fn spawn_periodic_sync(
    credentials: Arc<CredentialStore>,
    engine: Arc<SyncEngine>,
    settings: ScheduleSettings,
) -> JoinHandle<()> {
    info!(
        interval_secs = settings.interval.as_secs(),
        window_days = settings.window_days,
        max_concurrent_runs = settings.max_concurrent_runs,
        "Starting periodic calendar sync"
    );

    tokio::spawn(async move {
        let mut interval = time::interval(settings.interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        interval.tick().await; // immediate first tick

        loop {
            interval.tick().await;
            run_sync_cycle(&credentials, &engine, &settings).await;
        }
    })
}

/// One pass over every active integration. Returns the number of runs that
/// completed successfully.
pub async fn run_sync_cycle(
    credentials: &CredentialStore,
    engine: &SyncEngine,
    settings: &ScheduleSettings,
) -> usize {
    let owners = match credentials.list_active_owners() {
        Ok(owners) => owners,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Failed to list active integrations");
            return 0;
        }
    };

    if owners.is_empty() {
        debug!("No active integrations to sync");
        return 0;
    }

    let window = match SyncWindow::starting_at(Utc::now(), settings.window_days) {
        Ok(window) => window,
        Err(e) => {
            error!(error = %e, "Invalid periodic sync window");
            return 0;
        }
    };

    let succeeded = std::sync::atomic::AtomicUsize::new(0);
    stream::iter(owners)
        .for_each_concurrent(settings.max_concurrent_runs.max(1), |owner_id| {
            let succeeded = &succeeded;
            async move {
                match engine.reconcile(&owner_id, window).await {
                    Ok(stats) => {
                        succeeded.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        debug!(owner_id = %owner_id, synced = stats.synced, "Periodic sync finished");
                    }
                    Err(SyncError::ReauthorizationRequired) => {
                        warn!(owner_id = %owner_id, "Periodic sync needs reauthorization");
                    }
                    Err(SyncError::SyncInProgress) => {
                        debug!(owner_id = %owner_id, "Sync already running, skipping this cycle");
                    }
                    Err(e) => {
                        warn!(owner_id = %owner_id, error = %e, "Periodic sync failed, retrying next interval");
                    }
                }
            }
        })
        .await;

    succeeded.into_inner()
}
