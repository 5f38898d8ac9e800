use super::testing::{remote_event, test_stores_with_db, FakeProvider, RefreshBehavior};
use super::*;
use crate::credentials::{CredentialStore, NewIntegration};
use crate::db::Database;
use crate::error::SyncError;
use crate::events::EventStore;
use crate::provider::{RemoteAttendee, RemoteEvent};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

fn jan(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, day, 9, 0, 0).unwrap()
}

fn january() -> SyncWindow {
    SyncWindow::new(
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2025, 1, 31, 0, 0, 0).unwrap(),
    )
    .unwrap()
}

struct Harness {
    db: Arc<Database>,
    credentials: Arc<CredentialStore>,
    events: Arc<EventStore>,
    provider: Arc<FakeProvider>,
    engine: Arc<SyncEngine>,
}

impl Harness {
    fn new(settings: SyncSettings) -> Self {
        let (db, credentials, events) = test_stores_with_db();
        let provider = Arc::new(FakeProvider::new());
        let tokens = Arc::new(TokenManager::new(Arc::clone(&credentials), provider.clone()));
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&credentials),
            Arc::clone(&events),
            tokens,
            provider.clone(),
            settings,
        ));
        Self {
            db,
            credentials,
            events,
            provider,
            engine,
        }
    }

    fn connected(settings: SyncSettings) -> Self {
        let harness = Self::new(settings);
        harness.connect("alice", Utc::now() + Duration::hours(1));
        harness
    }

    fn connect(&self, owner: &str, expiry: DateTime<Utc>) -> i64 {
        self.credentials
            .upsert(&NewIntegration {
                owner_id: owner.to_string(),
                access_token: "access".to_string(),
                refresh_token: "refresh".to_string(),
                token_expiry: expiry,
                remote_calendar_id: "primary".to_string(),
            })
            .unwrap()
            .id
    }

    /// Second engine over the same stores and provider.
    fn engine_with(&self, settings: SyncSettings) -> SyncEngine {
        let tokens = Arc::new(TokenManager::new(
            Arc::clone(&self.credentials),
            self.provider.clone(),
        ));
        SyncEngine::new(
            Arc::clone(&self.credentials),
            Arc::clone(&self.events),
            tokens,
            self.provider.clone(),
            settings,
        )
    }

    fn integration_id(&self, owner: &str) -> i64 {
        self.credentials.get(owner).unwrap().unwrap().id
    }

    fn mirrored_ids(&self, owner: &str, window: &SyncWindow) -> Vec<String> {
        self.events
            .list_in_window(self.integration_id(owner), window)
            .unwrap()
            .into_iter()
            .map(|e| e.external_event_id)
            .collect()
    }
}

#[tokio::test]
async fn test_end_to_end_scenario() {
    let h = Harness::connected(SyncSettings::default());

    h.provider
        .set_events(vec![remote_event("A", "Kickoff", jan(5)), remote_event("B", "Review", jan(10))]);
    let first = h.engine.reconcile("alice", january()).await.unwrap();
    assert_eq!((first.created, first.updated, first.deleted), (2, 0, 0));
    assert_eq!(first.synced, 2);
    assert_eq!(h.mirrored_ids("alice", &january()), vec!["A", "B"]);

    h.provider.set_events(vec![
        remote_event("A", "Kickoff (moved agenda)", jan(5)),
        remote_event("C", "Retro", jan(20)),
    ]);
    let second = h.engine.reconcile("alice", january()).await.unwrap();
    assert_eq!((second.created, second.updated, second.deleted), (1, 1, 1));
    assert_eq!(h.mirrored_ids("alice", &january()), vec!["A", "C"]);

    let a = h.events.get(h.integration_id("alice"), "A").unwrap().unwrap();
    assert_eq!(a.title, "Kickoff (moved agenda)");
}

#[tokio::test]
async fn test_second_run_with_unchanged_remote_is_idempotent() {
    let h = Harness::connected(SyncSettings::default());
    let mut with_attendees = remote_event("B", "Review", jan(10));
    with_attendees.attendees = vec![
        RemoteAttendee {
            email: Some("z@example.com".to_string()),
        },
        RemoteAttendee {
            email: Some("a@example.com".to_string()),
        },
    ];
    h.provider
        .set_events(vec![remote_event("A", "Kickoff", jan(5)), with_attendees]);

    h.engine.reconcile("alice", january()).await.unwrap();
    let second = h.engine.reconcile("alice", january()).await.unwrap();

    assert_eq!(second.synced, 2);
    assert_eq!((second.created, second.updated, second.deleted), (0, 0, 0));
}

#[tokio::test]
async fn test_orphan_cleanup_never_leaves_the_window() {
    let h = Harness::connected(SyncSettings::default());
    let february = Utc.with_ymd_and_hms(2025, 2, 10, 9, 0, 0).unwrap();
    let feb_window = SyncWindow::starting_at(Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(), 28).unwrap();

    h.provider.set_events(vec![remote_event("F", "February thing", february)]);
    h.engine.reconcile("alice", feb_window).await.unwrap();

    // Remote no longer lists F, but the January run must not touch it
    h.provider.set_events(vec![remote_event("A", "Kickoff", jan(5))]);
    let stats = h.engine.reconcile("alice", january()).await.unwrap();

    assert_eq!(stats.deleted, 0);
    assert_eq!(h.mirrored_ids("alice", &feb_window), vec!["F"]);
}

#[tokio::test]
async fn test_remote_events_outside_window_are_not_created() {
    let h = Harness::connected(SyncSettings::default());
    let december = Utc.with_ymd_and_hms(2024, 12, 31, 22, 0, 0).unwrap();
    h.provider.set_events(vec![
        remote_event("SPILL", "Overnight", december),
        remote_event("A", "Kickoff", jan(5)),
    ]);

    let stats = h.engine.reconcile("alice", january()).await.unwrap();

    assert_eq!(stats.created, 1);
    assert_eq!(h.events.count(h.integration_id("alice")).unwrap(), 1);
}

#[tokio::test]
async fn test_malformed_remote_items_are_skipped() {
    let h = Harness::connected(SyncSettings::default());
    let mut no_start = remote_event("NOSTART", "Broken", jan(6));
    no_start.start = None;
    let no_id = RemoteEvent {
        id: None,
        ..remote_event("ignored", "No id", jan(7))
    };
    h.provider
        .set_events(vec![no_start, no_id, remote_event("A", "Kickoff", jan(5))]);

    let stats = h.engine.reconcile("alice", january()).await.unwrap();

    assert_eq!(stats.synced, 1);
    assert_eq!(stats.skipped, 2);
    assert_eq!(h.mirrored_ids("alice", &january()), vec!["A"]);
}

#[tokio::test]
async fn test_cancelled_occurrence_is_removed_from_mirror() {
    let h = Harness::connected(SyncSettings::default());
    h.provider.set_events(vec![remote_event("A", "Kickoff", jan(5))]);
    h.engine.reconcile("alice", january()).await.unwrap();

    let mut cancelled = remote_event("A", "Kickoff", jan(5));
    cancelled.status = Some("cancelled".to_string());
    h.provider.set_events(vec![cancelled]);
    let stats = h.engine.reconcile("alice", january()).await.unwrap();

    assert_eq!(stats.deleted, 1);
    assert!(h.mirrored_ids("alice", &january()).is_empty());
}

#[tokio::test]
async fn test_pages_through_all_results() {
    let h = Harness::connected(SyncSettings {
        page_size: 2,
        ..SyncSettings::default()
    });
    let remote: Vec<RemoteEvent> = (1..=5)
        .map(|day| remote_event(&format!("E{}", day), "Daily", jan(day)))
        .collect();
    h.provider.set_events(remote);

    let stats = h.engine.reconcile("alice", january()).await.unwrap();

    assert_eq!(stats.created, 5);
    assert_eq!(h.provider.list_calls(), 3);
}

#[tokio::test]
async fn test_result_cap_bounds_the_fetch_and_keeps_the_rest() {
    let h = Harness::connected(SyncSettings::default());
    let remote: Vec<RemoteEvent> = (1..=6)
        .map(|day| remote_event(&format!("E{}", day), "Daily", jan(day)))
        .collect();
    h.provider.set_events(remote);
    assert_eq!(h.engine.reconcile("alice", january()).await.unwrap().created, 6);

    let capped = h.engine_with(SyncSettings {
        page_size: 2,
        max_results: 3,
        ..SyncSettings::default()
    });
    let calls_before = h.provider.list_calls();
    let stats = capped.reconcile("alice", january()).await.unwrap();

    assert_eq!(stats.synced, 3);
    assert_eq!(stats.deleted, 0);
    assert_eq!(h.provider.list_calls() - calls_before, 2);
    assert_eq!(
        h.mirrored_ids("alice", &january()),
        vec!["E1", "E2", "E3", "E4", "E5", "E6"]
    );
}

#[tokio::test]
async fn test_exact_fit_at_the_cap_still_cleans_up() {
    let h = Harness::connected(SyncSettings {
        max_results: 2,
        ..SyncSettings::default()
    });
    h.provider.set_events(vec![
        remote_event("A", "Kickoff", jan(5)),
        remote_event("B", "Review", jan(10)),
    ]);
    h.engine.reconcile("alice", january()).await.unwrap();

    // Remote now lists exactly the cap, with nothing beyond it
    h.provider.set_events(vec![
        remote_event("A", "Kickoff", jan(5)),
        remote_event("C", "Retro", jan(20)),
    ]);
    let stats = h.engine.reconcile("alice", january()).await.unwrap();

    assert_eq!(stats.deleted, 1);
    assert_eq!(h.mirrored_ids("alice", &january()), vec!["A", "C"]);
}

#[tokio::test]
async fn test_page_limit_skips_orphan_cleanup() {
    let h = Harness::connected(SyncSettings::default());
    h.provider.set_events(vec![remote_event("LATE", "Last of the month", jan(30))]);
    h.engine.reconcile("alice", january()).await.unwrap();

    // More single-item pages than a run will follow; LATE sits past the limit
    let mut remote: Vec<RemoteEvent> = (0..120)
        .map(|i| remote_event(&format!("R{}", i), "Busy", jan(2) + Duration::minutes(i)))
        .collect();
    remote.push(remote_event("LATE", "Last of the month", jan(30)));
    h.provider.set_events(remote);

    let paged = h.engine_with(SyncSettings {
        page_size: 1,
        max_results: 1000,
        ..SyncSettings::default()
    });
    let stats = paged.reconcile("alice", january()).await.unwrap();

    assert_eq!(stats.created, 100);
    assert_eq!(stats.deleted, 0);
    assert!(h
        .events
        .get(h.integration_id("alice"), "LATE")
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_not_connected_propagates() {
    let h = Harness::new(SyncSettings::default());
    let err = h.engine.reconcile("nobody", january()).await.unwrap_err();
    assert!(matches!(err, SyncError::NotConnected));
}

#[tokio::test]
async fn test_revoked_grant_propagates_and_deactivates() {
    let h = Harness::new(SyncSettings::default());
    h.connect("alice", Utc::now() - Duration::minutes(5));
    h.provider.set_refresh_behavior(RefreshBehavior::InvalidGrant);

    let err = h.engine.reconcile("alice", january()).await.unwrap_err();

    assert!(matches!(err, SyncError::ReauthorizationRequired));
    assert!(!h.credentials.get("alice").unwrap().unwrap().is_active);
    assert_eq!(h.provider.list_calls(), 0);
}

#[tokio::test]
async fn test_expired_token_is_refreshed_before_listing() {
    let h = Harness::new(SyncSettings::default());
    h.connect("alice", Utc::now() - Duration::minutes(5));
    h.provider.set_events(vec![remote_event("A", "Kickoff", jan(5))]);

    let stats = h.engine.reconcile("alice", january()).await.unwrap();

    assert_eq!(stats.created, 1);
    assert_eq!(h.provider.refresh_calls(), 1);
}

#[tokio::test]
async fn test_listing_failure_leaves_mirror_untouched() {
    let h = Harness::connected(SyncSettings::default());
    h.provider.set_events(vec![remote_event("A", "Kickoff", jan(5))]);
    h.engine.reconcile("alice", january()).await.unwrap();

    h.provider.fail_listing("calendar API returned 503 Service Unavailable");
    let err = h.engine.reconcile("alice", january()).await.unwrap_err();

    assert!(matches!(err, SyncError::TransientProvider(_)));
    assert_eq!(h.mirrored_ids("alice", &january()), vec!["A"]);
}

#[tokio::test]
async fn test_per_event_upsert_failure_is_isolated() {
    let h = Harness::connected(SyncSettings::default());
    h.db.lock()
        .unwrap()
        .execute_batch(
            r#"
            CREATE TRIGGER reject_poison BEFORE INSERT ON mirrored_events
            WHEN NEW.external_event_id = 'POISON'
            BEGIN SELECT RAISE(ABORT, 'rejected by test trigger'); END;
            "#,
        )
        .unwrap();
    h.provider.set_events(vec![
        remote_event("A", "Kickoff", jan(5)),
        remote_event("POISON", "Bad row", jan(6)),
        remote_event("B", "Review", jan(10)),
    ]);

    let stats = h.engine.reconcile("alice", january()).await.unwrap();

    assert_eq!(stats.synced, 2);
    assert_eq!(stats.created, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(h.mirrored_ids("alice", &january()), vec!["A", "B"]);
}

#[tokio::test]
async fn test_orphan_deletion_failure_fails_the_run() {
    let h = Harness::connected(SyncSettings::default());
    h.provider
        .set_events(vec![remote_event("A", "Kickoff", jan(5)), remote_event("B", "Review", jan(10))]);
    h.engine.reconcile("alice", january()).await.unwrap();

    h.db.lock()
        .unwrap()
        .execute_batch(
            r#"
            CREATE TRIGGER block_delete BEFORE DELETE ON mirrored_events
            BEGIN SELECT RAISE(ABORT, 'deletes blocked by test trigger'); END;
            "#,
        )
        .unwrap();
    h.provider.set_events(vec![]);

    let err = h.engine.reconcile("alice", january()).await.unwrap_err();

    assert!(matches!(err, SyncError::Storage(_)));
    // All-or-nothing: both rows still present
    assert_eq!(h.mirrored_ids("alice", &january()), vec!["A", "B"]);
}

#[tokio::test]
async fn test_deadline_during_fetch_leaves_mirror_untouched() {
    let h = Harness::connected(SyncSettings {
        run_deadline: std::time::Duration::from_millis(50),
        ..SyncSettings::default()
    });
    h.provider.set_events(vec![remote_event("A", "Kickoff", jan(5))]);
    h.provider.set_list_delay(std::time::Duration::from_millis(500));

    let err = h.engine.reconcile("alice", january()).await.unwrap_err();

    assert!(matches!(err, SyncError::DeadlineExceeded(_)));
    assert!(h.mirrored_ids("alice", &january()).is_empty());
}

#[tokio::test]
async fn test_concurrent_run_for_same_owner_is_rejected() {
    let h = Harness::connected(SyncSettings::default());
    h.connect("bob", Utc::now() + Duration::hours(1));
    h.provider.set_events(vec![remote_event("A", "Kickoff", jan(5))]);
    h.provider.set_list_delay(std::time::Duration::from_millis(200));

    let engine = Arc::clone(&h.engine);
    let first = tokio::spawn(async move { engine.reconcile("alice", january()).await });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let second = h.engine.reconcile("alice", january()).await;
    assert!(matches!(second, Err(SyncError::SyncInProgress)));

    // Other owners are not blocked
    assert!(h.engine.reconcile("bob", january()).await.is_ok());

    assert_eq!(first.await.unwrap().unwrap().created, 1);
}

#[tokio::test]
async fn test_owners_do_not_share_mirrors() {
    let h = Harness::connected(SyncSettings::default());
    h.connect("bob", Utc::now() + Duration::hours(1));

    h.provider.set_events(vec![remote_event("A", "Kickoff", jan(5))]);
    h.engine.reconcile("alice", january()).await.unwrap();

    h.provider.set_events(vec![remote_event("Z", "Bob's thing", jan(8))]);
    let bob = h.engine.reconcile("bob", january()).await.unwrap();

    assert_eq!(bob.deleted, 0);
    assert_eq!(h.mirrored_ids("alice", &january()), vec!["A"]);
    assert_eq!(h.mirrored_ids("bob", &january()), vec!["Z"]);
}
