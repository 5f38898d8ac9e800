use anyhow::{Context, Result};
use calsync::api::{build_cors_layer, create_calendar_router, CalendarAppState};
use calsync::config::{load_config, Secrets};
use calsync::credentials::CredentialStore;
use calsync::db::Database;
use calsync::events::EventStore;
use calsync::oauth::{run_state_cleanup, AuthorizationFlow, StateManager};
use calsync::provider::{CalendarProvider, GoogleCalendarProvider};
use calsync::service::CalendarSync;
use calsync::sync::scheduler::spawn_periodic_sync;
use calsync::sync::{SyncEngine, TokenManager};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "calsync=info".into()),
        )
        .init();

    info!("Calsync starting...");

    let config_path = std::env::var("CALSYNC_CONFIG").unwrap_or_else(|_| "calsync.toml".to_string());
    let mut config = load_config(&config_path)?;
    config.apply_overrides(|key| std::env::var(key).ok())?;
    let secrets = Secrets::from_env()?;

    info!(
        config_path = %config_path,
        bind_addr = %config.server.bind_addr,
        database_path = %config.storage.database_path,
        auth_enabled = config.server.auth_enabled,
        sync_interval_secs = config.sync.interval_seconds,
        "Configuration loaded"
    );

    // Both stores share one database so disconnect cascades to the mirror
    let db = Arc::new(
        Database::open(&config.storage.database_path).context("Failed to open database")?,
    );
    let credentials = Arc::new(
        CredentialStore::new(Arc::clone(&db), &secrets.encryption_key)
            .context("Failed to initialize credential store")?,
    );
    let events = Arc::new(EventStore::new(Arc::clone(&db)));
    info!("Stores initialized");

    let provider: Arc<dyn CalendarProvider> = Arc::new(
        GoogleCalendarProvider::new(config.provider_settings(&secrets))
            .context("Failed to initialize calendar provider")?,
    );

    let tokens = Arc::new(TokenManager::new(Arc::clone(&credentials), Arc::clone(&provider)));
    let engine = Arc::new(SyncEngine::new(
        Arc::clone(&credentials),
        Arc::clone(&events),
        Arc::clone(&tokens),
        Arc::clone(&provider),
        config.sync.engine_settings(),
    ));

    let state_manager = StateManager::new(config.oauth.state_expiry_seconds);
    let cleanup_handle = tokio::spawn(run_state_cleanup(
        state_manager.clone(),
        config.oauth.state_cleanup_interval_seconds,
    ));

    let authorization = AuthorizationFlow::new(Arc::clone(&provider), Arc::clone(&credentials), state_manager);
    let service = Arc::new(CalendarSync::new(
        Arc::clone(&credentials),
        events,
        tokens,
        Arc::clone(&engine),
        authorization,
        config.sync.default_window_days,
    ));

    let scheduler_handle = config
        .sync
        .schedule_settings()
        .map(|schedule| spawn_periodic_sync(Arc::clone(&credentials), Arc::clone(&engine), schedule));

    let router = create_calendar_router(CalendarAppState {
        service,
        auth_enabled: config.server.auth_enabled,
        success_redirect: config.server.success_redirect.clone(),
        error_redirect: config.server.error_redirect.clone(),
    })
    .layer(build_cors_layer(&config.server.cors_allowed_origins));

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(bind_addr = %config.server.bind_addr, "Calendar API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Calendar API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    cleanup_handle.abort();
    if let Some(handle) = scheduler_handle {
        handle.abort();
    }
    info!("Calsync stopped");

    Ok(())
}
