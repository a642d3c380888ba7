//! Microlend backend server
//!
//! Serves the lending API, the WebSocket event feed, and runs the scheduled
//! overdue sweep.

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use microlend_server::auth::AuthService;
use microlend_server::config::{Config, StoreBackend};
use microlend_server::db::Database;
use microlend_server::dispute::ReportService;
use microlend_server::events::EventBus;
use microlend_server::loan::{sweeper, LoanEngine};
use microlend_server::state::AppState;
use microlend_server::store::{LoanStore, MemoryStore, PgStore};
use microlend_server::verification::UserDirectory;
use microlend_server::websocket::WsState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!(
        environment = config.environment.as_str(),
        store = ?config.store_backend,
        "Starting microlend server"
    );

    let (store, users, database): (Arc<dyn LoanStore>, Arc<dyn UserDirectory>, Option<Database>) =
        match config.store_backend {
            StoreBackend::Postgres => {
                let database = Database::connect(&config).await?;
                let store = Arc::new(PgStore::new(database.pool().clone()));
                let users: Arc<dyn UserDirectory> = store.clone();
                let loans: Arc<dyn LoanStore> = store;
                (loans, users, Some(database))
            }
            StoreBackend::Memory => {
                tracing::warn!("Running on the in-memory store; state is lost on shutdown");
                let store = Arc::new(MemoryStore::new());
                let users: Arc<dyn UserDirectory> = store.clone();
                let loans: Arc<dyn LoanStore> = store;
                (loans, users, None)
            }
        };

    let events = EventBus::default();
    let engine = LoanEngine::new(store.clone(), users.clone(), events.clone(), config.lending_policy());
    let report_service = ReportService::new(store, users);
    let auth_service = AuthService::new(
        config.jwt_secret.clone(),
        config.jwt_access_token_ttl_seconds,
    );
    let ws_state = WsState::new(events);

    let mut scheduler = sweeper::start_overdue_sweep(engine.clone(), &config.overdue_sweep_cron).await?;

    let app_state = AppState::new(
        Arc::new(engine),
        Arc::new(report_service),
        Arc::new(auth_service),
        ws_state,
        database,
    );

    let app = microlend_server::app(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(configure_cors(config.cors_allowed_origins.as_deref()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("WebSocket available at ws://{}/ws", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!(error = ?e, "Job scheduler did not shut down cleanly");
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn configure_cors(allowed_origins: Option<&str>) -> CorsLayer {
    let allowed_origins = allowed_origins.unwrap_or_default();

    if allowed_origins.is_empty() {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (permissive)");
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers(Any)
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
