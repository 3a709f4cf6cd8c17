mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use killagram_api::{AppState, AppStateInner};
use killagram_db::Database;
use killagram_provider::{CredentialStore, MemoryProvider};
use killagram_state::{State, StateConfig};

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "killagram=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Provider sessions and account versions survive restarts; everything else is in memory
    let db = Database::open(&config.db_path)?;
    info!(
        "Opened {} with {} stored provider sessions",
        config.db_path.display(),
        db.session_count()?
    );
    let credentials: Arc<dyn CredentialStore> = Arc::new(db);

    let state = Arc::new(State::with_store(
        StateConfig {
            session_secret: config.secret_bytes(),
            rate_limit_per_minute: config.rate_limit_per_minute,
        },
        credentials.clone(),
    )?);
    let app_state: AppState = Arc::new(AppStateInner::new(
        state.clone(),
        Arc::new(MemoryProvider::new()),
        credentials,
        config.sync_interval,
        config.admin_key.clone(),
    ));
    if app_state.admin_key.is_none() {
        info!("KILLAGRAM_ADMIN_KEY unset, freeze routes disabled");
    }

    let maintenance = tokio::spawn(maintain(state.clone(), config.clone()));

    let app = killagram_api::router(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Killagram server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    maintenance.abort();
    state.teardown();
    Ok(())
}

async fn maintain(state: Arc<State>, config: Config) {
    let mut interval = tokio::time::interval(config.maintenance_interval);
    loop {
        interval.tick().await;
        let report = state.maintain(Utc::now(), Instant::now());
        debug!(
            "Maintenance purged {} idempotency entries, swept {} limiter buckets",
            report.idempotency_purged, report.limiter_buckets_swept
        );
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutting down");
}
