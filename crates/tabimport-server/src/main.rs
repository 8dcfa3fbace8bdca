//! tabimport server - main entry point

use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tabimport_common::logging::{init_logging, LogConfig};
use tokio::signal;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

use tabimport_server::{
    config::Config,
    db::{self, DbConfig},
    features,
    import::{ImportCoordinator, ImporterRegistry, PgImportStore, SyncBackend, TokioBackend},
};

#[derive(Clone)]
struct AppState {
    db: sqlx::PgPool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // LOG_* environment variables take precedence over these defaults
    let log_config = LogConfig::builder()
        .log_file_prefix("tabimport-server")
        .filter_directives("tabimport_server=debug,tower_http=debug,sqlx=info")
        .build()
        .merge_env()?;

    init_logging(&log_config)?;

    info!("Starting tabimport server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let db_pool = db::create_pool(&DbConfig::from(&config.database))
        .await
        .context("Failed to create database pool")?;
    db::run_migrations(&db_pool).await?;

    let store = Arc::new(PgImportStore::new(db_pool.clone()));
    let tokio_backend = Arc::new(TokioBackend::new(config.import.worker_concurrency));

    // Row importers are supplied by the embedding application; the bare server has none
    let importers = ImporterRegistry::new();

    let coordinator = Arc::new(
        ImportCoordinator::new(store.clone(), store, importers, config.import.clone())
            .with_backend("sync", Arc::new(SyncBackend::new()))
            .with_backend("tokio", tokio_backend.clone()),
    );
    info!(
        default_connection = %config.import.default_connection,
        chunk_size = config.import.chunk_size,
        worker_concurrency = config.import.worker_concurrency,
        "Import coordinator ready"
    );

    let app = create_router(AppState { db: db_pool }, coordinator);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let timeout = Duration::from_secs(config.server.shutdown_timeout_secs);
    info!("Waiting up to {} seconds for running imports", timeout.as_secs());
    if tokio::time::timeout(timeout, tokio_backend.shutdown()).await.is_err() {
        tracing::warn!("Running imports did not finish before the shutdown timeout");
    }

    info!("Server shut down gracefully");

    Ok(())
}

fn create_router(state: AppState, coordinator: Arc<ImportCoordinator>) -> Router {
    let feature_routes = features::router(features::FeatureState { coordinator });

    Router::new()
        .route("/health", get(health_check))
        .with_state(state)
        .nest("/api/v1", feature_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(tower_http::LatencyUnit::Micros),
                ),
        )
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match db::health_check(&state.db).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected"
            })),
        ),
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "database": "disconnected"
                })),
            )
        },
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
