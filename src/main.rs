use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use carbook::api::{self, AppState};
use carbook::compactor;
use carbook::config::Config;
use carbook::directory::{InMemoryDirectory, VehicleDirectory};
use carbook::engine::Engine;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    carbook::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let directory: Arc<dyn VehicleDirectory> = match &config.vehicles_file {
        Some(path) => Arc::new(InMemoryDirectory::from_json_file(path)?),
        None => {
            tracing::warn!("CARBOOK_VEHICLES_FILE not set, vehicle directory is empty");
            Arc::new(InMemoryDirectory::new())
        }
    };

    let engine = Arc::new(Engine::new(config.wal_path(), directory)?);

    let cancel = CancellationToken::new();
    let compactor = tokio::spawn(compactor::run_compactor(
        engine.clone(),
        config.compact_threshold,
        compactor::COMPACT_CHECK_INTERVAL,
        cancel.clone(),
    ));

    let app = api::router(AppState::new(engine.clone(), config.gateway_token.clone()))
        .layer(ConcurrencyLimitLayer::new(config.max_connections))
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(TraceLayer::new_for_http());

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("carbook listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  bookings: {}", engine.booking_count());
    info!("  max_connections: {}", config.max_connections);
    info!(
        "  gateway token: {}",
        if config.gateway_token.is_some() { "required" } else { "not required" }
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight requests
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    let _ = compactor.await;
    info!("carbook stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received, draining requests");
}
