use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use slotbook::config::AppConfig;
use slotbook::db;
use slotbook::handlers;
use slotbook::services::notify::LogDispatcher;
use slotbook::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;
    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install prometheus recorder")?;

    let state = Arc::new(AppState::new(
        db::shared(conn),
        config.clone(),
        Arc::new(LogDispatcher),
    ));

    let every = config.engine.sweep_interval_seconds;
    if every > 0 {
        tracing::info!("expiry sweep every {every}s");
        state
            .sweeper
            .clone()
            .spawn(state.payments.clone(), Duration::from_secs(every));
    } else {
        tracing::warn!("SWEEP_INTERVAL_SECONDS=0, relying on lazy heal and /api/cron/expire");
    }

    let app = handlers::router(state)
        .route("/metrics", get(move || std::future::ready(prometheus.render())))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
