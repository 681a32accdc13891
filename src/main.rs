use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use secrecy::ExposeSecret;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voucherd::api::middleware::session::{create_session_layer, AppState};
use voucherd::config::Config;
use voucherd::db;
use voucherd::services::geolocation::IpInfoResolver;
use voucherd::store::PgVoucherStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voucherd=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting voucherd...");

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    // Create database pool
    let pool = db::create_pool(config.database_url.expose_secret()).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    // Create session layer
    let session_layer = create_session_layer(pool.clone(), config.session_secure).await?;
    tracing::info!("Session layer initialized");

    let locator = IpInfoResolver::new(
        &config.geolocation_url,
        config.geolocation_token.clone(),
        config.geolocation_timeout(),
    )
    .context("invalid geolocation configuration")?;
    tracing::info!(url = %config.geolocation_url, "Geolocation resolver configured");

    // Build application state
    let state = AppState::new(
        Arc::new(PgVoucherStore::new(pool)),
        Arc::new(locator),
        config.clone(),
    );

    // Build router
    let app = voucherd::api::router()
        .layer(session_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid HOST/PORT")?;
    tracing::info!("Listening on {}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C signal handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, cleaning up...");
}
