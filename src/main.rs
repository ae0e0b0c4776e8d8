//! Fireshield - an air-quality insights service for VOC exposure monitoring.
//!
//! # API Endpoints
//!
//! - `POST /ingest` - Store a batch of VOC readings
//! - `GET /metrics` - Window overview (averages + severity)
//! - `GET /series` - Bucketed TVOC series
//! - `GET /insights` - Simple advice for a window
//! - `GET /insights/report` - Rich awareness report
//! - `GET /health` - Health check

use std::env;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use fireshield::api::{AppState, router};
use fireshield::gemini::GeminiClient;
use fireshield::insights::{InsightsConfig, InsightsEngine};
use fireshield::storage::Storage;

/// Default port if not specified via environment variable.
const DEFAULT_PORT: u16 = 3000;

/// Default database path if not specified via environment variable.
const DEFAULT_DB_PATH: &str = "sqlite:fireshield.db?mode=rwc";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with environment filter
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("fireshield=info".parse()?))
        .init();

    // Load configuration from environment
    let port: u16 = env::var("FIRESHIELD_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let db_url = env::var("FIRESHIELD_DATABASE_URL").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());

    let config = InsightsConfig::from_env();

    info!(
        port,
        db_url = %db_url,
        primary_model = %config.primary_model,
        secondary_model = %config.secondary_model,
        model_enabled = config.api_key.is_some(),
        "Starting Fireshield server"
    );

    // Initialize storage
    let storage = Storage::new(&db_url).await?;
    info!("Database initialized");

    let client = GeminiClient::new(
        config.api_key.as_deref().unwrap_or_default(),
        config.temperature,
        config.request_timeout,
    );
    let engine = InsightsEngine::new(config, client);

    // Create application state
    let state = AppState { storage, engine };

    let app = router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "Fireshield is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
