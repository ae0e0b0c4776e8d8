//! HTTP API handlers for Fireshield.
//!
//! Handlers are a thin pass-through: extract parameters, call into storage
//! or the insights engine, serialize JSON. Window parameters are coerced
//! rather than rejected; the insights endpoints never surface upstream model
//! trouble as an HTTP error.

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

use crate::gemini::ModelClient;
use crate::insights::InsightsEngine;
use crate::metrics;
use crate::model::{
    HoursQuery, IngestResponse, InsightsResponse, MAX_INGEST_BATCH, ReportResponse,
    SampleBatchRequest, SeriesQuery, TimePoint, WindowOverview,
};
use crate::storage::Storage;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState<C> {
    pub storage: Storage,
    pub engine: InsightsEngine<C>,
}

/// Build the application router.
pub fn router<C>(state: AppState<C>) -> Router
where
    C: ModelClient + Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/ingest", post(post_ingest::<C>))
        .route("/metrics", get(get_metrics::<C>))
        .route("/series", get(get_series::<C>))
        .route("/insights", get(get_insights::<C>))
        .route("/insights/report", get(get_report::<C>))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// POST /ingest - Store a batch of readings from one device.
///
/// Row failures are counted, not fatal: a batch with one bad reading still
/// lands the rest.
#[instrument(skip(state, request), fields(device_id = %request.device_id, batch = request.samples.len()))]
pub async fn post_ingest<C: ModelClient>(
    State(state): State<AppState<C>>,
    Json(request): Json<SampleBatchRequest>,
) -> Result<Json<IngestResponse>, StatusCode> {
    if request.device_id.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if request.samples.is_empty() || request.samples.len() > MAX_INGEST_BATCH {
        return Err(StatusCode::BAD_REQUEST);
    }

    let mut accepted = 0;
    let mut rejected = 0;
    for point in &request.samples {
        match state.storage.insert_sample(&request.device_id, point).await {
            Ok(()) => accepted += 1,
            Err(e) => {
                warn!(device_id = %request.device_id, error = %e, "failed to store sample");
                rejected += 1;
            }
        }
    }

    info!(accepted, rejected, "Batch ingested");
    Ok(Json(IngestResponse { accepted, rejected }))
}

/// GET /metrics - Overview for a window (default 24 h).
#[instrument(skip(state))]
pub async fn get_metrics<C: ModelClient>(
    State(state): State<AppState<C>>,
    Query(query): Query<HoursQuery>,
) -> Result<Json<WindowOverview>, StatusCode> {
    let hours = query.window_hours();

    match metrics::overview_for_hours(&state.storage, hours, Utc::now()).await {
        Ok(overview) => {
            info!(
                window_hours = overview.window_hours,
                severity = ?overview.severity,
                "Metrics queried"
            );
            Ok(Json(overview))
        }
        Err(e) => {
            warn!(window_hours = hours, error = %e, "Failed to compute metrics");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /series - Bucketed TVOC series for charting.
///
/// # Query Parameters
///
/// - `hours` (optional): Lookback window (default: 24)
/// - `bucket` (optional): `minute`, `hour`, or `day` (default: hour)
#[instrument(skip(state))]
pub async fn get_series<C: ModelClient>(
    State(state): State<AppState<C>>,
    Query(query): Query<SeriesQuery>,
) -> Result<Json<Vec<TimePoint>>, StatusCode> {
    let hours = query.window_hours();
    let bucket = query.bucket();

    match state
        .storage
        .tvoc_series(bucket.seconds(), hours, Utc::now())
        .await
    {
        Ok(points) => {
            info!(window_hours = hours, points = points.len(), "Series queried");
            Ok(Json(
                points
                    .into_iter()
                    .map(|(ts, tvoc_ppb)| TimePoint { ts, tvoc_ppb })
                    .collect(),
            ))
        }
        Err(e) => {
            warn!(window_hours = hours, error = %e, "Failed to compute series");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /insights - Simple advice for a window.
///
/// Always answers with a complete report; `source` says whether the model
/// or the canned fallback produced the advice.
#[instrument(skip(state))]
pub async fn get_insights<C: ModelClient>(
    State(state): State<AppState<C>>,
    Query(query): Query<HoursQuery>,
) -> Result<Json<InsightsResponse>, StatusCode> {
    let hours = query.window_hours();

    match state.engine.generate_insights(&state.storage, hours).await {
        Ok(response) => {
            info!(
                window_hours = response.window_hours,
                source = ?response.source,
                model = %response.model,
                "Insights generated"
            );
            Ok(Json(response))
        }
        Err(e) => {
            warn!(window_hours = hours, error = %e, "Failed to generate insights");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /insights/report - Rich awareness report for a window.
#[instrument(skip(state))]
pub async fn get_report<C: ModelClient>(
    State(state): State<AppState<C>>,
    Query(query): Query<HoursQuery>,
) -> Result<Json<ReportResponse>, StatusCode> {
    let hours = query.window_hours();

    match state.engine.generate_report(&state.storage, hours).await {
        Ok(response) => {
            info!(
                window_hours = response.window_hours,
                source = ?response.source,
                model = %response.model,
                "Report generated"
            );
            Ok(Json(response))
        }
        Err(e) => {
            warn!(window_hours = hours, error = %e, "Failed to generate report");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}
