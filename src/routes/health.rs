// src/routes/health.rs
//! API health check endpoint for the predictor service.
//!
//! This module defines the `/health` route used by container orchestrators
//! and CI pipelines to verify that the service is running. Besides the
//! liveness flag it reports the forecast cache size and age, which is the
//! first thing to look at when forecast queries start failing.

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::AppState;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    forecast_entries: usize,
    forecast_fetched_at: Option<DateTime<Utc>>,
    unsaved_changes: bool,
}

/// Handle `GET /health`.
///
/// Reads only in-memory state; never touches the database or the
/// forecast provider.
async fn health(State(predictor): State<AppState>) -> Json<HealthResponse> {
    // ---
    let (forecast_entries, forecast_fetched_at) = predictor.forecast_status().await;
    Json(HealthResponse {
        status: "ok",
        forecast_entries,
        forecast_fetched_at,
        unsaved_changes: predictor.is_dirty(),
    })
}

/// Create a subrouter containing the `/health` route.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
