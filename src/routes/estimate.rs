//! `GET /estimate`: energy and power for a single temperature.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use super::{ApiError, AppState};
use crate::models::EstimateResponse;

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/estimate", get(handler))
}

/// Query parameters for a point estimate.
#[derive(Debug, Deserialize)]
pub struct EstimateQuery {
    temperature: f64,
    /// Hours of operation to price; defaults to one.
    hours: Option<f64>,
}

async fn handler(
    Query(params): Query<EstimateQuery>,
    State(predictor): State<AppState>,
) -> Result<Json<EstimateResponse>, ApiError> {
    // ---
    let hours = params.hours.unwrap_or(1.0);
    if !hours.is_finite() || hours < 0.0 {
        return Err(ApiError::bad_request("hours must be a non-negative number"));
    }

    let estimate = predictor.estimate(params.temperature).await?;
    tracing::debug!(
        "GET /estimate - {:.1}°C -> {:.1} W ({})",
        params.temperature,
        estimate.power_overall_w,
        estimate.confidence.as_str()
    );

    Ok(Json(EstimateResponse::new(&estimate, hours)))
}
