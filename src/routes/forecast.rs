//! `GET /forecast` and `GET /forecast/scheduled`: projected energy over the
//! cached weather forecast.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;

use super::{ApiError, AppState};
use crate::models::{ForecastResponse, ScheduledForecastResponse};

// ---

/// Upper bound on a single projection request.
const MAX_HOURS_AHEAD: usize = 168;

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/forecast", get(handler))
        .route("/forecast/scheduled", get(scheduled))
}

/// Query parameters for a forecast window.
#[derive(Debug, Deserialize)]
pub struct ForecastQuery {
    /// Hours after the current hour at which the window starts.
    #[serde(default)]
    starting_hour: usize,
    hours_ahead: usize,
}

async fn handler(
    Query(params): Query<ForecastQuery>,
    State(predictor): State<AppState>,
) -> Result<Json<ForecastResponse>, ApiError> {
    // ---
    if params.hours_ahead == 0 || params.hours_ahead > MAX_HOURS_AHEAD {
        return Err(ApiError::bad_request(format!(
            "hours_ahead must be between 1 and {}",
            MAX_HOURS_AHEAD
        )));
    }

    let result = predictor
        .forecast(params.starting_hour, params.hours_ahead, Utc::now())
        .await?;

    tracing::info!(
        "GET /forecast - {} hours from +{}: {:.3} kWh",
        params.hours_ahead,
        params.starting_hour,
        result.total_energy_kwh
    );

    Ok(Json(ForecastResponse::new(
        &result,
        params.starting_hour,
        params.hours_ahead,
    )))
}

async fn scheduled(
    State(predictor): State<AppState>,
) -> Result<Json<ScheduledForecastResponse>, ApiError> {
    // ---
    let scheduled = predictor
        .last_scheduled()
        .await
        .ok_or_else(|| ApiError::not_found("no scheduled forecast has run"))?;

    Ok(Json(ScheduledForecastResponse::from(&scheduled)))
}
