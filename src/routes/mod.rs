//! HTTP gateway for the predictor query interface.
//!
//! Each sibling module exports a subrouter; this gateway merges them and
//! attaches the shared [`Predictor`] as state, so `main.rs` never needs to
//! know about individual endpoints (EMBP).

use std::sync::Arc;

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json, Router};
use serde::Serialize;

use crate::error::{EstimateError, ForecastError};
use crate::predictor::Predictor;

mod buckets;
mod estimate;
mod forecast;
mod health;
mod observations;

// ---

pub type AppState = Arc<Predictor>;

pub fn router(predictor: AppState) -> Router {
    // ---
    Router::new()
        .merge(observations::router())
        .merge(estimate::router())
        .merge(forecast::router())
        .merge(buckets::router())
        .merge(health::router())
        .with_state(predictor)
}

/// JSON body for every failed query.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

/// Typed query failure mapped onto an HTTP status and a stable code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "invalid_request",
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            message: message.into(),
        }
    }
}

impl From<EstimateError> for ApiError {
    fn from(e: EstimateError) -> Self {
        // ---
        let (status, code) = match e {
            EstimateError::NoData(_) => (StatusCode::UNPROCESSABLE_ENTITY, "no_data"),
            EstimateError::InvalidTemperature => (StatusCode::BAD_REQUEST, "invalid_temperature"),
        };
        Self {
            status,
            code,
            message: e.to_string(),
        }
    }
}

impl From<ForecastError> for ApiError {
    fn from(e: ForecastError) -> Self {
        // ---
        let (status, code) = match &e {
            ForecastError::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, "forecast_unavailable"),
            ForecastError::InsufficientWindow { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "insufficient_window")
            }
            ForecastError::MissingHourData { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "missing_hour_data")
            }
            ForecastError::Estimate(inner) => return ApiError::from(inner.clone()),
        };
        Self {
            status,
            code,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // ---
        tracing::info!("Query failed ({}): {}", self.code, self.message);
        let body = ErrorBody {
            error: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}
