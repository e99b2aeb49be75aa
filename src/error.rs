//! Typed failures raised by point estimates and forecast projections.

use chrono::{DateTime, Utc};

// ---

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EstimateError {
    #[error("no data available to approximate temperature {0}")]
    NoData(f64),
    #[error("temperature must be a finite number")]
    InvalidTemperature,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ForecastError {
    #[error("no forecast data available")]
    Unavailable,
    #[error("forecast window too short: requested {requested} hours, {available} available")]
    InsufficientWindow { requested: usize, available: usize },
    #[error("forecast hour {timestamp} has no usable temperature")]
    MissingHourData { timestamp: DateTime<Utc> },
    #[error(transparent)]
    Estimate(#[from] EstimateError),
}
