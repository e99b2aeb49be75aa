//! `POST /observations`: event-driven sensor notifications.
//!
//! Goes through the same `Predictor::record_observation` entry point as the
//! poller, so notifications and polls are serialized by the bucket lock.
//! Bodies are parsed like polled snapshots; an unusable one is answered with
//! `rejected` and a warning instead of a client error.

use axum::{extract::State, routing::post, Json, Router};
use chrono::Utc;
use serde_json::Value;

use super::AppState;
use crate::buckets::Attribution;
use crate::models::ObservationResponse;
use crate::sensors::parse_notification;

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/observations", post(handler))
}

async fn handler(
    State(predictor): State<AppState>,
    Json(body): Json<Value>,
) -> Json<ObservationResponse> {
    // ---
    let observation = match parse_notification(&body, Utc::now()) {
        Ok(observation) => observation,
        Err(e) => {
            tracing::warn!("POST /observations - dropping notification: {:#}", e);
            return Json(ObservationResponse::Rejected);
        }
    };
    let outcome = predictor.record_observation(observation).await;

    if outcome == Attribution::Rejected {
        tracing::debug!("POST /observations - reading dropped: {:?}", observation);
    }

    Json(outcome.into())
}
