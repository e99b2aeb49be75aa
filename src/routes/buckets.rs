//! Read-only views of the bucket table: the full listing and the
//! chart-ready performance curves.

use axum::{extract::State, routing::get, Json, Router};

use super::AppState;
use crate::models::{
    duty_cycle_curve, energy_distribution, power_curve, BucketView, Curve, DutyCyclePoint,
    EnergyPoint, PowerCurvePoint,
};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/buckets", get(list))
        .route("/curves/power", get(power))
        .route("/curves/duty_cycle", get(duty_cycle))
        .route("/curves/energy_distribution", get(energy))
}

async fn list(State(predictor): State<AppState>) -> Json<Vec<BucketView>> {
    let buckets = predictor.buckets().await;
    Json(buckets.iter().map(BucketView::from).collect())
}

async fn power(State(predictor): State<AppState>) -> Json<Curve<PowerCurvePoint>> {
    Json(power_curve(&predictor.buckets().await))
}

async fn duty_cycle(State(predictor): State<AppState>) -> Json<Curve<DutyCyclePoint>> {
    Json(duty_cycle_curve(&predictor.buckets().await))
}

async fn energy(State(predictor): State<AppState>) -> Json<Curve<EnergyPoint>> {
    Json(energy_distribution(&predictor.buckets().await))
}
