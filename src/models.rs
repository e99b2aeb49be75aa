//! Wire models for the query interface.
//!
//! Internal computation keeps full precision; values are rounded only here,
//! when a result is turned into a response body (energy 3 decimals, power 1,
//! percentages, hours, seconds and temperature deltas 2).

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::buckets::{Attribution, TemperatureBucket};
use crate::estimator::{Confidence, EstimationResult};
use crate::forecast::{ForecastResult, HourlyForecast};
use crate::predictor::ScheduledForecast;

// ---

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

pub fn round_energy(kwh: f64) -> f64 {
    round_to(kwh, 3)
}

pub fn round_power(watts: f64) -> f64 {
    round_to(watts, 1)
}

pub fn round_percent(value: f64) -> f64 {
    round_to(value, 2)
}

pub fn round_hours(hours: f64) -> f64 {
    round_to(hours, 2)
}

pub fn round_seconds(seconds: f64) -> f64 {
    round_to(seconds, 2)
}

pub fn round_celsius(delta: f64) -> f64 {
    round_to(delta, 2)
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ObservationResponse {
    Baseline,
    Attributed {
        bucket: i32,
        seconds: f64,
        energy_kwh: f64,
    },
    CounterReset {
        previous_kwh: f64,
        current_kwh: f64,
    },
    Rejected,
}

impl From<Attribution> for ObservationResponse {
    fn from(outcome: Attribution) -> Self {
        // ---
        match outcome {
            Attribution::Baseline => ObservationResponse::Baseline,
            Attribution::Attributed {
                bucket,
                seconds,
                energy_kwh,
            } => ObservationResponse::Attributed {
                bucket,
                seconds: round_seconds(seconds),
                energy_kwh: round_energy(energy_kwh),
            },
            Attribution::CounterReset {
                previous_kwh,
                current_kwh,
            } => ObservationResponse::CounterReset {
                previous_kwh: round_energy(previous_kwh),
                current_kwh: round_energy(current_kwh),
            },
            Attribution::Rejected => ObservationResponse::Rejected,
        }
    }
}

/// Point estimate plus the energy it implies over `hours`.
#[derive(Debug, Serialize)]
pub struct EstimateResponse {
    // ---
    pub temperature: f64,
    pub hours: f64,
    pub energy_kwh: f64,
    pub power_overall_w: f64,
    pub power_running_w: f64,
    pub duty_cycle_percent: f64,
    pub confidence: Confidence,
    pub approximated: bool,
    pub approximation_source: Option<i32>,
    pub data_hours: f64,
}

impl EstimateResponse {
    // ---
    pub fn new(estimate: &EstimationResult, hours: f64) -> Self {
        Self {
            temperature: estimate.temperature,
            hours,
            energy_kwh: round_energy(estimate.power_overall_w / 1000.0 * hours),
            power_overall_w: round_power(estimate.power_overall_w),
            power_running_w: round_power(estimate.power_running_w),
            duty_cycle_percent: round_percent(estimate.duty_cycle_percent),
            confidence: estimate.confidence,
            approximated: estimate.approximated,
            approximation_source: estimate.approximation_source,
            data_hours: round_hours(estimate.data_hours),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HourlyForecastResponse {
    // ---
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub temperature_delta: Option<f64>,
    pub trend_factor: f64,
    pub energy_kwh: f64,
    pub power_overall_w: f64,
    pub confidence: Confidence,
    pub approximated: bool,
    pub approximation_source: Option<i32>,
}

impl From<&HourlyForecast> for HourlyForecastResponse {
    fn from(hour: &HourlyForecast) -> Self {
        Self {
            timestamp: hour.timestamp,
            temperature: hour.temperature,
            temperature_delta: hour.delta.map(round_celsius),
            trend_factor: round_to(hour.trend_factor, 3),
            energy_kwh: round_energy(hour.energy_kwh),
            power_overall_w: round_power(hour.power_overall_w),
            confidence: hour.confidence,
            approximated: hour.approximated,
            approximation_source: hour.approximation_source,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ForecastResponse {
    // ---
    pub starting_hour: usize,
    pub hours_ahead: usize,
    pub total_energy_kwh: f64,
    pub approximated_hours: usize,
    pub hours: Vec<HourlyForecastResponse>,
}

impl ForecastResponse {
    pub fn new(result: &ForecastResult, starting_hour: usize, hours_ahead: usize) -> Self {
        Self {
            starting_hour,
            hours_ahead,
            total_energy_kwh: round_energy(result.total_energy_kwh),
            approximated_hours: result.approximated_hours,
            hours: result.hours.iter().map(HourlyForecastResponse::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ScheduledForecastResponse {
    // ---
    pub computed_at: DateTime<Utc>,
    pub available: bool,
    pub error: Option<String>,
    pub forecast: Option<ForecastResponse>,
}

impl From<&ScheduledForecast> for ScheduledForecastResponse {
    fn from(scheduled: &ScheduledForecast) -> Self {
        // ---
        match &scheduled.result {
            Ok(result) => Self {
                computed_at: scheduled.computed_at,
                available: true,
                error: None,
                forecast: Some(ForecastResponse::new(
                    result,
                    scheduled.starting_hour,
                    scheduled.hours_ahead,
                )),
            },
            Err(e) => Self {
                computed_at: scheduled.computed_at,
                available: false,
                error: Some(e.to_string()),
                forecast: None,
            },
        }
    }
}

/// Stored totals and derived metrics of one bucket.
#[derive(Debug, Serialize)]
pub struct BucketView {
    // ---
    pub temperature: i32,
    pub total_energy_kwh: f64,
    pub total_time_hours: f64,
    pub running_time_hours: f64,
    pub avg_power_running_w: f64,
    pub avg_power_overall_w: f64,
    pub duty_cycle_percent: f64,
    pub last_update: Option<DateTime<Utc>>,
}

impl From<&TemperatureBucket> for BucketView {
    fn from(b: &TemperatureBucket) -> Self {
        Self {
            temperature: b.temperature,
            total_energy_kwh: round_energy(b.total_energy_kwh),
            total_time_hours: round_hours(b.total_time_seconds / 3600.0),
            running_time_hours: round_hours(b.running_time_seconds / 3600.0),
            avg_power_running_w: round_power(b.average_power_when_running()),
            avg_power_overall_w: round_power(b.average_power_overall()),
            duty_cycle_percent: round_percent(b.duty_cycle_percent()),
            last_update: b.last_update,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PowerCurvePoint {
    pub temp: i32,
    pub power_overall: f64,
    pub power_running: f64,
}

#[derive(Debug, Serialize)]
pub struct DutyCyclePoint {
    pub temp: i32,
    pub duty_cycle: f64,
}

#[derive(Debug, Serialize)]
pub struct EnergyPoint {
    pub temp: i32,
    pub energy: f64,
}

/// Chart-ready series over the bucket table.
#[derive(Debug, Serialize)]
pub struct Curve<T> {
    pub data: Vec<T>,
}

pub fn power_curve(buckets: &[TemperatureBucket]) -> Curve<PowerCurvePoint> {
    // ---
    let data = buckets
        .iter()
        .filter(|b| b.has_data())
        .map(|b| PowerCurvePoint {
            temp: b.temperature,
            power_overall: round_power(b.average_power_overall()),
            power_running: round_power(b.average_power_when_running()),
        })
        .collect();
    Curve { data }
}

pub fn duty_cycle_curve(buckets: &[TemperatureBucket]) -> Curve<DutyCyclePoint> {
    // ---
    let data = buckets
        .iter()
        .filter(|b| b.has_data())
        .map(|b| DutyCyclePoint {
            temp: b.temperature,
            duty_cycle: round_percent(b.duty_cycle_percent()),
        })
        .collect();
    Curve { data }
}

pub fn energy_distribution(buckets: &[TemperatureBucket]) -> Curve<EnergyPoint> {
    // ---
    let data = buckets
        .iter()
        .filter(|b| b.total_energy_kwh > 0.0)
        .map(|b| EnergyPoint {
            temp: b.temperature,
            energy: round_energy(b.total_energy_kwh),
        })
        .collect();
    Curve { data }
}
