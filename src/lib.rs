//! Heat pump performance model and energy forecast.
//!
//! The core (`buckets`, `estimator`, `forecast`) is synchronous and free of
//! I/O. Everything that talks to the outside world (`persistence`,
//! `provider`, `sensors`, `routes`) sits around it as an adapter and is
//! wired together by `main.rs`.

pub mod buckets;
pub mod config;
pub mod error;
pub mod estimator;
pub mod forecast;
pub mod models;
pub mod persistence;
pub mod predictor;
pub mod provider;
pub mod routes;
pub mod schema;
pub mod sensors;
pub mod tasks;

pub use config::Config;
pub use error::{EstimateError, ForecastError};
pub use predictor::{Observation, Predictor};
