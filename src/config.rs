//! Configuration loader for the `heatpump-predictor` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the codebase.
//!
use std::env;

use anyhow::{anyhow, bail, Result};

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Read an optional string environment variable; empty counts as unset.
macro_rules! optional_env {
    ($var_name:expr) => {
        env::var($var_name).ok().filter(|v| !v.trim().is_empty())
    };
}

/// Daily projection run at a fixed UTC time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSpec {
    // ---
    pub hour: u32,
    pub minute: u32,
    /// Offset of the first projected hour from the hour the job runs in.
    pub starting_hour: usize,
    pub hours_ahead: usize,
}

impl ScheduleSpec {
    /// Parse `HH:MM,starting_hour,hours_ahead`, e.g. `23:30,1,24`.
    pub fn parse(raw: &str) -> Result<Self> {
        // ---
        let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
        let [time, starting_hour, hours_ahead] = parts.as_slice() else {
            bail!("expected HH:MM,starting_hour,hours_ahead, got '{}'", raw);
        };

        let (hour, minute) = time
            .split_once(':')
            .ok_or_else(|| anyhow!("expected HH:MM, got '{}'", time))?;
        let hour: u32 = hour.parse()?;
        let minute: u32 = minute.parse()?;
        if hour > 23 || minute > 59 {
            bail!("time of day out of range: '{}'", time);
        }

        let hours_ahead: usize = hours_ahead.parse()?;
        if hours_ahead == 0 {
            bail!("hours_ahead must be at least 1");
        }

        Ok(Self {
            hour,
            minute,
            starting_hour: starting_hour.parse()?,
            hours_ahead,
        })
    }
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// HTTP listen port.
    pub listen_port: u16,

    /// Key the bucket table is saved under.
    pub state_key: String,

    /// Seconds between persistence attempts.
    pub save_debounce_secs: u32,

    /// Bound on a single state load or save.
    pub state_timeout_secs: u32,

    /// Hourly forecast endpoint; forecasting is disabled without it.
    pub forecast_api_url: Option<String>,

    pub forecast_refresh_secs: u32,

    pub forecast_timeout_secs: u32,

    /// Sensor snapshot endpoint; polling is disabled without it.
    pub sensor_poll_url: Option<String>,

    pub sensor_poll_secs: u32,

    pub scheduled_forecast: Option<ScheduleSpec>,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string
///
/// Optional:
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `LISTEN_PORT` – HTTP port (default: 8080)
/// - `STATE_KEY` – persisted state key (default: `heat_pump_predictor`)
/// - `SAVE_DEBOUNCE_SECS` – persistence debounce window (default: 60)
/// - `STATE_TIMEOUT_SECS` – state load/save timeout (default: 10)
/// - `FORECAST_API_URL` – hourly forecast endpoint (default: unset)
/// - `FORECAST_REFRESH_SECS` – forecast refresh period (default: 1800)
/// - `FORECAST_TIMEOUT_SECS` – forecast fetch timeout (default: 10)
/// - `SENSOR_POLL_URL` – sensor snapshot endpoint (default: unset)
/// - `SENSOR_POLL_SECS` – poll period (default: 300)
/// - `SCHEDULED_FORECAST` – `HH:MM,starting_hour,hours_ahead` (default: unset)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let db_pool_max = parse_env_u32!("DB_POOL_MAX", 5);
    let listen_port = u16::try_from(parse_env_u32!("LISTEN_PORT", 8080))
        .map_err(|e| anyhow!("Invalid LISTEN_PORT: {}", e))?;
    let state_key = optional_env!("STATE_KEY").unwrap_or_else(|| "heat_pump_predictor".into());
    let save_debounce_secs = parse_env_u32!("SAVE_DEBOUNCE_SECS", 60).max(1);
    let state_timeout_secs = parse_env_u32!("STATE_TIMEOUT_SECS", 10).max(1);
    let forecast_api_url = optional_env!("FORECAST_API_URL");
    let forecast_refresh_secs = parse_env_u32!("FORECAST_REFRESH_SECS", 1800).max(1);
    let forecast_timeout_secs = parse_env_u32!("FORECAST_TIMEOUT_SECS", 10).max(1);
    let sensor_poll_url = optional_env!("SENSOR_POLL_URL");
    let sensor_poll_secs = parse_env_u32!("SENSOR_POLL_SECS", 300).max(1);
    let scheduled_forecast = optional_env!("SCHEDULED_FORECAST")
        .map(|raw| ScheduleSpec::parse(&raw))
        .transpose()
        .map_err(|e| anyhow!("Invalid SCHEDULED_FORECAST: {}", e))?;

    Ok(Config {
        db_url,
        db_pool_max,
        listen_port,
        state_key,
        save_debounce_secs,
        state_timeout_secs,
        forecast_api_url,
        forecast_refresh_secs,
        forecast_timeout_secs,
        sensor_poll_url,
        sensor_poll_secs,
        scheduled_forecast,
    })
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks sensitive information like database passwords while showing
    /// all configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        let unset = || "(unset)".to_string();

        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL          : {}", mask_db_url(&self.db_url));
        tracing::info!("  DB_POOL_MAX           : {}", self.db_pool_max);
        tracing::info!("  LISTEN_PORT           : {}", self.listen_port);
        tracing::info!("  STATE_KEY             : {}", self.state_key);
        tracing::info!("  SAVE_DEBOUNCE_SECS    : {}", self.save_debounce_secs);
        tracing::info!("  STATE_TIMEOUT_SECS    : {}", self.state_timeout_secs);
        tracing::info!(
            "  FORECAST_API_URL      : {}",
            self.forecast_api_url.clone().unwrap_or_else(unset)
        );
        tracing::info!("  FORECAST_REFRESH_SECS : {}", self.forecast_refresh_secs);
        tracing::info!("  FORECAST_TIMEOUT_SECS : {}", self.forecast_timeout_secs);
        tracing::info!(
            "  SENSOR_POLL_URL       : {}",
            self.sensor_poll_url.clone().unwrap_or_else(unset)
        );
        tracing::info!("  SENSOR_POLL_SECS      : {}", self.sensor_poll_secs);
        tracing::info!("  SCHEDULED_FORECAST    : {:?}", self.scheduled_forecast);
    }
}

/// Replace the password part of a connection string with `****`.
fn mask_db_url(db_url: &str) -> String {
    // ---
    if let Some(at_pos) = db_url.rfind('@') {
        if let Some(colon_pos) = db_url[..at_pos].rfind(':') {
            return format!("{}:****{}", &db_url[..colon_pos], &db_url[at_pos..]);
        }
    }
    db_url.to_string()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_schedule_spec_parse() {
        // ---
        let spec = ScheduleSpec::parse("23:30, 1, 24").unwrap();
        assert_eq!(
            spec,
            ScheduleSpec {
                hour: 23,
                minute: 30,
                starting_hour: 1,
                hours_ahead: 24
            }
        );

        assert!(ScheduleSpec::parse("24:00,0,1").is_err());
        assert!(ScheduleSpec::parse("06:00,0,0").is_err());
        assert!(ScheduleSpec::parse("06:00,0").is_err());
        assert!(ScheduleSpec::parse("0600,0,4").is_err());
    }

    #[test]
    fn test_mask_db_url() {
        // ---
        assert_eq!(
            mask_db_url("postgres://hp:secret@db:5432/predictor"),
            "postgres://hp:****@db:5432/predictor"
        );
        assert_eq!(mask_db_url("postgres://localhost/db"), "postgres://localhost/db");
    }
}
