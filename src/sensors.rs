//! Sensor snapshot polling.
//!
//! Home automation hubs report states as strings (`"21.4"`, `"on"`,
//! `"unavailable"`), so values are accepted as JSON numbers, booleans or
//! strings. A snapshot with any unusable value is dropped as a whole.
//! Pushed notifications share the parser and may carry their own timestamp.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::predictor::Observation;

// ---

/// Build an observation from a `{temperature, energy_kwh, running}` object.
pub fn parse_snapshot(snapshot: &Value, timestamp: DateTime<Utc>) -> Result<Observation> {
    // ---
    let temperature = numeric_field(snapshot, "temperature")?;
    let energy_kwh = numeric_field(snapshot, "energy_kwh")?;
    let running = running_field(snapshot)?;

    Ok(Observation {
        temperature,
        energy_kwh,
        running,
        timestamp,
    })
}

/// Build an observation from a pushed notification. `timestamp` is
/// optional RFC 3339 and defaults to `received_at`.
pub fn parse_notification(body: &Value, received_at: DateTime<Utc>) -> Result<Observation> {
    // ---
    let timestamp = match body.get("timestamp") {
        None | Some(Value::Null) => received_at,
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s.trim())
            .with_context(|| format!("timestamp '{}' is not RFC 3339", s))?
            .with_timezone(&Utc),
        Some(other) => bail!("timestamp is not a string: {}", other),
    };

    parse_snapshot(body, timestamp)
}

fn numeric_field(snapshot: &Value, name: &str) -> Result<f64> {
    // ---
    let value = match snapshot.get(name) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    value
        .filter(|v| v.is_finite())
        .ok_or_else(|| anyhow!("sensor value '{}' is not numeric: {:?}", name, snapshot.get(name)))
}

fn running_field(snapshot: &Value) -> Result<bool> {
    // ---
    match snapshot.get("running") {
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "on" | "true" | "running" => Ok(true),
            "off" | "false" | "idle" => Ok(false),
            other => Err(anyhow!("run state '{}' not recognised", other)),
        },
        other => Err(anyhow!("run state missing or invalid: {:?}", other)),
    }
}

/// Fetches sensor snapshots over HTTP.
pub struct SensorPoller {
    client: reqwest::Client,
    url: String,
}

impl SensorPoller {
    // ---
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    /// Poll once and stamp the reading with the current time.
    pub async fn poll(&self) -> Result<Observation> {
        // ---
        let snapshot: Value = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        tracing::debug!("Sensor snapshot: {}", snapshot);
        parse_snapshot(&snapshot, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 2, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_numbers_and_strings() {
        // ---
        let native = parse_snapshot(
            &json!({"temperature": -1.5, "energy_kwh": 1234.5, "running": true}),
            at(),
        )
        .unwrap();
        assert_eq!(native.temperature, -1.5);
        assert!(native.running);

        let stringly = parse_snapshot(
            &json!({"temperature": " 7.25", "energy_kwh": "10", "running": "off"}),
            at(),
        )
        .unwrap();
        assert_eq!(stringly.temperature, 7.25);
        assert_eq!(stringly.energy_kwh, 10.0);
        assert!(!stringly.running);
        assert_eq!(stringly.timestamp, at());
    }

    #[test]
    fn test_notification_timestamp() {
        // ---
        let stamped = parse_notification(
            &json!({"temperature": "21.4", "energy_kwh": 3.5, "running": "on",
                    "timestamp": "2025-04-02T06:30:00Z"}),
            at(),
        )
        .unwrap();
        assert_eq!(stamped.temperature, 21.4);
        assert!(stamped.running);
        assert_eq!(
            stamped.timestamp,
            Utc.with_ymd_and_hms(2025, 4, 2, 6, 30, 0).unwrap()
        );

        let unstamped = parse_notification(
            &json!({"temperature": 4.5, "energy_kwh": 12.0, "running": true, "timestamp": null}),
            at(),
        )
        .unwrap();
        assert_eq!(unstamped.timestamp, at());

        let bad_time = json!({"temperature": 4.5, "energy_kwh": 12.0, "running": true,
                              "timestamp": "yesterday"});
        assert!(parse_notification(&bad_time, at()).is_err());
    }

    #[test]
    fn test_non_numeric_reading_is_rejected() {
        // ---
        let cases = [
            json!({"temperature": "unavailable", "energy_kwh": 1.0, "running": "on"}),
            json!({"temperature": 3.0, "energy_kwh": null, "running": "on"}),
            json!({"temperature": 3.0, "energy_kwh": 1.0}),
            json!({"temperature": 3.0, "energy_kwh": 1.0, "running": "maybe"}),
            json!({"temperature": "NaN", "energy_kwh": 1.0, "running": "on"}),
        ];

        for case in cases {
            assert!(parse_snapshot(&case, at()).is_err(), "accepted {case}");
        }
    }
}
