//! Hourly weather forecast source and the cache the projector reads from.
//!
//! The provider is an injected collaborator. The bundled HTTP provider
//! accepts the common response shapes (bare array, `forecast`, `data`) and
//! keeps hours with unusable temperatures as gaps instead of dropping them,
//! so a request spanning a bad hour fails with a precise error.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::forecast::ForecastEntry;

// ---

#[async_trait]
pub trait ForecastProvider: Send + Sync {
    /// Fetch the hourly forecast, oldest hour first.
    async fn fetch(&self) -> Result<Vec<ForecastEntry>>;
}

/// Forecast fetched as JSON over HTTP.
pub struct HttpForecastProvider {
    client: reqwest::Client,
    url: String,
}

impl HttpForecastProvider {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl ForecastProvider for HttpForecastProvider {
    // ---
    async fn fetch(&self) -> Result<Vec<ForecastEntry>> {
        // ---
        tracing::debug!("Fetching forecast from: {}", self.url);

        let response: Value = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_forecast(&response)
    }
}

/// Fixed forecast, for tests and offline runs.
pub struct StaticForecastProvider {
    entries: Vec<ForecastEntry>,
}

impl StaticForecastProvider {
    pub fn new(entries: Vec<ForecastEntry>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl ForecastProvider for StaticForecastProvider {
    async fn fetch(&self) -> Result<Vec<ForecastEntry>> {
        Ok(self.entries.clone())
    }
}

/// Turn a provider response into time-ordered entries.
pub fn parse_forecast(response: &Value) -> Result<Vec<ForecastEntry>> {
    // ---
    let items = response
        .as_array()
        .or_else(|| response.get("forecast").and_then(Value::as_array))
        .or_else(|| response.get("data").and_then(Value::as_array))
        .ok_or_else(|| anyhow!("Forecast response has no forecast list"))?;

    let mut entries = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let Some(timestamp) = entry_timestamp(item) else {
            tracing::debug!("Skipping forecast item {} without timestamp: {}", i, item);
            continue;
        };

        let temperature = entry_temperature(item);
        if temperature.is_none() {
            tracing::warn!("Forecast hour {} has no usable temperature: {}", timestamp, item);
        }

        entries.push(ForecastEntry {
            timestamp,
            temperature,
        });
    }

    entries.sort_by_key(|e| e.timestamp);
    entries.dedup_by_key(|e| e.timestamp);

    Ok(entries)
}

fn entry_timestamp(item: &Value) -> Option<DateTime<Utc>> {
    // ---
    let raw = item.get("datetime").or_else(|| item.get("timestamp"))?;
    match raw {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(|secs| DateTime::from_timestamp(secs, 0)),
        _ => None,
    }
}

fn entry_temperature(item: &Value) -> Option<f64> {
    // ---
    let value = match item.get("temperature")? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    value.is_finite().then_some(value)
}

/// Last successful forecast fetch.
#[derive(Debug, Clone, Default)]
pub struct ForecastCache {
    entries: Vec<ForecastEntry>,
    fetched_at: Option<DateTime<Utc>>,
}

impl ForecastCache {
    // ---
    pub fn entries(&self) -> &[ForecastEntry] {
        &self.entries
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }

    pub fn replace(&mut self, entries: Vec<ForecastEntry>, fetched_at: DateTime<Utc>) {
        self.entries = entries;
        self.fetched_at = Some(fetched_at);
    }
}

/// Fetch from `provider` within `timeout`.
///
/// Errors and timeouts are returned to the caller, which keeps serving the
/// previous cache.
pub async fn fetch_with_timeout(
    provider: &dyn ForecastProvider,
    timeout: Duration,
) -> Result<Vec<ForecastEntry>> {
    // ---
    match tokio::time::timeout(timeout, provider.fetch()).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("Forecast fetch timed out after {:?}", timeout)),
    }
}
