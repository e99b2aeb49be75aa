//! Temperature-bucketed accumulation of heat pump run time and energy.
//!
//! Every integer degree in [`MIN_TEMP`, `MAX_TEMP`] owns one
//! [`TemperatureBucket`]. Consecutive observations are turned into
//! `(dt, dE)` intervals and credited to the bucket of the temperature that
//! held *during* the interval, i.e. the previous reading.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---

/// Coldest bucket, in °C.
pub const MIN_TEMP: i32 = -25;

/// Warmest bucket, in °C.
pub const MAX_TEMP: i32 = 30;

/// Number of buckets in the table.
pub const BUCKET_COUNT: usize = (MAX_TEMP - MIN_TEMP + 1) as usize;

/// Map a temperature to its bucket: floor, then clamp into range.
///
/// Non-finite input is clamped too (`NaN` lands on 0 through the saturating
/// float cast); callers that accept raw sensor values filter those first.
pub fn bucket_index(temperature: f64) -> i32 {
    // ---
    (temperature.floor() as i32).clamp(MIN_TEMP, MAX_TEMP)
}

/// Accumulated totals for one integer-degree bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureBucket {
    // ---
    pub temperature: i32,
    pub total_energy_kwh: f64,
    pub total_time_seconds: f64,
    pub running_time_seconds: f64,
    pub last_update: Option<DateTime<Utc>>,
}

impl TemperatureBucket {
    // ---
    fn empty(temperature: i32) -> Self {
        Self {
            temperature,
            total_energy_kwh: 0.0,
            total_time_seconds: 0.0,
            running_time_seconds: 0.0,
            last_update: None,
        }
    }

    /// True once any interval has been attributed here.
    pub fn has_data(&self) -> bool {
        self.total_time_seconds > 0.0
    }

    /// Hours of observation backing this bucket.
    pub fn data_hours(&self) -> f64 {
        self.total_time_seconds / 3600.0
    }

    /// Average power while the appliance was running, in W.
    pub fn average_power_when_running(&self) -> f64 {
        // ---
        if self.running_time_seconds <= 0.0 {
            return 0.0;
        }
        self.total_energy_kwh * 1000.0 / (self.running_time_seconds / 3600.0)
    }

    /// Average power over all observed time, idle included, in W.
    pub fn average_power_overall(&self) -> f64 {
        // ---
        if self.total_time_seconds <= 0.0 {
            return 0.0;
        }
        self.total_energy_kwh * 1000.0 / (self.total_time_seconds / 3600.0)
    }

    pub fn duty_cycle_percent(&self) -> f64 {
        // ---
        if self.total_time_seconds <= 0.0 {
            return 0.0;
        }
        self.running_time_seconds / self.total_time_seconds * 100.0
    }
}

/// The most recent accepted observation; deltas are taken against it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub temperature: f64,
    pub energy_kwh: f64,
    pub running: bool,
    pub timestamp: DateTime<Utc>,
}

/// What [`BucketStore::record_observation`] did with a reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Attribution {
    /// First reading; stored as baseline only.
    Baseline,
    /// Interval credited to `bucket`.
    Attributed {
        bucket: i32,
        seconds: f64,
        energy_kwh: f64,
    },
    /// Energy counter went backwards; baseline resynced, no bucket touched.
    CounterReset { previous_kwh: f64, current_kwh: f64 },
    /// Timestamp not after the baseline, or a non-finite value; dropped.
    Rejected,
}

/// Owns every bucket plus the transient baseline used for deltas.
#[derive(Debug, Clone)]
pub struct BucketStore {
    // ---
    buckets: Vec<TemperatureBucket>,
    baseline: Option<Baseline>,
}

impl Default for BucketStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BucketStore {
    // ---
    pub fn new() -> Self {
        // ---
        Self {
            buckets: (MIN_TEMP..=MAX_TEMP).map(TemperatureBucket::empty).collect(),
            baseline: None,
        }
    }

    /// Bucket for a (possibly fractional or out-of-range) temperature.
    pub fn bucket(&self, temperature: f64) -> &TemperatureBucket {
        self.bucket_at(bucket_index(temperature))
    }

    /// Bucket by integer key; `index` is clamped into range.
    pub fn bucket_at(&self, index: i32) -> &TemperatureBucket {
        &self.buckets[slot(index)]
    }

    pub fn iter(&self) -> impl Iterator<Item = &TemperatureBucket> {
        self.buckets.iter()
    }

    pub fn baseline(&self) -> Option<&Baseline> {
        self.baseline.as_ref()
    }

    /// Forget the baseline; the next reading starts a new interval chain.
    pub fn clear_baseline(&mut self) {
        self.baseline = None;
    }

    /// Fold one sensor reading into the table.
    pub fn record_observation(
        &mut self,
        temperature: f64,
        cumulative_energy_kwh: f64,
        is_running: bool,
        timestamp: DateTime<Utc>,
    ) -> Attribution {
        // ---
        if !temperature.is_finite() || !cumulative_energy_kwh.is_finite() {
            tracing::warn!(
                temperature,
                cumulative_energy_kwh,
                "Dropping observation with non-finite value"
            );
            return Attribution::Rejected;
        }

        let current = Baseline {
            temperature,
            energy_kwh: cumulative_energy_kwh,
            running: is_running,
            timestamp,
        };

        let Some(previous) = self.baseline else {
            tracing::debug!(
                "Initialized tracking with temp={:.1}°C, energy={:.3} kWh",
                temperature,
                cumulative_energy_kwh
            );
            self.baseline = Some(current);
            return Attribution::Baseline;
        };

        let seconds = (timestamp - previous.timestamp).num_milliseconds() as f64 / 1000.0;
        if seconds <= 0.0 {
            tracing::warn!(
                "Invalid time delta: {} seconds (last {}, now {})",
                seconds,
                previous.timestamp,
                timestamp
            );
            return Attribution::Rejected;
        }

        let energy_kwh = cumulative_energy_kwh - previous.energy_kwh;
        if energy_kwh < 0.0 {
            tracing::warn!(
                "Energy counter decreased: {:.3} -> {:.3} kWh, resyncing baseline",
                previous.energy_kwh,
                cumulative_energy_kwh
            );
            self.baseline = Some(current);
            return Attribution::CounterReset {
                previous_kwh: previous.energy_kwh,
                current_kwh: cumulative_energy_kwh,
            };
        }

        // The elapsed interval ran under the previous ambient reading.
        let index = bucket_index(previous.temperature);
        let bucket = &mut self.buckets[slot(index)];
        bucket.total_time_seconds += seconds;

        let credited = previous.running && energy_kwh > 0.0;
        if credited {
            bucket.running_time_seconds += seconds;
            bucket.total_energy_kwh += energy_kwh;
            tracing::debug!(
                "Updated bucket {}°C: +{:.3} kWh, +{:.1} s running",
                index,
                energy_kwh,
                seconds
            );
        }
        bucket.last_update = Some(timestamp);

        self.baseline = Some(current);

        Attribution::Attributed {
            bucket: index,
            seconds,
            energy_kwh: if credited { energy_kwh } else { 0.0 },
        }
    }

    /// Export bucket totals keyed by temperature.
    pub fn to_records(&self) -> BTreeMap<String, BucketRecord> {
        // ---
        self.buckets
            .iter()
            .map(|b| {
                (
                    b.temperature.to_string(),
                    BucketRecord {
                        total_energy_kwh: b.total_energy_kwh,
                        total_time_seconds: b.total_time_seconds,
                        running_time_seconds: b.running_time_seconds,
                        last_update: b.last_update,
                    },
                )
            })
            .collect()
    }

    /// Rebuild a store from exported totals.
    ///
    /// Missing buckets start zeroed. Keys that do not parse or fall outside
    /// the range are skipped. The result has no baseline.
    pub fn from_records(records: &BTreeMap<String, BucketRecord>) -> Self {
        // ---
        let mut store = Self::new();

        for (key, record) in records {
            let temperature = match key.trim().parse::<i32>() {
                Ok(t) if (MIN_TEMP..=MAX_TEMP).contains(&t) => t,
                _ => {
                    tracing::warn!("Ignoring stored bucket with unexpected key '{}'", key);
                    continue;
                }
            };

            let bucket = &mut store.buckets[slot(temperature)];
            bucket.total_energy_kwh = record.total_energy_kwh.max(0.0);
            bucket.total_time_seconds = record.total_time_seconds.max(0.0);
            bucket.running_time_seconds = record
                .running_time_seconds
                .clamp(0.0, bucket.total_time_seconds);
            bucket.last_update = record.last_update;
        }

        store
    }
}

fn slot(index: i32) -> usize {
    (index.clamp(MIN_TEMP, MAX_TEMP) - MIN_TEMP) as usize
}

/// Persisted shape of one bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketRecord {
    // ---
    #[serde(default)]
    pub total_energy_kwh: f64,
    #[serde(default)]
    pub total_time_seconds: f64,
    #[serde(default)]
    pub running_time_seconds: f64,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
}
