//! Energy projection over an hourly temperature forecast.
//!
//! Each forecast hour is priced at the interpolated overall power for its
//! temperature and then nudged by a trend factor: a falling temperature
//! costs up to 20% more, a rising one up to 20% less.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ForecastError;
use crate::estimator::{Confidence, Estimator};

// ---

/// Largest trend correction, as a fraction of the hourly estimate.
const MAX_TREND_ADJUSTMENT: f64 = 0.20;

/// Temperature change (°C per hour) at which the correction saturates.
const TREND_SATURATION_DELTA: f64 = 1.5;

/// One hour of forecast as delivered by the provider. `temperature` is
/// absent when the provider sent something unusable for that hour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastEntry {
    pub timestamp: DateTime<Utc>,
    pub temperature: Option<f64>,
}

/// A validated forecast hour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastSample {
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
}

/// Samples to project plus the temperature just before them.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastWindow {
    pub samples: Vec<ForecastSample>,
    pub seed_temperature: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HourlyForecast {
    // ---
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub delta: Option<f64>,
    pub trend_factor: f64,
    pub energy_kwh: f64,
    pub power_overall_w: f64,
    pub confidence: Confidence,
    pub approximated: bool,
    pub approximation_source: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastResult {
    // ---
    pub total_energy_kwh: f64,
    pub approximated_hours: usize,
    pub hours: Vec<HourlyForecast>,
}

/// Multiplicative correction for an hour-to-hour temperature change.
pub fn trend_adjustment(delta: Option<f64>) -> f64 {
    // ---
    let Some(delta) = delta else {
        return 1.0;
    };

    let ratio = (delta.abs() / TREND_SATURATION_DELTA).min(1.0);
    let magnitude = MAX_TREND_ADJUSTMENT * ratio;

    if delta < 0.0 {
        1.0 + magnitude
    } else {
        (1.0 - magnitude).max(0.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ForecastProjector<'a> {
    estimator: Estimator<'a>,
}

impl<'a> ForecastProjector<'a> {
    // ---
    pub fn new(estimator: Estimator<'a>) -> Self {
        Self { estimator }
    }

    /// Project energy use over `samples`, one hour per sample.
    ///
    /// `starting_temperature` is the reading just before the window; without
    /// it the first hour gets no trend correction.
    pub fn project(
        &self,
        samples: &[ForecastSample],
        starting_temperature: Option<f64>,
    ) -> Result<ForecastResult, ForecastError> {
        // ---
        if samples.is_empty() {
            return Err(ForecastError::Unavailable);
        }

        let mut previous = starting_temperature;
        let mut total_energy_kwh = 0.0;
        let mut approximated_hours = 0;
        let mut hours = Vec::with_capacity(samples.len());

        for sample in samples {
            let estimate = self.estimator.estimate_interpolated(sample.temperature)?;
            let delta = previous.map(|p| sample.temperature - p);
            let trend_factor = trend_adjustment(delta);
            let energy_kwh = estimate.power_overall_w / 1000.0 * trend_factor;

            total_energy_kwh += energy_kwh;
            if estimate.approximated {
                approximated_hours += 1;
            }

            hours.push(HourlyForecast {
                timestamp: sample.timestamp,
                temperature: sample.temperature,
                delta,
                trend_factor,
                energy_kwh,
                power_overall_w: estimate.power_overall_w,
                confidence: estimate.confidence,
                approximated: estimate.approximated,
                approximation_source: estimate.approximation_source,
            });

            previous = Some(sample.temperature);
        }

        tracing::debug!(
            "Projected {} hours: {:.3} kWh ({} approximated)",
            hours.len(),
            total_energy_kwh,
            approximated_hours
        );

        Ok(ForecastResult {
            total_energy_kwh,
            approximated_hours,
            hours,
        })
    }
}

/// Hour containing `ts`.
fn hour_of(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(TimeDelta::hours(1)).unwrap_or(ts)
}

fn hours_after(base: DateTime<Utc>, hours: usize) -> Option<DateTime<Utc>> {
    let hours = i64::try_from(hours).ok()?;
    base.checked_add_signed(TimeDelta::try_hours(hours)?)
}

/// Cut `hours_ahead` consecutive hours out of the cached forecast, starting
/// `starting_hour` hours after the hour containing `now`.
///
/// Offsets count clock hours, not cache entries: an hour the provider left
/// out fails the window with [`ForecastError::MissingHourData`] just like an
/// hour whose temperature was unusable.
///
/// The trend seed for a window that starts in the current hour is
/// `current_temperature` (the last observed reading), since the cached entry
/// for the previous hour is already stale. Later windows seed from the
/// forecast hour just before them. Each source falls back to the other.
pub fn select_window(
    entries: &[ForecastEntry],
    now: DateTime<Utc>,
    starting_hour: usize,
    hours_ahead: usize,
    current_temperature: Option<f64>,
) -> Result<ForecastWindow, ForecastError> {
    // ---
    if entries.is_empty() {
        return Err(ForecastError::Unavailable);
    }

    let insufficient = |available| ForecastError::InsufficientWindow {
        requested: hours_ahead,
        available,
    };

    let first = hours_after(hour_of(now), starting_hour).ok_or_else(|| insufficient(0))?;
    let last_cached = entries
        .iter()
        .map(|e| hour_of(e.timestamp))
        .max()
        .unwrap_or(first);
    let available = if last_cached < first {
        0
    } else {
        usize::try_from((last_cached - first).num_hours() + 1).unwrap_or(0)
    };
    if hours_ahead == 0 || available < hours_ahead {
        return Err(insufficient(available));
    }

    let mut cursor = entries.iter().peekable();
    let mut samples = Vec::with_capacity(hours_ahead);
    let mut expected = first;

    for _ in 0..hours_ahead {
        while cursor.next_if(|e| hour_of(e.timestamp) < expected).is_some() {}

        let temperature = cursor
            .next_if(|e| hour_of(e.timestamp) == expected)
            .and_then(|e| e.temperature)
            .filter(|t| t.is_finite());
        match temperature {
            Some(temperature) => samples.push(ForecastSample {
                timestamp: expected,
                temperature,
            }),
            None => return Err(ForecastError::MissingHourData { timestamp: expected }),
        }

        expected += TimeDelta::hours(1);
    }

    let preceding = first
        .checked_sub_signed(TimeDelta::hours(1))
        .and_then(|previous| entries.iter().find(|e| hour_of(e.timestamp) == previous))
        .and_then(|e| e.temperature);

    let seed_temperature = if starting_hour == 0 {
        current_temperature.or(preceding)
    } else {
        preceding.or(current_temperature)
    };

    Ok(ForecastWindow {
        samples,
        seed_temperature,
    })
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::buckets::BucketStore;
    use chrono::{Duration, TimeZone};

    fn hour(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    fn entries(temps: &[Option<f64>]) -> Vec<ForecastEntry> {
        temps
            .iter()
            .enumerate()
            .map(|(i, t)| ForecastEntry {
                timestamp: hour(i as i64),
                temperature: *t,
            })
            .collect()
    }

    fn sample(h: i64, temperature: f64) -> ForecastSample {
        ForecastSample {
            timestamp: hour(h),
            temperature,
        }
    }

    /// Store where every bucket from -10 to 10 averages 1 kW overall.
    fn flat_store() -> BucketStore {
        // ---
        let mut store = BucketStore::new();
        for (i, t) in (-10..=10).enumerate() {
            let start = hour(i as i64 * 100);
            store.clear_baseline();
            store.record_observation(f64::from(t), 0.0, true, start);
            store.record_observation(f64::from(t), 24.0, true, start + Duration::hours(24));
        }
        store
    }

    #[test]
    fn test_trend_adjustment_bounds() {
        // ---
        assert_eq!(trend_adjustment(None), 1.0);
        assert_eq!(trend_adjustment(Some(0.0)), 1.0);
        assert!((trend_adjustment(Some(-0.75)) - 1.1).abs() < 1e-12);
        assert!((trend_adjustment(Some(0.75)) - 0.9).abs() < 1e-12);
        assert!((trend_adjustment(Some(-1.5)) - 1.2).abs() < 1e-12);
        assert!((trend_adjustment(Some(1.5)) - 0.8).abs() < 1e-12);

        // saturates outside ±1.5
        assert_eq!(trend_adjustment(Some(-6.0)), trend_adjustment(Some(-1.5)));
        assert_eq!(trend_adjustment(Some(9.0)), trend_adjustment(Some(1.5)));

        for step in -30..=30 {
            let factor = trend_adjustment(Some(f64::from(step) * 0.05));
            assert!((0.8..=1.2).contains(&factor), "factor {factor} out of range");
        }
    }

    #[test]
    fn test_project_empty_window_is_unavailable() {
        // ---
        let store = flat_store();
        let projector = ForecastProjector::new(Estimator::new(&store));
        assert_eq!(projector.project(&[], Some(1.0)), Err(ForecastError::Unavailable));
    }

    #[test]
    fn test_project_applies_trend_per_hour() {
        // ---
        let store = flat_store();
        let projector = ForecastProjector::new(Estimator::new(&store));
        let samples = [
            sample(0, 2.0),
            sample(1, 0.5),
            sample(2, 0.5),
            sample(3, 3.5),
        ];

        let result = projector.project(&samples, None).unwrap();
        let factors: Vec<f64> = result.hours.iter().map(|h| h.trend_factor).collect();

        assert_eq!(result.hours[0].delta, None);
        assert_eq!(result.hours[1].delta, Some(-1.5));
        assert!((factors[0] - 1.0).abs() < 1e-12);
        assert!((factors[1] - 1.2).abs() < 1e-12);
        assert!((factors[2] - 1.0).abs() < 1e-12);
        assert!((factors[3] - 0.8).abs() < 1e-12);

        assert!((result.total_energy_kwh - 4.0).abs() < 1e-9);
        assert_eq!(result.approximated_hours, 0);
        assert!(result.hours.iter().all(|h| h.confidence == Confidence::High));
    }

    #[test]
    fn test_project_uses_seed_for_first_hour() {
        // ---
        let store = flat_store();
        let projector = ForecastProjector::new(Estimator::new(&store));
        let samples = [sample(0, 1.0)];

        let result = projector.project(&samples, Some(4.0)).unwrap();
        assert_eq!(result.hours[0].delta, Some(-3.0));
        assert!((result.total_energy_kwh - 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_project_counts_approximated_hours() {
        // ---
        let store = flat_store();
        let projector = ForecastProjector::new(Estimator::new(&store));
        let samples = [
            sample(0, 10.0),
            sample(1, 11.0),
            sample(2, 10.5),
        ];

        let result = projector.project(&samples, Some(10.0)).unwrap();
        assert_eq!(result.approximated_hours, 2);
        assert_eq!(result.hours[1].approximation_source, Some(0));
        assert!(!result.hours[0].approximated);
    }

    #[test]
    fn test_project_propagates_no_data() {
        // ---
        let store = BucketStore::new();
        let projector = ForecastProjector::new(Estimator::new(&store));
        let samples = [sample(0, 1.0)];
        assert!(matches!(
            projector.project(&samples, None),
            Err(ForecastError::Estimate(_))
        ));
    }

    #[test]
    fn test_select_window_offsets_from_current_hour() {
        // ---
        let cached = entries(&[Some(1.0), Some(2.0), Some(3.0), Some(4.0), Some(5.0)]);
        let now = hour(1) + Duration::minutes(20);

        let window = select_window(&cached, now, 1, 2, Some(-9.0)).unwrap();
        let temps: Vec<f64> = window.samples.iter().map(|s| s.temperature).collect();
        assert_eq!(temps, vec![3.0, 4.0]);
        assert_eq!(window.seed_temperature, Some(2.0));

        let window = select_window(&cached, hour(0), 0, 3, Some(-9.0)).unwrap();
        assert_eq!(window.samples[0].timestamp, hour(0));
        assert_eq!(window.seed_temperature, Some(-9.0));
    }

    #[test]
    fn test_select_window_errors() {
        // ---
        assert_eq!(
            select_window(&[], hour(0), 0, 1, None),
            Err(ForecastError::Unavailable)
        );

        let cached = entries(&[Some(1.0), Some(2.0), Some(3.0)]);
        assert_eq!(
            select_window(&cached, hour(1), 0, 5, None),
            Err(ForecastError::InsufficientWindow {
                requested: 5,
                available: 2
            })
        );
        assert_eq!(
            select_window(&cached, hour(10), 0, 1, None),
            Err(ForecastError::InsufficientWindow {
                requested: 1,
                available: 0
            })
        );

        let gappy = entries(&[Some(1.0), None, Some(3.0)]);
        assert_eq!(
            select_window(&gappy, hour(0), 0, 3, None),
            Err(ForecastError::MissingHourData { timestamp: hour(1) })
        );
        // The malformed hour only fails requests that include it.
        assert!(select_window(&gappy, hour(2), 0, 1, None).is_ok());
    }

    #[test]
    fn test_select_window_rejects_skipped_hours() {
        // ---
        let cached: Vec<ForecastEntry> = [0, 1, 3, 4]
            .iter()
            .map(|h| ForecastEntry {
                timestamp: hour(*h),
                temperature: Some(1.0),
            })
            .collect();

        assert_eq!(
            select_window(&cached, hour(0), 0, 3, None),
            Err(ForecastError::MissingHourData { timestamp: hour(2) })
        );

        // Offsets count clock hours, so +3 lands on 03:00 despite the hole.
        let window = select_window(&cached, hour(0), 3, 2, Some(7.0)).unwrap();
        let stamps: Vec<DateTime<Utc>> = window.samples.iter().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![hour(3), hour(4)]);
        // 02:00 is absent, so the seed falls back to the observed reading.
        assert_eq!(window.seed_temperature, Some(7.0));

        assert_eq!(
            select_window(&cached, hour(0), 2, 3, None),
            Err(ForecastError::MissingHourData { timestamp: hour(2) })
        );
    }

    #[test]
    fn test_select_window_seed_source() {
        // ---
        let cached = entries(&[Some(1.0), Some(2.0), Some(3.0), Some(4.0)]);
        let now = hour(1) + Duration::minutes(45);

        // Current hour: the live reading beats the stale forecast hour.
        let window = select_window(&cached, now, 0, 1, Some(5.5)).unwrap();
        assert_eq!(window.seed_temperature, Some(5.5));
        let window = select_window(&cached, now, 0, 1, None).unwrap();
        assert_eq!(window.seed_temperature, Some(1.0));

        // Later windows chain on from the forecast itself.
        let window = select_window(&cached, now, 2, 1, Some(5.5)).unwrap();
        assert_eq!(window.seed_temperature, Some(3.0));
    }
}
