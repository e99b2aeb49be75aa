//! Power and duty-cycle estimates read from the bucket table.
//!
//! Populated buckets answer directly. An empty bucket borrows the populated
//! bucket nearest to 0°C and scales it with a load curve whose minimum sits
//! at [`LOAD_MINIMUM_TEMP`]. Fractional temperatures interpolate linearly
//! between the two neighbouring integer estimates.

use serde::Serialize;

use crate::buckets::{BucketStore, TemperatureBucket, MAX_TEMP, MIN_TEMP};
use crate::error::EstimateError;

// ---

/// Temperature at which appliance load is assumed lowest.
pub const LOAD_MINIMUM_TEMP: f64 = 25.0;

/// Multiplier change per degree away from the source bucket.
const SLOPE_PER_DEGREE: f64 = 0.20;

/// Floor for the cold-side multiplier.
const MIN_MULTIPLIER: f64 = 0.1;

/// Populated buckets are ranked by distance from this point.
const APPROXIMATION_REFERENCE: i32 = 0;

/// How much history stands behind an estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Approximated,
    Low,
    Medium,
    High,
}

impl Confidence {
    /// Direct-bucket confidence from accumulated hours.
    pub fn from_hours(hours: f64) -> Self {
        // ---
        if hours >= 24.0 {
            Confidence::High
        } else if hours >= 4.0 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }

    /// The weaker of two labels, `Approximated` being weakest.
    pub fn combine(self, other: Self) -> Self {
        self.min(other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Approximated => "approximated",
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EstimationResult {
    // ---
    pub power_overall_w: f64,
    pub power_running_w: f64,
    pub duty_cycle_percent: f64,
    /// Bucket key for point estimates, the queried value when interpolated.
    pub temperature: f64,
    pub confidence: Confidence,
    pub approximated: bool,
    pub approximation_source: Option<i32>,
    pub data_hours: f64,
}

/// Stateless reader over a borrowed [`BucketStore`].
#[derive(Debug, Clone, Copy)]
pub struct Estimator<'a> {
    store: &'a BucketStore,
}

impl<'a> Estimator<'a> {
    // ---
    pub fn new(store: &'a BucketStore) -> Self {
        Self { store }
    }

    /// Estimate for the bucket containing `temperature`.
    pub fn estimate(&self, temperature: f64) -> Result<EstimationResult, EstimateError> {
        // ---
        if !temperature.is_finite() {
            return Err(EstimateError::InvalidTemperature);
        }

        let bucket = self.store.bucket(temperature);
        let index = bucket.temperature;

        if bucket.has_data() {
            let hours = bucket.data_hours();
            return Ok(EstimationResult {
                power_overall_w: bucket.average_power_overall(),
                power_running_w: bucket.average_power_when_running(),
                duty_cycle_percent: bucket.duty_cycle_percent(),
                temperature: f64::from(index),
                confidence: Confidence::from_hours(hours),
                approximated: false,
                approximation_source: None,
                data_hours: hours,
            });
        }

        let source = self
            .approximation_source()
            .ok_or(EstimateError::NoData(temperature))?;
        let multiplier = load_multiplier(f64::from(source.temperature), temperature);

        tracing::debug!(
            "Approximating {:.1}°C from bucket {}°C (multiplier {:.3})",
            temperature,
            source.temperature,
            multiplier
        );

        Ok(EstimationResult {
            power_overall_w: source.average_power_overall() * multiplier,
            power_running_w: source.average_power_when_running() * multiplier,
            duty_cycle_percent: source.duty_cycle_percent(),
            temperature: f64::from(index),
            confidence: Confidence::Approximated,
            approximated: true,
            approximation_source: Some(source.temperature),
            data_hours: source.data_hours(),
        })
    }

    /// Estimate for a fractional temperature by blending the two
    /// neighbouring integer buckets.
    pub fn estimate_interpolated(
        &self,
        temperature: f64,
    ) -> Result<EstimationResult, EstimateError> {
        // ---
        if !temperature.is_finite() {
            return Err(EstimateError::InvalidTemperature);
        }

        let lower = (temperature.floor() as i32).clamp(MIN_TEMP, MAX_TEMP);
        let upper = (temperature.ceil() as i32).clamp(MIN_TEMP, MAX_TEMP);
        if lower == upper {
            return self.estimate(temperature);
        }

        let low = self.estimate(f64::from(lower))?;
        let high = self.estimate(f64::from(upper))?;
        let weight = (temperature - f64::from(lower)) / f64::from(upper - lower);

        let approximated = low.approximated || high.approximated;
        let confidence = if approximated {
            Confidence::Approximated
        } else {
            low.confidence.combine(high.confidence)
        };

        Ok(EstimationResult {
            power_overall_w: lerp(low.power_overall_w, high.power_overall_w, weight),
            power_running_w: lerp(low.power_running_w, high.power_running_w, weight),
            duty_cycle_percent: lerp(low.duty_cycle_percent, high.duty_cycle_percent, weight),
            temperature,
            confidence,
            approximated,
            approximation_source: low.approximation_source.or(high.approximation_source),
            data_hours: low.data_hours.min(high.data_hours),
        })
    }

    /// Populated bucket closest to the fixed reference point. On equal
    /// distance the colder bucket wins.
    fn approximation_source(&self) -> Option<&'a TemperatureBucket> {
        // ---
        self.store
            .iter()
            .filter(|b| b.has_data())
            .min_by_key(|b| (b.temperature - APPROXIMATION_REFERENCE).abs())
    }
}

/// Load scaling from a populated `source` bucket to a `target` temperature.
pub fn load_multiplier(source: f64, target: f64) -> f64 {
    // ---
    if target <= LOAD_MINIMUM_TEMP {
        return (1.0 - SLOPE_PER_DEGREE * (target - source)).max(MIN_MULTIPLIER);
    }

    let at_minimum = (1.0 - SLOPE_PER_DEGREE * (LOAD_MINIMUM_TEMP - source)).max(MIN_MULTIPLIER);
    at_minimum * (1.0 + SLOPE_PER_DEGREE * (target - LOAD_MINIMUM_TEMP))
}

fn lerp(a: f64, b: f64, w: f64) -> f64 {
    a + (b - a) * w
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::buckets::bucket_index;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap()
    }

    /// Credit `hours` of running time and `kwh` to the bucket for `temp`.
    fn fill(store: &mut BucketStore, temp: f64, hours: i64, kwh: f64, running: bool) {
        // ---
        let start = t0() + Duration::days(i64::from(bucket_index(temp)) + 40);
        store.clear_baseline();
        store.record_observation(temp, 0.0, running, start);
        store.record_observation(temp, kwh, running, start + Duration::hours(hours));
    }

    #[test]
    fn test_direct_estimate_and_confidence() {
        // ---
        let mut store = BucketStore::new();
        fill(&mut store, 3.0, 2, 1.0, true);
        fill(&mut store, 4.0, 4, 2.0, true);
        fill(&mut store, 5.0, 24, 6.0, true);

        let est = Estimator::new(&store);
        let three = est.estimate(3.4).unwrap();
        assert_eq!(three.temperature, 3.0);
        assert_eq!(three.power_overall_w, 500.0);
        assert_eq!(three.duty_cycle_percent, 100.0);
        assert_eq!(three.confidence, Confidence::Low);
        assert!(!three.approximated);

        assert_eq!(est.estimate(4.0).unwrap().confidence, Confidence::Medium);
        assert_eq!(est.estimate(5.0).unwrap().confidence, Confidence::High);
    }

    #[test]
    fn test_no_data_anywhere() {
        // ---
        let store = BucketStore::new();
        let est = Estimator::new(&store);
        assert_eq!(est.estimate(5.0), Err(EstimateError::NoData(5.0)));
        assert!(matches!(
            est.estimate_interpolated(5.5),
            Err(EstimateError::NoData(_))
        ));
        assert_eq!(
            est.estimate(f64::NAN),
            Err(EstimateError::InvalidTemperature)
        );
    }

    #[test]
    fn test_empty_bucket_is_always_approximated() {
        // ---
        let mut store = BucketStore::new();
        fill(&mut store, 10.0, 5, 2.0, true);

        let est = Estimator::new(&store);
        for t in MIN_TEMP..=MAX_TEMP {
            if t == 10 {
                continue;
            }
            let result = est.estimate(f64::from(t)).unwrap();
            assert!(result.approximated, "bucket {t} should be approximated");
            assert_eq!(result.confidence, Confidence::Approximated);
            assert_eq!(result.approximation_source, Some(10));
        }
    }

    #[test]
    fn test_source_is_closest_to_zero_not_to_query() {
        // ---
        let mut store = BucketStore::new();
        fill(&mut store, -2.0, 10, 10.0, true);
        fill(&mut store, 19.0, 10, 3.0, true);

        let est = Estimator::new(&store);
        let result = est.estimate(20.0).unwrap();
        assert_eq!(result.approximation_source, Some(-2));
    }

    #[test]
    fn test_source_tie_prefers_colder_bucket() {
        // ---
        let mut store = BucketStore::new();
        fill(&mut store, 3.0, 10, 5.0, true);
        fill(&mut store, -3.0, 10, 9.0, true);

        let est = Estimator::new(&store);
        assert_eq!(est.estimate(8.0).unwrap().approximation_source, Some(-3));
    }

    #[test]
    fn test_approximation_scales_power_but_not_duty_cycle() {
        // ---
        let mut store = BucketStore::new();
        // 2 kWh over 2 h running, then 2 h idle: 500 W overall, 1000 W running.
        let start = t0();
        store.record_observation(0.0, 0.0, true, start);
        store.record_observation(0.0, 2.0, false, start + Duration::hours(2));
        store.record_observation(0.0, 2.0, false, start + Duration::hours(4));

        let est = Estimator::new(&store);
        let colder = est.estimate(-2.0).unwrap();
        // 1 - 0.2 * (-2 - 0) = 1.4
        assert!((colder.power_overall_w - 700.0).abs() < 1e-9);
        assert!((colder.power_running_w - 1400.0).abs() < 1e-9);
        assert_eq!(colder.duty_cycle_percent, 50.0);
        assert_eq!(colder.data_hours, 4.0);

        let warmer = est.estimate(3.0).unwrap();
        // 1 - 0.2 * 3 = 0.4
        assert!((warmer.power_overall_w - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_load_multiplier_curve() {
        // ---
        assert!((load_multiplier(0.0, -5.0) - 2.0).abs() < 1e-12);
        assert!((load_multiplier(0.0, 4.0) - 0.2).abs() < 1e-12);
        assert_eq!(load_multiplier(0.0, 10.0), MIN_MULTIPLIER);
        assert_eq!(load_multiplier(20.0, 25.0), MIN_MULTIPLIER);

        // Above the minimum the load rises again from the value at 25°C.
        assert!((load_multiplier(22.0, 25.0) - 0.4).abs() < 1e-12);
        assert!((load_multiplier(22.0, 27.0) - 0.4 * 1.4).abs() < 1e-12);
        assert!((load_multiplier(0.0, 30.0) - 0.1 * 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_interpolation_at_integer_matches_point_estimate() {
        // ---
        let mut store = BucketStore::new();
        fill(&mut store, 7.0, 6, 3.0, true);

        let est = Estimator::new(&store);
        assert_eq!(est.estimate_interpolated(7.0), est.estimate(7.0));
        assert_eq!(est.estimate_interpolated(2.0), est.estimate(2.0));
    }

    #[test]
    fn test_interpolation_midpoint() {
        // ---
        let mut store = BucketStore::new();
        fill(&mut store, 4.0, 10, 1.0, true);
        fill(&mut store, 6.0, 10, 2.0, true);
        fill(&mut store, 5.0, 1, 0.1, true);

        let est = Estimator::new(&store);
        assert_eq!(est.estimate(4.0).unwrap().power_overall_w, 100.0);
        assert_eq!(est.estimate(5.0).unwrap().power_overall_w, 100.0);

        let mid = est.estimate_interpolated(4.5).unwrap();
        assert!((mid.power_overall_w - 100.0).abs() < 1e-9);
        assert_eq!(mid.temperature, 4.5);
        assert_eq!(mid.confidence, Confidence::Low);
        assert_eq!(mid.data_hours, 1.0);

        let quarter = est.estimate_interpolated(5.25).unwrap();
        assert!((quarter.power_overall_w - 125.0).abs() < 1e-9);
    }

    #[test]
    fn test_interpolation_between_populated_buckets() {
        // ---
        let mut store = BucketStore::new();
        fill(&mut store, 4.0, 10, 1.0, true);
        fill(&mut store, 5.0, 10, 1.5, true);
        fill(&mut store, 6.0, 10, 2.0, true);

        let est = Estimator::new(&store);
        let result = est.estimate_interpolated(5.5).unwrap();
        assert!((result.power_overall_w - 175.0).abs() < 1e-9);
        assert_eq!(result.confidence, Confidence::Medium);
        assert!(!result.approximated);
    }

    #[test]
    fn test_interpolation_with_approximated_endpoint() {
        // ---
        let mut store = BucketStore::new();
        fill(&mut store, 1.0, 30, 3.0, true);

        let est = Estimator::new(&store);
        let result = est.estimate_interpolated(1.5).unwrap();
        assert!(result.approximated);
        assert_eq!(result.confidence, Confidence::Approximated);
        assert_eq!(result.approximation_source, Some(1));
        // 100 W at 1°C, 80 W approximated at 2°C
        assert!((result.power_overall_w - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_interpolation_clamps_out_of_range() {
        // ---
        let mut store = BucketStore::new();
        fill(&mut store, 30.0, 30, 3.0, true);

        let est = Estimator::new(&store);
        let result = est.estimate_interpolated(34.5).unwrap();
        assert!(!result.approximated);
        assert_eq!(result.power_overall_w, 100.0);
    }

    #[test]
    fn test_confidence_combination() {
        // ---
        use Confidence::*;
        assert_eq!(High.combine(High), High);
        assert_eq!(High.combine(Medium), Medium);
        assert_eq!(Medium.combine(Low), Low);
        assert_eq!(Low.combine(Approximated), Approximated);
        assert_eq!(Confidence::from_hours(3.99), Low);
    }
}
