//! Shared predictor state: the bucket table, the forecast cache and the
//! persistence hook, behind async locks.
//!
//! Writers (`record_observation`, `load_state`) take the bucket lock
//! exclusively, so polls and change notifications never interleave. Readers
//! (estimates, forecasts, snapshots) share it and always see totals from a
//! single update.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::buckets::{Attribution, BucketStore, TemperatureBucket};
use crate::error::{EstimateError, ForecastError};
use crate::estimator::{EstimationResult, Estimator};
use crate::forecast::{select_window, ForecastProjector, ForecastResult};
use crate::persistence::{load_with_timeout, save_with_timeout, PersistedState, StateStore};
use crate::provider::{fetch_with_timeout, ForecastCache, ForecastProvider};

// ---

/// Default bound on a single load or save.
pub const DEFAULT_STATE_TIMEOUT: Duration = Duration::from_secs(10);

/// One sensor reading with the time it was taken.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub temperature: f64,
    pub energy_kwh: f64,
    pub running: bool,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of the last scheduled projection.
#[derive(Debug, Clone)]
pub struct ScheduledForecast {
    pub computed_at: DateTime<Utc>,
    pub starting_hour: usize,
    pub hours_ahead: usize,
    pub result: Result<ForecastResult, ForecastError>,
}

pub struct Predictor {
    // ---
    buckets: RwLock<BucketStore>,
    forecast: RwLock<ForecastCache>,
    scheduled: RwLock<Option<ScheduledForecast>>,
    store: Arc<dyn StateStore>,
    provider: Option<Arc<dyn ForecastProvider>>,
    state_key: String,
    fetch_timeout: Duration,
    state_timeout: Duration,
    dirty: AtomicBool,
}

impl Predictor {
    // ---
    pub fn new(
        store: Arc<dyn StateStore>,
        provider: Option<Arc<dyn ForecastProvider>>,
        state_key: impl Into<String>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            buckets: RwLock::new(BucketStore::new()),
            forecast: RwLock::new(ForecastCache::default()),
            scheduled: RwLock::new(None),
            store,
            provider,
            state_key: state_key.into(),
            fetch_timeout,
            state_timeout: DEFAULT_STATE_TIMEOUT,
            dirty: AtomicBool::new(false),
        }
    }

    pub fn with_state_timeout(mut self, timeout: Duration) -> Self {
        self.state_timeout = timeout;
        self
    }

    /// Replace the bucket table with the persisted one, if present.
    ///
    /// A load failure leaves the empty table in place.
    pub async fn load_state(&self) {
        // ---
        let loaded =
            load_with_timeout(self.store.as_ref(), &self.state_key, self.state_timeout).await;
        match loaded {
            Ok(Some(state)) => {
                let restored = state.into_store();
                let populated = restored.iter().filter(|b| b.has_data()).count();
                *self.buckets.write().await = restored;
                tracing::info!(
                    "Loaded saved heat pump data from storage ({} populated buckets)",
                    populated
                );
            }
            Ok(None) => tracing::info!("No saved heat pump data, starting empty"),
            Err(e) => tracing::error!("Failed to load saved heat pump data: {:#}", e),
        }
    }

    pub async fn record_observation(&self, observation: Observation) -> Attribution {
        // ---
        let outcome = self.buckets.write().await.record_observation(
            observation.temperature,
            observation.energy_kwh,
            observation.running,
            observation.timestamp,
        );

        if matches!(outcome, Attribution::Attributed { .. }) {
            self.dirty.store(true, Ordering::Release);
        }
        outcome
    }

    pub async fn estimate(&self, temperature: f64) -> Result<EstimationResult, EstimateError> {
        let buckets = self.buckets.read().await;
        Estimator::new(&buckets).estimate_interpolated(temperature)
    }

    /// Project the cached forecast from `starting_hour` hours after the
    /// current hour, for `hours_ahead` hours.
    pub async fn forecast(
        &self,
        starting_hour: usize,
        hours_ahead: usize,
        now: DateTime<Utc>,
    ) -> Result<ForecastResult, ForecastError> {
        // ---
        let forecast = self.forecast.read().await;
        let buckets = self.buckets.read().await;

        let current = buckets.baseline().map(|b| b.temperature);
        let window = select_window(forecast.entries(), now, starting_hour, hours_ahead, current)?;

        ForecastProjector::new(Estimator::new(&buckets))
            .project(&window.samples, window.seed_temperature)
    }

    /// Pull a fresh forecast. On failure the previous cache stays in use.
    pub async fn refresh_forecast(&self) -> bool {
        // ---
        let Some(provider) = self.provider.as_deref() else {
            return false;
        };

        match fetch_with_timeout(provider, self.fetch_timeout).await {
            Ok(entries) => {
                tracing::info!("Forecast refreshed: {} hourly entries", entries.len());
                self.forecast.write().await.replace(entries, Utc::now());
                true
            }
            Err(e) => {
                tracing::warn!("Failed to update hourly forecast cache: {:#}", e);
                false
            }
        }
    }

    pub async fn forecast_status(&self) -> (usize, Option<DateTime<Utc>>) {
        let cache = self.forecast.read().await;
        (cache.entries().len(), cache.fetched_at())
    }

    /// Save the table if anything changed since the last successful save.
    pub async fn flush(&self) -> bool {
        // ---
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return true;
        }

        let state = PersistedState::from_store(&*self.buckets.read().await);
        let saved =
            save_with_timeout(self.store.as_ref(), &self.state_key, &state, self.state_timeout)
                .await;
        match saved {
            Ok(()) => {
                tracing::debug!("Saved heat pump data to storage");
                true
            }
            Err(e) => {
                self.dirty.store(true, Ordering::Release);
                tracing::error!("Failed to save data to storage: {:#}", e);
                false
            }
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Copy of every bucket, taken under one read lock.
    pub async fn buckets(&self) -> Vec<TemperatureBucket> {
        self.buckets.read().await.iter().cloned().collect()
    }

    /// Run a projection and keep its outcome for later readers.
    pub async fn run_scheduled(
        &self,
        starting_hour: usize,
        hours_ahead: usize,
        now: DateTime<Utc>,
    ) {
        // ---
        let result = self.forecast(starting_hour, hours_ahead, now).await;
        match &result {
            Ok(r) => tracing::info!(
                "Scheduled forecast: {:.3} kWh over {} hours",
                r.total_energy_kwh,
                hours_ahead
            ),
            Err(e) => tracing::warn!("Scheduled forecast update failed: {}", e),
        }

        *self.scheduled.write().await = Some(ScheduledForecast {
            computed_at: now,
            starting_hour,
            hours_ahead,
            result,
        });
    }

    pub async fn last_scheduled(&self) -> Option<ScheduledForecast> {
        self.scheduled.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::forecast::ForecastEntry;
    use crate::persistence::MemoryStateStore;
    use crate::provider::StaticForecastProvider;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};

    struct FailingStore;

    #[async_trait]
    impl StateStore for FailingStore {
        async fn load(&self, _key: &str) -> Result<Option<PersistedState>> {
            Err(anyhow!("disk on fire"))
        }

        async fn save(&self, _key: &str, _state: &PersistedState) -> Result<()> {
            Err(anyhow!("disk on fire"))
        }
    }

    struct StalledStore;

    #[async_trait]
    impl StateStore for StalledStore {
        async fn load(&self, _key: &str) -> Result<Option<PersistedState>> {
            std::future::pending().await
        }

        async fn save(&self, _key: &str, _state: &PersistedState) -> Result<()> {
            std::future::pending().await
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 20, 10, 0, 0).unwrap()
    }

    fn obs(minutes: i64, temperature: f64, energy_kwh: f64) -> Observation {
        Observation {
            temperature,
            energy_kwh,
            running: true,
            timestamp: t0() + ChronoDuration::minutes(minutes),
        }
    }

    fn predictor(store: Arc<dyn StateStore>) -> Predictor {
        Predictor::new(store, None, "test", Duration::from_secs(1))
    }

    #[test]
    fn test_flush_only_after_attribution() {
        // ---
        tokio_test::block_on(async {
            let store = Arc::new(MemoryStateStore::new());
            let predictor = predictor(store.clone());

            predictor.record_observation(obs(0, 1.0, 0.0)).await;
            assert!(!predictor.is_dirty());

            predictor.record_observation(obs(60, 1.0, 1.0)).await;
            assert!(predictor.is_dirty());
            assert!(predictor.flush().await);
            assert!(!predictor.is_dirty());

            let saved = store.load("test").await.unwrap().unwrap().into_store();
            assert_eq!(saved.bucket_at(1).total_energy_kwh, 1.0);
        });
    }

    #[test]
    fn test_failed_save_keeps_data_dirty() {
        // ---
        tokio_test::block_on(async {
            let predictor = predictor(Arc::new(FailingStore));

            predictor.load_state().await;
            predictor.record_observation(obs(0, 1.0, 0.0)).await;
            predictor.record_observation(obs(30, 1.0, 0.5)).await;

            assert!(!predictor.flush().await);
            assert!(predictor.is_dirty());
            // accumulation carries on in memory
            assert!(predictor.estimate(1.0).await.is_ok());
        });
    }

    #[tokio::test]
    async fn test_hung_store_does_not_block_flush() {
        // ---
        let predictor =
            predictor(Arc::new(StalledStore)).with_state_timeout(Duration::from_millis(50));

        predictor.load_state().await;
        predictor.record_observation(obs(0, 1.0, 0.0)).await;
        predictor.record_observation(obs(60, 1.0, 1.0)).await;

        let flushed = tokio::time::timeout(Duration::from_secs(5), predictor.flush()).await;
        assert_eq!(flushed, Ok(false));
        assert!(predictor.is_dirty());
    }

    #[test]
    fn test_load_state_restores_buckets() {
        // ---
        tokio_test::block_on(async {
            let store = Arc::new(MemoryStateStore::new());
            let first = predictor(store.clone());
            first.record_observation(obs(0, -4.0, 0.0)).await;
            first.record_observation(obs(120, -4.0, 3.0)).await;
            first.flush().await;

            let second = predictor(store);
            second.load_state().await;
            let estimate = second.estimate(-4.0).await.unwrap();
            assert!((estimate.power_overall_w - 1500.0).abs() < 1e-9);
            assert!(!estimate.approximated);
        });
    }

    #[tokio::test]
    async fn test_forecast_from_cached_entries() {
        // ---
        let entries: Vec<ForecastEntry> = (0..6)
            .map(|h| ForecastEntry {
                timestamp: t0() + ChronoDuration::hours(h),
                temperature: Some(1.0),
            })
            .collect();
        let provider: Arc<dyn ForecastProvider> = Arc::new(StaticForecastProvider::new(entries));
        let predictor = Predictor::new(
            Arc::new(MemoryStateStore::new()),
            Some(provider),
            "test",
            Duration::from_secs(1),
        );

        assert_eq!(
            predictor.forecast(0, 2, t0()).await,
            Err(ForecastError::Unavailable)
        );
        assert!(predictor.refresh_forecast().await);
        assert_eq!(predictor.forecast_status().await.0, 6);

        predictor.record_observation(obs(0, 1.0, 0.0)).await;
        predictor.record_observation(obs(60, 1.0, 2.0)).await;

        let result = predictor.forecast(1, 3, t0()).await.unwrap();
        assert_eq!(result.hours.len(), 3);
        // flat forecast, flat seed: 2 kW for three hours
        assert!((result.total_energy_kwh - 6.0).abs() < 1e-9);

        assert_eq!(
            predictor.forecast(4, 3, t0()).await,
            Err(ForecastError::InsufficientWindow {
                requested: 3,
                available: 2
            })
        );

        predictor.run_scheduled(0, 2, t0()).await;
        let scheduled = predictor.last_scheduled().await.unwrap();
        assert!(scheduled.result.is_ok());
    }
}
