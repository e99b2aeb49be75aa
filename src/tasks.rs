//! Background loops: debounced saving, forecast refresh, sensor polling
//! and the daily scheduled projection.
//!
//! Every loop runs until the shared shutdown signal flips; [`stop`] then
//! waits for them and performs the final flush.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::buckets::Attribution;
use crate::config::ScheduleSpec;
use crate::predictor::Predictor;
use crate::sensors::SensorPoller;

// ---

/// Save the bucket table every `period` when it changed.
pub fn spawn_saver(
    predictor: Arc<Predictor>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    // ---
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    predictor.flush().await;
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!("Saver stopped");
    })
}

/// Refresh the forecast cache immediately and then every `period`.
pub fn spawn_forecast_refresher(
    predictor: Arc<Predictor>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    // ---
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    predictor.refresh_forecast().await;
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!("Forecast refresher stopped");
    })
}

/// Poll the sensor snapshot endpoint every `period`.
pub fn spawn_sensor_poller(
    predictor: Arc<Predictor>,
    poller: SensorPoller,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    // ---
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match poller.poll().await {
                        Ok(observation) => {
                            let outcome = predictor.record_observation(observation).await;
                            if let Attribution::Attributed { bucket, seconds, energy_kwh } = outcome {
                                tracing::debug!(
                                    "Poll attributed {:.0} s / {:.3} kWh to {}°C",
                                    seconds,
                                    energy_kwh,
                                    bucket
                                );
                            }
                        }
                        Err(e) => tracing::warn!("Dropping sensor poll: {:#}", e),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!("Sensor poller stopped");
    })
}

/// Run the scheduled projection once a day at the configured UTC time.
pub fn spawn_scheduled_forecast(
    predictor: Arc<Predictor>,
    spec: ScheduleSpec,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    // ---
    tokio::spawn(async move {
        // First result is available right away rather than after a day, and
        // is computed against a fetched forecast, not the empty cache.
        if predictor.forecast_status().await.0 == 0 {
            predictor.refresh_forecast().await;
        }
        predictor
            .run_scheduled(spec.starting_hour, spec.hours_ahead, Utc::now())
            .await;

        loop {
            let now = Utc::now();
            let wait = (next_run(now, &spec) - now)
                .to_std()
                .unwrap_or(Duration::from_secs(1));
            tracing::debug!("Next scheduled forecast in {:?}", wait);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    predictor
                        .run_scheduled(spec.starting_hour, spec.hours_ahead, Utc::now())
                        .await;
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!("Scheduled forecast stopped");
    })
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    // ---
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}

/// Stop the background loops, wait for them, then save whatever the last
/// debounce window still holds. Returns whether the final save succeeded.
pub async fn stop(
    predictor: &Predictor,
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
) -> bool {
    // ---
    tracing::info!("Shutting down background tasks");
    shutdown.send(true).ok();
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::warn!("Background task ended abnormally: {}", e);
        }
    }

    predictor.flush().await
}

/// Next occurrence of the schedule's time of day strictly after `now`.
pub fn next_run(now: DateTime<Utc>, spec: &ScheduleSpec) -> DateTime<Utc> {
    // ---
    let time = NaiveTime::from_hms_opt(spec.hour, spec.minute, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date_naive().and_time(time).and_utc();
    if today > now {
        today
    } else {
        today
            .checked_add_days(Days::new(1))
            .unwrap_or(today + chrono::Duration::days(1))
    }
}
