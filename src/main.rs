//! Application entry point for the `heatpump-predictor` service.
//!
//! This binary orchestrates the full startup sequence, including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Establishing a PostgreSQL connection pool and creating the state table
//! - Restoring the bucket table from the persisted blob
//! - Starting the background loops (debounced saver, forecast refresh,
//!   sensor polling, scheduled forecast)
//! - Binding the Axum HTTP server and serving requests until Ctrl-C or SIGTERM
//! - Flushing unsaved bucket data on the way out
//!
//! # Environment Variables
//! - `DATABASE_URL` (**required**) – PostgreSQL connection string
//! - `PREDICTOR_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `PREDICTOR_SPAN_EVENTS` (optional) – span event mode for tracing
//! - see `config.rs` for the remaining settings
use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use heatpump_predictor::persistence::{PgStateStore, StateStore};
use heatpump_predictor::provider::{ForecastProvider, HttpForecastProvider};
use heatpump_predictor::sensors::SensorPoller;
use heatpump_predictor::{config, routes, schema, tasks, Predictor};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    tracing::info!("Attempting to connect to database");

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.db_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;

    let store: Arc<dyn StateStore> = Arc::new(PgStateStore::new(pool.clone()));
    let provider = cfg
        .forecast_api_url
        .as_deref()
        .map(|url| Arc::new(HttpForecastProvider::new(url)) as Arc<dyn ForecastProvider>);
    if provider.is_none() {
        tracing::warn!("FORECAST_API_URL not set; forecast queries will report unavailable");
    }

    let predictor = Predictor::new(
        store,
        provider.clone(),
        cfg.state_key.clone(),
        Duration::from_secs(cfg.forecast_timeout_secs.into()),
    )
    .with_state_timeout(Duration::from_secs(cfg.state_timeout_secs.into()));
    let predictor = Arc::new(predictor);
    predictor.load_state().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = vec![tasks::spawn_saver(
        predictor.clone(),
        Duration::from_secs(cfg.save_debounce_secs.into()),
        shutdown_rx.clone(),
    )];

    if provider.is_some() {
        handles.push(tasks::spawn_forecast_refresher(
            predictor.clone(),
            Duration::from_secs(cfg.forecast_refresh_secs.into()),
            shutdown_rx.clone(),
        ));
    }

    if let Some(url) = &cfg.sensor_poll_url {
        handles.push(tasks::spawn_sensor_poller(
            predictor.clone(),
            SensorPoller::new(url.clone()),
            Duration::from_secs(cfg.sensor_poll_secs.into()),
            shutdown_rx.clone(),
        ));
    }

    if let Some(spec) = cfg.scheduled_forecast {
        handles.push(tasks::spawn_scheduled_forecast(
            predictor.clone(),
            spec,
            shutdown_rx.clone(),
        ));
    }

    // Build app from routes gateway (EMBP)
    let app = routes::router(predictor.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.listen_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(tasks::shutdown_signal())
        .await?;

    if tasks::stop(&predictor, shutdown_tx, handles).await {
        tracing::info!("Saved heat pump data to storage");
    }

    Ok(())
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `PREDICTOR_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `PREDICTOR_LOG_LEVEL` env var
///
/// This should be called once at application startup before any logging
/// or tracing macros are invoked.
fn init_tracing() {
    // ---
    let span_events = match env::var("PREDICTOR_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to PREDICTOR_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("PREDICTOR_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
