//! wifi-locator - WiFi-assisted geolocation for LoRaWAN devices
//!
//! Receives TTN uplinks (webhook, optionally MQTT) carrying WiFi access point
//! scans, resolves them against a surveyed access point database and keeps a
//! bounded history of position estimates.
//!
//! Module structure:
//! - `domain/` - Core types (observations, estimates, MAC canonicalization)
//! - `io/` - External interfaces (HTTP, MQTT, SQLite repository, importer)
//! - `services/` - Decoder, estimator, history, pipeline
//! - `infra/` - Config, Metrics

use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use wifi_locator::infra::{Config, LogFormat, Metrics};
use wifi_locator::io::{AccessPointRepository, SqliteRepository};
use wifi_locator::services::{HistoryBuffer, IngestionPipeline};

/// WiFi-assisted LoRaWAN geolocation service
#[derive(Parser, Debug)]
#[command(name = "wifi-locator", version, about)]
struct Args {
    /// Path to TOML configuration file (default: $CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

fn init_tracing(format: LogFormat) {
    // Default: INFO, use RUST_LOG=debug for per-uplink events
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(Config::default_config_path);

    // Logging format lives in the config, so load it before installing the subscriber
    let loaded = Config::from_file(&config_path);
    init_tracing(loaded.as_ref().map(Config::log_format).unwrap_or(LogFormat::Text));

    info!(version = env!("CARGO_PKG_VERSION"), git_hash = env!("GIT_HASH"), "wifi-locator starting");

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %format!("{e:#}"), path = %config_path, "config_fallback_to_defaults");
            Config::default()
        }
    };

    info!(
        config_file = %config.config_file(),
        bind_address = %config.bind_address(),
        http_port = %config.http_port(),
        database = %config.database(),
        history_capacity = %config.history_capacity(),
        mqtt_enabled = %config.mqtt_enabled(),
        mqtt_topic = %config.mqtt_topic(),
        "config_loaded"
    );

    let repository = SqliteRepository::open(config.database(), config.max_idle_connections())
        .map_err(|e| format!("cannot open access point database {}: {e}", config.database()))?;
    let repository: Arc<dyn AccessPointRepository> = Arc::new(repository);

    let metrics = Arc::new(Metrics::new());
    let history = Arc::new(HistoryBuffer::new(config.history_capacity()));
    let pipeline = IngestionPipeline::new(repository, history, metrics.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // HTTP server (webhook, history, health, metrics)
    let ip: IpAddr = config
        .bind_address()
        .parse()
        .map_err(|e| format!("invalid bind_address {}: {e}", config.bind_address()))?;
    let addr = SocketAddr::new(ip, config.http_port());
    let http_pipeline = pipeline.clone();
    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) =
            wifi_locator::io::http::start_http_server(addr, http_pipeline, http_shutdown).await
        {
            error!(error = %e, "http_server_error");
        }
    });

    // Optional MQTT subscriber
    if config.mqtt_enabled() {
        let mqtt_config = config.clone();
        let mqtt_pipeline = pipeline.clone();
        let mqtt_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = wifi_locator::io::mqtt::start_mqtt_client(
                &mqtt_config,
                mqtt_pipeline,
                mqtt_shutdown,
            )
            .await
            {
                error!(error = %e, "mqtt_client_error");
            }
        });
    }

    // Periodic metrics summary
    let metrics_interval = config.metrics_interval_secs();
    let mut reporter_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => metrics.report().log(),
                _ = reporter_shutdown.changed() => {
                    if *reporter_shutdown.borrow() {
                        metrics.report().log();
                        return;
                    }
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    if let Err(e) = http_task.await {
        error!(error = %e, "http_task_join_failed");
    }

    info!("wifi-locator shutdown complete");
    Ok(())
}
