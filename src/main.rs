//! glimpsed - Glimpse Presence Broker.
//!
//! Startup sequence: config, tracing, validation, store, broker, background
//! tasks, gateway.

use glimpsed::config::Config;
use glimpsed::db::Database;
use glimpsed::identity::HttpIdentityProvider;
use glimpsed::network::Gateway;
use glimpsed::state::{Broker, BrokerParams};
use glimpsed::{backup, config, fanout, http, metrics};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

/// Resolve the configuration path from CLI arguments.
/// Supports `-c <path>`, `--config <path>`, or a bare path.
/// Falls back to `config.toml` when no argument is provided.
fn resolve_config_path() -> String {
    let mut args = std::env::args().skip(1);

    let raw_path = match args.next() {
        Some(flag) if flag == "-c" || flag == "--config" => args.next().unwrap_or_else(|| {
            eprintln!("Missing path after {}", flag);
            std::process::exit(1);
        }),
        Some(path) => path,
        None => "config.toml".to_string(),
    };

    match std::fs::canonicalize(Path::new(&raw_path)) {
        Ok(p) => p.to_string_lossy().into_owned(),
        Err(_) => raw_path,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first (before tracing, so we can use log_format)
    let config_path = resolve_config_path();

    let config = Config::load(&config_path).map_err(|e| {
        eprintln!("ERROR: Failed to load config from {}: {}", config_path, e);
        e
    })?;

    // Initialize tracing based on config
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match config.server.log_format {
        config::LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .json()
                .init();
        }
        config::LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .init();
        }
    }

    // Validate configuration
    if let Err(errors) = config::validate(&config) {
        for err in &errors {
            error!(error = %err, "Configuration validation failed");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    info!(
        server = %config.server.name,
        fanout_mode = ?config.fanout.mode,
        "Starting glimpsed"
    );

    // Initialize database
    let db_path = config
        .database
        .as_ref()
        .map(|d| d.path.as_str())
        .unwrap_or("glimpse.db");
    let db = Database::new(db_path).await?;

    // Identity provider client
    let identity = Arc::new(HttpIdentityProvider::new(
        &config.identity.base_url,
        config.identity.timeout_secs,
    )?);

    // Create the Broker (shared state)
    let config = Arc::new(config);
    let broker = Broker::new(BrokerParams {
        config: Arc::clone(&config),
        db: db.clone(),
        identity,
    });
    info!("Broker initialized");

    // Spawn signal handler for graceful shutdown
    {
        let shutdown_tx = broker.lifecycle.shutdown_tx.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
            let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

            tokio::select! {
                _ = sigint.recv() => info!("Received SIGINT - initiating graceful shutdown"),
                _ = sigterm.recv() => info!("Received SIGTERM - initiating graceful shutdown"),
            }

            let _ = shutdown_tx.send(());
        });
    }

    // Start the debounced fan-out task
    {
        let broker = Arc::clone(&broker);
        tokio::spawn(async move {
            fanout::run(broker).await;
        });
    }
    info!("Fan-out task started");

    // Start heartbeat sweep task
    {
        let broker = Arc::clone(&broker);
        let interval_secs = config.heartbeat.interval_secs;
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut shutdown_rx = broker.lifecycle.subscribe();
            // The immediate first tick would ping sessions that just arrived.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        broker.heartbeat_sweep().await;
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });
    }
    info!("Heartbeat sweep task started");

    // Start coalesced last-seen flush task (runs every flush interval, with a
    // final flush on shutdown)
    {
        let broker = Arc::clone(&broker);
        let flush_secs = config.heartbeat.last_seen_flush_secs;
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(flush_secs));
            let mut shutdown_rx = broker.lifecycle.subscribe();
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        broker.flush_last_seen().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Last-seen flush task stopping");
                        broker.flush_last_seen().await;
                        break;
                    }
                }
            }
        });
    }
    info!("Last-seen flush task started");

    // Start cache pruning task (presence TTL expiry drives go-offline events,
    // so this ticks much faster than the TTLs themselves)
    {
        let broker = Arc::clone(&broker);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(10));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut shutdown_rx = broker.lifecycle.subscribe();
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        broker.prune_caches();
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });
    }
    info!("Cache pruning task started");

    // Start the backup task on production configurations
    if config.backup.enabled {
        let db = db.clone();
        let backup_config = config.backup.clone();
        let shutdown_rx = broker.lifecycle.subscribe();
        tokio::spawn(async move {
            backup::run(db, backup_config, shutdown_rx).await;
        });
        info!(
            directory = %config.backup.directory,
            interval_hours = config.backup.interval_hours,
            "Backup task started"
        );
    }

    // Prometheus metrics are optional.
    // Convention: metrics_port = 0 disables the HTTP endpoint (used by tests).
    let metrics_port = config.server.metrics_port.unwrap_or(9090);
    if metrics_port == 0 {
        info!("Metrics disabled");
    } else {
        metrics::init();
        info!("Metrics initialized");

        tokio::spawn(async move {
            http::run_http_server(metrics_port).await;
        });
        info!(port = metrics_port, "Prometheus HTTP server started");
    }

    // Start the Gateway
    let gateway = Gateway::bind(config.listen.address, Arc::clone(&broker)).await?;
    gateway.run().await?;

    info!("Gateway stopped, waiting for tasks to finish...");
    // Give tasks a moment to flush buffers and close connections
    tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;

    Ok(())
}
