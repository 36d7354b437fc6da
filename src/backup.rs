//! Periodic store snapshots.
//!
//! On a production configuration the SQLite store is snapshotted to the
//! backup directory shortly after startup and on a fixed interval, retaining
//! the most recent few files. Snapshots use `VACUUM INTO`, which produces a
//! consistent copy without blocking writers.

use crate::db::{Database, DbError};
use std::path::Path;
use tokio::sync::broadcast;
use tracing::{info, warn};

const SNAPSHOT_PREFIX: &str = "glimpse-";
const SNAPSHOT_SUFFIX: &str = ".db";

/// Write one snapshot and prune old ones down to `retain`.
pub async fn snapshot_once(db: &Database, directory: &str, retain: usize) -> Result<(), DbError> {
    if let Err(e) = std::fs::create_dir_all(directory) {
        warn!(directory = %directory, error = %e, "failed to create backup directory");
        return Ok(());
    }

    let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
    let filename = format!("{SNAPSHOT_PREFIX}{stamp}{SNAPSHOT_SUFFIX}");
    let path = Path::new(directory).join(&filename);
    let path_str = path.to_string_lossy().replace('\'', "''");

    sqlx::query(&format!("VACUUM INTO '{path_str}'"))
        .execute(db.pool())
        .await?;
    crate::metrics::BACKUPS.inc();
    info!(path = %path.display(), "store snapshot written");

    prune(directory, retain);
    Ok(())
}

/// Delete snapshots beyond the newest `retain`. Timestamped names sort
/// chronologically, so a lexicographic sort suffices.
fn prune(directory: &str, retain: usize) {
    let Ok(entries) = std::fs::read_dir(directory) else {
        return;
    };
    let mut snapshots: Vec<_> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            (name.starts_with(SNAPSHOT_PREFIX) && name.ends_with(SNAPSHOT_SUFFIX))
                .then_some((name, entry.path()))
        })
        .collect();
    snapshots.sort_by(|a, b| a.0.cmp(&b.0));

    while snapshots.len() > retain {
        let (name, path) = snapshots.remove(0);
        match std::fs::remove_file(&path) {
            Ok(()) => info!(snapshot = %name, "old snapshot pruned"),
            Err(e) => warn!(snapshot = %name, error = %e, "failed to prune snapshot"),
        }
    }
}

/// The backup task: first snapshot after a short startup delay, then on the
/// configured interval until shutdown. Failures are logged and retried on
/// the next tick.
pub async fn run(
    db: Database,
    config: crate::config::BackupConfig,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    tokio::select! {
        _ = tokio::time::sleep(std::time::Duration::from_secs(config.startup_delay_secs)) => {}
        _ = shutdown_rx.recv() => return,
    }

    if let Err(e) = snapshot_once(&db, &config.directory, config.retain).await {
        warn!(error = %e, "startup snapshot failed");
    }

    let mut interval = tokio::time::interval(std::time::Duration::from_secs(
        config.interval_hours * 3600,
    ));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await; // the immediate first tick; the startup snapshot covered it

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = snapshot_once(&db, &config.directory, config.retain).await {
                    warn!(error = %e, "periodic snapshot failed");
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }
}
