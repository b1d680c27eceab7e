//! Periodic index store maintenance
//!
//! Prunes snapshot history older than the retention window. Each pass deletes
//! at most `gc_chunk` versions in one short store transaction so it never
//! holds the writer lock for long; passes repeat while work remains, up to
//! `gc_max_passes`, and stop at the first failure.

use crate::error::Result;
use crate::storage::IndexStore;
use crate::types::ExplorerConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one maintenance run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub passes: usize,
    /// Obsolete versions were left for the next run
    pub more_remaining: bool,
}

/// Prune until no obsolete versions remain or the pass budget runs out
pub fn run_maintenance_pass(store: &IndexStore, config: &ExplorerConfig) -> Result<MaintenanceReport> {
    let mut report = MaintenanceReport::default();
    while report.passes < config.gc_max_passes {
        report.passes += 1;
        report.more_remaining =
            store.prune_snapshot_history(config.snapshot_retention, config.gc_chunk)?;
        if !report.more_remaining {
            break;
        }
    }
    debug!(
        "Maintenance finished after {} passes (more remaining: {})",
        report.passes, report.more_remaining
    );
    Ok(report)
}

/// Run maintenance every `gc_interval_secs` until cancelled
pub async fn run(store: Arc<IndexStore>, config: ExplorerConfig, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(config.gc_interval_secs));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await;

    info!("Store maintenance running every {}s", config.gc_interval_secs);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Store maintenance stopped");
                return;
            }
            _ = interval.tick() => {
                let store = Arc::clone(&store);
                let pass_config = config.clone();
                let outcome = tokio::task::spawn_blocking(move || {
                    run_maintenance_pass(&store, &pass_config)
                })
                .await;
                match outcome {
                    Ok(Ok(report)) if report.more_remaining => {
                        info!("Snapshot pruning paused after {} passes", report.passes)
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!("Store maintenance failed: {}", e),
                    Err(e) => warn!("Store maintenance task panicked: {}", e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChainSnapshot;

    fn store_with_versions(count: u64) -> (tempfile::TempDir, IndexStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::open(dir.path()).unwrap();
        for height in 1..=count {
            let snapshot = ChainSnapshot {
                indexed_height: height,
                ..Default::default()
            };
            store.transaction(|txn| txn.put_snapshot(&snapshot)).unwrap();
        }
        (dir, store)
    }

    #[test]
    fn prunes_in_bounded_passes() {
        let (_dir, store) = store_with_versions(30);
        let config = ExplorerConfig {
            snapshot_retention: 5,
            gc_chunk: 4,
            gc_max_passes: 3,
            ..Default::default()
        };

        // 25 obsolete versions, 12 per run.
        let report = run_maintenance_pass(&store, &config).unwrap();
        assert_eq!(report, MaintenanceReport { passes: 3, more_remaining: true });
        assert_eq!(store.snapshot_versions().unwrap(), (12, 30));

        run_maintenance_pass(&store, &config).unwrap();
        let report = run_maintenance_pass(&store, &config).unwrap();
        assert!(!report.more_remaining);
        assert_eq!(store.snapshot_versions().unwrap(), (25, 30));
        assert_eq!(store.load_snapshot().unwrap().indexed_height, 30);
    }

    #[test]
    fn stops_at_first_failure() {
        let (_dir, store) = store_with_versions(10);
        let config = ExplorerConfig {
            snapshot_retention: 2,
            gc_chunk: 2,
            ..Default::default()
        };
        store.inject_commit_failures(1);

        assert!(run_maintenance_pass(&store, &config).is_err());
        assert_eq!(store.snapshot_versions().unwrap(), (0, 10));
    }

    #[tokio::test]
    async fn loop_exits_on_cancel() {
        let (_dir, store) = store_with_versions(1);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(
            Arc::new(store),
            ExplorerConfig::default(),
            cancel.clone(),
        ));
        cancel.cancel();
        handle.await.unwrap();
    }
}
