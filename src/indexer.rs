//! Chain indexer
//!
//! Advances the index store from the last indexed height to the chain
//! source's current height. Heights are processed in ascending batches; each
//! batch is one store transaction carrying the location entries, the
//! formulator counters and the updated snapshot, so the persisted
//! `indexed_height` never runs ahead of the entries it covers. Buffers and
//! statistics are updated only after the batch commits.
//!
//! A height whose block cannot be fetched ends the tick; it is retried on the
//! next tick and nothing above it is indexed in the meantime.

use crate::buffers::{Dashboard, DashboardUpdate};
use crate::error::{ExplorerError, Result};
use crate::source::ChainSource;
use crate::stats::BlockSample;
use crate::storage::{IndexStore, StoreTxn};
use crate::types::{
    ActivitySample, ChainBlock, ChainSnapshot, ExplorerConfig, RecentBlock, RecentTransaction,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counters describing the indexer's health
#[derive(Debug, Default)]
pub struct IndexerStatus {
    ticks: AtomicU64,
    blocks_indexed: AtomicU64,
    store_failures: AtomicU64,
    consecutive_failures: AtomicU64,
    fetch_skips: AtomicU64,
    last_error: Mutex<Option<String>>,
}

/// Point-in-time copy of [`IndexerStatus`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerStatusSnapshot {
    pub ticks: u64,
    pub blocks_indexed: u64,
    /// Never decreases
    pub store_failures: u64,
    pub consecutive_failures: u64,
    pub fetch_skips: u64,
    pub last_error: Option<String>,
}

impl IndexerStatus {
    pub fn snapshot(&self) -> IndexerStatusSnapshot {
        IndexerStatusSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            blocks_indexed: self.blocks_indexed.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            fetch_skips: self.fetch_skips.load(Ordering::Relaxed),
            last_error: self.last_error.lock().clone(),
        }
    }

    fn record_commit(&self, blocks: u64) {
        self.blocks_indexed.fetch_add(blocks, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    fn record_store_failure(&self, err: &ExplorerError, threshold: u64) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
        let consecutive = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        *self.last_error.lock() = Some(err.to_string());
        if consecutive >= threshold {
            error!(
                "Index store failed {} ticks in a row, indexing is stalled: {}",
                consecutive, err
            );
        } else {
            warn!("Index store transaction failed, retrying next tick: {}", err);
        }
    }

    fn record_fetch_skip(&self, height: u64, err: &ExplorerError) {
        self.fetch_skips.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(err.to_string());
        warn!("Skipping block {} until next tick: {}", height, err);
    }
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Chain height observed at the start of the tick
    pub target_height: u64,
    pub indexed_height: u64,
    pub blocks: u64,
    pub transactions: u64,
    /// First height that could not be fetched
    pub stalled_at: Option<u64>,
    pub store_failed: bool,
}

impl TickReport {
    pub fn caught_up(&self) -> bool {
        self.indexed_height >= self.target_height
    }
}

/// Incremental indexer over a [`ChainSource`]
pub struct ChainIndexer<S: ChainSource> {
    source: Arc<S>,
    store: Arc<IndexStore>,
    dashboard: Arc<RwLock<Dashboard>>,
    status: Arc<IndexerStatus>,
    config: ExplorerConfig,
    /// Chain height the recent buffers were seeded from
    seeded_head: AtomicU64,
    tick_lock: tokio::sync::Mutex<()>,
}

impl<S: ChainSource> ChainIndexer<S> {
    pub fn new(
        source: Arc<S>,
        store: Arc<IndexStore>,
        dashboard: Arc<RwLock<Dashboard>>,
        config: ExplorerConfig,
    ) -> Self {
        Self {
            source,
            store,
            dashboard,
            status: Arc::new(IndexerStatus::default()),
            config,
            seeded_head: AtomicU64::new(0),
            tick_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn status(&self) -> Arc<IndexerStatus> {
        Arc::clone(&self.status)
    }

    /// Fill the recent buffers by scanning backward from the chain tip.
    ///
    /// Stops once the buffers are full or genesis is reached. The tip becomes
    /// the seeded head: catch-up below it still writes the index but leaves
    /// the buffers alone, so nothing is buffered twice.
    pub async fn seed_recent(&self) -> Result<()> {
        let start = self.source.current_height().await?;
        let (tx_capacity, block_capacity) = {
            let dashboard = self.dashboard.read();
            (
                dashboard.recent_transactions.capacity(),
                dashboard.recent_blocks.capacity(),
            )
        };

        let mut transactions = Vec::new();
        let mut blocks = Vec::new();
        let mut height = start;
        while height > 0 && (transactions.len() < tx_capacity || blocks.len() < block_capacity) {
            match self.source.block_at(height).await {
                Ok(Some(block)) => {
                    if blocks.len() < block_capacity {
                        blocks.push(RecentBlock::from(&block));
                    }
                    for tx in &block.transactions {
                        if transactions.len() >= tx_capacity {
                            break;
                        }
                        transactions.push(self.recent_transaction(&block, tx));
                    }
                }
                Ok(None) => warn!("Block {} missing from chain source", height),
                Err(e) => warn!("Cannot seed from block {}: {}", height, e),
            }
            height -= 1;
        }

        let mut dashboard = self.dashboard.write();
        for tx in transactions {
            dashboard.recent_transactions.push_oldest(tx);
        }
        for block in blocks {
            dashboard.recent_blocks.push_oldest(block);
        }
        self.seeded_head.store(start, Ordering::Relaxed);
        info!(
            "Seeded {} recent transactions and {} recent blocks from height {}",
            dashboard.recent_transactions.len(),
            dashboard.recent_blocks.len(),
            start
        );
        Ok(())
    }

    /// Run one catch-up pass
    pub async fn tick(&self) -> Result<TickReport> {
        let _guard = self.tick_lock.lock().await;
        self.status.ticks.fetch_add(1, Ordering::Relaxed);

        let target = self.source.current_height().await?;
        let mut snapshot = self.dashboard.read().snapshot;
        match self.source.formulator_candidate_count().await {
            Ok(count) => snapshot.formulator_count = count,
            Err(e) => debug!("Keeping formulator count {}: {}", snapshot.formulator_count, e),
        }

        let mut report = TickReport {
            target_height: target,
            indexed_height: snapshot.indexed_height,
            ..Default::default()
        };
        if snapshot.indexed_height >= target {
            self.dashboard.write().snapshot.formulator_count = snapshot.formulator_count;
            return Ok(report);
        }

        let limit = target.min(
            snapshot
                .indexed_height
                .saturating_add(self.config.max_heights_per_tick),
        );
        let mut newest_timestamp = 0;
        let mut next = snapshot.indexed_height + 1;
        // The newest batch's update is held back so the tick's activity
        // sample lands under the same lock as its snapshot.
        let mut pending: Option<DashboardUpdate> = None;

        while next <= limit {
            let end = limit.min(next.saturating_add(self.config.batch_size - 1));
            let (fetched, stalled_at) = self.fetch_batch(next, end).await;
            if fetched.is_empty() {
                report.stalled_at = stalled_at;
                break;
            }

            let batch = Arc::new(fetched);
            let batch_txs: u64 = batch.iter().map(|b| b.tx_count() as u64).sum();
            let (last_height, last_timestamp) = match batch.last() {
                Some(block) => (block.height, block.timestamp),
                None => break,
            };
            let committed = ChainSnapshot {
                indexed_height: last_height,
                cumulative_transactions: snapshot.cumulative_transactions + batch_txs,
                formulator_count: snapshot.formulator_count,
                max_activity_per_tick: snapshot
                    .max_activity_per_tick
                    .max(report.transactions + batch_txs),
            };

            if let Err(e) = self.commit_batch(Arc::clone(&batch), committed).await {
                self.status
                    .record_store_failure(&e, self.config.failure_alert_threshold);
                report.store_failed = true;
                break;
            }
            self.status.record_commit(batch.len() as u64);
            debug!(
                "Indexed heights {}..={} ({} transactions)",
                next, last_height, batch_txs
            );

            snapshot = committed;
            report.blocks += batch.len() as u64;
            report.transactions += batch_txs;
            report.indexed_height = last_height;
            newest_timestamp = last_timestamp;

            let update = self.derive_update(&batch, snapshot);
            if let Some(previous) = pending.replace(update) {
                self.dashboard.write().apply(previous);
            }

            if stalled_at.is_some() {
                report.stalled_at = stalled_at;
                break;
            }
            next = last_height + 1;
        }

        if let Some(mut update) = pending {
            update.activity = Some(ActivitySample {
                timestamp: newest_timestamp,
                count: report.transactions,
            });
            self.dashboard.write().apply(update);
        }
        Ok(report)
    }

    /// Write one batch and its snapshot as a single store transaction, off
    /// the async worker threads
    async fn commit_batch(&self, batch: Arc<Vec<ChainBlock>>, snapshot: ChainSnapshot) -> Result<()> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            store.transaction(|txn| {
                for block in batch.iter() {
                    write_block(txn, block)?;
                }
                txn.put_snapshot(&snapshot)
            })
        })
        .await
        .map_err(|e| ExplorerError::StoreUnavailable(format!("commit task failed: {}", e)))?
    }

    /// Fetch heights `start..=end` in order, stopping at the first one that
    /// is unavailable
    async fn fetch_batch(&self, start: u64, end: u64) -> (Vec<ChainBlock>, Option<u64>) {
        let mut fetched = Vec::new();
        for height in start..=end {
            match self.source.block_at(height).await {
                Ok(Some(block)) if block.height == height => fetched.push(block),
                Ok(Some(block)) => {
                    let err = ExplorerError::InconsistentState(format!(
                        "chain source returned block {} for height {}",
                        block.height, height
                    ));
                    self.status.record_fetch_skip(height, &err);
                    return (fetched, Some(height));
                }
                Ok(None) => {
                    debug!("Block {} not available yet", height);
                    return (fetched, Some(height));
                }
                Err(e) => {
                    self.status.record_fetch_skip(height, &e);
                    return (fetched, Some(height));
                }
            }
        }
        (fetched, None)
    }

    /// Buffer entries skip heights the seeding pass already covered
    fn derive_update(&self, blocks: &[ChainBlock], snapshot: ChainSnapshot) -> DashboardUpdate {
        let mut update = DashboardUpdate {
            snapshot: Some(snapshot),
            ..Default::default()
        };
        let seeded_head = self.seeded_head.load(Ordering::Relaxed);
        for block in blocks.iter().rev().filter(|b| b.height > seeded_head) {
            update.blocks.push(RecentBlock::from(block));
            for tx in &block.transactions {
                update.transactions.push(self.recent_transaction(block, tx));
            }
        }
        update.samples = blocks.iter().map(BlockSample::from).collect();
        update
    }

    fn recent_transaction(
        &self,
        block: &ChainBlock,
        tx: &crate::types::ChainTransaction,
    ) -> RecentTransaction {
        let name = self
            .source
            .transaction_type_name(tx.tx_type)
            .unwrap_or_else(|| format!("Unknown({})", tx.tx_type));
        RecentTransaction::from_block(block, tx, name)
    }

    /// Tick until caught up with the height observed at the start, or until a
    /// tick makes no progress
    pub async fn catch_up(&self) -> Result<TickReport> {
        loop {
            let report = self.tick().await?;
            if report.caught_up() || report.blocks == 0 {
                return Ok(report);
            }
        }
    }

    /// Tick on a fixed period until cancelled.
    ///
    /// Cancellation is only observed between ticks, so an in-flight store
    /// transaction always completes or aborts on its own.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; construction already ran one.
        interval.tick().await;

        info!(
            "Indexer running every {}ms",
            self.config.tick_interval_ms
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Indexer stopped");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!("Indexer tick failed: {}", e);
                    }
                }
            }
        }
    }
}

/// Location entries and formulator counter for one block.
///
/// Writing a block that is already indexed at the same height leaves the
/// store unchanged.
fn write_block(txn: &mut StoreTxn<'_>, block: &ChainBlock) -> Result<()> {
    let fresh = txn.put_block_location(&block.hash, block.height)?;
    for (index, tx) in block.transactions.iter().enumerate() {
        txn.put_tx_location(&tx.hash, block.height, index as u32);
    }
    if fresh {
        txn.increment_formulator(&block.formulator)?;
    }
    Ok(())
}
