//! Chain Explorer Index - incremental chain indexer and dashboard statistics
//!
//! Follows a chain through a [`ChainSource`], persists hash lookups and
//! per-formulator block counts in ParityDB, and keeps rolling buffers and
//! block statistics in memory for a dashboard.
//!
//! # Architecture
//!
//! ```text
//! Chain Source (current height, block at height)
//!     ↓
//! Chain Indexer (every tick, ascending batches)
//!     ├─ Index Store (ParityDB, one transaction per batch)
//!     │   ├─ block hash → height
//!     │   ├─ tx hash → (height, index)
//!     │   ├─ formulator → block count
//!     │   └─ chain snapshot + history
//!     └─ Dashboard (after commit, under one lock)
//!         ├─ recent transactions / blocks
//!         ├─ activity samples
//!         └─ block size and latency statistics
//! ```
//!
//! # Query Flow
//!
//! ```text
//! Explorer request
//!     ↓
//! ChainExplorer
//!     ├─ latest / paginate / stats → Dashboard
//!     ├─ resolve hash / formulator count → Index Store
//!     └─ block or tx detail → Index Store location + Chain Source
//! ```

pub mod buffers;
pub mod error;
pub mod indexer;
pub mod maintenance;
pub mod mock;
pub mod query;
pub mod schema;
pub mod source;
pub mod stats;
pub mod storage;
pub mod types;

pub use buffers::{Dashboard, RollingBuffer};
pub use error::{ExplorerError, Result};
pub use indexer::{ChainIndexer, IndexerStatus, IndexerStatusSnapshot, TickReport};
pub use mock::MockChainSource;
pub use query::{BlockDetailQuery, MAX_PAGE_LENGTH};
pub use source::ChainSource;
pub use stats::{StatKind, StatsRow, StatsTable};
pub use storage::IndexStore;
pub use types::{
    ActivitySample, BlockDetail, BlockPage, BlockStatus, ChainBlock, ChainSnapshot,
    ChainTransaction, ExplorerConfig, Location, RecentBlock, RecentTransaction, Resolved,
    TransactionDetail, TransactionPage,
};

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Explorer index node
pub struct ChainExplorer<S: ChainSource> {
    config: ExplorerConfig,
    source: Arc<S>,
    store: Arc<IndexStore>,
    dashboard: Arc<RwLock<Dashboard>>,
    indexer: Arc<ChainIndexer<S>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: ChainSource> ChainExplorer<S> {
    /// Open the index store, rebuild the in-memory state and catch up once.
    ///
    /// Failing to open the store is fatal. A chain source that is down during
    /// the initial catch-up is not; the background loop retries it.
    pub async fn open(config: ExplorerConfig, source: Arc<S>) -> Result<Self> {
        config.validate()?;
        info!("Initializing chain explorer index at {}", config.db_path);

        let store = Arc::new(IndexStore::open(&config.db_path)?);
        let snapshot = store.load_snapshot()?;
        let dashboard = Arc::new(RwLock::new(Dashboard::new(
            config.recent_tx_capacity,
            config.recent_block_capacity,
            config.activity_capacity,
            config.stats_window,
            snapshot,
        )));
        let indexer = Arc::new(ChainIndexer::new(
            Arc::clone(&source),
            Arc::clone(&store),
            Arc::clone(&dashboard),
            config.clone(),
        ));

        if let Err(e) = indexer.seed_recent().await {
            warn!("Seeding recent buffers failed, filling them from catch-up: {}", e);
        }
        match indexer.tick().await {
            Ok(report) => info!(
                "Initial catch-up reached height {} of {}",
                report.indexed_height, report.target_height
            ),
            Err(e) => warn!("Initial catch-up failed, continuing in background: {}", e),
        }

        Ok(Self {
            config,
            source,
            store,
            dashboard,
            indexer,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Start the indexer and maintenance loops; calling again is a no-op
    pub fn spawn(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }
        tasks.push(tokio::spawn(
            Arc::clone(&self.indexer).run(self.cancel.child_token()),
        ));
        tasks.push(tokio::spawn(maintenance::run(
            Arc::clone(&self.store),
            self.config.clone(),
            self.cancel.child_token(),
        )));
        info!("Chain explorer background tasks started");
    }

    /// Stop background tasks and release the store.
    ///
    /// A tick in progress finishes its current batch first.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }
        info!(
            "Chain explorer stopped at height {}",
            self.dashboard.read().snapshot.indexed_height
        );
    }

    pub fn config(&self) -> &ExplorerConfig {
        &self.config
    }

    /// Run one indexer tick outside the background loop
    pub async fn tick(&self) -> Result<TickReport> {
        self.indexer.tick().await
    }

    pub fn status(&self) -> IndexerStatusSnapshot {
        self.indexer.status().snapshot()
    }

    /// Latest blocks, `latest_limit` of them when `n` is `None`
    pub fn latest_blocks(&self, n: Option<usize>) -> Vec<RecentBlock> {
        query::latest_blocks(&self.dashboard, n.unwrap_or(self.config.latest_limit))
    }

    /// Latest transactions, `latest_limit` of them when `n` is `None`
    pub fn latest_transactions(&self, n: Option<usize>) -> Vec<RecentTransaction> {
        query::latest_transactions(&self.dashboard, n.unwrap_or(self.config.latest_limit))
    }

    pub async fn paginate_blocks(&self, offset: u64, length: usize) -> Result<BlockPage> {
        debug!("Paginating blocks at offset {} length {}", offset, length);
        query::paginate_blocks(&self.dashboard, self.source.as_ref(), offset, length).await
    }

    pub fn paginate_transactions(&self, offset: usize, length: usize) -> TransactionPage {
        query::paginate_transactions(&self.dashboard, offset, length)
    }

    /// Resolve a hex hash to a block or transaction location
    pub fn resolve_hash(&self, hash: &str) -> Result<Resolved> {
        debug!("Resolving hash: {}", hash);
        query::resolve_hash(&self.store, hash)
    }

    pub fn formulator_block_count(&self, address: &str) -> Result<u64> {
        query::formulator_block_count(&self.store, address)
    }

    pub fn stats_table(&self) -> StatsTable {
        query::stats_table(&self.dashboard)
    }

    pub fn chain_info(&self) -> ChainSnapshot {
        query::chain_info(&self.dashboard)
    }

    pub fn activity_samples(&self) -> Vec<ActivitySample> {
        query::activity_samples(&self.dashboard)
    }

    pub async fn block_detail(&self, selector: BlockDetailQuery) -> Result<BlockDetail> {
        query::block_detail(&self.store, self.source.as_ref(), selector).await
    }

    pub async fn transaction_detail(&self, hash: &str) -> Result<TransactionDetail> {
        query::transaction_detail(&self.store, self.source.as_ref(), hash).await
    }
}
