//! Explorer query operations
//!
//! Dashboard reads are served from memory. Hash lookups go to the index store
//! and detail views re-derive the record from the chain source using the
//! stored location.

use crate::buffers::Dashboard;
use crate::error::{ExplorerError, Result};
use crate::source::ChainSource;
use crate::stats::StatsTable;
use crate::storage::IndexStore;
use crate::types::{
    parse_hash, ActivitySample, BlockDetail, BlockPage, ChainBlock, ChainSnapshot, Location,
    RecentBlock, RecentTransaction, Resolved, TransactionDetail, TransactionPage,
};
use parking_lot::RwLock;
use tracing::{debug, warn};

/// Largest block page served in one call
pub const MAX_PAGE_LENGTH: usize = 100;

/// Block selector for [`block_detail`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockDetailQuery {
    Height(u64),
    Hash(String),
}

/// Up to `n` most recent blocks, newest first
pub fn latest_blocks(dashboard: &RwLock<Dashboard>, n: usize) -> Vec<RecentBlock> {
    dashboard.read().recent_blocks.latest(n)
}

/// Up to `n` most recent transactions, newest first
pub fn latest_transactions(dashboard: &RwLock<Dashboard>, n: usize) -> Vec<RecentTransaction> {
    dashboard.read().recent_transactions.latest(n)
}

/// Slice of the recent-transaction buffer; out-of-range offsets give an empty page
pub fn paginate_transactions(
    dashboard: &RwLock<Dashboard>,
    offset: usize,
    length: usize,
) -> TransactionPage {
    let dashboard = dashboard.read();
    TransactionPage {
        total: dashboard.recent_transactions.len(),
        items: dashboard.recent_transactions.page(offset, length),
    }
}

/// Blocks at heights `current - offset` downward, at most `length` of them
/// and never more than [`MAX_PAGE_LENGTH`].
///
/// Heights still held by the recent-block buffer are served from it; older
/// ones are fetched from the chain source. Heights the source cannot provide
/// are left out of the page.
pub async fn paginate_blocks<S: ChainSource + ?Sized>(
    dashboard: &RwLock<Dashboard>,
    source: &S,
    offset: u64,
    length: usize,
) -> Result<BlockPage> {
    let length = length.min(MAX_PAGE_LENGTH);
    let current = source.current_height().await?;
    let mut page = BlockPage {
        total: current,
        items: Vec::with_capacity(length.min(current as usize)),
    };
    if offset >= current {
        return Ok(page);
    }

    let first = current - offset;
    let count = (length as u64).min(first);
    if count == 0 {
        return Ok(page);
    }
    let last = first - count + 1;
    let buffered = buffered_blocks(dashboard, first, last);

    for height in (last..=first).rev() {
        if let Some(block) = buffered.iter().find(|b| b.height == height) {
            page.items.push(block.clone());
            continue;
        }
        match source.block_at(height).await? {
            Some(block) => page.items.push(RecentBlock::from(&block)),
            None => warn!("Block {} missing from chain source", height),
        }
    }
    debug!(
        "Block page at offset {} served {} items ({} buffered)",
        offset,
        page.items.len(),
        buffered.len()
    );
    Ok(page)
}

/// Buffered blocks with heights in `low..=high`
fn buffered_blocks(dashboard: &RwLock<Dashboard>, high: u64, low: u64) -> Vec<RecentBlock> {
    let dashboard = dashboard.read();
    let head = match dashboard.recent_blocks.latest(1).first() {
        Some(block) => block.height,
        None => return Vec::new(),
    };
    if low > head {
        return Vec::new();
    }
    // The buffer may lag the chain, so its head can sit below `high`.
    let skip = head.saturating_sub(high) as usize;
    let take = (head.min(high) - low + 1) as usize;
    dashboard
        .recent_blocks
        .page(skip, take)
        .into_iter()
        .filter(|b| b.height >= low && b.height <= high)
        .collect()
}

/// Look a hash up as a block first, then as a transaction
pub fn resolve_hash(store: &IndexStore, input: &str) -> Result<Resolved> {
    let hash = parse_hash(input)?;
    if let Some(height) = store.block_height(&hash)? {
        return Ok(Resolved::Found(Location::Block { height }));
    }
    if let Some((height, index)) = store.tx_location(&hash)? {
        return Ok(Resolved::Found(Location::Transaction { height, index }));
    }
    Ok(Resolved::NotFound)
}

/// Number of indexed blocks produced by `address`
pub fn formulator_block_count(store: &IndexStore, address: &str) -> Result<u64> {
    store.formulator_block_count(address)
}

pub fn stats_table(dashboard: &RwLock<Dashboard>) -> StatsTable {
    dashboard.read().stats.table()
}

/// Snapshot as of the last committed batch
pub fn chain_info(dashboard: &RwLock<Dashboard>) -> ChainSnapshot {
    dashboard.read().snapshot
}

/// Per-tick activity, newest first
pub fn activity_samples(dashboard: &RwLock<Dashboard>) -> Vec<ActivitySample> {
    dashboard.read().activity.to_vec()
}

/// Full view of one block
pub async fn block_detail<S: ChainSource + ?Sized>(
    store: &IndexStore,
    source: &S,
    query: BlockDetailQuery,
) -> Result<BlockDetail> {
    let height = match query {
        BlockDetailQuery::Height(height) => {
            return match source.block_at(height).await? {
                Some(block) => Ok(to_block_detail(block)),
                None => Err(ExplorerError::NotFound(format!("block {}", height))),
            };
        }
        BlockDetailQuery::Hash(input) => match resolve_hash(store, &input)? {
            Resolved::Found(Location::Block { height }) => height,
            Resolved::Found(Location::Transaction { .. }) => {
                return Err(ExplorerError::InvalidInput(format!(
                    "{} is not a block hash",
                    input
                )));
            }
            Resolved::NotFound => return Err(ExplorerError::NotFound(input)),
        },
    };

    match source.block_at(height).await? {
        Some(block) => Ok(to_block_detail(block)),
        None => {
            warn!("Indexed block {} missing from chain source", height);
            Err(ExplorerError::InconsistentState(format!(
                "indexed block {} missing from chain source",
                height
            )))
        }
    }
}

fn to_block_detail(block: ChainBlock) -> BlockDetail {
    BlockDetail {
        height: block.height,
        hash: block.hash,
        prev_hash: block.prev_hash,
        timestamp: block.timestamp,
        formulator: block.formulator,
        chain_coord: block.chain_coord,
        timeout_count: block.timeout_count,
        transactions: block.transactions.iter().map(|tx| tx.hash).collect(),
    }
}

/// Full view of one transaction
pub async fn transaction_detail<S: ChainSource + ?Sized>(
    store: &IndexStore,
    source: &S,
    input: &str,
) -> Result<TransactionDetail> {
    let (height, index) = match resolve_hash(store, input)? {
        Resolved::Found(Location::Transaction { height, index }) => (height, index),
        Resolved::Found(Location::Block { .. }) => {
            return Err(ExplorerError::InvalidInput(format!(
                "{} is not a transaction hash",
                input
            )));
        }
        Resolved::NotFound => return Err(ExplorerError::NotFound(input.to_string())),
    };

    let block = source.block_at(height).await?.ok_or_else(|| {
        warn!("Block {} of indexed transaction {} missing", height, input);
        ExplorerError::InconsistentState(format!("block {} missing from chain source", height))
    })?;
    let tx = block.transactions.get(index as usize).ok_or_else(|| {
        warn!(
            "Transaction index {} out of range for block {} ({} transactions)",
            index,
            height,
            block.tx_count()
        );
        ExplorerError::InconsistentState(format!(
            "block {} has no transaction {}",
            height, index
        ))
    })?;

    Ok(TransactionDetail {
        tx_hash: tx.hash,
        tx_type_name: source.transaction_type_name(tx.tx_type),
        block_hash: block.hash,
        block_timestamp: block.timestamp,
        tx_timestamp: tx.timestamp,
        height,
        index,
    })
}
