//! Explorer index types

use crate::error::{ExplorerError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Width of block and transaction hashes
pub const HASH_LEN: usize = 32;

/// Block or transaction hash (Blake3-256)
pub type Hash = [u8; HASH_LEN];

/// Parse a hex-encoded hash, rejecting anything that is not exactly `HASH_LEN` bytes
pub fn parse_hash(input: &str) -> Result<Hash> {
    let trimmed = input.trim();
    let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(trimmed)
        .map_err(|e| ExplorerError::InvalidInput(format!("hash {:?}: {}", input, e)))?;
    if bytes.len() != HASH_LEN {
        return Err(ExplorerError::InvalidInput(format!(
            "hash {:?}: expected {} bytes, got {}",
            input,
            HASH_LEN,
            bytes.len()
        )));
    }
    let mut hash = [0u8; HASH_LEN];
    hash.copy_from_slice(&bytes);
    Ok(hash)
}

/// Transaction as exposed by the chain source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTransaction {
    /// Transaction hash - stored as hex string for serialization
    #[serde(serialize_with = "serialize_hash", deserialize_with = "deserialize_hash")]
    pub hash: Hash,
    /// Numeric transaction type, resolved to a name by the chain source
    pub tx_type: u16,
    /// Transaction timestamp (milliseconds)
    pub timestamp: u64,
}

/// Locally observed timings of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTiming {
    /// Time from production to local receipt
    pub propagation_ms: u64,
    /// Time from receipt to local commit
    pub apply_ms: u64,
}

/// Block as exposed by the chain source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBlock {
    pub height: u64,
    #[serde(serialize_with = "serialize_hash", deserialize_with = "deserialize_hash")]
    pub hash: Hash,
    #[serde(serialize_with = "serialize_hash", deserialize_with = "deserialize_hash")]
    pub prev_hash: Hash,
    /// Block timestamp (milliseconds)
    pub timestamp: u64,
    /// Address of the formulator that produced the block
    pub formulator: String,
    /// Chain coordinate the block belongs to
    pub chain_coord: String,
    /// Number of production timeouts before this block was made
    pub timeout_count: u32,
    pub transactions: Vec<ChainTransaction>,
    /// Missing for blocks the node did not observe live
    pub timing: Option<BlockTiming>,
}

impl ChainBlock {
    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn status(&self) -> BlockStatus {
        if self.timeout_count > 0 {
            BlockStatus::Delayed
        } else {
            BlockStatus::Normal
        }
    }
}

/// Production status shown next to a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockStatus {
    Normal,
    Delayed,
}

/// Entry of the recent-transaction buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentTransaction {
    #[serde(serialize_with = "serialize_hash", deserialize_with = "deserialize_hash")]
    pub tx_hash: Hash,
    #[serde(serialize_with = "serialize_hash", deserialize_with = "deserialize_hash")]
    pub block_hash: Hash,
    pub chain_id: String,
    pub timestamp: u64,
    pub tx_type_name: String,
}

impl RecentTransaction {
    pub fn from_block(block: &ChainBlock, tx: &ChainTransaction, tx_type_name: String) -> Self {
        Self {
            tx_hash: tx.hash,
            block_hash: block.hash,
            chain_id: block.chain_coord.clone(),
            timestamp: tx.timestamp,
            tx_type_name,
        }
    }
}

/// Entry of the recent-block buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentBlock {
    pub height: u64,
    #[serde(serialize_with = "serialize_hash", deserialize_with = "deserialize_hash")]
    pub hash: Hash,
    pub timestamp: u64,
    pub formulator: String,
    pub tx_count: usize,
    pub status: BlockStatus,
}

impl From<&ChainBlock> for RecentBlock {
    fn from(block: &ChainBlock) -> Self {
        Self {
            height: block.height,
            hash: block.hash,
            timestamp: block.timestamp,
            formulator: block.formulator.clone(),
            tx_count: block.tx_count(),
            status: block.status(),
        }
    }
}

/// Transactions processed during one indexer tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivitySample {
    pub timestamp: u64,
    pub count: u64,
}

/// Aggregate counters persisted alongside the index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub indexed_height: u64,
    pub cumulative_transactions: u64,
    pub formulator_count: u64,
    pub max_activity_per_tick: u64,
}

/// Where a hash lives in the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Location {
    Block { height: u64 },
    Transaction { height: u64, index: u32 },
}

/// Outcome of a hash lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolved {
    Found(Location),
    NotFound,
}

/// One page of blocks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPage {
    /// Number of blocks in the chain
    pub total: u64,
    pub items: Vec<RecentBlock>,
}

/// One page of recent transactions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPage {
    /// Number of transactions held by the recent buffer
    pub total: usize,
    pub items: Vec<RecentTransaction>,
}

/// Full view of a single block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDetail {
    pub height: u64,
    #[serde(serialize_with = "serialize_hash", deserialize_with = "deserialize_hash")]
    pub hash: Hash,
    #[serde(serialize_with = "serialize_hash", deserialize_with = "deserialize_hash")]
    pub prev_hash: Hash,
    pub timestamp: u64,
    pub formulator: String,
    pub chain_coord: String,
    pub timeout_count: u32,
    #[serde(
        serialize_with = "serialize_hash_vec",
        deserialize_with = "deserialize_hash_vec"
    )]
    pub transactions: Vec<Hash>,
}

/// Full view of a single transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDetail {
    #[serde(serialize_with = "serialize_hash", deserialize_with = "deserialize_hash")]
    pub tx_hash: Hash,
    /// `None` when the chain source does not know the transaction type
    pub tx_type_name: Option<String>,
    #[serde(serialize_with = "serialize_hash", deserialize_with = "deserialize_hash")]
    pub block_hash: Hash,
    pub block_timestamp: u64,
    pub tx_timestamp: u64,
    pub height: u64,
    pub index: u32,
}

/// Serialize hash as hex string
fn serialize_hash<S>(hash: &Hash, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&hex::encode(hash))
}

/// Deserialize hash from hex string
fn deserialize_hash<'de, D>(deserializer: D) -> std::result::Result<Hash, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_hash(&s).map_err(serde::de::Error::custom)
}

fn serialize_hash_vec<S>(hashes: &[Hash], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let hex_strings: Vec<String> = hashes.iter().map(hex::encode).collect();
    hex_strings.serialize(serializer)
}

fn deserialize_hash_vec<'de, D>(deserializer: D) -> std::result::Result<Vec<Hash>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let hex_strings = Vec::<String>::deserialize(deserializer)?;
    hex_strings
        .iter()
        .map(|s| parse_hash(s).map_err(serde::de::Error::custom))
        .collect()
}

/// Explorer index configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorerConfig {
    /// Index store directory
    pub db_path: String,
    /// Period of the indexer loop
    pub tick_interval_ms: u64,
    /// Heights committed per store transaction
    pub batch_size: u64,
    /// Upper bound on heights processed in one tick
    pub max_heights_per_tick: u64,
    pub recent_tx_capacity: usize,
    pub recent_block_capacity: usize,
    pub activity_capacity: usize,
    /// Samples kept per stream for percentile estimation
    pub stats_window: usize,
    /// Period of the store maintenance loop
    pub gc_interval_secs: u64,
    /// Snapshot versions removed per maintenance transaction
    pub gc_chunk: usize,
    /// Maximum maintenance transactions per maintenance round
    pub gc_max_passes: usize,
    /// Historical snapshot versions kept by maintenance
    pub snapshot_retention: u64,
    /// Consecutive store failures before the indexer logs at error level
    pub failure_alert_threshold: u64,
    /// Default size of the "latest" dashboard widgets
    pub latest_limit: usize,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            db_path: "data/explorer-index".to_string(),
            tick_interval_ms: 1000,
            batch_size: 2,
            max_heights_per_tick: 1000,
            recent_tx_capacity: 500,
            recent_block_capacity: 500,
            activity_capacity: 200,
            stats_window: 1000,
            gc_interval_secs: 300,
            gc_chunk: 256,
            gc_max_passes: 64,
            snapshot_retention: 1024,
            failure_alert_threshold: 5,
            latest_limit: 8,
        }
    }
}

impl ExplorerConfig {
    /// Load configuration from a JSON file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read(path.as_ref())?;
        let config: ExplorerConfig = serde_json::from_slice(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall the indexer or disable a buffer
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("tick_interval_ms", self.tick_interval_ms == 0),
            ("batch_size", self.batch_size == 0),
            ("max_heights_per_tick", self.max_heights_per_tick == 0),
            ("recent_tx_capacity", self.recent_tx_capacity == 0),
            ("recent_block_capacity", self.recent_block_capacity == 0),
            ("activity_capacity", self.activity_capacity == 0),
            ("stats_window", self.stats_window == 0),
            ("gc_interval_secs", self.gc_interval_secs == 0),
            ("gc_chunk", self.gc_chunk == 0),
            ("gc_max_passes", self.gc_max_passes == 0),
        ];
        for (name, is_zero) in checks {
            if is_zero {
                return Err(ExplorerError::InvalidInput(format!("{} must be non-zero", name)));
            }
        }
        Ok(())
    }
}
