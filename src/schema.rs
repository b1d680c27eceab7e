//! Index store ParityDB schema
//!
//! This module documents the ParityDB layout used by the explorer index and
//! provides the key and value codecs shared by the storage layer.

use crate::error::{ExplorerError, Result};
use parity_db::ColId;

pub const COL_BLOCK_INDEX: ColId = 0;
pub const COL_TX_INDEX: ColId = 1;
pub const COL_FORMULATORS: ColId = 2;
pub const COL_METADATA: ColId = 3;
pub const COL_SNAPSHOTS: ColId = 4;

pub const NUM_COLUMNS: u8 = 5;

/// ParityDB Schema for the explorer index
///
/// # Columns
///
/// ## Block locations (`COL_BLOCK_INDEX`)
/// - Key: block hash (32 bytes)
/// - Value: height (8 bytes, big-endian u64)
/// - Written once per indexed height, overwritten idempotently on re-index
///
/// ## Transaction locations (`COL_TX_INDEX`)
/// - Key: transaction hash (32 bytes)
/// - Value: height (8 bytes, big-endian u64) followed by the index of the
///   transaction inside its block (4 bytes, big-endian u32)
///
/// ## Formulator counters (`COL_FORMULATORS`)
/// - Key: `formulator{address}`
/// - Value: cumulative number of indexed blocks produced by the address
///   (8 bytes, big-endian u64)
///
/// ## Metadata (`COL_METADATA`)
/// - `chain_snapshot`: current [`ChainSnapshot`](crate::types::ChainSnapshot) (JSON)
/// - `max_activity_per_tick`: highest per-tick transaction count (8 bytes, big-endian u64)
/// - `snapshot_seq`: version number the next snapshot write will use
/// - `snapshot_floor`: lowest snapshot version still present in `COL_SNAPSHOTS`
///
/// ## Snapshot history (`COL_SNAPSHOTS`)
/// - Key: snapshot version (8 bytes, big-endian u64), one per committed batch
/// - Value: [`ChainSnapshot`](crate::types::ChainSnapshot) as of that batch (JSON)
/// - Versions below `snapshot_seq - retention` are obsolete and pruned by the
///   maintenance task
///
/// # Write ordering
///
/// Location entries, formulator counters and the snapshot of one batch are
/// committed in a single ParityDB commit. The persisted `indexed_height` can
/// therefore never name a height whose entries are missing.
///
/// Reserved keys and prefixes
pub mod keys {
    pub const FORMULATOR_PREFIX: &str = "formulator";
    pub const CHAIN_SNAPSHOT_KEY: &[u8] = b"chain_snapshot";
    pub const MAX_ACTIVITY_KEY: &[u8] = b"max_activity_per_tick";
    pub const SNAPSHOT_SEQ_KEY: &[u8] = b"snapshot_seq";
    pub const SNAPSHOT_FLOOR_KEY: &[u8] = b"snapshot_floor";
}

/// Build formulator counter key
pub fn formulator_key(address: &str) -> Vec<u8> {
    format!("{}{}", keys::FORMULATOR_PREFIX, address).into_bytes()
}

/// Build snapshot history key
pub fn snapshot_key(version: u64) -> Vec<u8> {
    version.to_be_bytes().to_vec()
}

pub fn encode_u64(value: u64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

pub fn decode_u64(bytes: &[u8]) -> Result<u64> {
    let buf: [u8; 8] = bytes.try_into().map_err(|_| {
        ExplorerError::InconsistentState(format!("expected 8-byte integer, got {} bytes", bytes.len()))
    })?;
    Ok(u64::from_be_bytes(buf))
}

/// Encode a transaction location as `height ++ index`
pub fn encode_tx_location(height: u64, index: u32) -> Vec<u8> {
    let mut value = Vec::with_capacity(12);
    value.extend_from_slice(&height.to_be_bytes());
    value.extend_from_slice(&index.to_be_bytes());
    value
}

pub fn decode_tx_location(bytes: &[u8]) -> Result<(u64, u32)> {
    if bytes.len() != 12 {
        return Err(ExplorerError::InconsistentState(format!(
            "expected 12-byte transaction location, got {} bytes",
            bytes.len()
        )));
    }
    let height = decode_u64(&bytes[..8])?;
    let mut index = [0u8; 4];
    index.copy_from_slice(&bytes[8..]);
    Ok((height, u32::from_be_bytes(index)))
}
