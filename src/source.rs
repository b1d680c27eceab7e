//! Chain source interface
//!
//! The explorer index is a read-only consumer of an already validated chain.
//! Everything it knows about blocks comes through [`ChainSource`].

use crate::error::Result;
use crate::types::{ChainBlock, Hash};
use async_trait::async_trait;

/// Authoritative, append-only source of blocks
#[async_trait]
pub trait ChainSource: Send + Sync + 'static {
    /// Current chain height
    async fn current_height(&self) -> Result<u64>;

    /// Block at `height`, `None` if the block is not available yet
    async fn block_at(&self, height: u64) -> Result<Option<ChainBlock>>;

    /// Hash of the block at `height`
    async fn block_hash(&self, height: u64) -> Result<Option<Hash>>;

    /// Human-readable name of a transaction type, `None` for unsupported types
    fn transaction_type_name(&self, tx_type: u16) -> Option<String>;

    /// Number of formulator candidates currently registered
    async fn formulator_candidate_count(&self) -> Result<u64>;
}
