//! In-memory chain source
//!
//! Used by the test suites and for running the explorer without a node.

use crate::error::{ExplorerError, Result};
use crate::source::ChainSource;
use crate::types::{BlockTiming, ChainBlock, ChainTransaction, Hash};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// In-memory chain for tests and local runs.
///
/// Height 0 is a transaction-less genesis block; appended blocks follow it.
/// Individual heights can be made to fail or disappear to exercise the
/// indexer's retry and consistency paths.
pub struct MockChainSource {
    inner: RwLock<MockChain>,
}

#[derive(Default)]
struct MockChain {
    blocks: Vec<ChainBlock>,
    failing: HashMap<u64, usize>,
    hidden: HashMap<u64, ChainBlock>,
    type_names: HashMap<u16, String>,
    candidates: u64,
}

impl Default for MockChainSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChainSource {
    pub fn new() -> Self {
        let genesis = ChainBlock {
            height: 0,
            hash: derive_hash(b"block", 0, 0),
            prev_hash: [0u8; 32],
            timestamp: 0,
            formulator: String::new(),
            chain_coord: "0:0".to_string(),
            timeout_count: 0,
            transactions: Vec::new(),
            timing: None,
        };
        let type_names = [(0u16, "Transfer"), (1, "Formulation"), (2, "Staking")]
            .into_iter()
            .map(|(code, name)| (code, name.to_string()))
            .collect();
        Self {
            inner: RwLock::new(MockChain {
                blocks: vec![genesis],
                type_names,
                ..Default::default()
            }),
        }
    }

    /// Append a block produced by `formulator` carrying `tx_count` transfers
    pub fn append_block(&self, formulator: &str, tx_count: usize) -> ChainBlock {
        let mut chain = self.inner.write();
        let height = chain.blocks.len() as u64;
        let prev_hash = chain.blocks[chain.blocks.len() - 1].hash;
        let timestamp = height * 1_000;
        let transactions = (0..tx_count)
            .map(|i| ChainTransaction {
                hash: derive_hash(b"tx", height, i as u64),
                tx_type: (i % 3) as u16,
                timestamp: timestamp + i as u64,
            })
            .collect();
        let block = ChainBlock {
            height,
            hash: derive_hash(b"block", height, 0),
            prev_hash,
            timestamp,
            formulator: formulator.to_string(),
            chain_coord: "0:0".to_string(),
            timeout_count: (height % 5 == 0) as u32,
            transactions,
            timing: Some(BlockTiming {
                propagation_ms: 20 + height % 50,
                apply_ms: 5 + height % 10,
            }),
        };
        chain.blocks.push(block.clone());
        block
    }

    /// Append `count` blocks round-robin over `formulators`
    pub fn extend(&self, count: usize, formulators: &[&str], tx_count: usize) {
        for i in 0..count {
            self.append_block(formulators[i % formulators.len()], tx_count);
        }
    }

    /// Block as the chain knows it, ignoring failure injection
    pub fn block(&self, height: u64) -> Option<ChainBlock> {
        let chain = self.inner.read();
        chain
            .blocks
            .get(height as usize)
            .cloned()
            .or_else(|| chain.hidden.get(&height).cloned())
    }

    /// Fail the next `times` fetches of `height`
    pub fn fail_fetches(&self, height: u64, times: usize) {
        self.inner.write().failing.insert(height, times);
    }

    /// Make `height` report as not available until restored
    pub fn hide_block(&self, height: u64) {
        let mut chain = self.inner.write();
        if let Some(block) = chain.blocks.get(height as usize).cloned() {
            chain.hidden.insert(height, block);
        }
    }

    pub fn restore_block(&self, height: u64) {
        self.inner.write().hidden.remove(&height);
    }

    pub fn set_candidate_count(&self, count: u64) {
        self.inner.write().candidates = count;
    }
}

#[async_trait]
impl ChainSource for MockChainSource {
    async fn current_height(&self) -> Result<u64> {
        Ok(self.inner.read().blocks.len() as u64 - 1)
    }

    async fn block_at(&self, height: u64) -> Result<Option<ChainBlock>> {
        let mut chain = self.inner.write();
        if let Some(remaining) = chain.failing.get_mut(&height) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ExplorerError::ChainSource(format!(
                    "block {} temporarily unavailable",
                    height
                )));
            }
        }
        if chain.hidden.contains_key(&height) {
            return Ok(None);
        }
        Ok(chain.blocks.get(height as usize).cloned())
    }

    async fn block_hash(&self, height: u64) -> Result<Option<Hash>> {
        Ok(self.inner.read().blocks.get(height as usize).map(|b| b.hash))
    }

    fn transaction_type_name(&self, tx_type: u16) -> Option<String> {
        self.inner.read().type_names.get(&tx_type).cloned()
    }

    async fn formulator_candidate_count(&self) -> Result<u64> {
        Ok(self.inner.read().candidates)
    }
}

fn derive_hash(domain: &[u8], height: u64, index: u64) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(domain);
    hasher.update(&height.to_be_bytes());
    hasher.update(&index.to_be_bytes());
    *hasher.finalize().as_bytes()
}
