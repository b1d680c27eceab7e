//! Rolling buffers behind the dashboard
//!
//! Buffers are ordered newest-first and never grow past their capacity. The
//! indexer is the only writer; it applies each committed batch under one
//! write lock so readers see either the old or the new state.

use crate::stats::{BlockSample, StatsAggregator};
use crate::types::{ActivitySample, ChainSnapshot, RecentBlock, RecentTransaction};
use std::collections::VecDeque;

/// Bounded newest-first sequence
#[derive(Debug, Clone)]
pub struct RollingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RollingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// Insert items that are newer than everything held.
    ///
    /// `newest_first[0]` becomes the head. Overflow is cut from the tail in
    /// one step.
    pub fn prepend(&mut self, newest_first: Vec<T>) {
        if newest_first.len() >= self.capacity {
            self.items = newest_first.into_iter().take(self.capacity).collect();
            return;
        }
        for item in newest_first.into_iter().rev() {
            self.items.push_front(item);
        }
        self.items.truncate(self.capacity);
    }

    /// Add an item older than everything held; ignored once full
    pub fn push_oldest(&mut self, item: T) -> bool {
        if self.is_full() {
            return false;
        }
        self.items.push_back(item);
        true
    }

    /// Up to `n` newest items
    pub fn latest(&self, n: usize) -> Vec<T> {
        self.items.iter().take(n).cloned().collect()
    }

    /// Items `[offset, min(offset + length, len))`, empty when `offset` is out of range
    pub fn page(&self, offset: usize, length: usize) -> Vec<T> {
        self.items.iter().skip(offset).take(length).cloned().collect()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

/// Everything the dashboard reads without touching the store
#[derive(Debug, Clone)]
pub struct Dashboard {
    pub recent_transactions: RollingBuffer<RecentTransaction>,
    pub recent_blocks: RollingBuffer<RecentBlock>,
    pub activity: RollingBuffer<ActivitySample>,
    /// In-memory mirror of the persisted snapshot
    pub snapshot: ChainSnapshot,
    pub stats: StatsAggregator,
}

/// Changes derived from one committed batch, newest entries first
#[derive(Debug, Clone, Default)]
pub struct DashboardUpdate {
    pub transactions: Vec<RecentTransaction>,
    pub blocks: Vec<RecentBlock>,
    pub samples: Vec<BlockSample>,
    pub activity: Option<ActivitySample>,
    pub snapshot: Option<ChainSnapshot>,
}

impl Dashboard {
    pub fn new(
        tx_capacity: usize,
        block_capacity: usize,
        activity_capacity: usize,
        stats_window: usize,
        snapshot: ChainSnapshot,
    ) -> Self {
        Self {
            recent_transactions: RollingBuffer::new(tx_capacity),
            recent_blocks: RollingBuffer::new(block_capacity),
            activity: RollingBuffer::new(activity_capacity),
            snapshot,
            stats: StatsAggregator::new(stats_window),
        }
    }

    pub fn apply(&mut self, update: DashboardUpdate) {
        if !update.transactions.is_empty() {
            self.recent_transactions.prepend(update.transactions);
        }
        if !update.blocks.is_empty() {
            self.recent_blocks.prepend(update.blocks);
        }
        for sample in update.samples {
            self.stats.record(sample);
        }
        if let Some(sample) = update.activity {
            self.activity.prepend(vec![sample]);
        }
        if let Some(snapshot) = update.snapshot {
            self.snapshot = snapshot;
        }
    }
}
