//! Block production statistics
//!
//! Three streams are tracked: block size (transactions per block), apply
//! latency and propagation latency. Minimum, maximum and mean cover the whole
//! stream. Percentiles use the nearest-rank method over the most recent
//! `window` samples: for percentile `p` over `n` samples sorted ascending, the
//! result is the sample at rank `ceil(p / 100 * n)` (1-based). An empty stream
//! reports 0 everywhere.

use crate::types::{BlockTiming, ChainBlock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Running statistics over one numeric stream
#[derive(Debug, Clone)]
pub struct StatStream {
    count: u64,
    min: u64,
    max: u64,
    mean: f64,
    window: VecDeque<u64>,
    window_size: usize,
}

impl StatStream {
    pub fn new(window_size: usize) -> Self {
        Self {
            count: 0,
            min: u64::MAX,
            max: 0,
            mean: 0.0,
            window: VecDeque::with_capacity(window_size),
            window_size: window_size.max(1),
        }
    }

    pub fn record(&mut self, sample: u64) {
        self.count += 1;
        self.min = self.min.min(sample);
        self.max = self.max.max(sample);
        self.mean += (sample as f64 - self.mean) / self.count as f64;

        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(sample);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// `u64::MAX` until the first sample arrives
    pub fn min(&self) -> u64 {
        self.min
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Nearest-rank percentile over the sample window, `p` in `(0, 100]`
    pub fn percentile(&self, p: f64) -> u64 {
        if self.window.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = self.window.iter().copied().collect();
        sorted.sort_unstable();
        let n = sorted.len();
        let rank = (p * n as f64 / 100.0).ceil() as usize;
        sorted[rank.clamp(1, n) - 1]
    }

    pub fn summary(&self) -> StatSummary {
        if self.count == 0 {
            return StatSummary::default();
        }
        StatSummary {
            min: self.min as f64,
            avg: self.mean,
            p95: self.percentile(95.0) as f64,
            p99: self.percentile(99.0) as f64,
            max: self.max as f64,
        }
    }
}

/// Five-number summary of a stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StatSummary {
    pub min: f64,
    pub avg: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
}

/// Row label of the statistics table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatKind {
    Min,
    Average,
    P95,
    P99,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatsRow {
    pub kind: StatKind,
    pub block_size: f64,
    pub apply_latency_ms: f64,
    pub propagation_latency_ms: f64,
}

/// Table of min / avg / p95 / p99 / max across the three streams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsTable {
    pub rows: Vec<StatsRow>,
}

/// What the aggregator needs from one block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSample {
    pub tx_count: u64,
    pub timing: Option<BlockTiming>,
}

impl From<&ChainBlock> for BlockSample {
    fn from(block: &ChainBlock) -> Self {
        Self {
            tx_count: block.tx_count() as u64,
            timing: block.timing,
        }
    }
}

/// Statistics over every indexed block
#[derive(Debug, Clone)]
pub struct StatsAggregator {
    block_size: StatStream,
    apply_latency: StatStream,
    propagation_latency: StatStream,
}

impl StatsAggregator {
    pub fn new(window_size: usize) -> Self {
        Self {
            block_size: StatStream::new(window_size),
            apply_latency: StatStream::new(window_size),
            propagation_latency: StatStream::new(window_size),
        }
    }

    /// Feed one indexed block
    pub fn record_block(&mut self, block: &ChainBlock) {
        self.record(BlockSample::from(block));
    }

    /// Latencies are skipped when the sample carries no timing
    pub fn record(&mut self, sample: BlockSample) {
        self.block_size.record(sample.tx_count);
        if let Some(timing) = sample.timing {
            self.apply_latency.record(timing.apply_ms);
            self.propagation_latency.record(timing.propagation_ms);
        }
    }

    pub fn block_size(&self) -> &StatStream {
        &self.block_size
    }

    pub fn apply_latency(&self) -> &StatStream {
        &self.apply_latency
    }

    pub fn propagation_latency(&self) -> &StatStream {
        &self.propagation_latency
    }

    pub fn table(&self) -> StatsTable {
        let size = self.block_size.summary();
        let apply = self.apply_latency.summary();
        let propagation = self.propagation_latency.summary();

        let row = |kind: StatKind, pick: fn(&StatSummary) -> f64| StatsRow {
            kind,
            block_size: pick(&size),
            apply_latency_ms: pick(&apply),
            propagation_latency_ms: pick(&propagation),
        };

        StatsTable {
            rows: vec![
                row(StatKind::Min, |s| s.min),
                row(StatKind::Average, |s| s.avg),
                row(StatKind::P95, |s| s.p95),
                row(StatKind::P99, |s| s.p99),
                row(StatKind::Max, |s| s.max),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChainTransaction;

    #[test]
    fn fresh_stream_starts_at_extremes() {
        let stream = StatStream::new(10);
        assert_eq!(stream.min(), u64::MAX);
        assert_eq!(stream.max(), 0);
        assert_eq!(stream.summary(), StatSummary::default());
    }

    #[test]
    fn first_sample_becomes_min_and_max() {
        let mut stream = StatStream::new(10);
        stream.record(42);
        assert_eq!(stream.min(), 42);
        assert_eq!(stream.max(), 42);
        assert_eq!(stream.mean(), 42.0);
    }

    #[test]
    fn nearest_rank_percentiles() {
        let mut stream = StatStream::new(100);
        for sample in 1..=100 {
            stream.record(sample);
        }
        // rank = ceil(p/100 * 100)
        assert_eq!(stream.percentile(95.0), 95);
        assert_eq!(stream.percentile(99.0), 99);
        assert_eq!(stream.percentile(100.0), 100);

        let mut small = StatStream::new(100);
        for sample in [10, 30, 20] {
            small.record(sample);
        }
        // ceil(0.95 * 3) = 3
        assert_eq!(small.percentile(95.0), 30);
        // ceil(0.5 * 3) = 2
        assert_eq!(small.percentile(50.0), 20);
    }

    #[test]
    fn percentiles_follow_the_window_but_extremes_do_not() {
        let mut stream = StatStream::new(4);
        for sample in [1000, 1, 2, 3, 4] {
            stream.record(sample);
        }
        assert_eq!(stream.percentile(99.0), 4);
        assert_eq!(stream.max(), 1000);
        assert_eq!(stream.min(), 1);
        assert!((stream.mean() - 202.0).abs() < 1e-9);
    }

    #[test]
    fn mean_is_stable_over_long_runs() {
        let mut stream = StatStream::new(16);
        for i in 0..1_000_000u64 {
            stream.record(1_000_000_000 + (i % 3));
        }
        assert!((stream.mean() - 1_000_000_001.0).abs() < 1e-3);
    }

    #[test]
    fn table_has_five_rows_across_streams() {
        let mut stats = StatsAggregator::new(100);
        let block = |txs: usize, timing: Option<BlockTiming>| ChainBlock {
            height: 1,
            hash: [0u8; 32],
            prev_hash: [0u8; 32],
            timestamp: 0,
            formulator: "F1".to_string(),
            chain_coord: "0:0".to_string(),
            timeout_count: 0,
            transactions: (0..txs)
                .map(|i| ChainTransaction {
                    hash: [i as u8; 32],
                    tx_type: 0,
                    timestamp: 0,
                })
                .collect(),
            timing,
        };
        stats.record_block(&block(
            2,
            Some(BlockTiming {
                propagation_ms: 40,
                apply_ms: 10,
            }),
        ));
        stats.record_block(&block(4, None));

        assert_eq!(stats.block_size().count(), 2);
        assert_eq!(stats.apply_latency().count(), 1);

        let table = stats.table();
        assert_eq!(table.rows.len(), 5);
        assert_eq!(table.rows[0].kind, StatKind::Min);
        assert_eq!(table.rows[0].block_size, 2.0);
        assert_eq!(table.rows[1].block_size, 3.0);
        assert_eq!(table.rows[4].kind, StatKind::Max);
        assert_eq!(table.rows[4].block_size, 4.0);
        assert_eq!(table.rows[4].propagation_latency_ms, 40.0);
    }
}
