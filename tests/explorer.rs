use chain_explorer_index::{
    BlockDetailQuery, BlockStatus, ChainExplorer, ExplorerConfig, ExplorerError, Location,
    MockChainSource, Resolved, StatKind,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing_subscriber::{fmt, EnvFilter};

fn init_tracing() {
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config_in(dir: &TempDir) -> ExplorerConfig {
    ExplorerConfig {
        db_path: dir.path().join("index").to_string_lossy().into_owned(),
        ..Default::default()
    }
}

async fn open(
    config: ExplorerConfig,
    chain: &Arc<MockChainSource>,
) -> ChainExplorer<MockChainSource> {
    init_tracing();
    ChainExplorer::open(config, Arc::clone(chain)).await.unwrap()
}

#[tokio::test]
async fn block_and_transactions_resolve_after_indexing() {
    let dir = tempfile::tempdir().unwrap();
    let chain = Arc::new(MockChainSource::new());
    chain.extend(6, &["F2"], 1);
    let block = chain.append_block("F1", 3);
    assert_eq!(block.height, 7);

    let explorer = open(config_in(&dir), &chain).await;

    assert_eq!(
        explorer.resolve_hash(&hex::encode(block.hash)).unwrap(),
        Resolved::Found(Location::Block { height: 7 })
    );
    for (index, tx) in block.transactions.iter().enumerate() {
        assert_eq!(
            explorer.resolve_hash(&hex::encode(tx.hash)).unwrap(),
            Resolved::Found(Location::Transaction {
                height: 7,
                index: index as u32
            })
        );
    }
    assert_eq!(explorer.formulator_block_count("F1").unwrap(), 1);
    assert_eq!(explorer.formulator_block_count("F2").unwrap(), 6);

    let info = explorer.chain_info();
    assert_eq!(info.indexed_height, 7);
    assert_eq!(info.cumulative_transactions, 9);

    let latest = explorer.latest_transactions(None);
    assert_eq!(latest.len(), 8);
    assert_eq!(latest[0].tx_hash, block.transactions[0].hash);
    assert_eq!(latest[2].tx_hash, block.transactions[2].hash);
}

#[tokio::test]
async fn malformed_hash_is_invalid_input() {
    let dir = tempfile::tempdir().unwrap();
    let chain = Arc::new(MockChainSource::new());
    let explorer = open(config_in(&dir), &chain).await;

    let short = "ab".repeat(31);
    for input in ["", "0x", "zz", short.as_str()] {
        assert!(matches!(
            explorer.resolve_hash(input),
            Err(ExplorerError::InvalidInput(_))
        ));
    }
}

#[tokio::test]
async fn formulator_counts_grow_with_each_tick() {
    let dir = tempfile::tempdir().unwrap();
    let chain = Arc::new(MockChainSource::new());
    chain.extend(4, &["F1", "F2"], 1);
    let explorer = open(config_in(&dir), &chain).await;
    assert_eq!(explorer.formulator_block_count("F1").unwrap(), 2);

    chain.extend(3, &["F1"], 1);
    explorer.tick().await.unwrap();
    assert_eq!(explorer.formulator_block_count("F1").unwrap(), 5);
    assert_eq!(explorer.formulator_block_count("F2").unwrap(), 2);

    // Nothing new: counts stay put.
    explorer.tick().await.unwrap();
    assert_eq!(explorer.formulator_block_count("F1").unwrap(), 5);
}

#[tokio::test]
async fn restart_resumes_without_double_counting() {
    let dir = tempfile::tempdir().unwrap();
    let chain = Arc::new(MockChainSource::new());
    chain.extend(10, &["F1"], 2);

    let explorer = open(config_in(&dir), &chain).await;
    assert_eq!(explorer.chain_info().indexed_height, 10);
    explorer.shutdown().await;

    chain.extend(5, &["F1"], 2);
    let explorer = open(config_in(&dir), &chain).await;

    let info = explorer.chain_info();
    assert_eq!(info.indexed_height, 15);
    assert_eq!(info.cumulative_transactions, 30);
    assert_eq!(explorer.formulator_block_count("F1").unwrap(), 15);

    // Seeded from the chain tip; catching up to it buffers nothing twice.
    let recent = explorer.paginate_transactions(0, 100);
    assert_eq!(recent.total, 30);
    for (i, pair) in recent.items.chunks(2).enumerate() {
        let block = chain.block(15 - i as u64).unwrap();
        assert_eq!(pair[0].tx_hash, block.transactions[0].hash);
        assert_eq!(pair[1].tx_hash, block.transactions[1].hash);
    }
}

#[tokio::test]
async fn failed_height_is_retried_next_tick() {
    let dir = tempfile::tempdir().unwrap();
    let chain = Arc::new(MockChainSource::new());
    chain.extend(5, &["F1"], 1);
    // Seeding reads height 3 once before the first tick does.
    chain.fail_fetches(3, 2);

    let explorer = open(config_in(&dir), &chain).await;
    assert_eq!(explorer.chain_info().indexed_height, 2);
    let skipped = chain.block(4).unwrap();
    assert_eq!(
        explorer.resolve_hash(&hex::encode(skipped.hash)).unwrap(),
        Resolved::NotFound
    );

    let report = explorer.tick().await.unwrap();
    assert!(report.caught_up());
    assert_eq!(
        explorer.resolve_hash(&hex::encode(skipped.hash)).unwrap(),
        Resolved::Found(Location::Block { height: 4 })
    );

    let status = explorer.status();
    assert_eq!(status.fetch_skips, 1);
    assert_eq!(status.store_failures, 0);
}

#[tokio::test]
async fn recent_transactions_keep_newest_five_hundred() {
    let dir = tempfile::tempdir().unwrap();
    let chain = Arc::new(MockChainSource::new());
    chain.extend(600, &["F1"], 1);

    let explorer = open(config_in(&dir), &chain).await;

    let page = explorer.paginate_transactions(0, 1000);
    assert_eq!(page.total, 500);
    assert_eq!(page.items[0].tx_hash, chain.block(600).unwrap().transactions[0].hash);
    assert_eq!(page.items[499].tx_hash, chain.block(101).unwrap().transactions[0].hash);
    assert!(explorer.paginate_transactions(500, 10).items.is_empty());
}

#[tokio::test]
async fn block_pages_reach_past_the_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let chain = Arc::new(MockChainSource::new());
    chain.extend(30, &["F1"], 1);
    let config = ExplorerConfig {
        recent_block_capacity: 10,
        ..config_in(&dir)
    };
    let explorer = open(config, &chain).await;

    let page = explorer.paginate_blocks(5, 10).await.unwrap();
    assert_eq!(page.total, 30);
    let heights: Vec<u64> = page.items.iter().map(|b| b.height).collect();
    assert_eq!(heights, (16..=25).rev().collect::<Vec<_>>());
    // Every fifth mock block was produced after a timeout.
    assert_eq!(page.items[0].status, BlockStatus::Delayed);
    assert_eq!(page.items[1].status, BlockStatus::Normal);

    assert_eq!(explorer.latest_blocks(None).len(), 8);
    assert_eq!(explorer.latest_blocks(Some(20)).len(), 10);
}

#[tokio::test]
async fn detail_views_use_stored_locations() {
    let dir = tempfile::tempdir().unwrap();
    let chain = Arc::new(MockChainSource::new());
    chain.extend(3, &["F1", "F2"], 2);
    let explorer = open(config_in(&dir), &chain).await;
    let block = chain.block(2).unwrap();

    let detail = explorer
        .block_detail(BlockDetailQuery::Hash(hex::encode(block.hash)))
        .await
        .unwrap();
    assert_eq!(detail.height, 2);
    assert_eq!(detail.formulator, "F2");
    assert_eq!(
        detail.transactions,
        block.transactions.iter().map(|tx| tx.hash).collect::<Vec<_>>()
    );

    let tx = explorer
        .transaction_detail(&hex::encode(block.transactions[1].hash))
        .await
        .unwrap();
    assert_eq!(tx.block_hash, block.hash);
    assert_eq!(tx.index, 1);

    let missing = hex::encode([7u8; 32]);
    assert!(matches!(
        explorer.transaction_detail(&missing).await,
        Err(ExplorerError::NotFound(_))
    ));
}

#[tokio::test]
async fn stats_and_activity_follow_indexed_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let chain = Arc::new(MockChainSource::new());
    chain.extend(4, &["F1"], 2);
    let explorer = open(config_in(&dir), &chain).await;
    chain.extend(2, &["F1"], 6);
    explorer.tick().await.unwrap();

    let table = explorer.stats_table();
    let min = table.rows.iter().find(|r| r.kind == StatKind::Min).unwrap();
    let max = table.rows.iter().find(|r| r.kind == StatKind::Max).unwrap();
    let avg = table.rows.iter().find(|r| r.kind == StatKind::Average).unwrap();
    assert_eq!(min.block_size, 2.0);
    assert_eq!(max.block_size, 6.0);
    assert!((avg.block_size - 20.0 / 6.0).abs() < 1e-9);

    let activity = explorer.activity_samples();
    assert_eq!(activity.len(), 2);
    assert_eq!(activity[0].count, 12);
    assert_eq!(activity[0].timestamp, chain.block(6).unwrap().timestamp);
    assert_eq!(explorer.chain_info().max_activity_per_tick, 12);
}

#[tokio::test]
async fn background_loop_follows_chain_until_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let chain = Arc::new(MockChainSource::new());
    chain.set_candidate_count(4);
    let config = ExplorerConfig {
        tick_interval_ms: 10,
        ..config_in(&dir)
    };
    let explorer = open(config.clone(), &chain).await;
    explorer.spawn();
    explorer.spawn();

    chain.extend(20, &["F1", "F2"], 1);
    let mut waited = 0;
    while explorer.chain_info().indexed_height < 20 && waited < 200 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += 1;
    }
    assert_eq!(explorer.chain_info().indexed_height, 20);
    assert_eq!(explorer.chain_info().formulator_count, 4);
    assert!(explorer.status().ticks >= 2);

    explorer.shutdown().await;

    // The store is released and keeps everything committed.
    let reopened = open(config, &chain).await;
    assert_eq!(reopened.chain_info().indexed_height, 20);
    assert_eq!(reopened.formulator_block_count("F2").unwrap(), 10);
}

#[tokio::test]
async fn zero_capacity_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let chain = Arc::new(MockChainSource::new());
    let config = ExplorerConfig {
        recent_tx_capacity: 0,
        ..config_in(&dir)
    };
    assert!(matches!(
        ChainExplorer::open(config, chain).await,
        Err(ExplorerError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn dashboard_shows_chain_tip_before_catch_up_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let chain = Arc::new(MockChainSource::new());
    chain.extend(1500, &["F1", "F2"], 1);

    let explorer = open(config_in(&dir), &chain).await;
    assert_eq!(explorer.chain_info().indexed_height, 1000);

    let tip = chain.block(1500).unwrap();
    assert_eq!(explorer.latest_blocks(Some(1))[0].height, 1500);
    assert_eq!(explorer.latest_transactions(Some(1))[0].tx_hash, tip.transactions[0].hash);

    explorer.tick().await.unwrap();
    assert_eq!(explorer.chain_info().indexed_height, 1500);
    let page = explorer.paginate_transactions(0, 1000);
    assert_eq!(page.total, 500);
    assert_eq!(page.items[0].tx_hash, tip.transactions[0].hash);
    assert_eq!(page.items[499].tx_hash, chain.block(1001).unwrap().transactions[0].hash);
    assert_eq!(explorer.formulator_block_count("F1").unwrap(), 750);
}

#[tokio::test]
async fn store_in_use_cannot_be_opened_twice() {
    let dir = tempfile::tempdir().unwrap();
    let chain = Arc::new(MockChainSource::new());
    chain.extend(3, &["F1"], 1);

    let first = open(config_in(&dir), &chain).await;
    let second = ChainExplorer::open(config_in(&dir), Arc::clone(&chain)).await;
    assert!(matches!(second, Err(ExplorerError::StoreUnavailable(_))));
    assert_eq!(first.chain_info().indexed_height, 3);

    first.shutdown().await;
    let reopened = open(config_in(&dir), &chain).await;
    assert_eq!(reopened.chain_info().indexed_height, 3);
}
