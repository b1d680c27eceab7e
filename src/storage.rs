//! Index store using ParityDB
//!
//! ParityDB commits are atomic, so a [`StoreTxn`] buffers its writes and hands
//! them to a single `commit` call. Read-modify-write transactions are
//! serialized by a writer lock; plain lookups go straight to the database.

use crate::error::{ExplorerError, Result};
use crate::schema::{
    self, keys, COL_BLOCK_INDEX, COL_FORMULATORS, COL_METADATA, COL_SNAPSHOTS, COL_TX_INDEX,
    NUM_COLUMNS,
};
use crate::types::{ChainSnapshot, Hash};
use fs2::FileExt;
use parity_db::{ColId, Db, Options};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Lock marker ParityDB keeps in its directory
const LOCK_FILE: &str = "lock";

/// Explorer index storage
pub struct IndexStore {
    db: Db,
    writer: Mutex<()>,
    path: PathBuf,
    #[cfg(test)]
    failing_commits: std::sync::atomic::AtomicUsize,
}

impl IndexStore {
    /// Open the index store, creating it if needed.
    ///
    /// A lock marker left behind by an unclean shutdown is removed first. The
    /// directory must not be shared between processes.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref();
        if !path.exists() {
            std::fs::create_dir_all(path)?;
        }
        clear_stale_lock(path)?;

        let opts = Options::with_columns(path, NUM_COLUMNS);
        let db = Db::open_or_create(&opts).map_err(|e| {
            ExplorerError::StoreUnavailable(format!("cannot open {}: {}", path.display(), e))
        })?;

        info!("Index store opened at {}", path.display());

        Ok(Self {
            db,
            writer: Mutex::new(()),
            path: path.to_path_buf(),
            #[cfg(test)]
            failing_commits: std::sync::atomic::AtomicUsize::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Point lookup
    pub fn get(&self, col: ColId, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(col, key)?)
    }

    /// Run `f` with read and write access and commit its writes atomically.
    ///
    /// If `f` fails, or the commit fails, nothing is written.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut StoreTxn<'_>) -> Result<T>,
    {
        let _guard = self.writer.lock();
        let mut txn = StoreTxn {
            db: &self.db,
            changes: BTreeMap::new(),
        };
        let out = f(&mut txn)?;
        let changes = txn.changes.len();
        self.commit(txn.changes)?;
        debug!("Committed store transaction with {} changes", changes);
        Ok(out)
    }

    fn commit(&self, changes: BTreeMap<(ColId, Vec<u8>), Option<Vec<u8>>>) -> Result<()> {
        #[cfg(test)]
        {
            use std::sync::atomic::Ordering;
            if self
                .failing_commits
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ExplorerError::StoreUnavailable("injected commit failure".into()));
            }
        }

        if changes.is_empty() {
            return Ok(());
        }
        self.db
            .commit(changes.into_iter().map(|((col, key), value)| (col, key, value)))
            .map_err(|e| ExplorerError::StoreUnavailable(e.to_string()))
    }

    /// Make the next `count` commits fail
    #[cfg(test)]
    pub(crate) fn inject_commit_failures(&self, count: usize) {
        self.failing_commits
            .store(count, std::sync::atomic::Ordering::SeqCst);
    }

    /// Height of the block with this hash
    pub fn block_height(&self, hash: &Hash) -> Result<Option<u64>> {
        self.get(COL_BLOCK_INDEX, hash)?
            .map(|bytes| schema::decode_u64(&bytes))
            .transpose()
    }

    /// Height and in-block index of the transaction with this hash
    pub fn tx_location(&self, hash: &Hash) -> Result<Option<(u64, u32)>> {
        self.get(COL_TX_INDEX, hash)?
            .map(|bytes| schema::decode_tx_location(&bytes))
            .transpose()
    }

    /// Indexed blocks produced by `address`, 0 if none
    pub fn formulator_block_count(&self, address: &str) -> Result<u64> {
        match self.get(COL_FORMULATORS, &schema::formulator_key(address))? {
            Some(bytes) => schema::decode_u64(&bytes),
            None => Ok(0),
        }
    }

    /// Persisted snapshot, default when the store is fresh
    pub fn load_snapshot(&self) -> Result<ChainSnapshot> {
        let mut snapshot = match self.get(COL_METADATA, keys::CHAIN_SNAPSHOT_KEY)? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => ChainSnapshot::default(),
        };
        if let Some(bytes) = self.get(COL_METADATA, keys::MAX_ACTIVITY_KEY)? {
            let max_activity = schema::decode_u64(&bytes)?;
            if max_activity != snapshot.max_activity_per_tick {
                warn!(
                    "Snapshot max activity {} disagrees with stored {}, keeping the larger",
                    snapshot.max_activity_per_tick, max_activity
                );
                snapshot.max_activity_per_tick = snapshot.max_activity_per_tick.max(max_activity);
            }
        }
        Ok(snapshot)
    }

    /// Historical snapshot version, `None` once pruned
    pub fn snapshot_version(&self, version: u64) -> Result<Option<ChainSnapshot>> {
        match self.get(COL_SNAPSHOTS, &schema::snapshot_key(version))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Range of snapshot versions currently retained, as `(floor, next)`
    pub fn snapshot_versions(&self) -> Result<(u64, u64)> {
        let floor = self.get_u64(keys::SNAPSHOT_FLOOR_KEY)?.unwrap_or(0);
        let next = self.get_u64(keys::SNAPSHOT_SEQ_KEY)?.unwrap_or(0);
        Ok((floor, next))
    }

    /// Delete up to `chunk` obsolete snapshot versions.
    ///
    /// Returns `true` while more obsolete versions remain.
    pub fn prune_snapshot_history(&self, retention: u64, chunk: usize) -> Result<bool> {
        self.transaction(|txn| {
            let next = txn.get_u64(COL_METADATA, keys::SNAPSHOT_SEQ_KEY)?.unwrap_or(0);
            let floor = txn.get_u64(COL_METADATA, keys::SNAPSHOT_FLOOR_KEY)?.unwrap_or(0);
            let cutoff = next.saturating_sub(retention);
            if floor >= cutoff {
                return Ok(false);
            }

            let end = cutoff.min(floor.saturating_add(chunk as u64));
            for version in floor..end {
                txn.delete(COL_SNAPSHOTS, schema::snapshot_key(version));
            }
            txn.set(COL_METADATA, keys::SNAPSHOT_FLOOR_KEY.to_vec(), schema::encode_u64(end));
            debug!("Pruned snapshot versions {}..{}", floor, end);
            Ok(end < cutoff)
        })
    }

    fn get_u64(&self, key: &[u8]) -> Result<Option<u64>> {
        self.get(COL_METADATA, key)?
            .map(|bytes| schema::decode_u64(&bytes))
            .transpose()
    }
}

/// Pending writes of one store transaction.
///
/// Reads see the transaction's own writes first.
pub struct StoreTxn<'a> {
    db: &'a Db,
    changes: BTreeMap<(ColId, Vec<u8>), Option<Vec<u8>>>,
}

impl StoreTxn<'_> {
    pub fn get(&self, col: ColId, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(pending) = self.changes.get(&(col, key.to_vec())) {
            return Ok(pending.clone());
        }
        Ok(self.db.get(col, key)?)
    }

    pub fn set(&mut self, col: ColId, key: Vec<u8>, value: Vec<u8>) {
        self.changes.insert((col, key), Some(value));
    }

    pub fn delete(&mut self, col: ColId, key: Vec<u8>) {
        self.changes.insert((col, key), None);
    }

    fn get_u64(&self, col: ColId, key: &[u8]) -> Result<Option<u64>> {
        self.get(col, key)?
            .map(|bytes| schema::decode_u64(&bytes))
            .transpose()
    }

    /// Record a block's height, returning `false` when it was already
    /// recorded at that height
    pub fn put_block_location(&mut self, hash: &Hash, height: u64) -> Result<bool> {
        let value = schema::encode_u64(height);
        if self.get(COL_BLOCK_INDEX, hash)?.as_deref() == Some(value.as_slice()) {
            return Ok(false);
        }
        self.set(COL_BLOCK_INDEX, hash.to_vec(), value);
        Ok(true)
    }

    pub fn put_tx_location(&mut self, hash: &Hash, height: u64, index: u32) {
        self.set(
            COL_TX_INDEX,
            hash.to_vec(),
            schema::encode_tx_location(height, index),
        );
    }

    /// Add one block to the formulator's counter, returning the new count
    pub fn increment_formulator(&mut self, address: &str) -> Result<u64> {
        let key = schema::formulator_key(address);
        let count = self.get_u64(COL_FORMULATORS, &key)?.unwrap_or(0) + 1;
        self.set(COL_FORMULATORS, key, schema::encode_u64(count));
        Ok(count)
    }

    /// Write the current snapshot and append it to the snapshot history
    pub fn put_snapshot(&mut self, snapshot: &ChainSnapshot) -> Result<()> {
        let value = serde_json::to_vec(snapshot)?;
        let version = self
            .get_u64(COL_METADATA, keys::SNAPSHOT_SEQ_KEY)?
            .unwrap_or(0);

        self.set(COL_METADATA, keys::CHAIN_SNAPSHOT_KEY.to_vec(), value.clone());
        self.set(COL_SNAPSHOTS, schema::snapshot_key(version), value);
        self.set(
            COL_METADATA,
            keys::SNAPSHOT_SEQ_KEY.to_vec(),
            schema::encode_u64(version + 1),
        );
        self.set(
            COL_METADATA,
            keys::MAX_ACTIVITY_KEY.to_vec(),
            schema::encode_u64(snapshot.max_activity_per_tick),
        );
        Ok(())
    }
}

/// Remove a lock marker left by a process that no longer holds it.
///
/// A marker still locked by a live handle means the store is in use.
fn clear_stale_lock(path: &Path) -> Result<()> {
    let lock_path = path.join(LOCK_FILE);
    let marker = match std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&lock_path)
    {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if let Err(e) = marker.try_lock_exclusive() {
        return Err(ExplorerError::StoreUnavailable(format!(
            "{} is in use by another handle: {}",
            path.display(),
            e
        )));
    }
    std::fs::remove_file(&lock_path)?;
    warn!("Removed stale lock marker {}", lock_path.display());
    Ok(())
}
