//! Transactional embedded key-value store backing a shard.
//!
//! One [`ShardStore`] owns one `redb` database file (`db` in the shard
//! directory) with two tables: `points` holds the per-point sub-entries laid
//! out by the codec, `internal` holds the entry-point id and the point
//! counter. redb gives the concurrency model the shard relies on: a single
//! write transaction at a time, any number of read transactions over a
//! consistent snapshot, and atomic commit.
//!
//! Transaction handles are explicit. A [`WriteTxn`] that is dropped without
//! [`WriteTxn::commit`] rolls back, so `?`-propagation out of a mutating
//! operation never leaves partial state behind.

use crate::error::{Error, Result};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::Path;
use std::time::{Duration, Instant};

const POINTS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("points");
const INTERNAL_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("internal");

/// File name of the store inside a shard directory.
pub const DB_FILE_NAME: &str = "db";

/// Key of the entry-point id in the `internal` table.
pub const START_ID_KEY: &[u8] = b"startId";

/// Key of the user-point counter in the `internal` table.
pub const POINT_COUNT_KEY: &[u8] = b"pointCount";

/// How long `open` keeps retrying while another process holds the file lock.
pub const OPEN_TIMEOUT: Duration = Duration::from_secs(60);

const OPEN_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Read access to the two buckets of a shard store, implemented by both
/// transaction handles. All returned bytes are owned copies, valid beyond the
/// transaction's lifetime.
pub trait BucketRead {
    /// Look up an entry in the `points` bucket.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Look up an entry in the `internal` bucket.
    fn get_internal(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Cursor over every entry of the `points` bucket in key order.
    fn for_each_point_entry(&self, f: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>) -> Result<()>;
}

/// Size statistics for the `points` bucket.
#[derive(Debug, Clone, Copy, Default)]
pub struct BucketStats {
    /// Bytes allocated in the file for the bucket, including fragmentation.
    pub allocated_bytes: u64,
    /// Bytes actually occupied by keys, values and tree metadata.
    pub in_use_bytes: u64,
}

/// A shard's on-disk store.
pub struct ShardStore {
    db: Database,
}

impl ShardStore {
    /// Open (or create) the store under `shard_dir`, blocking up to
    /// [`OPEN_TIMEOUT`] while another handle holds the file lock. Creates the
    /// two buckets if this is a fresh file.
    pub fn open(shard_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(shard_dir)?;
        let path = shard_dir.join(DB_FILE_NAME);
        let deadline = Instant::now() + OPEN_TIMEOUT;
        let db = loop {
            match Database::create(&path) {
                Ok(db) => break db,
                // Same-process double open, or another process holds the
                // file lock: keep retrying until the deadline.
                Err(redb::DatabaseError::DatabaseAlreadyOpen) => {}
                Err(redb::DatabaseError::Storage(redb::StorageError::Io(ref io)))
                    if io.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(err) => return Err(err.into()),
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "could not acquire shard file lock on {} within {:?}",
                    path.display(),
                    OPEN_TIMEOUT
                )));
            }
            std::thread::sleep(OPEN_RETRY_DELAY);
        };
        let store = Self { db };
        // Materialize both tables so read transactions never race table creation.
        let txn = store.begin_write()?;
        txn.commit()?;
        Ok(store)
    }

    pub fn begin_read(&self) -> Result<ReadTxn> {
        Ok(ReadTxn {
            txn: self.db.begin_read()?,
        })
    }

    /// Begin the store's single write transaction; blocks while another write
    /// transaction is in flight.
    pub fn begin_write(&self) -> Result<WriteTxn> {
        let txn = self.db.begin_write()?;
        // Opening the tables creates them on first use.
        txn.open_table(POINTS_TABLE)?;
        txn.open_table(INTERNAL_TABLE)?;
        Ok(WriteTxn { txn })
    }
}

/// Snapshot read transaction.
pub struct ReadTxn {
    txn: redb::ReadTransaction,
}

impl ReadTxn {
    /// Size statistics of the `points` bucket.
    pub fn points_stats(&self) -> Result<BucketStats> {
        let table = self.txn.open_table(POINTS_TABLE)?;
        let stats = table.stats()?;
        let in_use = stats.stored_bytes() + stats.metadata_bytes();
        Ok(BucketStats {
            allocated_bytes: in_use + stats.fragmented_bytes(),
            in_use_bytes: in_use,
        })
    }
}

impl BucketRead for ReadTxn {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let table = self.txn.open_table(POINTS_TABLE)?;
        Ok(table.get(key)?.map(|guard| guard.value().to_vec()))
    }

    fn get_internal(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let table = self.txn.open_table(INTERNAL_TABLE)?;
        Ok(table.get(key)?.map(|guard| guard.value().to_vec()))
    }

    fn for_each_point_entry(&self, f: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>) -> Result<()> {
        let table = self.txn.open_table(POINTS_TABLE)?;
        for entry in table.range::<&[u8]>(..)? {
            let (key, value) = entry?;
            f(key.value(), value.value())?;
        }
        Ok(())
    }
}

/// The store's single write transaction. Sees its own uncommitted writes;
/// dropped without `commit` it rolls back.
pub struct WriteTxn {
    txn: redb::WriteTransaction,
}

impl WriteTxn {
    /// Write an entry into the `points` bucket.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut table = self.txn.open_table(POINTS_TABLE)?;
        table.insert(key, value)?;
        Ok(())
    }

    /// Remove an entry from the `points` bucket. Missing keys are a no-op.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let mut table = self.txn.open_table(POINTS_TABLE)?;
        table.remove(key)?;
        Ok(())
    }

    /// Write an entry into the `internal` bucket.
    pub fn put_internal(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut table = self.txn.open_table(INTERNAL_TABLE)?;
        table.insert(key, value)?;
        Ok(())
    }

    /// Atomically publish every write of this transaction.
    pub fn commit(self) -> Result<()> {
        self.txn.commit()?;
        Ok(())
    }

    /// Discard every write of this transaction. Equivalent to dropping the
    /// handle; provided for explicit call sites.
    pub fn abort(self) -> Result<()> {
        self.txn.abort()?;
        Ok(())
    }
}

impl BucketRead for WriteTxn {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let table = self.txn.open_table(POINTS_TABLE)?;
        let result = table.get(key)?.map(|guard| guard.value().to_vec());
        Ok(result)
    }

    fn get_internal(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let table = self.txn.open_table(INTERNAL_TABLE)?;
        let result = table.get(key)?.map(|guard| guard.value().to_vec());
        Ok(result)
    }

    fn for_each_point_entry(&self, f: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>) -> Result<()> {
        let table = self.txn.open_table(POINTS_TABLE)?;
        for entry in table.range::<&[u8]>(..)? {
            let (key, value) = entry?;
            f(key.value(), value.value())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_creates_buckets() {
        let dir = tempdir().unwrap();
        let store = ShardStore::open(dir.path()).unwrap();
        let txn = store.begin_read().unwrap();
        assert!(txn.get(b"missing").unwrap().is_none());
        assert!(txn.get_internal(START_ID_KEY).unwrap().is_none());
    }

    #[test]
    fn test_write_read_roundtrip() {
        let dir = tempdir().unwrap();
        let store = ShardStore::open(dir.path()).unwrap();

        let txn = store.begin_write().unwrap();
        txn.put(b"k1", b"v1").unwrap();
        txn.put_internal(POINT_COUNT_KEY, &1i64.to_le_bytes()).unwrap();
        txn.commit().unwrap();

        let txn = store.begin_read().unwrap();
        assert_eq!(txn.get(b"k1").unwrap().unwrap(), b"v1");
        assert_eq!(
            txn.get_internal(POINT_COUNT_KEY).unwrap().unwrap(),
            1i64.to_le_bytes()
        );
    }

    #[test]
    fn test_drop_without_commit_rolls_back() {
        let dir = tempdir().unwrap();
        let store = ShardStore::open(dir.path()).unwrap();

        {
            let txn = store.begin_write().unwrap();
            txn.put(b"doomed", b"x").unwrap();
            // Dropped here without commit.
        }

        let txn = store.begin_read().unwrap();
        assert!(txn.get(b"doomed").unwrap().is_none());
    }

    #[test]
    fn test_write_txn_sees_own_writes() {
        let dir = tempdir().unwrap();
        let store = ShardStore::open(dir.path()).unwrap();

        let txn = store.begin_write().unwrap();
        txn.put(b"k", b"v").unwrap();
        assert_eq!(txn.get(b"k").unwrap().unwrap(), b"v");
        txn.abort().unwrap();
    }

    #[test]
    fn test_readers_see_snapshot() {
        let dir = tempdir().unwrap();
        let store = ShardStore::open(dir.path()).unwrap();

        let w = store.begin_write().unwrap();
        w.put(b"k", b"v1").unwrap();
        w.commit().unwrap();

        let reader = store.begin_read().unwrap();
        let w = store.begin_write().unwrap();
        w.put(b"k", b"v2").unwrap();
        w.commit().unwrap();

        // The old reader still sees the state at its start.
        assert_eq!(reader.get(b"k").unwrap().unwrap(), b"v1");
        // A new reader sees the committed write.
        let fresh = store.begin_read().unwrap();
        assert_eq!(fresh.get(b"k").unwrap().unwrap(), b"v2");
    }

    #[test]
    fn test_cursor_in_key_order() {
        let dir = tempdir().unwrap();
        let store = ShardStore::open(dir.path()).unwrap();

        let txn = store.begin_write().unwrap();
        txn.put(b"b", b"2").unwrap();
        txn.put(b"a", b"1").unwrap();
        txn.put(b"c", b"3").unwrap();
        txn.commit().unwrap();

        let txn = store.begin_read().unwrap();
        let mut keys = Vec::new();
        txn.for_each_point_entry(&mut |k, _| {
            keys.push(k.to_vec());
            Ok(())
        })
        .unwrap();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = ShardStore::open(dir.path()).unwrap();
            let txn = store.begin_write().unwrap();
            txn.put(b"k", b"v").unwrap();
            txn.commit().unwrap();
        }
        let store = ShardStore::open(dir.path()).unwrap();
        let txn = store.begin_read().unwrap();
        assert_eq!(txn.get(b"k").unwrap().unwrap(), b"v");
    }

    #[test]
    fn test_stats_grow_with_data() {
        let dir = tempdir().unwrap();
        let store = ShardStore::open(dir.path()).unwrap();

        let empty = store.begin_read().unwrap().points_stats().unwrap();

        let txn = store.begin_write().unwrap();
        for i in 0u32..64 {
            txn.put(&i.to_be_bytes(), &[0u8; 512]).unwrap();
        }
        txn.commit().unwrap();

        let full = store.begin_read().unwrap().points_stats().unwrap();
        assert!(full.in_use_bytes > empty.in_use_bytes);
        assert!(full.allocated_bytes >= full.in_use_bytes);
    }
}
