//! redb-backed implementation of the ordered KV capability.
//!
//! One table keyed by raw bytes holds the whole keyspace; the engine's
//! key-kind tags partition it. redb commits are atomic and fsynced, which
//! carries the write-batch contract directly. The write-ahead-log directory
//! from the engine layout is created and reserved: redb journals inside its
//! main file, so nothing is stored there today.

use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use redb::backends::InMemoryBackend;
use redb::{Builder, Database, ReadableTable, TableDefinition};

use crate::batch::{Mutation, WriteBatch};
use crate::error::{Error, Result};
use crate::store::KvStore;

const KV_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("logstead");

/// Name of the database file inside the data directory.
pub const DATA_FILE: &str = "logstead.redb";

/// Ordered KV store over redb.
///
/// The lock around the database exists solely for
/// [`compaction`](KvStore::compaction), which needs exclusive access;
/// reads and batch commits take the shared side and redb serializes
/// writers internally.
pub struct RedbKv {
    db: RwLock<Database>,
    closed: AtomicBool,
}

impl RedbKv {
    /// Opens or creates a store under `dir`, with `wal_dir` reserved for
    /// write-ahead state.
    pub fn open(dir: impl AsRef<Path>, wal_dir: impl AsRef<Path>) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        std::fs::create_dir_all(wal_dir.as_ref())?;
        let path = dir.as_ref().join(DATA_FILE);
        let db = Database::create(&path).map_err(Error::backend)?;
        tracing::debug!(path = %path.display(), "opened redb store");
        Self::init(db)
    }

    /// Creates a store backed by memory only. This is the test filesystem:
    /// same engine, nothing touches disk.
    pub fn in_memory() -> Result<Self> {
        let db = Builder::new()
            .create_with_backend(InMemoryBackend::new())
            .map_err(Error::backend)?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self> {
        // Materialize the table so later read transactions never observe a
        // missing-table state on a fresh store.
        let txn = db.begin_write().map_err(Error::backend)?;
        {
            let _table = txn.open_table(KV_TABLE).map_err(Error::backend)?;
        }
        txn.commit().map_err(Error::backend)?;

        Ok(Self { db: RwLock::new(db), closed: AtomicBool::new(false) })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

impl KvStore for RedbKv {
    fn name(&self) -> &'static str {
        "redb"
    }

    fn get_value(
        &self,
        key: &[u8],
        op: &mut dyn FnMut(Option<&[u8]>) -> Result<()>,
    ) -> Result<()> {
        self.ensure_open()?;
        let db = self.db.read();
        let txn = db.begin_read().map_err(Error::backend)?;
        let table = txn.open_table(KV_TABLE).map_err(Error::backend)?;
        match table.get(key).map_err(Error::backend)? {
            Some(guard) => op(Some(guard.value())),
            None => op(None),
        }
    }

    fn iterate_value(
        &self,
        first: &[u8],
        last: &[u8],
        inclusive: bool,
        op: &mut dyn FnMut(&[u8], &[u8]) -> Result<bool>,
    ) -> Result<()> {
        self.ensure_open()?;
        let db = self.db.read();
        let txn = db.begin_read().map_err(Error::backend)?;
        let table = txn.open_table(KV_TABLE).map_err(Error::backend)?;

        let upper = if inclusive { Bound::Included(last) } else { Bound::Excluded(last) };
        let range = table
            .range::<&[u8]>((Bound::Included(first), upper))
            .map_err(Error::backend)?;
        for item in range {
            let (key, value) = item.map_err(Error::backend)?;
            if !op(key.value(), value.value())? {
                break;
            }
        }
        Ok(())
    }

    fn commit_write_batch(&self, wb: WriteBatch) -> Result<()> {
        self.ensure_open()?;
        let db = self.db.read();
        let txn = db.begin_write().map_err(Error::backend)?;
        {
            let mut table = txn.open_table(KV_TABLE).map_err(Error::backend)?;
            for mutation in wb.mutations() {
                match mutation {
                    Mutation::Put { key, value } => {
                        table
                            .insert(key.as_slice(), value.as_slice())
                            .map_err(Error::backend)?;
                    }
                    Mutation::Delete { key } => {
                        table.remove(key.as_slice()).map_err(Error::backend)?;
                    }
                }
            }
        }
        txn.commit().map_err(Error::backend)
    }

    fn delete_value(&self, key: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let db = self.db.read();
        let txn = db.begin_write().map_err(Error::backend)?;
        {
            let mut table = txn.open_table(KV_TABLE).map_err(Error::backend)?;
            table.remove(key).map_err(Error::backend)?;
        }
        txn.commit().map_err(Error::backend)
    }

    fn remove_entries(&self, first: &[u8], last: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let db = self.db.read();
        let txn = db.begin_write().map_err(Error::backend)?;
        {
            let mut table = txn.open_table(KV_TABLE).map_err(Error::backend)?;
            let doomed: Vec<Vec<u8>> = {
                let range = table
                    .range::<&[u8]>((Bound::Included(first), Bound::Excluded(last)))
                    .map_err(Error::backend)?;
                let mut keys = Vec::new();
                for item in range {
                    let (key, _) = item.map_err(Error::backend)?;
                    keys.push(key.value().to_vec());
                }
                keys
            };
            for key in doomed {
                table.remove(key.as_slice()).map_err(Error::backend)?;
            }
        }
        txn.commit().map_err(Error::backend)
    }

    fn compaction(&self, _first: &[u8], _last: &[u8]) -> Result<()> {
        self.ensure_open()?;
        // redb compacts the whole file; the requested range is subsumed.
        let mut db = self.db.write();
        let reclaimed = db.compact().map_err(Error::backend)?;
        tracing::debug!(reclaimed, "compacted redb store");
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::Closed);
        }
        Ok(())
    }
}
