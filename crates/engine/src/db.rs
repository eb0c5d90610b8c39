//! The log storage engine.
//!
//! `LogDb` owns the KV store handle and composes every durable mutation
//! into write batches. All records for one `save_raft_state` call commit
//! atomically: readers observe either the pre-image or the complete
//! post-image.
//!
//! # Cache coherence
//!
//! State and max-index caches are updated while a batch is being built,
//! before the commit. When a commit fails the touched replicas are
//! invalidated, so the cache never claims more than disk holds; the Raft
//! layer's retry then repopulates it from durable reads.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use logstead_kv::{KvStore, RedbKv, WriteBatch};
use logstead_types::{
    codec, Bootstrap, ClusterId, NodeId, NodeInfo, RaftState, Snapshot, StateMachineType, Update,
};

use crate::cache::RdbCache;
use crate::context::SaveContext;
use crate::entries::{BatchedEntries, EntryManager, PlainEntries};
use crate::error::{Error, Result};
use crate::key;
use crate::pool::KeyPool;

/// Upper bound on an encoded `RaftState` record (three u64 varints).
const MAX_STATE_RECORD_SIZE: usize = 40;

/// Raft state composed for recovery: the persisted state plus the
/// available entry range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaRaftState {
    /// Persisted term, vote, and commit.
    pub state: RaftState,
    /// First available entry index.
    pub first_index: u64,
    /// Number of contiguous entries from `first_index`.
    pub entry_count: u64,
}

/// Persistent log storage shared by every Raft replica in the process.
///
/// Safe for concurrent use; each replica serializes its own saves above
/// this layer. All operations except `open` require the engine to be open,
/// and using a closed engine is a programmer error.
pub struct LogDb {
    cache: RdbCache,
    pool: Arc<KeyPool>,
    kvs: Arc<dyn KvStore>,
    entries: Box<dyn EntryManager>,
    closed: AtomicBool,
}

impl LogDb {
    /// Opens or creates a store under `dir`, with write-ahead state under
    /// `wal_dir`. `batched` selects the entry layout; a store must always
    /// be reopened with the layout it was created with, which the runtime
    /// enforces through [`binary_format`](Self::binary_format).
    pub fn open(
        dir: impl AsRef<Path>,
        wal_dir: impl AsRef<Path>,
        batched: bool,
    ) -> Result<Self> {
        let kvs = RedbKv::open(dir, wal_dir).map_err(Error::kv)?;
        Self::with_store(Arc::new(kvs), batched)
    }

    /// Opens a memory-backed store. Nothing touches disk; for tests.
    pub fn open_in_memory(batched: bool) -> Result<Self> {
        let kvs = RedbKv::in_memory().map_err(Error::kv)?;
        Self::with_store(Arc::new(kvs), batched)
    }

    /// Builds the engine over a caller-supplied KV store.
    pub fn with_store(kvs: Arc<dyn KvStore>, batched: bool) -> Result<Self> {
        let pool = Arc::new(KeyPool::new());
        let entries: Box<dyn EntryManager> = if batched {
            Box::new(BatchedEntries::new(Arc::clone(&kvs), Arc::clone(&pool)))
        } else {
            Box::new(PlainEntries::new(Arc::clone(&kvs), Arc::clone(&pool)))
        };
        let db = Self {
            cache: RdbCache::new(),
            pool,
            kvs,
            entries,
            closed: AtomicBool::new(false),
        };
        let populated = db.has_entry_records()?;
        tracing::info!(
            backend = db.kvs.name(),
            binary_format = db.binary_format(),
            populated,
            "opened raft log store"
        );
        Ok(db)
    }

    /// Closes the underlying KV store. A close failure is fatal: the store
    /// may have unsynced state that can no longer be reasoned about.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.kvs.close() {
            panic!("failed to close key-value store: {e}");
        }
    }

    fn ensure_open(&self) {
        assert!(!self.closed.load(Ordering::Acquire), "log store used after close");
    }

    /// The entry layout's on-disk format number. The runtime persists it
    /// elsewhere and refuses to open a store with a mismatched layout.
    pub fn binary_format(&self) -> u32 {
        self.entries.binary_format()
    }

    /// Whether any entry record exists in the store, across all replicas.
    ///
    /// Scanned once at open: a populated store must go through recovery,
    /// an empty one is fresh.
    pub fn has_entry_records(&self) -> Result<bool> {
        let mut fk = self.pool.get();
        let mut lk = self.pool.get();
        fk.set_entry_key(0, 0, 0);
        lk.set_entry_key(u64::MAX, u64::MAX, u64::MAX);
        let mut located = false;
        self.kvs
            .iterate_value(fk.as_slice(), lk.as_slice(), true, &mut |_, _| {
                located = true;
                Ok(false)
            })
            .map_err(Error::kv)?;
        Ok(located)
    }

    /// Lists every replica with a bootstrap record, ascending by
    /// `(cluster_id, node_id)`.
    pub fn list_node_info(&self) -> Result<Vec<NodeInfo>> {
        self.ensure_open();
        let mut fk = self.pool.get();
        let mut lk = self.pool.get();
        fk.set_bootstrap_key(0, 0);
        lk.set_bootstrap_key(u64::MAX, u64::MAX);

        let mut infos = Vec::new();
        let mut malformed = false;
        self.kvs
            .iterate_value(fk.as_slice(), lk.as_slice(), true, &mut |key, _| {
                match key::parse_replica(key) {
                    Some((cluster_id, node_id)) => {
                        infos.push(NodeInfo { cluster_id, node_id });
                        Ok(true)
                    }
                    None => {
                        malformed = true;
                        Ok(false)
                    }
                }
            })
            .map_err(Error::kv)?;
        if malformed {
            return Err(Error::corruption("malformed bootstrap key"));
        }
        Ok(infos)
    }

    /// Persists a slice of Raft updates as one atomic write batch.
    ///
    /// For each update, in order: a changed non-empty state is recorded, a
    /// snapshot is recorded together with its max-index, and finally all
    /// entries are appended through the entry manager, advancing each
    /// replica's max-index to the highest recorded entry. Empty batches
    /// are not committed.
    ///
    /// # Panics
    ///
    /// Panics when an update carries both a snapshot and entries and the
    /// snapshot index exceeds the last entry's index; such an update is a
    /// protocol violation by the Raft layer.
    pub fn save_raft_state(&self, updates: &[Update], ctx: &mut SaveContext) -> Result<()> {
        self.ensure_open();
        let mut wb = self.kvs.get_write_batch();
        for ud in updates {
            self.record_state(ud.cluster_id, ud.node_id, ud.state, &mut wb, ctx)?;
            if let Some(snapshot) = &ud.snapshot {
                if !snapshot.is_empty() {
                    if let Some(last) = ud.entries_to_save.last() {
                        assert!(
                            snapshot.index <= last.index,
                            "snapshot index {} beyond last saved entry {}",
                            snapshot.index,
                            last.index
                        );
                    }
                    self.record_snapshot(&mut wb, ud.cluster_id, ud.node_id, snapshot)?;
                    self.set_max_index(&mut wb, ud.cluster_id, ud.node_id, snapshot.index, ctx);
                }
            }
        }
        self.save_entries(updates, &mut wb, ctx)?;
        if wb.count() > 0 {
            if let Err(source) = self.kvs.commit_write_batch(wb) {
                // the cache was updated while building the batch; a failed
                // commit must not leave it ahead of disk
                for ud in updates {
                    self.cache.invalidate(ud.cluster_id, ud.node_id);
                }
                tracing::warn!(error = %source, "raft state commit failed; cache invalidated");
                return Err(Error::kv(source));
            }
        }
        Ok(())
    }

    /// Transplants a snapshot obtained from another node into this store.
    ///
    /// In one atomic batch: removes the replica's state, bootstrap,
    /// max-index, and every snapshot at or above the imported index, then
    /// writes a joining bootstrap, a state carrying the snapshot's term
    /// and commit, and the snapshot itself.
    ///
    /// # Panics
    ///
    /// Panics when the snapshot's state-machine type is unknown.
    pub fn import_snapshot(&self, snapshot: &Snapshot, node_id: NodeId) -> Result<()> {
        self.ensure_open();
        assert!(
            snapshot.smtype != StateMachineType::Unknown,
            "cannot import snapshot with unknown state machine type"
        );
        let cluster_id = snapshot.cluster_id;
        let existing = self.list_snapshots(cluster_id, node_id)?;
        let superseded: Vec<Snapshot> =
            existing.into_iter().filter(|s| s.index >= snapshot.index).collect();

        let bootstrap = Bootstrap {
            join: true,
            smtype: snapshot.smtype,
            addresses: BTreeMap::new(),
        };
        let state = RaftState { term: snapshot.term, vote: 0, commit: snapshot.index };

        let mut wb = self.kvs.get_write_batch();
        self.record_remove_node_data(&mut wb, &superseded, cluster_id, node_id);
        self.record_bootstrap(&mut wb, cluster_id, node_id, &bootstrap)?;
        self.record_state_value(&mut wb, cluster_id, node_id, state)?;
        self.record_snapshot(&mut wb, cluster_id, node_id, snapshot)?;

        if let Err(source) = self.kvs.commit_write_batch(wb) {
            self.cache.invalidate(cluster_id, node_id);
            return Err(Error::kv(source));
        }
        // the replica's history was replaced wholesale; drop stale cache
        // values before adopting the transplanted state
        self.cache.invalidate(cluster_id, node_id);
        self.cache.set_state(cluster_id, node_id, state);
        tracing::info!(cluster_id, node_id, index = snapshot.index, "imported snapshot");
        Ok(())
    }

    /// Writes a replica's bootstrap record.
    pub fn save_bootstrap_info(
        &self,
        cluster_id: ClusterId,
        node_id: NodeId,
        bootstrap: &Bootstrap,
    ) -> Result<()> {
        self.ensure_open();
        let mut wb = self.kvs.get_write_batch();
        self.record_bootstrap(&mut wb, cluster_id, node_id, bootstrap)?;
        self.kvs.commit_write_batch(wb).map_err(Error::kv)
    }

    /// Reads a replica's bootstrap record.
    pub fn get_bootstrap_info(
        &self,
        cluster_id: ClusterId,
        node_id: NodeId,
    ) -> Result<Bootstrap> {
        self.ensure_open();
        let mut key = self.pool.get();
        key.set_bootstrap_key(cluster_id, node_id);
        self.read_record::<Bootstrap>(key.as_slice())?
            .ok_or(Error::NoBootstrapInfo { cluster_id, node_id })
    }

    /// Persists every snapshot carried by `updates` in one batch. Updates
    /// without a snapshot are skipped; an all-empty slice commits nothing.
    pub fn save_snapshots(&self, updates: &[Update]) -> Result<()> {
        self.ensure_open();
        let mut wb = self.kvs.get_write_batch();
        for ud in updates {
            if let Some(snapshot) = &ud.snapshot {
                if !snapshot.is_empty() {
                    self.record_snapshot(&mut wb, ud.cluster_id, ud.node_id, snapshot)?;
                }
            }
        }
        if wb.count() > 0 {
            return self.kvs.commit_write_batch(wb).map_err(Error::kv);
        }
        Ok(())
    }

    /// Deletes the snapshot record at `snapshot_index`.
    pub fn delete_snapshot(
        &self,
        cluster_id: ClusterId,
        node_id: NodeId,
        snapshot_index: u64,
    ) -> Result<()> {
        self.ensure_open();
        let mut key = self.pool.get();
        key.set_snapshot_key(cluster_id, node_id, snapshot_index);
        self.kvs.delete_value(key.as_slice()).map_err(Error::kv)
    }

    /// Lists a replica's snapshots in ascending index order.
    pub fn list_snapshots(
        &self,
        cluster_id: ClusterId,
        node_id: NodeId,
    ) -> Result<Vec<Snapshot>> {
        self.ensure_open();
        let mut fk = self.pool.get();
        let mut lk = self.pool.get();
        fk.set_snapshot_key(cluster_id, node_id, 0);
        lk.set_snapshot_key(cluster_id, node_id, u64::MAX);

        let mut snapshots = Vec::new();
        let mut corrupt: Option<String> = None;
        self.kvs
            .iterate_value(fk.as_slice(), lk.as_slice(), true, &mut |_, data| {
                match codec::decode::<Snapshot>(data) {
                    Ok(snapshot) => {
                        snapshots.push(snapshot);
                        Ok(true)
                    }
                    Err(e) => {
                        corrupt = Some(format!("decode snapshot: {e}"));
                        Ok(false)
                    }
                }
            })
            .map_err(Error::kv)?;
        if let Some(reason) = corrupt {
            return Err(Error::Corruption { reason });
        }
        Ok(snapshots)
    }

    /// Reads the replica's highest durable entry index, consulting the
    /// cache first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSavedLog`] when the replica has no max-index
    /// record.
    pub fn read_max_index(&self, cluster_id: ClusterId, node_id: NodeId) -> Result<u64> {
        self.ensure_open();
        if let Some(cached) = self.cache.max_index(cluster_id, node_id) {
            return Ok(cached);
        }
        let mut key = self.pool.get();
        key.set_max_index_key(cluster_id, node_id);
        let mut raw: Option<Vec<u8>> = None;
        self.kvs
            .get_value(key.as_slice(), &mut |data| {
                raw = data.map(<[u8]>::to_vec);
                Ok(())
            })
            .map_err(Error::kv)?;
        let Some(raw) = raw else {
            return Err(Error::NoSavedLog { cluster_id, node_id });
        };
        let bytes: [u8; 8] = raw
            .as_slice()
            .try_into()
            .map_err(|_| Error::corruption(format!("max-index record has {} bytes", raw.len())))?;
        let max_index = u64::from_be_bytes(bytes);
        self.cache.set_max_index(cluster_id, node_id, max_index);
        Ok(max_index)
    }

    /// Reads the replica's persisted Raft state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSavedLog`] when no state record exists.
    pub fn read_state(&self, cluster_id: ClusterId, node_id: NodeId) -> Result<RaftState> {
        self.ensure_open();
        let mut key = self.pool.get();
        key.set_state_key(cluster_id, node_id);
        self.read_record::<RaftState>(key.as_slice())?
            .ok_or(Error::NoSavedLog { cluster_id, node_id })
    }

    /// Composes the recovery view of a replica: persisted state plus the
    /// available entry range starting from the `last_index` hint. A
    /// replica with no durable entries reports `(last_index, 0)`.
    pub fn read_raft_state(
        &self,
        cluster_id: ClusterId,
        node_id: NodeId,
        last_index: u64,
    ) -> Result<ReplicaRaftState> {
        self.ensure_open();
        let (first_index, entry_count) = match self.read_max_index(cluster_id, node_id) {
            Ok(max_index) => self.entries.entry_range(cluster_id, node_id, last_index, max_index)?,
            Err(Error::NoSavedLog { .. }) => (last_index, 0),
            Err(e) => return Err(e),
        };
        let state = self.read_state(cluster_id, node_id)?;
        Ok(ReplicaRaftState { state, first_index, entry_count })
    }

    /// Appends the entries with indices in `[low, high)` to `ents`,
    /// accumulating their serialized size into `size` up to `max_size`.
    /// Returns the inputs unchanged when the replica has no durable log.
    #[allow(clippy::too_many_arguments)]
    pub fn iterate_entries(
        &self,
        ents: Vec<logstead_types::Entry>,
        size: u64,
        cluster_id: ClusterId,
        node_id: NodeId,
        low: u64,
        high: u64,
        max_size: u64,
    ) -> Result<(Vec<logstead_types::Entry>, u64)> {
        self.ensure_open();
        match self.read_max_index(cluster_id, node_id) {
            Ok(max_index) => self
                .entries
                .iterate(ents, max_index, size, cluster_id, node_id, low, high, max_size),
            Err(Error::NoSavedLog { .. }) => Ok((ents, size)),
            Err(e) => Err(e),
        }
    }

    /// Range-deletes the replica's entries up to and including `index`
    /// (the batched layout keeps a partially covered tail batch).
    pub fn remove_entries_to(
        &self,
        cluster_id: ClusterId,
        node_id: NodeId,
        index: u64,
    ) -> Result<()> {
        self.ensure_open();
        self.entries
            .ranged_op(cluster_id, node_id, index, &mut |fk, lk| self.kvs.remove_entries(fk, lk))
    }

    /// Asks the KV store to reclaim space over the replica's entries up to
    /// `index`. Runs to completion; there is no cancellation.
    pub fn compaction(&self, cluster_id: ClusterId, node_id: NodeId, index: u64) -> Result<()> {
        self.ensure_open();
        self.entries
            .ranged_op(cluster_id, node_id, index, &mut |fk, lk| self.kvs.compaction(fk, lk))
    }

    /// Removes every record belonging to a replica: one delete batch for
    /// state, bootstrap, max-index, and snapshots, then a range delete of
    /// all entries, then compaction over the freed range.
    pub fn remove_node_data(&self, cluster_id: ClusterId, node_id: NodeId) -> Result<()> {
        self.ensure_open();
        let snapshots = self.list_snapshots(cluster_id, node_id)?;
        let mut wb = self.kvs.get_write_batch();
        self.record_remove_node_data(&mut wb, &snapshots, cluster_id, node_id);
        self.kvs.commit_delete_batch(wb).map_err(Error::kv)?;
        self.cache.invalidate(cluster_id, node_id);
        self.remove_entries_to(cluster_id, node_id, u64::MAX)?;
        self.compaction(cluster_id, node_id, u64::MAX)?;
        tracing::info!(cluster_id, node_id, "removed all node data");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Record builders
    // ------------------------------------------------------------------

    fn record_state(
        &self,
        cluster_id: ClusterId,
        node_id: NodeId,
        state: RaftState,
        wb: &mut WriteBatch,
        ctx: &mut SaveContext,
    ) -> Result<()> {
        if state.is_empty() {
            return Ok(());
        }
        if !self.cache.set_state(cluster_id, node_id, state) {
            return Ok(());
        }
        let (key, buf) = ctx.key_and_value(MAX_STATE_RECORD_SIZE);
        key.set_state_key(cluster_id, node_id);
        let data = codec::encode_into(&state, buf)
            .map_err(|e| Error::corruption(format!("encode raft state: {e}")))?;
        wb.put(key.as_slice(), data);
        Ok(())
    }

    /// Unconditional state put, bypassing the dedupe cache. Used when a
    /// replica's history is being replaced rather than advanced.
    fn record_state_value(
        &self,
        wb: &mut WriteBatch,
        cluster_id: ClusterId,
        node_id: NodeId,
        state: RaftState,
    ) -> Result<()> {
        let mut key = self.pool.get();
        key.set_state_key(cluster_id, node_id);
        let data = codec::encode(&state)
            .map_err(|e| Error::corruption(format!("encode raft state: {e}")))?;
        wb.put(key.as_slice(), &data);
        Ok(())
    }

    fn record_bootstrap(
        &self,
        wb: &mut WriteBatch,
        cluster_id: ClusterId,
        node_id: NodeId,
        bootstrap: &Bootstrap,
    ) -> Result<()> {
        let mut key = self.pool.get();
        key.set_bootstrap_key(cluster_id, node_id);
        let data = codec::encode(bootstrap)
            .map_err(|e| Error::corruption(format!("encode bootstrap: {e}")))?;
        wb.put(key.as_slice(), &data);
        Ok(())
    }

    fn record_snapshot(
        &self,
        wb: &mut WriteBatch,
        cluster_id: ClusterId,
        node_id: NodeId,
        snapshot: &Snapshot,
    ) -> Result<()> {
        let mut key = self.pool.get();
        key.set_snapshot_key(cluster_id, node_id, snapshot.index);
        let data = codec::encode(snapshot)
            .map_err(|e| Error::corruption(format!("encode snapshot: {e}")))?;
        wb.put(key.as_slice(), &data);
        Ok(())
    }

    fn record_max_index(
        &self,
        wb: &mut WriteBatch,
        cluster_id: ClusterId,
        node_id: NodeId,
        max_index: u64,
        ctx: &mut SaveContext,
    ) {
        let (key, buf) = ctx.key_and_value(8);
        key.set_max_index_key(cluster_id, node_id);
        buf.copy_from_slice(&max_index.to_be_bytes());
        wb.put(key.as_slice(), buf);
    }

    fn set_max_index(
        &self,
        wb: &mut WriteBatch,
        cluster_id: ClusterId,
        node_id: NodeId,
        max_index: u64,
        ctx: &mut SaveContext,
    ) {
        self.cache.set_max_index(cluster_id, node_id, max_index);
        self.record_max_index(wb, cluster_id, node_id, max_index, ctx);
    }

    fn save_entries(
        &self,
        updates: &[Update],
        wb: &mut WriteBatch,
        ctx: &mut SaveContext,
    ) -> Result<()> {
        for ud in updates {
            if ud.entries_to_save.is_empty() {
                continue;
            }
            let max =
                self.entries.record(wb, ud.cluster_id, ud.node_id, ctx, &ud.entries_to_save)?;
            if max > 0 {
                self.set_max_index(wb, ud.cluster_id, ud.node_id, max, ctx);
            }
        }
        Ok(())
    }

    fn record_remove_node_data(
        &self,
        wb: &mut WriteBatch,
        snapshots: &[Snapshot],
        cluster_id: ClusterId,
        node_id: NodeId,
    ) {
        let mut key = self.pool.get();
        key.set_state_key(cluster_id, node_id);
        wb.delete(key.as_slice());
        key.set_bootstrap_key(cluster_id, node_id);
        wb.delete(key.as_slice());
        key.set_max_index_key(cluster_id, node_id);
        wb.delete(key.as_slice());
        for snapshot in snapshots {
            key.set_snapshot_key(cluster_id, node_id, snapshot.index);
            wb.delete(key.as_slice());
        }
    }

    fn read_record<T: serde::de::DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        let mut decoded: Option<std::result::Result<T, codec::CodecError>> = None;
        self.kvs
            .get_value(key, &mut |data| {
                decoded = data.map(codec::decode);
                Ok(())
            })
            .map_err(Error::kv)?;
        match decoded {
            None => Ok(None),
            Some(Ok(value)) => Ok(Some(value)),
            Some(Err(e)) => Err(Error::corruption(e)),
        }
    }
}

impl std::fmt::Debug for LogDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogDb")
            .field("backend", &self.kvs.name())
            .field("binary_format", &self.binary_format())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}
