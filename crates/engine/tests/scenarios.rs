//! End-to-end scenarios over the full engine, in both entry layouts.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use logstead_engine::{Error, LogDb, SaveContext};
use logstead_kv::{KvStore, Mutation, RedbKv, WriteBatch};
use logstead_types::{
    Bootstrap, Entry, NodeInfo, RaftState, Snapshot, StateMachineType, Update,
};

fn entry(term: u64, index: u64) -> Entry {
    Entry { term, index, cmd: format!("cmd-{index}").into_bytes(), ..Default::default() }
}

fn entries(term: u64, range: std::ops::RangeInclusive<u64>) -> Vec<Entry> {
    range.map(|i| entry(term, i)).collect()
}

fn snapshot(cluster_id: u64, node_id: u64, index: u64, term: u64) -> Snapshot {
    Snapshot {
        cluster_id,
        node_id,
        index,
        term,
        smtype: StateMachineType::Regular,
        filepath: format!("snap-{index}.bin"),
        file_size: 1024,
        files: Vec::new(),
    }
}

fn save_one(db: &LogDb, update: Update) {
    let mut ctx = SaveContext::new();
    db.save_raft_state(&[update], &mut ctx).expect("save raft state");
}

fn both_layouts(test: impl Fn(LogDb)) {
    for batched in [false, true] {
        let db = LogDb::open_in_memory(batched).expect("open in-memory store");
        test(db);
    }
}

#[test]
fn test_save_then_read_state_and_entries() {
    // S1: one update with state and three entries
    both_layouts(|db| {
        let state = RaftState { term: 3, vote: 0, commit: 5 };
        save_one(
            &db,
            Update {
                cluster_id: 1,
                node_id: 2,
                state,
                snapshot: None,
                entries_to_save: entries(3, 1..=3),
            },
        );

        assert_eq!(db.read_state(1, 2).expect("read state"), state);
        assert_eq!(db.read_max_index(1, 2).expect("read max index"), 3);

        let (ents, size) =
            db.iterate_entries(Vec::new(), 0, 1, 2, 1, 4, u64::MAX).expect("iterate entries");
        assert_eq!(ents, entries(3, 1..=3));
        assert!(size > 0);
    });
}

#[test]
fn test_snapshot_save_overwrites_max_index() {
    // S2: a later snapshot-only save pulls the max index back to the
    // snapshot index
    both_layouts(|db| {
        save_one(
            &db,
            Update {
                cluster_id: 1,
                node_id: 2,
                state: RaftState { term: 3, vote: 0, commit: 5 },
                snapshot: None,
                entries_to_save: entries(3, 1..=3),
            },
        );
        save_one(
            &db,
            Update {
                cluster_id: 1,
                node_id: 2,
                snapshot: Some(snapshot(1, 2, 2, 3)),
                ..Default::default()
            },
        );

        let listed = db.list_snapshots(1, 2).expect("list snapshots");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].index, 2);
        assert_eq!(db.read_max_index(1, 2).expect("read max index"), 2);
    });
}

#[test]
fn test_remove_entries_to_keeps_tail() {
    // S3 (plain layout: per-entry removal is exact)
    let db = LogDb::open_in_memory(false).expect("open store");
    save_one(
        &db,
        Update {
            cluster_id: 1,
            node_id: 2,
            state: RaftState { term: 3, vote: 0, commit: 3 },
            snapshot: None,
            entries_to_save: entries(3, 1..=3),
        },
    );

    db.remove_entries_to(1, 2, 1).expect("remove entries");

    let err = db.iterate_entries(Vec::new(), 0, 1, 2, 1, 4, u64::MAX).unwrap_err();
    assert!(matches!(err, Error::Compacted { index: 1 }));

    let (ents, _) =
        db.iterate_entries(Vec::new(), 0, 1, 2, 2, 4, u64::MAX).expect("iterate tail");
    assert_eq!(ents.iter().map(|e| e.index).collect::<Vec<_>>(), vec![2, 3]);
}

#[test]
fn test_import_snapshot_on_empty_store() {
    // S4: transplant a snapshot from another node
    both_layouts(|db| {
        let ss = snapshot(7, 9, 100, 4);
        db.import_snapshot(&ss, 9).expect("import snapshot");

        let bootstrap = db.get_bootstrap_info(7, 9).expect("bootstrap after import");
        assert!(bootstrap.join);
        assert_eq!(bootstrap.smtype, StateMachineType::Regular);

        assert_eq!(
            db.read_state(7, 9).expect("state after import"),
            RaftState { term: 4, vote: 0, commit: 100 }
        );

        let listed = db.list_snapshots(7, 9).expect("list snapshots");
        assert_eq!(listed.iter().map(|s| s.index).collect::<Vec<_>>(), vec![100]);
    });
}

#[test]
fn test_import_snapshot_drops_newer_snapshots() {
    both_layouts(|db| {
        db.save_snapshots(&[
            Update { cluster_id: 7, node_id: 9, snapshot: Some(snapshot(7, 9, 50, 2)), ..Default::default() },
            Update { cluster_id: 7, node_id: 9, snapshot: Some(snapshot(7, 9, 120, 3)), ..Default::default() },
        ])
        .expect("seed snapshots");

        db.import_snapshot(&snapshot(7, 9, 100, 4), 9).expect("import snapshot");

        // the snapshot at 120 was at or above the import and must be gone;
        // the one at 50 survives
        let indexes: Vec<u64> =
            db.list_snapshots(7, 9).expect("list").iter().map(|s| s.index).collect();
        assert_eq!(indexes, vec![50, 100]);
    });
}

#[test]
fn test_log_matching_overlap() {
    // S5: a later term overwrites the overlapping suffix
    both_layouts(|db| {
        save_one(
            &db,
            Update {
                cluster_id: 1,
                node_id: 1,
                state: RaftState { term: 2, vote: 0, commit: 0 },
                snapshot: None,
                entries_to_save: entries(2, 1..=3),
            },
        );
        save_one(
            &db,
            Update {
                cluster_id: 1,
                node_id: 1,
                state: RaftState { term: 3, vote: 0, commit: 0 },
                snapshot: None,
                entries_to_save: entries(3, 2..=4),
            },
        );

        let (ents, _) =
            db.iterate_entries(Vec::new(), 0, 1, 1, 1, 5, u64::MAX).expect("iterate");
        let view: Vec<(u64, u64)> = ents.iter().map(|e| (e.index, e.term)).collect();
        assert_eq!(view, vec![(1, 2), (2, 3), (3, 3), (4, 3)]);
    });
}

#[test]
fn test_parallel_saves_for_distinct_replicas() {
    // S6: two replicas saved from two threads land independently
    let db = Arc::new(LogDb::open_in_memory(true).expect("open store"));

    let handles: Vec<_> = [(1u64, 1u64, 5u64), (1, 2, 9)]
        .into_iter()
        .map(|(cluster_id, node_id, term)| {
            let db = Arc::clone(&db);
            std::thread::spawn(move || {
                let mut ctx = SaveContext::new();
                for round in 1..=20u64 {
                    db.save_raft_state(
                        &[Update {
                            cluster_id,
                            node_id,
                            state: RaftState { term, vote: node_id, commit: round },
                            snapshot: None,
                            entries_to_save: vec![entry(term, round)],
                        }],
                        &mut ctx,
                    )
                    .expect("concurrent save");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("join save thread");
    }

    assert_eq!(
        db.read_state(1, 1).expect("state of replica 1"),
        RaftState { term: 5, vote: 1, commit: 20 }
    );
    assert_eq!(
        db.read_state(1, 2).expect("state of replica 2"),
        RaftState { term: 9, vote: 2, commit: 20 }
    );
    assert_eq!(db.read_max_index(1, 1).expect("max index"), 20);
    assert_eq!(db.read_max_index(1, 2).expect("max index"), 20);
}

#[test]
fn test_remove_node_data_clears_everything() {
    both_layouts(|db| {
        let mut addresses = BTreeMap::new();
        addresses.insert(2, "10.0.0.2:9400".to_string());
        db.save_bootstrap_info(
            1,
            2,
            &Bootstrap { join: false, smtype: StateMachineType::Regular, addresses },
        )
        .expect("save bootstrap");
        save_one(
            &db,
            Update {
                cluster_id: 1,
                node_id: 2,
                state: RaftState { term: 3, vote: 0, commit: 2 },
                snapshot: Some(snapshot(1, 2, 2, 3)),
                entries_to_save: entries(3, 1..=4),
            },
        );

        db.remove_node_data(1, 2).expect("remove node data");

        assert!(db.read_state(1, 2).unwrap_err().is_no_saved_log());
        assert!(db.read_max_index(1, 2).unwrap_err().is_no_saved_log());
        assert!(matches!(
            db.get_bootstrap_info(1, 2),
            Err(Error::NoBootstrapInfo { cluster_id: 1, node_id: 2 })
        ));
        assert!(db.list_snapshots(1, 2).expect("list snapshots").is_empty());

        let (ents, size) =
            db.iterate_entries(Vec::new(), 0, 1, 2, 1, 5, u64::MAX).expect("iterate");
        assert!(ents.is_empty());
        assert_eq!(size, 0);
    });
}

#[test]
fn test_snapshot_listing_is_ascending() {
    both_layouts(|db| {
        for index in [30u64, 10, 20] {
            db.save_snapshots(&[Update {
                cluster_id: 4,
                node_id: 1,
                snapshot: Some(snapshot(4, 1, index, 1)),
                ..Default::default()
            }])
            .expect("save snapshot");
        }
        let indexes: Vec<u64> =
            db.list_snapshots(4, 1).expect("list").iter().map(|s| s.index).collect();
        assert_eq!(indexes, vec![10, 20, 30]);
    });
}

#[test]
fn test_delete_snapshot() {
    both_layouts(|db| {
        db.save_snapshots(&[
            Update { cluster_id: 4, node_id: 1, snapshot: Some(snapshot(4, 1, 10, 1)), ..Default::default() },
            Update { cluster_id: 4, node_id: 1, snapshot: Some(snapshot(4, 1, 20, 1)), ..Default::default() },
        ])
        .expect("save snapshots");

        db.delete_snapshot(4, 1, 10).expect("delete snapshot");

        let indexes: Vec<u64> =
            db.list_snapshots(4, 1).expect("list").iter().map(|s| s.index).collect();
        assert_eq!(indexes, vec![20]);
    });
}

#[test]
fn test_list_node_info_orders_replicas() {
    both_layouts(|db| {
        for (cluster_id, node_id) in [(2u64, 1u64), (1, 3), (1, 1)] {
            db.save_bootstrap_info(cluster_id, node_id, &Bootstrap::default())
                .expect("save bootstrap");
        }
        let infos = db.list_node_info().expect("list node info");
        assert_eq!(
            infos,
            vec![
                NodeInfo { cluster_id: 1, node_id: 1 },
                NodeInfo { cluster_id: 1, node_id: 3 },
                NodeInfo { cluster_id: 2, node_id: 1 },
            ]
        );
    });
}

#[test]
fn test_read_raft_state_composes_range() {
    both_layouts(|db| {
        save_one(
            &db,
            Update {
                cluster_id: 1,
                node_id: 2,
                state: RaftState { term: 2, vote: 0, commit: 6 },
                snapshot: None,
                entries_to_save: entries(2, 1..=6),
            },
        );

        let rs = db.read_raft_state(1, 2, 1).expect("read raft state");
        assert_eq!(rs.state, RaftState { term: 2, vote: 0, commit: 6 });
        assert_eq!(rs.first_index, 1);
        assert_eq!(rs.entry_count, 6);
    });
}

#[test]
fn test_read_raft_state_without_entries_uses_hint() {
    both_layouts(|db| {
        save_one(
            &db,
            Update {
                cluster_id: 1,
                node_id: 2,
                state: RaftState { term: 2, vote: 0, commit: 0 },
                ..Default::default()
            },
        );

        let rs = db.read_raft_state(1, 2, 42).expect("read raft state");
        assert_eq!(rs.first_index, 42);
        assert_eq!(rs.entry_count, 0);
    });
}

#[test]
fn test_iterate_entries_without_log_returns_input() {
    both_layouts(|db| {
        let seed = vec![entry(1, 99)];
        let (ents, size) =
            db.iterate_entries(seed.clone(), 7, 5, 5, 1, 10, u64::MAX).expect("iterate");
        assert_eq!(ents, seed);
        assert_eq!(size, 7);
    });
}

#[test]
fn test_state_survives_reopen_from_disk() {
    let root = tempfile::tempdir().expect("create temp dir");
    let dir = root.path().join("logdb");
    let wal = root.path().join("wal");

    {
        let db = LogDb::open(&dir, &wal, true).expect("open store");
        save_one(
            &db,
            Update {
                cluster_id: 5,
                node_id: 6,
                state: RaftState { term: 8, vote: 6, commit: 11 },
                snapshot: None,
                entries_to_save: entries(8, 1..=11),
            },
        );
        db.close();
    }

    let db = LogDb::open(&dir, &wal, true).expect("reopen store");
    // caches are empty after reopen; everything comes from disk
    assert_eq!(
        db.read_state(5, 6).expect("state after reopen"),
        RaftState { term: 8, vote: 6, commit: 11 }
    );
    assert_eq!(db.read_max_index(5, 6).expect("max index after reopen"), 11);
    let (ents, _) =
        db.iterate_entries(Vec::new(), 0, 5, 6, 1, 12, u64::MAX).expect("iterate after reopen");
    assert_eq!(ents.len(), 11);
}

#[test]
fn test_binary_format_distinguishes_layouts() {
    let plain = LogDb::open_in_memory(false).expect("open plain");
    let batched = LogDb::open_in_memory(true).expect("open batched");
    assert_eq!(plain.binary_format(), logstead_engine::PLAIN_BINARY_FORMAT);
    assert_eq!(batched.binary_format(), logstead_engine::BATCHED_BINARY_FORMAT);
    assert_ne!(plain.binary_format(), batched.binary_format());
}

#[test]
#[should_panic(expected = "snapshot index")]
fn test_snapshot_beyond_saved_entries_panics() {
    let db = LogDb::open_in_memory(true).expect("open store");
    save_one(
        &db,
        Update {
            cluster_id: 1,
            node_id: 1,
            state: RaftState { term: 2, vote: 0, commit: 0 },
            snapshot: Some(snapshot(1, 1, 9, 2)),
            entries_to_save: entries(2, 1..=3),
        },
    );
}

#[test]
#[should_panic(expected = "unknown state machine type")]
fn test_import_unknown_state_machine_panics() {
    let db = LogDb::open_in_memory(true).expect("open store");
    let mut ss = snapshot(1, 1, 10, 2);
    ss.smtype = StateMachineType::Unknown;
    let _ = db.import_snapshot(&ss, 1);
}

// ----------------------------------------------------------------------
// Write dedupe (cache contract)
// ----------------------------------------------------------------------

/// KV wrapper counting puts that reach a commit, for observing the state
/// cache's dedupe behavior from outside the engine.
struct CountingKv {
    inner: RedbKv,
    puts: AtomicUsize,
}

impl CountingKv {
    fn new() -> Self {
        Self { inner: RedbKv::in_memory().expect("open inner store"), puts: AtomicUsize::new(0) }
    }
}

impl KvStore for CountingKv {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn get_value(
        &self,
        key: &[u8],
        op: &mut dyn FnMut(Option<&[u8]>) -> logstead_kv::Result<()>,
    ) -> logstead_kv::Result<()> {
        self.inner.get_value(key, op)
    }

    fn iterate_value(
        &self,
        first: &[u8],
        last: &[u8],
        inclusive: bool,
        op: &mut dyn FnMut(&[u8], &[u8]) -> logstead_kv::Result<bool>,
    ) -> logstead_kv::Result<()> {
        self.inner.iterate_value(first, last, inclusive, op)
    }

    fn commit_write_batch(&self, wb: WriteBatch) -> logstead_kv::Result<()> {
        let puts = wb.mutations().iter().filter(|m| matches!(m, Mutation::Put { .. })).count();
        self.puts.fetch_add(puts, Ordering::Relaxed);
        self.inner.commit_write_batch(wb)
    }

    fn delete_value(&self, key: &[u8]) -> logstead_kv::Result<()> {
        self.inner.delete_value(key)
    }

    fn remove_entries(&self, first: &[u8], last: &[u8]) -> logstead_kv::Result<()> {
        self.inner.remove_entries(first, last)
    }

    fn compaction(&self, first: &[u8], last: &[u8]) -> logstead_kv::Result<()> {
        self.inner.compaction(first, last)
    }

    fn close(&self) -> logstead_kv::Result<()> {
        self.inner.close()
    }
}

/// KV wrapper that fails commits on demand, for observing what a failed
/// commit leaves behind.
struct FailingKv {
    inner: RedbKv,
    fail_commits: AtomicBool,
}

impl FailingKv {
    fn new() -> Self {
        Self {
            inner: RedbKv::in_memory().expect("open inner store"),
            fail_commits: AtomicBool::new(false),
        }
    }
}

impl KvStore for FailingKv {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn get_value(
        &self,
        key: &[u8],
        op: &mut dyn FnMut(Option<&[u8]>) -> logstead_kv::Result<()>,
    ) -> logstead_kv::Result<()> {
        self.inner.get_value(key, op)
    }

    fn iterate_value(
        &self,
        first: &[u8],
        last: &[u8],
        inclusive: bool,
        op: &mut dyn FnMut(&[u8], &[u8]) -> logstead_kv::Result<bool>,
    ) -> logstead_kv::Result<()> {
        self.inner.iterate_value(first, last, inclusive, op)
    }

    fn commit_write_batch(&self, wb: WriteBatch) -> logstead_kv::Result<()> {
        if self.fail_commits.load(Ordering::Relaxed) {
            return Err(logstead_kv::Error::backend("injected commit failure"));
        }
        self.inner.commit_write_batch(wb)
    }

    fn delete_value(&self, key: &[u8]) -> logstead_kv::Result<()> {
        self.inner.delete_value(key)
    }

    fn remove_entries(&self, first: &[u8], last: &[u8]) -> logstead_kv::Result<()> {
        self.inner.remove_entries(first, last)
    }

    fn compaction(&self, first: &[u8], last: &[u8]) -> logstead_kv::Result<()> {
        self.inner.compaction(first, last)
    }

    fn close(&self) -> logstead_kv::Result<()> {
        self.inner.close()
    }
}

#[test]
fn test_failed_commit_leaves_nothing_behind() {
    let kvs = Arc::new(FailingKv::new());
    let db = LogDb::with_store(Arc::clone(&kvs) as Arc<dyn KvStore>, true).expect("open store");

    kvs.fail_commits.store(true, Ordering::Relaxed);
    let mut ctx = SaveContext::new();
    let err = db
        .save_raft_state(
            &[Update {
                cluster_id: 1,
                node_id: 1,
                state: RaftState { term: 4, vote: 0, commit: 2 },
                snapshot: None,
                entries_to_save: entries(4, 1..=2),
            }],
            &mut ctx,
        )
        .unwrap_err();
    assert!(matches!(err, Error::Kv { .. }));

    // nothing is durable, and the cache did not run ahead of disk
    assert!(db.read_state(1, 1).unwrap_err().is_no_saved_log());
    assert!(db.read_max_index(1, 1).unwrap_err().is_no_saved_log());

    // the same save succeeds once commits work again, including the state
    // put the dedupe cache might otherwise have skipped
    kvs.fail_commits.store(false, Ordering::Relaxed);
    save_one(
        &db,
        Update {
            cluster_id: 1,
            node_id: 1,
            state: RaftState { term: 4, vote: 0, commit: 2 },
            snapshot: None,
            entries_to_save: entries(4, 1..=2),
        },
    );
    assert_eq!(
        db.read_state(1, 1).expect("state after retry"),
        RaftState { term: 4, vote: 0, commit: 2 }
    );
    assert_eq!(db.read_max_index(1, 1).expect("max index after retry"), 2);
}

#[test]
fn test_unchanged_state_is_saved_once() {
    let kvs = Arc::new(CountingKv::new());
    let db = LogDb::with_store(Arc::clone(&kvs) as Arc<dyn KvStore>, true).expect("open store");

    let update = Update {
        cluster_id: 1,
        node_id: 1,
        state: RaftState { term: 4, vote: 2, commit: 0 },
        ..Default::default()
    };

    save_one(&db, update.clone());
    assert_eq!(kvs.puts.load(Ordering::Relaxed), 1);

    // identical state: the cache dedupes, nothing is committed
    save_one(&db, update);
    assert_eq!(kvs.puts.load(Ordering::Relaxed), 1);

    // a changed state writes again
    save_one(
        &db,
        Update {
            cluster_id: 1,
            node_id: 1,
            state: RaftState { term: 5, vote: 2, commit: 0 },
            ..Default::default()
        },
    );
    assert_eq!(kvs.puts.load(Ordering::Relaxed), 2);
}
