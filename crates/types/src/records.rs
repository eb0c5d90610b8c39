//! Record types persisted by the log storage engine.
//!
//! One process hosts many Raft replicas. Every record below belongs to
//! exactly one replica, addressed by `(ClusterId, NodeId)`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Raft cluster (group) identifier.
pub type ClusterId = u64;

/// Raft node identifier within a cluster.
pub type NodeId = u64;

/// Durable Raft state for one replica.
///
/// Overwritten on each save; `term` is monotonic non-decreasing across saves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftState {
    /// Current term.
    pub term: u64,
    /// Node voted for in the current term (0 = none).
    pub vote: u64,
    /// Highest committed log index.
    pub commit: u64,
}

impl RaftState {
    /// Returns true when no field has been set. Empty states are never
    /// persisted.
    pub fn is_empty(&self) -> bool {
        self.term == 0 && self.vote == 0 && self.commit == 0
    }
}

/// Payload classification of a log entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    /// Regular state-machine command.
    #[default]
    Application,
    /// Cluster membership change.
    ConfigChange,
}

/// A single Raft log entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Term in which the entry was proposed.
    pub term: u64,
    /// Log index (1-based; 0 means "no entry").
    pub index: u64,
    /// Payload classification.
    pub entry_type: EntryType,
    /// Opaque command bytes for the state machine.
    pub cmd: Vec<u8>,
}

impl Entry {
    /// Upper bound on the encoded size of this entry, in bytes.
    ///
    /// Used both to size scratch buffers before encoding and to budget
    /// `max_size` during iteration. Must never be below the true encoded
    /// size: three u64 varints plus the length-prefixed command fit in
    /// `cmd.len() + 32`.
    pub fn size_upper_limit(&self) -> u64 {
        self.cmd.len() as u64 + 32
    }
}

/// A packed record holding consecutive entries (batched entry layout only).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryBatch {
    /// Entries in ascending, gap-free index order.
    pub entries: Vec<Entry>,
}

impl EntryBatch {
    /// Upper bound on the encoded size of the whole batch, in bytes.
    pub fn size_upper_limit(&self) -> u64 {
        self.entries.iter().map(Entry::size_upper_limit).sum::<u64>() + 8
    }
}

/// Kind of state machine a replica runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateMachineType {
    /// Not set. Importing a snapshot with this type is a protocol violation.
    #[default]
    Unknown,
    /// In-memory state machine.
    Regular,
    /// In-memory state machine with concurrent read access.
    Concurrent,
    /// State machine that persists its own state on disk.
    OnDisk,
}

/// Metadata for an external file attached to a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFile {
    /// Application-assigned file identifier.
    pub file_id: u64,
    /// Path of the file on the snapshot-owning node.
    pub filepath: String,
    /// Size of the file in bytes.
    pub file_size: u64,
}

/// Raft snapshot metadata. Multiple snapshots may exist per replica, keyed
/// by snapshot index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Cluster the snapshot belongs to.
    pub cluster_id: ClusterId,
    /// Node the snapshot was taken on.
    pub node_id: NodeId,
    /// Last log index covered by the snapshot.
    pub index: u64,
    /// Term of the entry at `index`.
    pub term: u64,
    /// Kind of state machine that produced the snapshot.
    pub smtype: StateMachineType,
    /// Path of the snapshot image.
    pub filepath: String,
    /// Size of the snapshot image in bytes.
    pub file_size: u64,
    /// External files attached to the snapshot.
    pub files: Vec<SnapshotFile>,
}

impl Snapshot {
    /// Returns true when the snapshot carries no data. Empty snapshots are
    /// never persisted.
    pub fn is_empty(&self) -> bool {
        self.index == 0
    }
}

/// Initial membership and state-machine type for a replica.
///
/// Written once at replica creation and read back at recovery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bootstrap {
    /// Whether the replica joins an existing cluster rather than forming one.
    pub join: bool,
    /// Kind of state machine the replica runs.
    pub smtype: StateMachineType,
    /// Initial membership: node id to address. Ordered so the encoding is
    /// deterministic.
    pub addresses: BTreeMap<NodeId, String>,
}

/// Identity of one replica found in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeInfo {
    /// Cluster the replica belongs to.
    pub cluster_id: ClusterId,
    /// Node identifier within the cluster.
    pub node_id: NodeId,
}

/// One unit of durable work produced by a Raft replica.
///
/// A slice of updates is turned into a single atomic write batch by the
/// engine: state, snapshot, max-index, and entry records all commit together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Update {
    /// Cluster the update belongs to.
    pub cluster_id: ClusterId,
    /// Node the update belongs to.
    pub node_id: NodeId,
    /// Raft state to persist; skipped when empty or unchanged.
    pub state: RaftState,
    /// Snapshot to persist, if any.
    pub snapshot: Option<Snapshot>,
    /// Log entries to append, in ascending gap-free index order.
    pub entries_to_save: Vec<Entry>,
}
