//! Key layout for the shared keyspace.
//!
//! Every key starts with a one-byte kind tag, followed by the big-endian
//! cluster and node identifiers, followed by a kind-specific suffix:
//!
//! | kind        | tag  | suffix          | size |
//! |-------------|------|-----------------|------|
//! | State       | 0x01 | none            | 17   |
//! | Bootstrap   | 0x02 | none            | 17   |
//! | MaxIndex    | 0x03 | none            | 17   |
//! | Snapshot    | 0x04 | BE(index)       | 25   |
//! | Entry       | 0x10 | BE(index)       | 25   |
//! | EntryBatch  | 0x10 | BE(batch id)    | 25   |
//!
//! Big-endian encoding makes lexicographic key order equal numeric
//! `(cluster, node, index)` order, so one range scan covers exactly one
//! record kind for one replica. Entry and EntryBatch share a tag: a store
//! is opened in exactly one entry layout, and the shared tag lets the
//! open-time self-check and node removal probe either layout with a single
//! range.

use logstead_types::{ClusterId, NodeId};

const STATE_TAG: u8 = 0x01;
const BOOTSTRAP_TAG: u8 = 0x02;
const MAX_INDEX_TAG: u8 = 0x03;
const SNAPSHOT_TAG: u8 = 0x04;
const ENTRY_TAG: u8 = 0x10;

/// Size of keys addressing one record per replica (tag + cluster + node).
pub const REPLICA_KEY_SIZE: usize = 17;

/// Size of keys carrying a u64 suffix (entries, batches, snapshots).
pub const ENTRY_KEY_SIZE: usize = 25;

/// Largest key the engine ever builds.
pub const MAX_KEY_SIZE: usize = ENTRY_KEY_SIZE;

/// A reusable fixed-capacity key buffer.
///
/// Keys are rebuilt in place on every operation; the buffer itself comes
/// from the [`KeyPool`](crate::pool::KeyPool) or a
/// [`SaveContext`](crate::context::SaveContext) so the hot save path never
/// allocates for keys.
#[derive(Debug, Clone)]
pub struct Key {
    buf: [u8; MAX_KEY_SIZE],
    len: usize,
}

impl Key {
    /// Creates an empty key buffer.
    pub fn new() -> Self {
        Self { buf: [0; MAX_KEY_SIZE], len: 0 }
    }

    /// The encoded key bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    fn set_prefix(&mut self, tag: u8, cluster_id: ClusterId, node_id: NodeId) {
        self.buf[0] = tag;
        self.buf[1..9].copy_from_slice(&cluster_id.to_be_bytes());
        self.buf[9..17].copy_from_slice(&node_id.to_be_bytes());
        self.len = REPLICA_KEY_SIZE;
    }

    fn set_suffix(&mut self, index: u64) {
        self.buf[17..25].copy_from_slice(&index.to_be_bytes());
        self.len = ENTRY_KEY_SIZE;
    }

    /// Addresses the replica's Raft state record.
    pub fn set_state_key(&mut self, cluster_id: ClusterId, node_id: NodeId) {
        self.set_prefix(STATE_TAG, cluster_id, node_id);
    }

    /// Addresses the replica's bootstrap record.
    pub fn set_bootstrap_key(&mut self, cluster_id: ClusterId, node_id: NodeId) {
        self.set_prefix(BOOTSTRAP_TAG, cluster_id, node_id);
    }

    /// Addresses the replica's max-index record.
    pub fn set_max_index_key(&mut self, cluster_id: ClusterId, node_id: NodeId) {
        self.set_prefix(MAX_INDEX_TAG, cluster_id, node_id);
    }

    /// Addresses the snapshot record at `index`.
    pub fn set_snapshot_key(&mut self, cluster_id: ClusterId, node_id: NodeId, index: u64) {
        self.set_prefix(SNAPSHOT_TAG, cluster_id, node_id);
        self.set_suffix(index);
    }

    /// Addresses the plain entry record at `index`.
    pub fn set_entry_key(&mut self, cluster_id: ClusterId, node_id: NodeId, index: u64) {
        self.set_prefix(ENTRY_TAG, cluster_id, node_id);
        self.set_suffix(index);
    }

    /// Addresses the entry batch record with `batch_id`.
    pub fn set_entry_batch_key(&mut self, cluster_id: ClusterId, node_id: NodeId, batch_id: u64) {
        self.set_prefix(ENTRY_TAG, cluster_id, node_id);
        self.set_suffix(batch_id);
    }
}

impl Default for Key {
    fn default() -> Self {
        Self::new()
    }
}

/// A key decoded back into its components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedKey {
    /// Raft state record key.
    State {
        /// Cluster of the replica.
        cluster_id: ClusterId,
        /// Node of the replica.
        node_id: NodeId,
    },
    /// Bootstrap record key.
    Bootstrap {
        /// Cluster of the replica.
        cluster_id: ClusterId,
        /// Node of the replica.
        node_id: NodeId,
    },
    /// Max-index record key.
    MaxIndex {
        /// Cluster of the replica.
        cluster_id: ClusterId,
        /// Node of the replica.
        node_id: NodeId,
    },
    /// Snapshot record key.
    Snapshot {
        /// Cluster of the replica.
        cluster_id: ClusterId,
        /// Node of the replica.
        node_id: NodeId,
        /// Snapshot index.
        index: u64,
    },
    /// Entry or entry-batch record key (the layouts share a tag).
    Entry {
        /// Cluster of the replica.
        cluster_id: ClusterId,
        /// Node of the replica.
        node_id: NodeId,
        /// Entry index or batch id, depending on the layout.
        index: u64,
    },
}

/// Extracts `(cluster_id, node_id)` from any well-formed key.
pub fn parse_replica(key: &[u8]) -> Option<(ClusterId, NodeId)> {
    if key.len() < REPLICA_KEY_SIZE {
        return None;
    }
    let cluster_id = u64::from_be_bytes(key[1..9].try_into().ok()?);
    let node_id = u64::from_be_bytes(key[9..17].try_into().ok()?);
    Some((cluster_id, node_id))
}

/// Extracts the u64 suffix from an entry, batch, or snapshot key.
pub fn parse_suffix(key: &[u8]) -> Option<u64> {
    if key.len() != ENTRY_KEY_SIZE {
        return None;
    }
    Some(u64::from_be_bytes(key[17..25].try_into().ok()?))
}

/// Decodes a key into its kind and components, or `None` when malformed.
pub fn decode(key: &[u8]) -> Option<DecodedKey> {
    let (cluster_id, node_id) = parse_replica(key)?;
    match (key[0], key.len()) {
        (STATE_TAG, REPLICA_KEY_SIZE) => Some(DecodedKey::State { cluster_id, node_id }),
        (BOOTSTRAP_TAG, REPLICA_KEY_SIZE) => Some(DecodedKey::Bootstrap { cluster_id, node_id }),
        (MAX_INDEX_TAG, REPLICA_KEY_SIZE) => Some(DecodedKey::MaxIndex { cluster_id, node_id }),
        (SNAPSHOT_TAG, ENTRY_KEY_SIZE) => {
            Some(DecodedKey::Snapshot { cluster_id, node_id, index: parse_suffix(key)? })
        }
        (ENTRY_TAG, ENTRY_KEY_SIZE) => {
            Some(DecodedKey::Entry { cluster_id, node_id, index: parse_suffix(key)? })
        }
        _ => None,
    }
}
