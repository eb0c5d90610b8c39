//! Entry layout managers.
//!
//! Log entries reach disk through one of two layouts: one KV record per
//! entry (`plain`), or up to [`ENTRY_BATCH_SIZE`] consecutive entries
//! packed into one record (`batched`). The engine holds the chosen
//! manager behind a trait; a store is opened in exactly one layout and the
//! on-disk format number records which.
//!
//! Size budgeting during iteration uses each entry's serialized-size upper
//! bound, so both layouts account identically regardless of how records
//! are packed.

pub(crate) mod batched;
pub(crate) mod plain;

pub(crate) use batched::BatchedEntries;
pub(crate) use plain::PlainEntries;

use logstead_kv::WriteBatch;
use logstead_types::{codec, ClusterId, Entry, NodeId};
use serde::de::DeserializeOwned;

use crate::context::SaveContext;
use crate::error::{Error, Result};

/// On-disk format number of the plain (one record per entry) layout.
pub const PLAIN_BINARY_FORMAT: u32 = 1;

/// On-disk format number of the batched layout.
pub const BATCHED_BINARY_FORMAT: u32 = 2;

/// Maximum entries packed into one batch record.
pub const ENTRY_BATCH_SIZE: u64 = 64;

/// Range operation over encoded entry keys: receives the first and
/// one-past-last key of the span and performs a KV range delete or
/// compaction.
pub(crate) type RangedOp<'a> = &'a mut dyn FnMut(&[u8], &[u8]) -> logstead_kv::Result<()>;

/// Capability set over the on-disk entry layout.
pub(crate) trait EntryManager: Send + Sync {
    /// The layout's on-disk format number.
    fn binary_format(&self) -> u32;

    /// Appends `entries` to the write batch and returns the highest index
    /// recorded, or 0 when `entries` is empty.
    fn record(
        &self,
        wb: &mut WriteBatch,
        cluster_id: ClusterId,
        node_id: NodeId,
        ctx: &mut SaveContext,
        entries: &[Entry],
    ) -> Result<u64>;

    /// Appends the entries with indices in `[low, high)` to `ents`,
    /// bounded by `max_index` (the durable ceiling) and by `max_size`
    /// accumulated into `size`. At least one entry is returned when `ents`
    /// arrives empty and any entry is available.
    ///
    /// Fails with [`Error::Compacted`] when `low` precedes the available
    /// range and [`Error::Unavailable`] when `high - 1` exceeds
    /// `max_index`.
    #[allow(clippy::too_many_arguments)]
    fn iterate(
        &self,
        ents: Vec<Entry>,
        max_index: u64,
        size: u64,
        cluster_id: ClusterId,
        node_id: NodeId,
        low: u64,
        high: u64,
        max_size: u64,
    ) -> Result<(Vec<Entry>, u64)>;

    /// Computes the available contiguous index range as
    /// `(first_index, length)` given the caller's `last_index` hint and
    /// the known durable `max_index`. Returns `(last_index, 0)` when no
    /// entry at or above the hint exists.
    fn entry_range(
        &self,
        cluster_id: ClusterId,
        node_id: NodeId,
        last_index: u64,
        max_index: u64,
    ) -> Result<(u64, u64)>;

    /// Derives the key span covering entries up to `index` and invokes
    /// `op` on it, for range deletion and compaction.
    fn ranged_op(
        &self,
        cluster_id: ClusterId,
        node_id: NodeId,
        index: u64,
        op: RangedOp<'_>,
    ) -> Result<()>;
}

/// Decodes a stored record, mapping failure to fatal corruption.
pub(crate) fn decode_record<T: DeserializeOwned>(what: &str, data: &[u8]) -> Result<T> {
    codec::decode(data).map_err(|e| Error::corruption(format!("decode {what}: {e}")))
}

/// How iteration over entry records ended, when it ended early.
enum IterStop {
    /// The size budget was exhausted.
    Budget,
    /// The requested low index precedes the surviving records.
    Compacted,
    /// A record failed to decode or the index sequence had a hole.
    Corrupt(String),
}
