//! Batched entry layout: consecutive entries packed into shared records.
//!
//! Entries with index `i` belong to the batch with id `i / ENTRY_BATCH_SIZE`,
//! a function of the index alone, so writers and readers derive the same
//! record keys independently. An append that does not start on a batch
//! boundary merges with the stored tail batch: the stored record is read,
//! truncated at the first incoming index (the Raft log-matching rule), and
//! re-put in the same write batch.

use std::sync::Arc;

use logstead_kv::{KvStore, WriteBatch};
use logstead_types::{codec, ClusterId, Entry, EntryBatch, NodeId};

use super::{decode_record, EntryManager, IterStop, RangedOp, BATCHED_BINARY_FORMAT, ENTRY_BATCH_SIZE};
use crate::context::SaveContext;
use crate::error::{Error, Result};
use crate::pool::KeyPool;

/// Batch id owning entry `index`.
fn batch_id(index: u64) -> u64 {
    index / ENTRY_BATCH_SIZE
}

/// Packs up to [`ENTRY_BATCH_SIZE`] consecutive entries per record.
pub(crate) struct BatchedEntries {
    kvs: Arc<dyn KvStore>,
    pool: Arc<KeyPool>,
}

impl BatchedEntries {
    pub(crate) fn new(kvs: Arc<dyn KvStore>, pool: Arc<KeyPool>) -> Self {
        Self { kvs, pool }
    }

    fn read_batch(
        &self,
        cluster_id: ClusterId,
        node_id: NodeId,
        id: u64,
    ) -> Result<Option<EntryBatch>> {
        let mut key = self.pool.get();
        key.set_entry_batch_key(cluster_id, node_id, id);
        let mut decoded: Option<Result<EntryBatch>> = None;
        self.kvs
            .get_value(key.as_slice(), &mut |data| {
                decoded = data.map(|d| decode_record("entry batch", d));
                Ok(())
            })
            .map_err(Error::kv)?;
        decoded.transpose()
    }

    fn put_batch(
        &self,
        wb: &mut WriteBatch,
        cluster_id: ClusterId,
        node_id: NodeId,
        ctx: &mut SaveContext,
        id: u64,
        batch: &EntryBatch,
    ) -> Result<()> {
        let (key, buf) = ctx.key_and_value(batch.size_upper_limit() as usize);
        key.set_entry_batch_key(cluster_id, node_id, id);
        let data = codec::encode_into(batch, buf)
            .map_err(|e| Error::corruption(format!("encode entry batch: {e}")))?;
        wb.put(key.as_slice(), data);
        Ok(())
    }
}

impl EntryManager for BatchedEntries {
    fn binary_format(&self) -> u32 {
        BATCHED_BINARY_FORMAT
    }

    fn record(
        &self,
        wb: &mut WriteBatch,
        cluster_id: ClusterId,
        node_id: NodeId,
        ctx: &mut SaveContext,
        entries: &[Entry],
    ) -> Result<u64> {
        let (Some(first), Some(last)) = (entries.first(), entries.last()) else {
            return Ok(0);
        };

        let first_id = batch_id(first.index);
        let mut current = EntryBatch::default();

        // Merge with the stored tail batch when the append does not start
        // at a batch boundary.
        if first.index % ENTRY_BATCH_SIZE != 0 {
            if let Some(stored) = self.read_batch(cluster_id, node_id, first_id)? {
                // log matching: stored entries at or above the first
                // incoming index are superseded by the new terms
                current.entries =
                    stored.entries.into_iter().filter(|e| e.index < first.index).collect();
                if let Some(kept) = current.entries.last() {
                    assert_eq!(
                        kept.index + 1,
                        first.index,
                        "hole in log: stored tail ends at {}, appending {}",
                        kept.index,
                        first.index
                    );
                }
            }
        }

        let mut current_id = first_id;
        for entry in entries {
            let id = batch_id(entry.index);
            if id != current_id {
                self.put_batch(wb, cluster_id, node_id, ctx, current_id, &current)?;
                current.entries.clear();
                current_id = id;
            }
            current.entries.push(entry.clone());
        }
        self.put_batch(wb, cluster_id, node_id, ctx, current_id, &current)?;
        Ok(last.index)
    }

    fn iterate(
        &self,
        mut ents: Vec<Entry>,
        max_index: u64,
        mut size: u64,
        cluster_id: ClusterId,
        node_id: NodeId,
        low: u64,
        high: u64,
        max_size: u64,
    ) -> Result<(Vec<Entry>, u64)> {
        if low >= high {
            return Ok((ents, size));
        }
        if high - 1 > max_index {
            return Err(Error::Unavailable { index: high - 1, max_index });
        }
        let last_index = high - 1;

        let mut fk = self.pool.get();
        let mut lk = self.pool.get();
        fk.set_entry_batch_key(cluster_id, node_id, batch_id(low));
        lk.set_entry_batch_key(cluster_id, node_id, batch_id(last_index));

        let mut expected = low;
        let mut stop: Option<IterStop> = None;
        self.kvs
            .iterate_value(fk.as_slice(), lk.as_slice(), true, &mut |_, data| {
                let batch: EntryBatch = match codec::decode(data) {
                    Ok(batch) => batch,
                    Err(e) => {
                        stop = Some(IterStop::Corrupt(format!("decode entry batch: {e}")));
                        return Ok(false);
                    }
                };
                for entry in batch.entries {
                    if entry.index < low {
                        continue;
                    }
                    if entry.index > last_index {
                        return Ok(false);
                    }
                    if entry.index != expected {
                        stop = Some(if expected == low {
                            IterStop::Compacted
                        } else {
                            IterStop::Corrupt(format!(
                                "hole in log: expected index {expected}, found {}",
                                entry.index
                            ))
                        });
                        return Ok(false);
                    }
                    let entry_size = entry.size_upper_limit();
                    if size + entry_size > max_size && !ents.is_empty() {
                        stop = Some(IterStop::Budget);
                        return Ok(false);
                    }
                    size += entry_size;
                    ents.push(entry);
                    expected += 1;
                }
                Ok(true)
            })
            .map_err(Error::kv)?;

        match stop {
            Some(IterStop::Corrupt(reason)) => Err(Error::Corruption { reason }),
            Some(IterStop::Compacted) => Err(Error::Compacted { index: low }),
            Some(IterStop::Budget) => Ok((ents, size)),
            None if expected == low => Err(Error::Compacted { index: low }),
            None => Ok((ents, size)),
        }
    }

    fn entry_range(
        &self,
        cluster_id: ClusterId,
        node_id: NodeId,
        last_index: u64,
        max_index: u64,
    ) -> Result<(u64, u64)> {
        if last_index > max_index {
            return Ok((last_index, 0));
        }
        let mut fk = self.pool.get();
        let mut lk = self.pool.get();
        fk.set_entry_batch_key(cluster_id, node_id, batch_id(last_index));
        lk.set_entry_batch_key(cluster_id, node_id, batch_id(max_index));

        let mut first: Option<u64> = None;
        let mut corrupt: Option<String> = None;
        self.kvs
            .iterate_value(fk.as_slice(), lk.as_slice(), true, &mut |_, data| {
                let batch: EntryBatch = match codec::decode(data) {
                    Ok(batch) => batch,
                    Err(e) => {
                        corrupt = Some(format!("decode entry batch: {e}"));
                        return Ok(false);
                    }
                };
                for entry in batch.entries {
                    if entry.index < last_index {
                        continue;
                    }
                    if entry.index > max_index {
                        return Ok(false);
                    }
                    first = Some(entry.index);
                    return Ok(false);
                }
                Ok(true)
            })
            .map_err(Error::kv)?;
        if let Some(reason) = corrupt {
            return Err(Error::Corruption { reason });
        }
        match first {
            Some(first_index) => Ok((first_index, max_index - first_index + 1)),
            None => Ok((last_index, 0)),
        }
    }

    fn ranged_op(
        &self,
        cluster_id: ClusterId,
        node_id: NodeId,
        index: u64,
        op: RangedOp<'_>,
    ) -> Result<()> {
        // Only batches wholly below `index` are covered; a partially
        // covered tail batch is never deleted. Removing a whole replica
        // passes u64::MAX, which spans every possible batch id.
        let upper = if index == u64::MAX { u64::MAX } else { batch_id(index) };
        let mut fk = self.pool.get();
        let mut lk = self.pool.get();
        fk.set_entry_batch_key(cluster_id, node_id, 0);
        lk.set_entry_batch_key(cluster_id, node_id, upper);
        op(fk.as_slice(), lk.as_slice()).map_err(Error::kv)
    }
}
