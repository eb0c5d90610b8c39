//! Plain entry layout: one KV record per entry, keyed by entry index.

use std::sync::Arc;

use logstead_kv::{KvStore, WriteBatch};
use logstead_types::{codec, ClusterId, Entry, NodeId};

use super::{EntryManager, IterStop, RangedOp, PLAIN_BINARY_FORMAT};
use crate::context::SaveContext;
use crate::error::{Error, Result};
use crate::key;
use crate::pool::KeyPool;

/// One record per entry. Appends overwrite by index; entries from an
/// abandoned longer log stay behind but are masked by the replica's
/// max-index ceiling.
pub(crate) struct PlainEntries {
    kvs: Arc<dyn KvStore>,
    pool: Arc<KeyPool>,
}

impl PlainEntries {
    pub(crate) fn new(kvs: Arc<dyn KvStore>, pool: Arc<KeyPool>) -> Self {
        Self { kvs, pool }
    }
}

impl EntryManager for PlainEntries {
    fn binary_format(&self) -> u32 {
        PLAIN_BINARY_FORMAT
    }

    fn record(
        &self,
        wb: &mut WriteBatch,
        cluster_id: ClusterId,
        node_id: NodeId,
        ctx: &mut SaveContext,
        entries: &[Entry],
    ) -> Result<u64> {
        let Some(last) = entries.last() else {
            return Ok(0);
        };
        for entry in entries {
            let (key, buf) = ctx.key_and_value(entry.size_upper_limit() as usize);
            key.set_entry_key(cluster_id, node_id, entry.index);
            let data = codec::encode_into(entry, buf)
                .map_err(|e| Error::corruption(format!("encode entry: {e}")))?;
            wb.put(key.as_slice(), data);
        }
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
        fk.set_entry_key(cluster_id, node_id, low);
        lk.set_entry_key(cluster_id, node_id, last_index);

        let mut expected = low;
        let mut stop: Option<IterStop> = None;
        self.kvs
            .iterate_value(fk.as_slice(), lk.as_slice(), true, &mut |_, data| {
                let entry: Entry = match codec::decode(data) {
                    Ok(entry) => entry,
                    Err(e) => {
                        stop = Some(IterStop::Corrupt(format!("decode entry: {e}")));
                        return Ok(false);
                    }
                };
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
        fk.set_entry_key(cluster_id, node_id, last_index);
        lk.set_entry_key(cluster_id, node_id, max_index);

        let mut first: Option<u64> = None;
        let mut malformed = false;
        self.kvs
            .iterate_value(fk.as_slice(), lk.as_slice(), true, &mut |key, _| {
                match key::parse_suffix(key) {
                    Some(index) => first = Some(index),
                    None => malformed = true,
                }
                Ok(false)
            })
            .map_err(Error::kv)?;
        if malformed {
            return Err(Error::corruption("malformed entry key in range scan"));
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
        let mut fk = self.pool.get();
        let mut lk = self.pool.get();
        fk.set_entry_key(cluster_id, node_id, 0);
        // upper bound is exclusive; saturate at the top of the index space
        lk.set_entry_key(cluster_id, node_id, index.saturating_add(1));
        op(fk.as_slice(), lk.as_slice()).map_err(Error::kv)
    }
}
