//! The ordered KV capability consumed by the log storage engine.

use crate::batch::WriteBatch;
use crate::error::Result;

/// An ordered key-value store with atomic batch commits and range
/// operations.
///
/// Keys order lexicographically as raw bytes; the engine's big-endian key
/// encoding relies on this to make range scans per-replica contiguous.
///
/// Every method may block on disk I/O. Implementations must be safe for
/// concurrent use; callers serialize conflicting writes above this trait.
pub trait KvStore: Send + Sync {
    /// Backend name, for logs.
    fn name(&self) -> &'static str;

    /// Looks up `key` and hands the value to `op`, or `None` when the key
    /// is absent. The value borrow is only valid for the duration of the
    /// call.
    fn get_value(
        &self,
        key: &[u8],
        op: &mut dyn FnMut(Option<&[u8]>) -> Result<()>,
    ) -> Result<()>;

    /// Scans keys in `[first, last]` when `inclusive`, else `[first, last)`,
    /// in ascending order, invoking `op` per record. `op` returns `false`
    /// to stop early.
    fn iterate_value(
        &self,
        first: &[u8],
        last: &[u8],
        inclusive: bool,
        op: &mut dyn FnMut(&[u8], &[u8]) -> Result<bool>,
    ) -> Result<()>;

    /// Returns an empty batch for the caller to fill and commit.
    fn get_write_batch(&self) -> WriteBatch {
        WriteBatch::new()
    }

    /// Commits every mutation in `wb` atomically. Durable on return.
    fn commit_write_batch(&self, wb: WriteBatch) -> Result<()>;

    /// Commits a delete-only batch. Kept separate from
    /// [`commit_write_batch`](Self::commit_write_batch) so backends with a
    /// cheaper bulk-delete path can take it; the default is the same commit.
    fn commit_delete_batch(&self, wb: WriteBatch) -> Result<()> {
        self.commit_write_batch(wb)
    }

    /// Removes a single key. Missing keys are not an error.
    fn delete_value(&self, key: &[u8]) -> Result<()>;

    /// Removes every key in `[first, last)` in one atomic operation.
    fn remove_entries(&self, first: &[u8], last: &[u8]) -> Result<()>;

    /// Reclaims space previously occupied by deleted keys. The range is
    /// advisory; backends may compact more than requested.
    fn compaction(&self, first: &[u8], last: &[u8]) -> Result<()>;

    /// Closes the store. Operations after close fail with
    /// [`Error::Closed`](crate::Error::Closed).
    fn close(&self) -> Result<()>;
}
