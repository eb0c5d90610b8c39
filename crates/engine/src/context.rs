//! Per-save scratch buffers.

use crate::key::Key;

/// Reusable scratch for one `save_raft_state` call: a key buffer and a
/// growable value buffer.
///
/// A Raft replica's save loop creates one context and passes it to every
/// save, amortizing key and value allocation across the whole batch of
/// updates. Contexts are not shared between threads.
#[derive(Debug, Default)]
pub struct SaveContext {
    key: Key,
    value: Vec<u8>,
}

impl SaveContext {
    /// Creates a fresh context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a value buffer of length at least `n`, reused across calls.
    pub fn value_buffer(&mut self, n: usize) -> &mut [u8] {
        if self.value.len() < n {
            self.value.resize(n, 0);
        }
        &mut self.value[..n]
    }

    /// Returns the key buffer together with a value buffer of length at
    /// least `n`, for records that build both at once.
    pub fn key_and_value(&mut self, n: usize) -> (&mut Key, &mut [u8]) {
        if self.value.len() < n {
            self.value.resize(n, 0);
        }
        (&mut self.key, &mut self.value[..n])
    }
}
