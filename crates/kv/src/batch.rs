//! Write batches: atomic groups of puts and deletes.

/// A single buffered mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Insert or overwrite a key.
    Put {
        /// Key bytes.
        key: Vec<u8>,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Remove a key.
    Delete {
        /// Key bytes.
        key: Vec<u8>,
    },
}

/// An ordered group of mutations committed atomically.
///
/// A batch is owned by a single in-flight save from
/// [`KvStore::get_write_batch`](crate::KvStore::get_write_batch) until it is
/// committed or dropped. Readers observe either none or all of its
/// mutations.
#[derive(Debug, Default)]
pub struct WriteBatch {
    mutations: Vec<Mutation>,
}

impl WriteBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers a put. Key and value are copied; the caller may reuse its
    /// scratch buffers immediately.
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.mutations.push(Mutation::Put { key: key.to_vec(), value: value.to_vec() });
    }

    /// Buffers a delete.
    pub fn delete(&mut self, key: &[u8]) {
        self.mutations.push(Mutation::Delete { key: key.to_vec() });
    }

    /// Number of buffered mutations.
    pub fn count(&self) -> usize {
        self.mutations.len()
    }

    /// Returns true when no mutation is buffered.
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Discards all buffered mutations, keeping the allocation.
    pub fn clear(&mut self) {
        self.mutations.clear();
    }

    /// Buffered mutations in insertion order. Backends replay these inside
    /// one transaction; later mutations win on key collision.
    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }
}
