//! Shared pool of reusable key buffers.
//!
//! Keys are built on every engine operation; pooling them removes that
//! allocation from the hot path. The pool is internally synchronized and a
//! borrowed key returns itself on drop.

use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

use crate::key::Key;

/// Buffers retained between operations; beyond this, released keys drop.
const POOL_CAPACITY: usize = 128;

/// Internally synchronized pool of [`Key`] buffers.
#[derive(Debug, Default)]
pub struct KeyPool {
    keys: Mutex<Vec<Key>>,
}

impl KeyPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrows a key buffer for the duration of one operation.
    pub fn get(&self) -> PooledKey<'_> {
        let key = self.keys.lock().pop().unwrap_or_default();
        PooledKey { pool: self, key: Some(key) }
    }

    fn release(&self, key: Key) {
        let mut keys = self.keys.lock();
        if keys.len() < POOL_CAPACITY {
            keys.push(key);
        }
    }

    #[cfg(test)]
    fn pooled(&self) -> usize {
        self.keys.lock().len()
    }
}

/// A key borrowed from a [`KeyPool`], returned on drop.
#[derive(Debug)]
pub struct PooledKey<'a> {
    pool: &'a KeyPool,
    key: Option<Key>,
}

impl Deref for PooledKey<'_> {
    type Target = Key;

    fn deref(&self) -> &Key {
        self.key.as_ref().expect("pooled key only vacated on drop")
    }
}

impl DerefMut for PooledKey<'_> {
    fn deref_mut(&mut self) -> &mut Key {
        self.key.as_mut().expect("pooled key only vacated on drop")
    }
}

impl Drop for PooledKey<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.pool.release(key);
        }
    }
}
