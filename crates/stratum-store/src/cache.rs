//! The session data cache.
//!
//! Promoted stores write encoded rows here and read them back by opaque
//! file position. The cache stands on the near side of the data-file
//! boundary: position allocation and slot bookkeeping live here, the
//! on-disk page layout does not. One cache is created lazily per session
//! and shared by that session's stores; the store count tracks how many
//! are attached.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;

use stratum_common::types::RowId;

/// Position-addressed storage for encoded rows.
#[derive(Debug, Default)]
pub struct DataCache {
    slots: RwLock<HashMap<u64, Bytes>>,
    next_pos: AtomicU64,
    store_count: AtomicI64,
}

impl DataCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            // position zero is reserved
            next_pos: AtomicU64::new(1),
            store_count: AtomicI64::new(0),
        }
    }

    /// Allocates a fresh file position.
    #[must_use]
    pub fn allocate(&self) -> RowId {
        RowId::new(self.next_pos.fetch_add(1, Ordering::SeqCst))
    }

    /// Writes an encoded row at a position.
    pub fn put(&self, pos: RowId, data: Bytes) {
        self.slots.write().insert(pos.as_u64(), data);
    }

    /// Reads the encoded row at a position.
    #[must_use]
    pub fn get(&self, pos: RowId) -> Option<Bytes> {
        self.slots.read().get(&pos.as_u64()).cloned()
    }

    /// Frees a position.
    pub fn free(&self, pos: RowId) -> bool {
        self.slots.write().remove(&pos.as_u64()).is_some()
    }

    /// Number of live slots.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.read().len()
    }

    /// Adjusts the attached-store count; a released store passes -1.
    pub fn adjust_store_count(&self, delta: i64) {
        self.store_count.fetch_add(delta, Ordering::SeqCst);
    }

    /// Number of stores currently attached.
    #[must_use]
    pub fn store_count(&self) -> i64 {
        self.store_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_free() {
        let cache = DataCache::new();
        let pos = cache.allocate();
        cache.put(pos, Bytes::from_static(b"row"));

        assert_eq!(cache.get(pos).unwrap().as_ref(), b"row");
        assert!(cache.free(pos));
        assert!(cache.get(pos).is_none());
        assert!(!cache.free(pos));
    }

    #[test]
    fn test_positions_unique() {
        let cache = DataCache::new();
        let a = cache.allocate();
        let b = cache.allocate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_store_count() {
        let cache = DataCache::new();
        cache.adjust_store_count(1);
        cache.adjust_store_count(1);
        cache.adjust_store_count(-1);
        assert_eq!(cache.store_count(), 1);
    }
}
