//! Segment Cache
//!
//! Session-local store of fetched segment bytes waiting for their turn in the
//! append queue. Entries leave the cache exactly once, when the scheduler
//! moves them into the feeder; there is no other eviction.

use super::types::{SegmentBuffer, SegmentId};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default)]
pub struct SegmentCache {
    entries: HashMap<SegmentId, SegmentBuffer>,
}

impl SegmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store bytes for `id`
    ///
    /// A buffer already held for the same id is replaced. Callers must not
    /// put ids that were already appended; the scheduler's ledger gates this.
    pub fn put(&mut self, id: SegmentId, buffer: SegmentBuffer) {
        debug!("Caching segment {} ({} bytes)", id, buffer.len());
        if self.entries.insert(id.clone(), buffer).is_some() {
            debug!("Replaced cached bytes for {}", id);
        }
    }

    /// Remove and return the buffer for `id`
    pub fn take(&mut self, id: &SegmentId) -> Option<SegmentBuffer> {
        self.entries.remove(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total bytes held (diagnostics)
    pub fn bytes(&self) -> usize {
        self.entries.values().map(SegmentBuffer::len).sum()
    }

    /// Drop everything (session teardown)
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> SegmentId {
        SegmentId::from_raw(s)
    }

    #[test]
    fn test_take_transfers_ownership_once() {
        let mut cache = SegmentCache::new();
        cache.put(id("a"), SegmentBuffer::new(vec![1, 2, 3]));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.take(&id("a")).unwrap().as_slice(), &[1, 2, 3]);
        assert!(cache.take(&id("a")).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_take_absent() {
        let mut cache = SegmentCache::new();
        assert!(cache.take(&id("missing")).is_none());
    }

    #[test]
    fn test_put_replaces() {
        let mut cache = SegmentCache::new();
        cache.put(id("a"), SegmentBuffer::new(vec![1]));
        cache.put(id("a"), SegmentBuffer::new(vec![2, 2]));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.bytes(), 2);
    }

    #[test]
    fn test_clear() {
        let mut cache = SegmentCache::new();
        cache.put(id("a"), SegmentBuffer::new(vec![1]));
        cache.put(id("b"), SegmentBuffer::new(vec![2]));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.bytes(), 0);
    }
}
