//! LRU cache of fetched byte windows.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Previously fetched windows of a remote resource, keyed by start offset.
///
/// A read is served only when it lies entirely inside one cached window,
/// so a hit always returns the same bytes a fresh fetch would.
pub struct WindowCache {
    windows: LruCache<u64, Arc<Vec<u8>>>,
    max_window: usize,
}

impl WindowCache {
    /// `capacity` windows are retained; windows larger than `max_window`
    /// bytes are never stored.
    pub fn new(capacity: usize, max_window: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            windows: LruCache::new(capacity),
            max_window,
        }
    }

    /// Copy `buf.len()` bytes at `offset` from a cached window.
    ///
    /// Returns false on a miss, leaving `buf` untouched.
    pub fn copy_into(&mut self, offset: u64, buf: &mut [u8]) -> bool {
        let want_end = offset + buf.len() as u64;
        let hit = self
            .windows
            .iter()
            .find(|(start, data)| **start <= offset && want_end <= **start + data.len() as u64)
            .map(|(start, _)| *start);

        let Some(start) = hit else {
            return false;
        };
        // `get` marks the window as most recently used
        let Some(data) = self.windows.get(&start) else {
            return false;
        };
        let from = (offset - start) as usize;
        buf.copy_from_slice(&data[from..from + buf.len()]);
        true
    }

    pub fn insert(&mut self, offset: u64, data: Arc<Vec<u8>>) {
        if data.is_empty() || data.len() > self.max_window {
            return;
        }
        self.windows.put(offset, data);
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
