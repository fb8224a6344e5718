use crate::key_list::KeyList;
use crate::policy::ReplacementPolicy;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, info};

/// Bounded key/value cache with least-recently-used eviction.
///
/// A recency list keeps the most recently touched key at the front; each
/// map entry stores a handle into its list node so `get`/`put` relocate
/// in O(1). All state sits behind a single mutex held for the whole call.
pub struct LruCache {
    inner: Mutex<LruInner>,
}

struct LruInner {
    max_size: usize,
    entries: HashMap<String, LruSlot>,
    /// Front = most recently used, back = eviction candidate.
    order: KeyList,
    evictions: u64,
}

struct LruSlot {
    value: String,
    handle: usize,
}

impl LruCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(LruInner {
                max_size,
                entries: HashMap::new(),
                order: KeyList::new(),
                evictions: 0,
            }),
        }
    }

    pub fn put(&self, key: &str, value: &str) -> bool {
        let mut inner = self.inner.lock();
        let existing = inner.entries.get(key).map(|slot| slot.handle);
        if let Some(handle) = existing {
            let new_handle = inner.order.move_to_front(handle);
            if let Some(slot) = inner.entries.get_mut(key) {
                slot.value = value.to_owned();
                slot.handle = new_handle;
            }
            return true;
        }
        if inner.max_size == 0 {
            return false;
        }
        while inner.entries.len() >= inner.max_size {
            inner.evict_one();
        }
        let handle = inner.order.push_front(key.to_owned());
        inner.entries.insert(
            key.to_owned(),
            LruSlot {
                value: value.to_owned(),
                handle,
            },
        );
        true
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let mut inner = self.inner.lock();
        let handle = inner.entries.get(key)?.handle;
        let new_handle = inner.order.move_to_front(handle);
        let slot = inner.entries.get_mut(key)?;
        slot.handle = new_handle;
        Some(slot.value.clone())
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.remove(key) {
            Some(slot) => {
                inner.order.unlink(slot.handle);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_size(&self) -> usize {
        self.inner.lock().max_size
    }

    pub fn set_max_size(&self, max_size: usize) {
        let mut inner = self.inner.lock();
        inner.max_size = max_size;
        while inner.entries.len() > inner.max_size {
            inner.evict_one();
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    /// Key currently next in line for eviction, if any.
    pub fn eviction_candidate(&self) -> Option<String> {
        self.inner.lock().order.back().map(str::to_owned)
    }

    pub fn log_stats(&self) {
        let inner = self.inner.lock();
        info!(
            size = inner.entries.len(),
            max_size = inner.max_size,
            evictions = inner.evictions,
            "lru cache stats"
        );
    }
}

impl LruInner {
    fn evict_one(&mut self) -> Option<String> {
        let key = self.order.pop_back()?;
        self.entries.remove(&key);
        self.evictions += 1;
        debug!(key = %key, "evicted least recently used entry");
        Some(key)
    }
}

impl ReplacementPolicy for LruCache {
    fn put(&self, key: &str, value: &str) -> bool {
        LruCache::put(self, key, value)
    }

    fn get(&self, key: &str) -> Option<String> {
        LruCache::get(self, key)
    }

    fn remove(&self, key: &str) -> bool {
        LruCache::remove(self, key)
    }

    fn contains(&self, key: &str) -> bool {
        LruCache::contains(self, key)
    }

    fn len(&self) -> usize {
        LruCache::len(self)
    }

    fn max_size(&self) -> usize {
        LruCache::max_size(self)
    }

    fn set_max_size(&self, max_size: usize) {
        LruCache::set_max_size(self, max_size)
    }

    fn clear(&self) {
        LruCache::clear(self)
    }

    fn log_stats(&self) {
        LruCache::log_stats(self)
    }
}
