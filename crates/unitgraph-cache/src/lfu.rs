use crate::key_list::KeyList;
use crate::policy::ReplacementPolicy;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Bounded key/value cache with least-frequently-used eviction.
///
/// Keys live in per-frequency lists; a successful `get` or an updating
/// `put` moves the key from bucket `f` to the front of bucket `f + 1`.
/// The bucket map is ordered, so the minimum frequency is always the
/// first non-empty bucket and never drifts when a bucket drains. Ties
/// within a bucket evict the least recently promoted key (the back).
pub struct LfuCache {
    inner: Mutex<LfuInner>,
}

struct LfuInner {
    max_size: usize,
    entries: HashMap<String, LfuSlot>,
    buckets: BTreeMap<u64, KeyList>,
    evictions: u64,
}

struct LfuSlot {
    value: String,
    frequency: u64,
    handle: usize,
}

impl LfuCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(LfuInner {
                max_size,
                entries: HashMap::new(),
                buckets: BTreeMap::new(),
                evictions: 0,
            }),
        }
    }

    pub fn put(&self, key: &str, value: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(key) {
            inner.promote(key);
            if let Some(slot) = inner.entries.get_mut(key) {
                slot.value = value.to_owned();
            }
            return true;
        }
        if inner.max_size == 0 {
            return false;
        }
        while inner.entries.len() >= inner.max_size {
            inner.evict_one();
        }
        let handle = inner
            .buckets
            .entry(1)
            .or_default()
            .push_front(key.to_owned());
        inner.entries.insert(
            key.to_owned(),
            LfuSlot {
                value: value.to_owned(),
                frequency: 1,
                handle,
            },
        );
        true
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let mut inner = self.inner.lock();
        if !inner.entries.contains_key(key) {
            return None;
        }
        inner.promote(key);
        inner.entries.get(key).map(|slot| slot.value.clone())
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.remove(key) {
            Some(slot) => {
                inner.drop_from_bucket(slot.frequency, slot.handle);
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
        inner.buckets.clear();
    }

    /// Access frequency recorded for `key` (inserts count as the first
    /// access).
    pub fn frequency_of(&self, key: &str) -> Option<u64> {
        self.inner.lock().entries.get(key).map(|slot| slot.frequency)
    }

    /// Lowest populated frequency; 0 when the cache is empty.
    pub fn min_frequency(&self) -> u64 {
        self.inner
            .lock()
            .buckets
            .keys()
            .next()
            .copied()
            .unwrap_or(0)
    }

    pub fn log_stats(&self) {
        let inner = self.inner.lock();
        let distribution: Vec<(u64, usize)> = inner
            .buckets
            .iter()
            .map(|(freq, list)| (*freq, list.len()))
            .collect();
        info!(
            size = inner.entries.len(),
            max_size = inner.max_size,
            evictions = inner.evictions,
            ?distribution,
            "lfu cache stats"
        );
    }
}

impl LfuInner {
    /// Move `key` from its current bucket to the front of the next one.
    fn promote(&mut self, key: &str) {
        let Some((frequency, handle)) = self
            .entries
            .get(key)
            .map(|slot| (slot.frequency, slot.handle))
        else {
            return;
        };
        self.drop_from_bucket(frequency, handle);
        let new_frequency = frequency + 1;
        let new_handle = self
            .buckets
            .entry(new_frequency)
            .or_default()
            .push_front(key.to_owned());
        if let Some(slot) = self.entries.get_mut(key) {
            slot.frequency = new_frequency;
            slot.handle = new_handle;
        }
    }

    fn drop_from_bucket(&mut self, frequency: u64, handle: usize) {
        let emptied = match self.buckets.get_mut(&frequency) {
            Some(list) => {
                list.unlink(handle);
                list.is_empty()
            }
            None => false,
        };
        if emptied {
            self.buckets.remove(&frequency);
        }
    }

    fn evict_one(&mut self) -> Option<String> {
        let min_frequency = *self.buckets.keys().next()?;
        let key = self.buckets.get_mut(&min_frequency)?.pop_back()?;
        if self
            .buckets
            .get(&min_frequency)
            .is_some_and(KeyList::is_empty)
        {
            self.buckets.remove(&min_frequency);
        }
        self.entries.remove(&key);
        self.evictions += 1;
        debug!(key = %key, frequency = min_frequency, "evicted least frequently used entry");
        Some(key)
    }
}

impl ReplacementPolicy for LfuCache {
    fn put(&self, key: &str, value: &str) -> bool {
        LfuCache::put(self, key, value)
    }

    fn get(&self, key: &str) -> Option<String> {
        LfuCache::get(self, key)
    }

    fn remove(&self, key: &str) -> bool {
        LfuCache::remove(self, key)
    }

    fn contains(&self, key: &str) -> bool {
        LfuCache::contains(self, key)
    }

    fn len(&self) -> usize {
        LfuCache::len(self)
    }

    fn max_size(&self) -> usize {
        LfuCache::max_size(self)
    }

    fn set_max_size(&self, max_size: usize) {
        LfuCache::set_max_size(self, max_size)
    }

    fn clear(&self) {
        LfuCache::clear(self)
    }

    fn log_stats(&self) {
        LfuCache::log_stats(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_counts_puts_and_gets() {
        let cache = LfuCache::new(4);
        cache.put("k", "v1");
        assert_eq!(cache.frequency_of("k"), Some(1));
        cache.get("k");
        cache.get("k");
        cache.put("k", "v2");
        assert_eq!(cache.frequency_of("k"), Some(4));
        assert_eq!(cache.get("k"), Some("v2".into()));
        assert_eq!(cache.frequency_of("missing"), None);
    }

    #[test]
    fn evicts_the_least_frequent_key() {
        let cache = LfuCache::new(2);
        cache.put("hot", "1");
        cache.put("cold", "2");
        cache.get("hot");
        cache.get("hot");
        cache.put("new", "3");
        assert!(cache.contains("hot"));
        assert!(!cache.contains("cold"));
        assert!(cache.contains("new"));
    }

    #[test]
    fn ties_evict_the_stalest_key_in_the_bucket() {
        let cache = LfuCache::new(2);
        cache.put("first", "1");
        cache.put("second", "2");
        // both at frequency 1; "first" sits at the back of the bucket
        cache.put("third", "3");
        assert!(!cache.contains("first"));
        assert!(cache.contains("second"));
        assert!(cache.contains("third"));
    }

    #[test]
    fn min_frequency_tracks_first_non_empty_bucket() {
        let cache = LfuCache::new(4);
        assert_eq!(cache.min_frequency(), 0);
        cache.put("a", "1");
        cache.put("b", "2");
        assert_eq!(cache.min_frequency(), 1);
        cache.get("a");
        cache.get("b");
        // bucket 1 drained; minimum must follow, not merely increment
        assert_eq!(cache.min_frequency(), 2);
        cache.remove("a");
        cache.remove("b");
        assert_eq!(cache.min_frequency(), 0);
    }

    #[test]
    fn remove_frees_the_bucket_slot() {
        let cache = LfuCache::new(2);
        cache.put("a", "1");
        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        cache.put("b", "2");
        cache.put("c", "3");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn new_insert_lands_at_frequency_one_even_after_promotions() {
        let cache = LfuCache::new(3);
        cache.put("a", "1");
        cache.get("a");
        cache.get("a");
        cache.put("b", "2");
        assert_eq!(cache.frequency_of("b"), Some(1));
        assert_eq!(cache.min_frequency(), 1);
    }

    #[test]
    fn zero_capacity_rejects_inserts() {
        let cache = LfuCache::new(0);
        assert!(!cache.put("a", "1"));
        assert!(cache.is_empty());
    }

    #[test]
    fn set_max_size_evicts_lowest_frequencies() {
        let cache = LfuCache::new(4);
        cache.put("a", "1");
        cache.put("b", "2");
        cache.put("c", "3");
        cache.get("c");
        cache.get("c");
        cache.get("b");
        cache.set_max_size(1);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("c"));
    }
}
