/// Replacement policy backing a bounded key/value cache.
///
/// Implementations are internally synchronized (a single mutex guards all
/// mutable state), so every method takes `&self` and the trait object can
/// be shared behind `BuildCache` and swapped at runtime.
pub trait ReplacementPolicy: Send + Sync {
    /// Insert or update; returns true when the value was stored.
    fn put(&self, key: &str, value: &str) -> bool;

    /// Fetch a value, updating the policy's bookkeeping for `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Remove an entry; returns true when something was removed.
    fn remove(&self, key: &str) -> bool;

    fn contains(&self, key: &str) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn max_size(&self) -> usize;

    /// Shrink-to-fit: evicts until `len() <= max_size`.
    fn set_max_size(&self, max_size: usize);

    fn clear(&self);

    /// Emit current occupancy and eviction counters through `tracing`.
    fn log_stats(&self);
}
