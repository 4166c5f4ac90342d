use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::CacheKey;

/// The capabilities a backing store has to provide to a [`QueryCache`].
///
/// Atomicity is only required per key. Expiration and capacity policies are entirely up to the
/// store, and entries may disappear at any point in time, even right after they were inserted.
pub trait CacheStore<V>: Send + Sync {
    /// Atomically returns the value stored for `key`, or inserts the value created by `init`.
    ///
    /// `init` is only invoked if no value is stored for `key`, and for concurrent callers with
    /// the same `key` it is invoked at most once. The returned flag is `true` if the value was
    /// freshly inserted by this call.
    fn get_or_insert_with(&self, key: &CacheKey, init: Box<dyn FnOnce() -> V + '_>) -> (V, bool);

    /// Atomically returns the value stored for `key`, or inserts `value` and returns it.
    fn get_or_insert(&self, key: &CacheKey, value: V) -> V {
        self.get_or_insert_with(key, Box::new(|| value)).0
    }

    /// Looks up the value stored for `key`.
    fn get(&self, key: &CacheKey) -> Option<V>;

    /// Unconditionally stores `value` for `key`.
    fn insert(&self, key: CacheKey, value: V);

    /// Removes whatever is stored for `key`.
    fn remove(&self, key: &CacheKey);

    /// Atomically removes the value stored for `key` if it matches `condition`.
    ///
    /// Returns `true` if a value was removed.
    fn remove_if(&self, key: &CacheKey, condition: &dyn Fn(&V) -> bool) -> bool;

    /// Evicts roughly `percentage` percent of all entries.
    ///
    /// Which entries are evicted is up to the store.
    fn trim(&self, percentage: u8);

    /// Evicts all entries.
    fn clear(&self);

    /// The approximate number of entries.
    fn entry_count(&self) -> u64;

    /// The sliding expiration window, if entries expire at all.
    fn time_to_idle(&self) -> Option<Duration>;
}

/// The percentage of entries evicted by [`QueryCache::trim_default`].
pub const DEFAULT_TRIM_PERCENTAGE: u8 = 75;

/// A mapping from [`CacheKey`]s to values, backed by a pluggable [`CacheStore`].
pub struct QueryCache<V> {
    name: Arc<str>,
    store: Arc<dyn CacheStore<V>>,
    trim_percentage: u8,
}

impl<V> Clone for QueryCache<V> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            store: Arc::clone(&self.store),
            trim_percentage: self.trim_percentage,
        }
    }
}

impl<V> fmt::Debug for QueryCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("name", &self.name)
            .field("entries", &self.store.entry_count())
            .field("time_to_idle", &self.store.time_to_idle())
            .finish()
    }
}

impl<V> QueryCache<V> {
    pub fn new(name: impl Into<Arc<str>>, store: Arc<dyn CacheStore<V>>) -> Self {
        Self {
            name: name.into(),
            store,
            trim_percentage: DEFAULT_TRIM_PERCENTAGE,
        }
    }

    /// Overrides the percentage used by [`trim_default`](Self::trim_default).
    pub fn with_trim_percentage(mut self, percentage: u8) -> Self {
        self.trim_percentage = percentage.min(100);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the value already stored for `key`, or inserts `candidate`.
    ///
    /// If another value won the race for `key`, that value is returned and `candidate` is
    /// dropped.
    pub fn get_or_add(&self, key: &CacheKey, candidate: V) -> V {
        self.store.get_or_insert(key, candidate)
    }

    /// Like [`get_or_add`](Self::get_or_add), but only creates the candidate if `key` is vacant.
    ///
    /// Returns the stored value, and whether it was created by this call.
    pub fn get_or_add_with(&self, key: &CacheKey, init: impl FnOnce() -> V) -> (V, bool) {
        self.store.get_or_insert_with(key, Box::new(init))
    }

    pub fn try_get(&self, key: &CacheKey) -> Option<V> {
        self.store.get(key)
    }

    pub fn set(&self, key: CacheKey, value: V) {
        self.store.insert(key, value)
    }

    pub fn remove(&self, key: &CacheKey) {
        tracing::trace!(cache = %self.name, %key, "Removing cache entry");
        self.store.remove(key)
    }

    /// Removes the entry for `key`, but only if it still is the one that `condition` matches.
    pub fn remove_if(&self, key: &CacheKey, condition: impl Fn(&V) -> bool) -> bool {
        self.store.remove_if(key, &condition)
    }

    /// Evicts `percentage` percent of all entries, as decided by the backing store.
    pub fn trim(&self, percentage: u8) {
        let percentage = percentage.min(100);
        tracing::debug!(cache = %self.name, percentage, "Trimming cache");
        if percentage == 100 {
            self.store.clear();
        } else if percentage > 0 {
            self.store.trim(percentage);
        }
    }

    /// Evicts the configured default percentage of all entries.
    pub fn trim_default(&self) {
        self.trim(self.trim_percentage)
    }

    /// Evicts all entries.
    pub fn clear(&self) {
        self.trim(100)
    }

    /// The approximate number of entries.
    pub fn len(&self) -> u64 {
        self.store.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
