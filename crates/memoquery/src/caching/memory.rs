use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use moka::notification::RemovalCause;
use moka::ops::compute::{CompResult, Op};

use super::{CacheKey, CacheStore};
use crate::config::CacheConfig;

type InMemoryCache<V> = moka::sync::Cache<CacheKey, V>;

/// An in-memory [`CacheStore`] on top of a [`moka`] cache.
///
/// Entries expire after they have not been accessed for the configured `time_to_idle`. Every
/// read and every write of an entry resets that timer. Additionally, the store is bounded to a
/// maximum number of entries, evicting the least useful entries when it grows beyond that.
pub struct InMemoryStore<V> {
    cache: InMemoryCache<V>,
    time_to_idle: Option<Duration>,
}

impl<V: Clone + Send + Sync + 'static> fmt::Debug for InMemoryStore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("name", &self.cache.name())
            .field("entries", &self.cache.entry_count())
            .field("time_to_idle", &self.time_to_idle)
            .finish()
    }
}

impl<V: Clone + Send + Sync + 'static> InMemoryStore<V> {
    /// Creates a new store holding at most `capacity` entries.
    ///
    /// If `time_to_idle` is `None`, entries are only ever evicted due to capacity, or explicitly.
    pub fn new(name: &str, capacity: u64, time_to_idle: Option<Duration>) -> Self {
        let cache_name: Arc<str> = name.into();
        let mut builder = InMemoryCache::builder()
            .name(name)
            .max_capacity(capacity)
            .eviction_listener(move |key, _value, cause| {
                if cause.was_evicted() {
                    metric!(
                        counter("queries.evicted") += 1,
                        "cache" => &cache_name,
                        "cause" => cause_tag(cause),
                    );
                    tracing::trace!(cache = %cache_name, %key, ?cause, "Evicted cache entry");
                }
            });
        if let Some(time_to_idle) = time_to_idle {
            builder = builder.time_to_idle(time_to_idle);
        }

        Self {
            cache: builder.build(),
            time_to_idle,
        }
    }

    pub fn from_config(name: &str, config: &CacheConfig) -> Self {
        Self::new(name, config.capacity, config.ttl)
    }
}

fn cause_tag(cause: RemovalCause) -> &'static str {
    match cause {
        RemovalCause::Expired => "expired",
        RemovalCause::Explicit => "explicit",
        RemovalCause::Replaced => "replaced",
        RemovalCause::Size => "size",
    }
}

impl<V: Clone + Send + Sync + 'static> CacheStore<V> for InMemoryStore<V> {
    fn get_or_insert_with(&self, key: &CacheKey, init: Box<dyn FnOnce() -> V + '_>) -> (V, bool) {
        let entry = self.cache.entry_by_ref(key).or_insert_with(init);
        let inserted = entry.is_fresh();
        (entry.into_value(), inserted)
    }

    fn get(&self, key: &CacheKey) -> Option<V> {
        self.cache.get(key)
    }

    fn insert(&self, key: CacheKey, value: V) {
        self.cache.insert(key, value)
    }

    fn remove(&self, key: &CacheKey) {
        self.cache.invalidate(key)
    }

    fn remove_if(&self, key: &CacheKey, condition: &dyn Fn(&V) -> bool) -> bool {
        let result = self
            .cache
            .entry_by_ref(key)
            .and_compute_with(|entry| match entry {
                Some(entry) if condition(entry.value()) => Op::Remove,
                _ => Op::Nop,
            });
        matches!(result, CompResult::Removed(_))
    }

    fn trim(&self, percentage: u8) {
        let keys: Vec<Arc<CacheKey>> = self.cache.iter().map(|(key, _)| key).collect();
        let to_evict = (keys.len() * usize::from(percentage)).div_ceil(100);

        for key in keys.iter().take(to_evict) {
            self.cache.invalidate(key.as_ref());
        }
    }

    fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
    }

    fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    fn time_to_idle(&self) -> Option<Duration> {
        self.time_to_idle
    }
}
