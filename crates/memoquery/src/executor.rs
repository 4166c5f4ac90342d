//! The [`QueryExecutor`], which runs memoized and deduplicated queries.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::runtime::Handle;

use crate::caching::{
    CacheKey, CacheStore, InMemoryStore, JsonKeySerializer, KeySerializer, QueryCache,
    QueryOptions, QueryResult, SingleFlight,
};
use crate::config::CacheConfig;
use crate::utils::inflight::InflightGuard;

/// An immutable request value identifying a unit of work.
///
/// The serialized form of a query is its identity. The per-call [`QueryOptions`] must be left out
/// of that serialized form, for example using `#[serde(skip)]`.
pub trait Query: Serialize + Send + Sync + 'static {
    /// The caching policy for this specific call.
    ///
    /// `None` means [`QueryOptions::DEFAULT`].
    fn options(&self) -> Option<QueryOptions> {
        None
    }
}

/// The underlying computation for queries of type `Q`.
///
/// The computation is treated as opaque, and is never retried automatically.
pub trait QueryHandler<Q>: Send + Sync + 'static {
    type Output: Clone + Send + Sync + 'static;
    type Error: std::error::Error + Clone + Send + Sync + 'static;

    fn compute(&self, query: Q) -> BoxFuture<'static, Result<Self::Output, Self::Error>>;
}

impl<Q, F, Fut, T, E> QueryHandler<Q> for F
where
    F: Fn(Q) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Clone + Send + Sync + 'static,
    E: std::error::Error + Clone + Send + Sync + 'static,
{
    type Output = T;
    type Error = E;

    fn compute(&self, query: Q) -> BoxFuture<'static, Result<T, E>> {
        self(query).boxed()
    }
}

/// The cell type cached by a [`QueryExecutor`] with handler `H`.
pub type QueryCell<Q, H> =
    SingleFlight<<H as QueryHandler<Q>>::Output, <H as QueryHandler<Q>>::Error>;

/// Runs queries through a shared cache of [`SingleFlight`] computations.
///
/// Concurrent queries with equal keys share a single computation, and finished computations are
/// replayed to later queries until they expire from the cache. How each individual call interacts
/// with the cache is controlled by its [`QueryOptions`]:
///
/// - [`NONE`](QueryOptions::NONE) bypasses the cache entirely, and always computes.
/// - Without [`SAVE_TO_CACHE`](QueryOptions::SAVE_TO_CACHE), cached entries are used, but a
///   fresh computation is never made visible to other calls.
/// - With [`REQUERY_WHEN_ERROR_CACHED`](QueryOptions::REQUERY_WHEN_ERROR_CACHED), a cached failure
///   is discarded and computed again instead of being replayed.
pub struct QueryExecutor<Q, H: QueryHandler<Q>> {
    name: Arc<str>,
    handler: Arc<H>,
    key_serializer: Arc<dyn KeySerializer<Q>>,
    cache: QueryCache<QueryCell<Q, H>>,
    runtime: Handle,
    inflight: Arc<AtomicU64>,
}

impl<Q, H: QueryHandler<Q>> fmt::Debug for QueryExecutor<Q, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("name", &self.name)
            .field("cache", &self.cache)
            .field("inflight", &self.inflight.load(Ordering::Relaxed))
            .finish()
    }
}

impl<Q: Query, H: QueryHandler<Q>> QueryExecutor<Q, H> {
    /// Creates an executor using the given `cache`, and the [`JsonKeySerializer`].
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn new(name: impl Into<Arc<str>>, handler: H, cache: QueryCache<QueryCell<Q, H>>) -> Self {
        Self::builder(name, handler).cache(cache).build()
    }

    pub fn builder(name: impl Into<Arc<str>>, handler: H) -> QueryExecutorBuilder<Q, H> {
        QueryExecutorBuilder {
            name: name.into(),
            handler,
            key_serializer: Arc::new(JsonKeySerializer),
            config: CacheConfig::default(),
            cache: None,
            store: None,
            runtime: None,
        }
    }

    /// Runs the `query`, or joins / replays an equivalent one.
    ///
    /// Failures of the computation are propagated verbatim, and replayed to later callers for as
    /// long as they are cached.
    pub async fn query(&self, query: Q) -> QueryResult<H::Output, H::Error> {
        let name = &*self.name;
        metric!(counter("queries.access") += 1, "cache" => name);

        let key = self.key_serializer.serialize_key(&query)?;
        let options = query.options().unwrap_or_default();

        if options.is_none() {
            metric!(counter("queries.uncached") += 1, "cache" => name);
            tracing::trace!(cache = name, %key, "Bypassing query cache");
            return self.spawn_computation(&key, query).get().await;
        }

        if let Some(cell) = self.cache.try_get(&key) {
            if cell.is_failed() && options.requeries_errors() {
                metric!(counter("queries.requery") += 1, "cache" => name);
                tracing::debug!(cache = name, %key, "Re-querying cached failure");
                // only evict the exact failure we saw, a concurrent re-query may have replaced it
                self.cache
                    .remove_if(&key, |cached| SingleFlight::ptr_eq(cached, &cell));
            } else {
                if cell.is_finished() {
                    metric!(counter("queries.hit") += 1, "cache" => name);
                    tracing::trace!(cache = name, %key, "Query cache hit");
                } else {
                    metric!(counter("queries.join") += 1, "cache" => name);
                    tracing::trace!(cache = name, %key, "Joining in-flight query");
                }
                return cell.get().await;
            }
        }

        if !options.saves_to_cache() {
            metric!(counter("queries.uncached") += 1, "cache" => name);
            tracing::trace!(cache = name, %key, "Query cache miss, not saving result");
            return self.spawn_computation(&key, query).get().await;
        }

        let (cell, inserted) = self
            .cache
            .get_or_add_with(&key, || self.spawn_computation(&key, query));
        if !inserted {
            metric!(counter("queries.join") += 1, "cache" => name);
            tracing::trace!(cache = name, %key, "Lost race, joining concurrent query");
        }
        cell.get().await
    }

    /// The cache of computations, for inspection and trimming.
    pub fn cache(&self) -> &QueryCache<QueryCell<Q, H>> {
        &self.cache
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts a new computation for `query`, without registering it anywhere.
    ///
    /// The handler is invoked from within the spawned task, so that a panic while setting up the
    /// computation is recorded in the cell like any other panic.
    fn spawn_computation(&self, key: &CacheKey, query: Q) -> QueryCell<Q, H> {
        let name = Arc::clone(&self.name);
        metric!(counter("queries.computation") += 1, "cache" => &name);
        tracing::trace!(cache = %name, %key, "Computing query");

        let inflight = InflightGuard::enter(&self.inflight, &name);

        let handler = Arc::clone(&self.handler);
        SingleFlight::spawn(&self.runtime, async move {
            let _inflight = inflight;

            let start = Instant::now();
            let result = handler.compute(query).await;

            let status = match &result {
                Ok(_) => "ok",
                Err(err) => {
                    metric!(counter("queries.error") += 1, "cache" => &name);
                    tracing::debug!(
                        cache = %name,
                        error = err as &dyn std::error::Error,
                        "Query computation failed"
                    );
                    "error"
                }
            };
            metric!(
                timer("queries.computation.duration") = start.elapsed(),
                "cache" => &name,
                "status" => status,
            );

            result
        })
    }
}

/// Builds a [`QueryExecutor`].
pub struct QueryExecutorBuilder<Q, H: QueryHandler<Q>> {
    name: Arc<str>,
    handler: H,
    key_serializer: Arc<dyn KeySerializer<Q>>,
    config: CacheConfig,
    cache: Option<QueryCache<QueryCell<Q, H>>>,
    store: Option<Arc<dyn CacheStore<QueryCell<Q, H>>>>,
    runtime: Option<Handle>,
}

impl<Q: Query, H: QueryHandler<Q>> QueryExecutorBuilder<Q, H> {
    /// Uses a custom way of turning queries into [`CacheKey`]s.
    pub fn key_serializer(mut self, key_serializer: impl KeySerializer<Q> + 'static) -> Self {
        self.key_serializer = Arc::new(key_serializer);
        self
    }

    /// Configures the default [`InMemoryStore`].
    ///
    /// The trim percentage is also applied to a custom [`store`](Self::store).
    pub fn config(mut self, config: &CacheConfig) -> Self {
        self.config = *config;
        self
    }

    /// Uses a custom backing store instead of an [`InMemoryStore`].
    pub fn store(mut self, store: impl CacheStore<QueryCell<Q, H>> + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Uses an existing cache, which may be shared with other executors for the same queries.
    ///
    /// This takes precedence over [`store`](Self::store) and [`config`](Self::config).
    pub fn cache(mut self, cache: QueryCache<QueryCell<Q, H>>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// The runtime that computations are spawned on.
    ///
    /// Defaults to the runtime that [`build`](Self::build) is called on.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// # Panics
    ///
    /// Panics if no [`runtime`](Self::runtime) was given, and this is called outside of a tokio
    /// runtime.
    pub fn build(self) -> QueryExecutor<Q, H> {
        let Self {
            name,
            handler,
            key_serializer,
            config,
            cache,
            store,
            runtime,
        } = self;

        let cache = cache.unwrap_or_else(|| {
            let store = store
                .unwrap_or_else(|| Arc::new(InMemoryStore::from_config(&name, &config)));
            QueryCache::new(Arc::clone(&name), store).with_trim_percentage(config.trim_percentage)
        });

        QueryExecutor {
            name,
            handler: Arc::new(handler),
            key_serializer,
            cache,
            runtime: runtime.unwrap_or_else(Handle::current),
            inflight: Arc::new(AtomicU64::new(0)),
        }
    }
}
