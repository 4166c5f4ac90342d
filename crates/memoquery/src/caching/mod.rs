//! # Query caching infrastructure
//!
//! Every query that goes through a [`QueryExecutor`](crate::executor::QueryExecutor) is turned
//! into a [`CacheKey`], and the computation for that key is represented by a [`SingleFlight`]
//! cell. The cell is what gets cached, not the value it eventually produces.
//!
//! ## Cache Layers
//!
//! There is a single in-memory layer, implemented by [`InMemoryStore`] on top of a
//! [`moka`] cache. It serves two purposes at once:
//!
//! - Request coalescing: concurrent queries for the same key are joined onto the computation
//!   that is already in flight, instead of starting their own.
//! - Memoization: a finished cell stays in the cache for as long as it is being used, so later
//!   queries are served from its recorded outcome.
//!
//! Entries expire after not being accessed for the configured `ttl`. Every access slides the
//! expiration window forward. Entries are also evicted when the cache exceeds its `capacity`,
//! or when the cache is trimmed explicitly.
//!
//! Failed computations are cached just like successful ones. Whether a cached failure is
//! replayed or recomputed is up to the [`QueryOptions`] of each individual query.
//!
//! Other storage backends can be plugged in by implementing [`CacheStore`].
//!
//! ### Metrics
//!
//! Each of these metrics is tagged with a `cache` field that corresponds to the executor name:
//!
//! - `queries.access`: All queries.
//! - `queries.hit`: Queries served by an already finished cell.
//! - `queries.join`: Queries joined onto a computation that is still in flight.
//! - `queries.requery`: Cached failures that were discarded and recomputed.
//! - `queries.uncached`: Queries that bypassed the cache entirely.
//! - `queries.computation`: Actual computations being run.
//! - `queries.error`: Computations that finished with an error.
//! - `queries.evicted`: Entries evicted due to capacity or expiration.
//!
//! ### Configuration
//!
//! See [`CacheConfig`](crate::config::CacheConfig).

mod cache_error;
mod cache_key;
mod memory;
mod options;
mod single_flight;
mod store;

pub use cache_error::{KeyError, QueryError, QueryResult};
pub use cache_key::{CacheKey, CacheKeyBuilder, JsonKeySerializer, KeySerializer};
pub use memory::InMemoryStore;
pub use options::QueryOptions;
pub use single_flight::{CellState, SingleFlight};
pub use store::{CacheStore, DEFAULT_TRIM_PERCENTAGE, QueryCache};
