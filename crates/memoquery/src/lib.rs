//! Memoizing, single-flight execution of asynchronous queries.
//!
//! A [`QueryExecutor`] turns each query into a [`CacheKey`](caching::CacheKey), and shares one
//! computation between all concurrent callers with an equal key. Finished computations are kept
//! in a [`QueryCache`](caching::QueryCache) with a sliding expiration window, and are replayed to
//! later callers without running the computation again.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod executor;
pub mod logging;
pub mod utils;

pub use caching::{QueryError, QueryOptions, QueryResult};
pub use executor::{Query, QueryExecutor, QueryHandler};
