use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use memoquery::caching::QueryOptions;
use memoquery::config::CacheConfig;
use memoquery::{Query, QueryExecutor, QueryHandler};
use serde::Serialize;

pub use memoquery_test::{measure, setup};

/// How long a single addition takes.
pub const ADD_DELAY: Duration = Duration::from_millis(200);

/// Adds two numbers, slowly.
#[derive(Debug, Clone, Serialize)]
pub struct AddQuery {
    pub left: i32,
    pub right: i32,
    #[serde(skip)]
    pub options: Option<QueryOptions>,
}

impl AddQuery {
    pub fn new(left: i32, right: i32) -> Self {
        Self {
            left,
            right,
            options: None,
        }
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = Some(options);
        self
    }
}

impl Query for AddQuery {
    fn options(&self) -> Option<QueryOptions> {
        self.options
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddError {
    #[error("{left} + {right} overflows")]
    Overflow { left: i32, right: i32 },
}

/// Computes [`AddQuery`]s, and counts how often it actually did.
#[derive(Debug, Clone, Default)]
pub struct AddHandler {
    calls: Arc<AtomicUsize>,
}

impl AddHandler {
    /// The number of computations started so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl QueryHandler<AddQuery> for AddHandler {
    type Output = i32;
    type Error = AddError;

    fn compute(&self, query: AddQuery) -> BoxFuture<'static, Result<i32, AddError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::time::sleep(ADD_DELAY).await;
            let AddQuery { left, right, .. } = query;
            left.checked_add(right)
                .ok_or(AddError::Overflow { left, right })
        }
        .boxed()
    }
}

/// Creates an executor for [`AddQuery`], along with a handle to its [`AddHandler`].
pub fn setup_executor(
    update_config: impl FnOnce(&mut CacheConfig),
) -> (QueryExecutor<AddQuery, AddHandler>, AddHandler) {
    setup();

    let mut config = CacheConfig::default();
    update_config(&mut config);

    let handler = AddHandler::default();
    let executor = QueryExecutor::builder("add", handler.clone())
        .config(&config)
        .build();

    (executor, handler)
}

/// The options `DEFAULT` without re-querying cached failures.
pub fn replay_errors() -> QueryOptions {
    QueryOptions::DEFAULT - QueryOptions::REQUERY_WHEN_ERROR_CACHED
}
