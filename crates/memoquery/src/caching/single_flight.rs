use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use sentry::{Hub, SentryFutureExt};
use tokio::runtime::Handle;

use super::{QueryError, QueryResult};

/// The observable state of a [`SingleFlight`] cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    /// The computation is still running.
    Pending,
    /// The computation finished successfully.
    Resolved,
    /// The computation failed, panicked or was cancelled.
    Failed,
}

/// A computation that runs at most once, and whose outcome is shared by all its callers.
///
/// The computation is spawned onto the runtime as soon as the cell is created, so it makes
/// progress (and eventually finishes) whether or not anybody awaits it. Dropping a waiter never
/// cancels the computation.
///
/// Cloning a cell is cheap and yields a handle to the very same computation.
pub struct SingleFlight<T, E> {
    /// Set by the computation itself once it finished.
    outcome: Arc<OnceLock<QueryResult<T, E>>>,
    /// Resolves once the spawned task has finished.
    shared: Shared<BoxFuture<'static, QueryResult<T, E>>>,
}

impl<T: Clone, E: Clone> Clone for SingleFlight<T, E> {
    fn clone(&self) -> Self {
        Self {
            outcome: Arc::clone(&self.outcome),
            shared: self.shared.clone(),
        }
    }
}

impl<T, E> fmt::Debug for SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFlight")
            .field("state", &self.state())
            .finish()
    }
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Starts `future` on the given runtime and wraps it into a new cell.
    ///
    /// The computation is bound to a fresh sentry hub, as it outlives the scope of whoever
    /// happened to create the cell. Panics are caught and turned into [`QueryError::Panicked`].
    pub fn spawn<F>(runtime: &Handle, future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        let outcome = Arc::new(OnceLock::new());

        let task = {
            let outcome = Arc::clone(&outcome);
            async move {
                let result = match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(result) => result.map_err(QueryError::Computation),
                    Err(panic) => {
                        let err = QueryError::from_panic(panic);
                        tracing::error!(error = %DisplayPanic(&err), "Query computation panicked");
                        Err(err)
                    }
                };
                // we are the only producer, so this can never be set already
                let _ = outcome.set(result.clone());
                result
            }
        };
        let handle = runtime.spawn(task.bind_hub(Hub::new_from_top(Hub::current())));

        let shared = async move {
            match handle.await {
                Ok(result) => result,
                Err(err) if err.is_panic() => Err(QueryError::from_panic(err.into_panic())),
                Err(_) => Err(QueryError::Cancelled),
            }
        }
        .boxed()
        .shared();

        Self { outcome, shared }
    }

    /// Waits for the outcome of the computation.
    ///
    /// Returns immediately if the computation has already finished.
    pub async fn get(&self) -> QueryResult<T, E> {
        if let Some(outcome) = self.outcome.get() {
            return outcome.clone();
        }
        self.shared.clone().await
    }

    /// Returns the current state of the computation without waiting for it.
    pub fn state(&self) -> CellState {
        match self.outcome.get().or_else(|| self.shared.peek()) {
            None => CellState::Pending,
            Some(Ok(_)) => CellState::Resolved,
            Some(Err(_)) => CellState::Failed,
        }
    }

    /// Whether the computation has finished, successfully or not.
    pub fn is_finished(&self) -> bool {
        self.state() != CellState::Pending
    }

    /// Whether the computation has finished with a failure.
    pub fn is_failed(&self) -> bool {
        self.state() == CellState::Failed
    }
}

impl<T, E> SingleFlight<T, E> {
    /// Whether both cells are handles to the same computation.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.outcome, &other.outcome)
    }
}

/// Displays only the panic message, as the computation error may not be `Display`.
struct DisplayPanic<'a, E>(&'a QueryError<E>);

impl<E> fmt::Display for DisplayPanic<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            QueryError::Panicked(msg) => f.write_str(msg),
            other => f.write_str(other.as_tag()),
        }
    }
}
