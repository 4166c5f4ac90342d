use std::any::Any;
use std::fmt;

use thiserror::Error;

/// The error returned by [`QueryExecutor::query`](crate::executor::QueryExecutor::query).
///
/// `E` is the error type of the underlying computation. It is carried verbatim, and a single
/// failure is cloned to every caller that joined the failed computation, or that is served the
/// failure from the cache later on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError<E> {
    /// The computation itself failed.
    #[error(transparent)]
    Computation(E),
    /// The computation panicked.
    ///
    /// The attached string contains the panic message, if it had one.
    #[error("computation panicked: {0}")]
    Panicked(String),
    /// The computation was cancelled before it could finish.
    ///
    /// This only happens when the runtime driving the computation is shut down.
    #[error("computation cancelled")]
    Cancelled,
    /// The query could not be turned into a cache key.
    #[error(transparent)]
    Key(#[from] KeyError),
}

impl<E> QueryError<E> {
    /// Returns the error of the underlying computation, if this is one.
    pub fn computation(&self) -> Option<&E> {
        match self {
            Self::Computation(e) => Some(e),
            _ => None,
        }
    }

    /// Returns a short name suitable for metric tags.
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::Computation(_) => "computation",
            Self::Panicked(_) => "panicked",
            Self::Cancelled => "cancelled",
            Self::Key(_) => "key",
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_owned()
        };
        Self::Panicked(message)
    }
}

/// An error turning a query into a [`CacheKey`](super::CacheKey).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// The query could not be serialized.
    ///
    /// The attached string contains the serializer's error message.
    #[error("failed to serialize query key: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for KeyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<fmt::Error> for KeyError {
    fn from(err: fmt::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// The outcome of a query, as stored in a [`SingleFlight`](super::SingleFlight) cell.
pub type QueryResult<T, E> = Result<T, QueryError<E>>;
