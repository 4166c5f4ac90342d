use memoquery::{QueryError, QueryOptions};

use crate::{AddError, AddQuery, replay_errors, setup_executor};

fn overflow() -> AddQuery {
    AddQuery::new(i32::MAX, i32::MAX)
}

fn overflow_error() -> QueryError<AddError> {
    QueryError::Computation(AddError::Overflow {
        left: i32::MAX,
        right: i32::MAX,
    })
}

#[tokio::test(start_paused = true)]
async fn test_errors_are_requeried_by_default() {
    let (executor, handler) = setup_executor(|_| {});

    assert_eq!(executor.query(overflow()).await, Err(overflow_error()));
    assert_eq!(executor.query(overflow()).await, Err(overflow_error()));

    assert_eq!(handler.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_errors_are_replayed() {
    let (executor, handler) = setup_executor(|_| {});

    let first = executor.query(overflow().with_options(replay_errors())).await;
    let second = executor.query(overflow().with_options(replay_errors())).await;

    assert_eq!(first, Err(overflow_error()));
    assert_eq!(second, first);
    assert_eq!(handler.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_replayed_error_until_requeried() {
    let (executor, handler) = setup_executor(|_| {});

    for _ in 0..3 {
        let result = executor.query(overflow().with_options(replay_errors())).await;
        assert_eq!(result, Err(overflow_error()));
    }
    assert_eq!(handler.calls(), 1);

    // a default call discards the cached failure, and caches its own
    executor.query(overflow()).await.unwrap_err();
    executor.query(overflow().with_options(replay_errors())).await.unwrap_err();
    assert_eq!(handler.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_error_display() {
    let (executor, _handler) = setup_executor(|_| {});

    let err = executor
        .query(overflow().with_options(QueryOptions::NONE))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "2147483647 + 2147483647 overflows");
    assert_eq!(err.as_tag(), "computation");
}
