use std::sync::Arc;
use std::time::Duration;

use memoquery::QueryOptions;
use tokio::time::Instant;

use crate::{ADD_DELAY, AddQuery, replay_errors, setup_executor};

#[tokio::test(start_paused = true)]
async fn test_concurrent_queries_share_computation() {
    let (executor, handler) = setup_executor(|_| {});

    let start = Instant::now();
    let queries = (0..16).map(|_| async {
        let result = executor.query(AddQuery::new(1, 2)).await;
        (result, start.elapsed())
    });
    let results = futures::future::join_all(queries).await;

    for (result, elapsed) in results {
        assert_eq!(result, Ok(3));
        assert!(elapsed >= ADD_DELAY);
    }
    assert_eq!(handler.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_late_joiner_waits_for_remainder() {
    let (executor, handler) = setup_executor(|_| {});

    let first = executor.query(AddQuery::new(1, 2));
    let second = async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let start = Instant::now();
        let result = executor.query(AddQuery::new(1, 2)).await;
        (result, start.elapsed())
    };
    let (first, (second, elapsed)) = tokio::join!(first, second);

    assert_eq!(first, Ok(3));
    assert_eq!(second, Ok(3));
    assert!(elapsed <= Duration::from_millis(60));
    assert_eq!(handler.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_failures_share_computation() {
    let (executor, handler) = setup_executor(|_| {});

    let queries = (0..8).map(|_| {
        executor.query(AddQuery::new(i32::MAX, 1).with_options(replay_errors()))
    });
    let results = futures::future::join_all(queries).await;

    assert!(results.iter().all(|result| result.is_err()));
    assert_eq!(handler.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_none_queries_are_independent() {
    let (executor, handler) = setup_executor(|_| {});

    let queries = (0..4).map(|_| {
        executor.query(AddQuery::new(1, 2).with_options(QueryOptions::NONE))
    });
    let results = futures::future::join_all(queries).await;

    assert!(results.iter().all(|result| *result == Ok(3)));
    assert_eq!(handler.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_caller_does_not_cancel() {
    let (executor, handler) = setup_executor(|_| {});

    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), executor.query(AddQuery::new(1, 2))).await;
    assert!(abandoned.is_err());

    let start = Instant::now();
    assert_eq!(executor.query(AddQuery::new(1, 2)).await, Ok(3));
    assert!(start.elapsed() < ADD_DELAY);
    assert_eq!(handler.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_tasks_share_computation() {
    let (executor, handler) = setup_executor(|_| {});
    let executor = Arc::new(executor);

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move { executor.query(AddQuery::new(20, 22)).await })
        })
        .collect();

    for task in futures::future::join_all(tasks).await {
        assert_eq!(task.unwrap(), Ok(42));
    }
    assert_eq!(handler.calls(), 1);
}
