use std::time::Duration;

use memoquery::QueryOptions;

use crate::{ADD_DELAY, AddQuery, measure, setup_executor};

#[tokio::test(start_paused = true)]
async fn test_cached_result_is_fast() {
    let (executor, handler) = setup_executor(|_| {});

    let (result, elapsed) = measure(executor.query(AddQuery::new(1, 2))).await;
    assert_eq!(result, Ok(3));
    assert!(elapsed >= ADD_DELAY);

    let (result, elapsed) = measure(executor.query(AddQuery::new(1, 2))).await;
    assert_eq!(result, Ok(3));
    assert!(elapsed <= Duration::from_millis(10));

    assert_eq!(handler.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_different_queries_are_computed() {
    let (executor, handler) = setup_executor(|_| {});

    assert_eq!(executor.query(AddQuery::new(1, 2)).await, Ok(3));
    assert_eq!(executor.query(AddQuery::new(2, 1)).await, Ok(3));
    assert_eq!(executor.query(AddQuery::new(1, 2)).await, Ok(3));

    assert_eq!(handler.calls(), 2);
    assert_eq!(executor.cache().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_none_always_computes() {
    let (executor, handler) = setup_executor(|_| {});

    for _ in 0..3 {
        let query = AddQuery::new(1, 2).with_options(QueryOptions::NONE);
        let (result, elapsed) = measure(executor.query(query)).await;
        assert_eq!(result, Ok(3));
        assert!(elapsed >= ADD_DELAY);
    }

    assert_eq!(handler.calls(), 3);
    assert!(executor.cache().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_none_ignores_cached_value() {
    let (executor, handler) = setup_executor(|_| {});

    executor.query(AddQuery::new(1, 2)).await.unwrap();
    let query = AddQuery::new(1, 2).with_options(QueryOptions::NONE);
    executor.query(query).await.unwrap();

    assert_eq!(handler.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unsaved_result_is_not_shared() {
    let (executor, handler) = setup_executor(|_| {});

    let query = AddQuery::new(1, 2).with_options(QueryOptions::REQUERY_WHEN_ERROR_CACHED);
    assert_eq!(executor.query(query).await, Ok(3));
    assert!(executor.cache().is_empty());

    // a later default call can not see the result
    assert_eq!(executor.query(AddQuery::new(1, 2)).await, Ok(3));
    assert_eq!(handler.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unsaved_call_reads_cache() {
    let (executor, handler) = setup_executor(|_| {});

    executor.query(AddQuery::new(1, 2)).await.unwrap();
    let query = AddQuery::new(1, 2).with_options(QueryOptions::REQUERY_WHEN_ERROR_CACHED);
    let (result, elapsed) = measure(executor.query(query)).await;

    assert_eq!(result, Ok(3));
    assert!(elapsed <= Duration::from_millis(10));
    assert_eq!(handler.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_save_only_shares_with_default() {
    let (executor, handler) = setup_executor(|_| {});

    executor.query(AddQuery::new(1, 2)).await.unwrap();
    let query = AddQuery::new(1, 2).with_options(QueryOptions::SAVE_TO_CACHE);
    assert_eq!(executor.query(query).await, Ok(3));

    assert_eq!(handler.calls(), 1);
}

#[tokio::test]
async fn test_expired_entry_is_recomputed() {
    let (executor, handler) = setup_executor(|config| {
        config.ttl = Some(Duration::from_millis(300));
    });

    executor.query(AddQuery::new(1, 2)).await.unwrap();
    executor.query(AddQuery::new(1, 2)).await.unwrap();
    assert_eq!(handler.calls(), 1);

    tokio::time::sleep(Duration::from_millis(600)).await;
    executor.query(AddQuery::new(1, 2)).await.unwrap();
    assert_eq!(handler.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_trim_and_clear() {
    let (executor, handler) = setup_executor(|_| {});

    for left in 0..4 {
        executor.query(AddQuery::new(left, 1)).await.unwrap();
    }
    assert_eq!(executor.cache().len(), 4);

    executor.cache().trim_default();
    assert_eq!(executor.cache().len(), 1);

    executor.cache().clear();
    assert!(executor.cache().is_empty());

    executor.query(AddQuery::new(0, 1)).await.unwrap();
    assert_eq!(handler.calls(), 5);
}
