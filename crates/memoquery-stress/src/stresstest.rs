use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use sentry::SentryFutureExt;
use sketches_ddsketch::DDSketch;
use tokio::sync::Semaphore;

use memoquery::QueryExecutor;
use memoquery::config::Config;

use crate::workloads::{SleepHandler, SleepQuery, Workload, WorkloadsConfig};

type Executor = QueryExecutor<SleepQuery, SleepHandler>;

#[derive(Default)]
struct Outcomes {
    durations: DDSketch,
    errors: usize,
}

pub async fn perform_stresstest(
    config: Config,
    workloads: WorkloadsConfig,
    duration: Duration,
) -> Result<()> {
    let runtime = tokio::runtime::Handle::current();

    // every workload gets its own executor, so computations can be attributed
    let workloads: Vec<_> = workloads
        .workloads
        .into_iter()
        .enumerate()
        .map(|(i, workload)| {
            let handler = SleepHandler::new(&workload);
            let executor = QueryExecutor::builder(format!("workload-{i}"), handler.clone())
                .config(&config.cache)
                .runtime(runtime.clone())
                .build();
            (Arc::new(workload), Arc::new(executor), handler)
        })
        .collect();

    // warmup: run each workload once to make sure the runtime is warm
    {
        let start = Instant::now();

        let futures = workloads.iter().map(|(workload, executor, _)| {
            let query = workload.random_query();
            let executor = Arc::clone(executor);
            tokio::spawn(async move {
                let _ = executor.query(query).await;
            })
        });

        let _results = futures::future::join_all(futures).await;

        println!("Warmup: {:?}", start.elapsed());
    };
    println!();

    // run the workloads concurrently
    let mut tasks = Vec::with_capacity(workloads.len());
    for (workload, executor, _) in workloads.iter() {
        let start = Instant::now();
        let deadline = tokio::time::Instant::from_std(start + duration);
        let workload = Arc::clone(workload);
        let executor = Arc::clone(executor);

        let task = tokio::spawn(async move { run_workload(workload, executor, deadline).await });
        tasks.push(task);
    }

    let finished_tasks = futures::future::join_all(tasks).await;

    for (i, (task, (workload, executor, handler))) in
        finished_tasks.into_iter().zip(&workloads).enumerate()
    {
        let outcomes = task.context("workload panicked")?;
        let concurrency = workload.concurrency;

        let ops = outcomes.durations.count();
        let ops_ps = ops as f32 / duration.as_secs_f32();
        println!("Workload {i} (concurrency: {concurrency}): {ops} operations, {ops_ps:.2} ops/s");

        let computations = handler.computations();
        let errors = outcomes.errors;
        println!(
            "  computations: {computations}; errors: {errors}; cached entries: {}",
            executor.cache().len()
        );

        if ops == 0 {
            continue;
        }
        let quantile = |q| {
            let secs = outcomes.durations.quantile(q).ok().flatten().unwrap_or_default();
            Duration::from_secs_f64(secs)
        };
        let avg = Duration::from_secs_f64(outcomes.durations.sum().unwrap_or_default() / ops as f64);
        let (p50, p90, p99) = (quantile(0.5), quantile(0.9), quantile(0.99));
        println!("  avg: {avg:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}");
    }

    Ok(())
}

async fn run_workload(
    workload: Arc<Workload>,
    executor: Arc<Executor>,
    deadline: tokio::time::Instant,
) -> Outcomes {
    let concurrency = workload.concurrency;
    let outcomes = Arc::new(Mutex::new(Outcomes::default()));
    let semaphore = Arc::new(Semaphore::new(concurrency));

    // See <https://docs.rs/tokio/latest/tokio/time/struct.Sleep.html#examples>
    let sleep = tokio::time::sleep_until(deadline);
    tokio::pin!(sleep);

    loop {
        if deadline.elapsed() > Duration::ZERO {
            break;
        }
        tokio::select! {
            permit = semaphore.clone().acquire_owned() => {
                let query = workload.random_query();
                let executor = Arc::clone(&executor);
                let outcomes = Arc::clone(&outcomes);
                let task_start = Instant::now();

                let hub = sentry::Hub::new_from_top(sentry::Hub::current());
                let ctx = sentry::TransactionContext::new("stresstest", "stresstest");
                let transaction = hub.start_transaction(ctx);

                let future = async move {
                    let result = executor.query(query).await;

                    transaction.finish();

                    let mut outcomes = outcomes.lock().unwrap_or_else(|e| e.into_inner());
                    outcomes.durations.add(task_start.elapsed().as_secs_f64());
                    if result.is_err() {
                        outcomes.errors += 1;
                    }

                    drop(permit);
                };
                let future = future.bind_hub(hub);

                tokio::spawn(future);
            }
            _ = &mut sleep => {
                break;
            }
        }
    }

    // by acquiring *all* the semaphores, we essentially wait for all outstanding tasks to finish
    let _permits = semaphore.acquire_many(concurrency as u32).await;

    let mut outcomes = outcomes.lock().unwrap_or_else(|e| e.into_inner());
    std::mem::take(&mut *outcomes)
}
