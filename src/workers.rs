// 🧵 Worker Pool - Bounded fan-out with per-item failure isolation
//
// Every item runs on its own tokio task behind a shared semaphore. Results
// come back in input order; a task that panics turns into a WorkerError for
// that item only.

use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkerError {
    #[error("worker for item {index} panicked: {message}")]
    Panicked { index: usize, message: String },

    #[error("worker for item {index} was cancelled")]
    Cancelled { index: usize },
}

fn join_error(index: usize, err: tokio::task::JoinError) -> WorkerError {
    if err.is_panic() {
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(index, %message, "worker panicked");
        WorkerError::Panicked { index, message }
    } else {
        WorkerError::Cancelled { index }
    }
}

/// Run `f` over every item with at most `limit` in flight
pub async fn run_bounded<T, R, F, Fut>(
    items: Vec<T>,
    limit: usize,
    f: F,
) -> Vec<Result<R, WorkerError>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));

    let handles: Vec<_> = items
        .into_iter()
        .map(|item| {
            let semaphore = semaphore.clone();
            let task = f(item);
            tokio::spawn(async move {
                // Semaphore is never closed; a closed one would only lift the bound
                let _permit = semaphore.acquire_owned().await.ok();
                task.await
            })
        })
        .collect();

    join_all(handles)
        .await
        .into_iter()
        .enumerate()
        .map(|(index, joined)| joined.map_err(|err| join_error(index, err)))
        .collect()
}

/// CPU-bound variant: each item runs on the blocking pool
pub async fn run_blocking_bounded<T, R, F>(
    items: Vec<T>,
    limit: usize,
    f: F,
) -> Vec<Result<R, WorkerError>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> R + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let results = run_bounded(items, limit, |item| {
        let f = f.clone();
        async move { tokio::task::spawn_blocking(move || f(item)).await }
    })
    .await;

    results
        .into_iter()
        .enumerate()
        .map(|(index, outer)| outer.and_then(|inner| inner.map_err(|err| join_error(index, err))))
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let items: Vec<u64> = (0..20).collect();
        let results = run_bounded(items, 4, |n| async move {
            // Later items finish first
            tokio::time::sleep(Duration::from_millis(20 - n)).await;
            n * 2
        })
        .await;

        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, (0..20).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = run_bounded((0..16).collect::<Vec<usize>>(), 3, |_| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;

        assert_eq!(results.len(), 16);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let results = run_blocking_bounded(vec![1, 2, 3], 2, |n: i32| {
            if n == 2 {
                panic!("bad pair");
            }
            n * 10
        })
        .await;

        assert_eq!(results[0], Ok(10));
        assert!(matches!(
            &results[1],
            Err(WorkerError::Panicked { index: 1, message }) if message == "bad pair"
        ));
        assert_eq!(results[2], Ok(30));
        println!("✅ Panic in one worker did not affect the others");
    }
}
