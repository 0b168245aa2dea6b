//! Bounded worker pool for parallel backfillers.
//!
//! All tasks are enqueued up front and no new work is accepted after
//! that. The first task error stops queued tasks from starting, but
//! tasks already running are allowed to finish before the error is
//! re-raised: fail-fast without abandoning in-flight API calls.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use crate::error::{EngineError, EngineResult};

/// Runs every task with at most `concurrency` running at once.
///
/// # Errors
///
/// Returns the first task error observed, after already-running tasks
/// have finished. Tasks queued behind the failure never start.
pub async fn run_all<F>(tasks: Vec<F>, concurrency: usize) -> EngineResult<()>
where
    F: Future<Output = EngineResult<()>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let stop = Arc::new(AtomicBool::new(false));
    let first_error: Arc<Mutex<Option<EngineError>>> = Arc::new(Mutex::new(None));

    let mut join_set = JoinSet::new();
    for task in tasks {
        let semaphore = Arc::clone(&semaphore);
        let stop = Arc::clone(&stop);
        let first_error = Arc::clone(&first_error);
        join_set.spawn(async move {
            let Ok(_permit) = semaphore.acquire().await else {
                return;
            };
            // A failure observed while this task was queued: skip it.
            if stop.load(Ordering::SeqCst) {
                return;
            }
            if let Err(err) = task.await {
                warn!(error = %err, "pooled task failed, stopping queued work");
                stop.store(true, Ordering::SeqCst);
                let mut slot = first_error.lock();
                if slot.is_none() {
                    *slot = Some(err);
                }
            }
        });
    }

    while let Some(joined) = join_set.join_next().await {
        if let Err(join_err) = joined {
            let mut slot = first_error.lock();
            if slot.is_none() {
                *slot = Some(EngineError::Internal(format!("pooled task panicked: {join_err}")));
            }
        }
    }

    let first = first_error.lock().take();
    match first {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_all_tasks_run_on_success() {
        let counter = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .collect();
        run_all(tasks, 3).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_first_error_is_returned() {
        let tasks: Vec<_> = (0..4)
            .map(|i| async move {
                if i == 2 {
                    Err(EngineError::Internal("boom".into()))
                } else {
                    Ok(())
                }
            })
            .collect();
        let err = run_all(tasks, 1).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_queued_work_skipped_after_failure() {
        let started = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        {
            let started = Arc::clone(&started);
            tasks.push(Box::pin(async move {
                started.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err(EngineError::Internal("first fails".into()))
            })
                as std::pin::Pin<
                    Box<dyn Future<Output = EngineResult<()>> + Send>,
                >);
        }
        for _ in 0..5 {
            let started = Arc::clone(&started);
            tasks.push(Box::pin(async move {
                started.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(())
            }));
        }
        // Concurrency 1: the failing task runs first, everything queued
        // behind it must be skipped.
        let err = run_all(tasks, 1).await.unwrap_err();
        assert!(err.to_string().contains("first fails"));
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_running_work_finishes_after_failure() {
        let finished = Arc::new(AtomicUsize::new(0));
        let mut tasks: Vec<std::pin::Pin<Box<dyn Future<Output = EngineResult<()>> + Send>>> =
            Vec::new();
        tasks.push(Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(EngineError::Internal("fast failure".into()))
        }));
        {
            let finished = Arc::clone(&finished);
            tasks.push(Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }
        // Concurrency 2: both start together; the slow one must still
        // complete even though the fast one fails immediately.
        let err = run_all(tasks, 2).await.unwrap_err();
        assert!(err.to_string().contains("fast failure"));
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
