// Bounded task pool with first-error-wins semantics
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;

type ErrorSlot = Arc<Mutex<Option<PipelineError>>>;

fn record(slot: &ErrorSlot, err: PipelineError) {
    if let Ok(mut first) = slot.lock() {
        if first.is_none() {
            *first = Some(err);
        }
    }
}

/// Runs at most `size` tasks at a time.
///
/// The first failing task cancels the pool: nothing more is dispatched and
/// `wait` returns that failure. Tasks already running are left to finish in
/// the background rather than aborted.
pub struct WorkerPool {
    limit: Arc<Semaphore>,
    tasks: JoinSet<()>,
    cancel: CancellationToken,
    first_error: ErrorSlot,
}

impl WorkerPool {
    /// A pool that also stops when `parent` is cancelled
    pub fn new(size: usize, parent: &CancellationToken) -> Self {
        Self {
            limit: Arc::new(Semaphore::new(size.max(1))),
            tasks: JoinSet::new(),
            cancel: parent.child_token(),
            first_error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Dispatch `task` once a slot frees up.
    /// Returns false, without running the task, if the pool was cancelled first.
    pub async fn spawn<F>(&mut self, task: F) -> bool
    where
        F: Future<Output = Result<(), PipelineError>> + Send + 'static,
    {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return false,
            permit = self.limit.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return false,
            },
        };

        let cancel = self.cancel.clone();
        let first_error = self.first_error.clone();
        self.tasks.spawn(async move {
            let _permit = permit;
            if let Err(e) = task.await {
                record(&first_error, e);
                cancel.cancel();
            }
        });
        true
    }

    /// Wait for every dispatched task, or for the first failure or cancellation
    pub async fn wait(mut self) -> Result<(), PipelineError> {
        loop {
            tokio::select! {
                biased;
                joined = self.tasks.join_next() => match joined {
                    Some(Ok(())) => {}
                    Some(Err(e)) => {
                        record(&self.first_error, PipelineError::from(e));
                        self.cancel.cancel();
                    }
                    None => break,
                },
                _ = self.cancel.cancelled() => break,
            }
        }
        // stragglers finish on their own
        self.tasks.detach_all();

        let first = self.first_error.lock().ok().and_then(|mut slot| slot.take());
        match first {
            Some(e) => Err(e),
            None if self.cancel.is_cancelled() => Err(PipelineError::Cancelled),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_all_tasks_succeed() {
        let done = Arc::new(AtomicUsize::new(0));
        let mut pool = WorkerPool::new(2, &CancellationToken::new());

        for _ in 0..5 {
            let done = done.clone();
            assert!(
                pool.spawn(async move {
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            );
        }

        pool.wait().await.unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut pool = WorkerPool::new(3, &CancellationToken::new());

        for _ in 0..10 {
            let running = running.clone();
            let peak = peak.clone();
            pool.spawn(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        }

        pool.wait().await.unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_first_error_wins_and_stops_dispatch() {
        let mut pool = WorkerPool::new(1, &CancellationToken::new());

        assert!(
            pool.spawn(async { Err(PipelineError::Database("first".to_string())) })
                .await
        );
        // the single slot frees only after the failure cancelled the pool
        let dispatched = pool
            .spawn(async { Err(PipelineError::Database("second".to_string())) })
            .await;
        assert!(!dispatched);
        assert!(pool.is_cancelled());

        match pool.wait().await {
            Err(PipelineError::Database(msg)) => assert_eq!(msg, "first"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_external_cancellation() {
        let parent = CancellationToken::new();
        let mut pool = WorkerPool::new(1, &parent);

        pool.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        parent.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), pool.wait())
            .await
            .unwrap();
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }

    #[tokio::test]
    async fn test_spawn_after_cancellation_is_refused() {
        let parent = CancellationToken::new();
        parent.cancel();
        let mut pool = WorkerPool::new(4, &parent);
        assert!(!pool.spawn(async { Ok(()) }).await);
        assert!(matches!(pool.wait().await, Err(PipelineError::Cancelled)));
    }
}
