//! Bounded admission queue in front of the browser pool.
//!
//! Admission is a FIFO semaphore: up to `max_concurrent` tasks run at
//! once, the rest wait in arrival order (tokio's semaphore queues waiters
//! fairly). Every item carries two deadlines: one for the wait, one for
//! the execution. A cancelled item waiting in the queue is removed without
//! its task ever being invoked.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ScrapeError;

/// Queue occupancy for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    /// Tasks currently executing.
    pub active: usize,
    /// Tasks waiting for admission.
    pub pending: usize,
}

/// Bounded FIFO request queue.
#[derive(Debug)]
pub struct RequestQueue {
    semaphore: Arc<Semaphore>,
    active: AtomicUsize,
    pending: AtomicUsize,
    request_timeout: Duration,
    queue_timeout: Duration,
}

/// Decrements a counter on drop so occupancy stays correct on every exit
/// path, including cancellation and timeout.
struct CountGuard<'a>(&'a AtomicUsize);

impl Drop for CountGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

impl RequestQueue {
    #[must_use]
    pub fn new(max_concurrent: usize, request_timeout: Duration, queue_timeout: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            active: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
            request_timeout,
            queue_timeout,
        }
    }

    /// Admit and run `task` under the concurrency ceiling with the queue's
    /// default execution deadline.
    pub async fn enqueue<T, F, Fut>(
        &self,
        id: &str,
        cancel: &CancellationToken,
        task: F,
    ) -> Result<T, ScrapeError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, ScrapeError>>,
    {
        self.enqueue_with_deadline(id, cancel, self.request_timeout, task)
            .await
    }

    /// Admit and run `task` with an explicit execution deadline.
    ///
    /// Order of checks matters: cancellation wins over admission, and a
    /// cancellation observed after admission but before the task starts
    /// still skips the task entirely.
    pub async fn enqueue_with_deadline<T, F, Fut>(
        &self,
        id: &str,
        cancel: &CancellationToken,
        deadline: Duration,
        task: F,
    ) -> Result<T, ScrapeError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, ScrapeError>>,
    {
        if cancel.is_cancelled() {
            return Err(ScrapeError::Cancelled);
        }

        self.pending.fetch_add(1, Ordering::Relaxed);
        let pending_guard = CountGuard(&self.pending);

        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Request {id} cancelled while queued");
                return Err(ScrapeError::Cancelled);
            }
            acquired = tokio::time::timeout(self.queue_timeout, self.semaphore.acquire()) => {
                match acquired {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => {
                        return Err(ScrapeError::Internal("request queue closed".to_string()));
                    }
                    Err(_) => {
                        debug!("Request {id} timed out waiting in queue");
                        return Err(ScrapeError::QueueTimeout(format!(
                            "waited {:.0}s for a slot",
                            self.queue_timeout.as_secs_f64()
                        )));
                    }
                }
            }
        };
        drop(pending_guard);

        // Dispatching an already-cancelled item skips the task.
        if cancel.is_cancelled() {
            debug!("Request {id} cancelled before dispatch");
            return Err(ScrapeError::Cancelled);
        }

        self.active.fetch_add(1, Ordering::Relaxed);
        let active_guard = CountGuard(&self.active);

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Request {id} cancelled mid-flight");
                Err(ScrapeError::Cancelled)
            }
            finished = tokio::time::timeout(deadline, task()) => {
                match finished {
                    Ok(result) => result,
                    Err(_) => Err(ScrapeError::Timeout(format!(
                        "request {id} exceeded {:.0}s deadline",
                        deadline.as_secs_f64()
                    ))),
                }
            }
        };

        drop(active_guard);
        drop(permit);
        result
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            active: self.active.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
        }
    }

    /// Tasks currently executing.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Tasks waiting for admission.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn queue(max: usize, request_ms: u64, queue_ms: u64) -> RequestQueue {
        RequestQueue::new(
            max,
            Duration::from_millis(request_ms),
            Duration::from_millis(queue_ms),
        )
    }

    #[tokio::test]
    async fn runs_task_and_returns_value() {
        let q = queue(2, 1000, 1000);
        let cancel = CancellationToken::new();
        let out = q.enqueue("t1", &cancel, || async { Ok(41 + 1) }).await;
        assert_eq!(out.unwrap(), 42);
        assert_eq!(q.active(), 0);
        assert_eq!(q.pending(), 0);
    }

    #[tokio::test]
    async fn cancelled_before_enqueue_never_invokes_task() {
        let q = queue(1, 1000, 1000);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let invoked = Arc::new(AtomicU32::new(0));
        let invoked2 = Arc::clone(&invoked);
        let out: Result<(), _> = q
            .enqueue("t1", &cancel, move || async move {
                invoked2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(out, Err(ScrapeError::Cancelled)));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn execution_deadline_yields_timeout() {
        let q = queue(1, 30, 1000);
        let cancel = CancellationToken::new();
        let out: Result<(), _> = q
            .enqueue("slow", &cancel, || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(out, Err(ScrapeError::Timeout(_))));
        assert_eq!(q.active(), 0);
    }

    #[tokio::test]
    async fn overload_sheds_with_queue_timeout() {
        let q = Arc::new(queue(2, 5_000, 200));
        let cancel = CancellationToken::new();

        let mut handles = Vec::new();
        for i in 0..5 {
            let q = Arc::clone(&q);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                q.enqueue(&format!("t{i}"), &cancel, || async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok(())
                })
                .await
            }));
        }

        let mut ok = 0;
        let mut queue_timeouts = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(()) => ok += 1,
                Err(ScrapeError::QueueTimeout(_)) => queue_timeouts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(ok, 2);
        assert_eq!(queue_timeouts, 3);
    }

    #[tokio::test]
    async fn fifo_start_order_under_capacity_pressure() {
        let q = Arc::new(queue(1, 5_000, 5_000));
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();

        let mut handles = Vec::new();
        for i in 0..3u32 {
            let q = Arc::clone(&q);
            let order = Arc::clone(&order);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let order_slot = Arc::clone(&order);
                q.enqueue(&format!("t{i}"), &cancel, move || async move {
                    order_slot.lock().await.push(i);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(())
                })
                .await
            }));
            // Stagger arrivals so the queue sees a defined order.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(*order.lock().await, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn cancellation_mid_flight_returns_promptly() {
        let q = queue(1, 60_000, 60_000);
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel2.cancel();
        });

        let started = std::time::Instant::now();
        let out: Result<(), _> = q
            .enqueue("hang", &cancel, || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;

        assert!(matches!(out, Err(ScrapeError::Cancelled)));
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(q.active(), 0);
    }
}
