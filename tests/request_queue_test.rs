//! Admission-control behavior of the request queue under load.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sitesift::{RequestQueue, ScrapeError};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn overload_sheds_exactly_the_excess() {
    // maxConcurrent=2, queueTimeout=200ms, five 1-second tasks:
    // two run, three shed with a queue timeout.
    let queue = Arc::new(RequestQueue::new(
        2,
        Duration::from_secs(5),
        Duration::from_millis(200),
    ));
    let cancel = CancellationToken::new();

    let mut handles = Vec::new();
    for i in 0..5 {
        let queue = Arc::clone(&queue);
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            queue
                .enqueue(&format!("task-{i}"), &cancel, move || async move {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok(i)
                })
                .await
        }));
    }

    let mut succeeded = 0;
    let mut shed = 0;
    for handle in handles {
        match handle.await.expect("task panicked") {
            Ok(_) => succeeded += 1,
            Err(ScrapeError::QueueTimeout(_)) => shed += 1,
            Err(other) => panic!("unexpected error kind: {other}"),
        }
    }

    assert_eq!(succeeded, 2);
    assert_eq!(shed, 3);
    assert_eq!(queue.active(), 0);
    assert_eq!(queue.pending(), 0);
}

#[tokio::test]
async fn tasks_start_in_enqueue_order() {
    let queue = Arc::new(RequestQueue::new(
        1,
        Duration::from_secs(10),
        Duration::from_secs(10),
    ));
    let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let cancel = CancellationToken::new();

    let mut handles = Vec::new();
    for i in 0..4u32 {
        let queue = Arc::clone(&queue);
        let order = Arc::clone(&order);
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            let order_slot = Arc::clone(&order);
            queue
                .enqueue(&format!("ordered-{i}"), &cancel, move || async move {
                    order_slot.lock().await.push(i);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(())
                })
                .await
        }));
        // Distinct arrival times make the expected order well-defined.
        tokio::time::sleep(Duration::from_millis(15)).await;
    }

    for handle in handles {
        handle.await.expect("task panicked").expect("task failed");
    }

    assert_eq!(*order.lock().await, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn cancellation_before_dispatch_skips_the_task() {
    let queue = Arc::new(RequestQueue::new(
        1,
        Duration::from_secs(10),
        Duration::from_secs(10),
    ));
    let cancel = CancellationToken::new();
    let blocker_cancel = cancel.clone();

    // Occupy the single slot.
    let blocker_queue = Arc::clone(&queue);
    let blocker = tokio::spawn(async move {
        blocker_queue
            .enqueue("blocker", &blocker_cancel, || async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(())
            })
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // This one waits in the queue; cancel it before a slot frees up.
    let waiting_cancel = CancellationToken::new();
    let invoked = Arc::new(AtomicUsize::new(0));
    let invoked_probe = Arc::clone(&invoked);
    let waiting_queue = Arc::clone(&queue);
    let waiting_token = waiting_cancel.clone();
    let waiting = tokio::spawn(async move {
        waiting_queue
            .enqueue("waiting", &waiting_token, move || async move {
                invoked_probe.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    waiting_cancel.cancel();

    let waited = waiting.await.expect("task panicked");
    assert!(matches!(waited, Err(ScrapeError::Cancelled)));
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    blocker.await.expect("blocker panicked").expect("blocker failed");
}

#[tokio::test]
async fn cancellation_mid_flight_returns_within_budget() {
    let queue = RequestQueue::new(1, Duration::from_secs(60), Duration::from_secs(60));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result: Result<(), _> = queue
        .enqueue("hanging", &cancel, || async {
            // Simulates a navigation that never completes.
            tokio::time::sleep(Duration::from_secs(300)).await;
            Ok(())
        })
        .await;

    assert!(matches!(result, Err(ScrapeError::Cancelled)));
    assert!(
        started.elapsed() < Duration::from_millis(200),
        "cancellation took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn execution_deadline_maps_to_timeout_kind() {
    let queue = RequestQueue::new(1, Duration::from_millis(50), Duration::from_secs(5));
    let cancel = CancellationToken::new();

    let result: Result<(), _> = queue
        .enqueue("deadline", &cancel, || async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;

    match result {
        Err(e @ ScrapeError::Timeout(_)) => assert_eq!(e.kind(), "timeout"),
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn stats_track_active_and_pending() {
    let queue = Arc::new(RequestQueue::new(
        1,
        Duration::from_secs(10),
        Duration::from_secs(10),
    ));
    let cancel = CancellationToken::new();

    let q1 = Arc::clone(&queue);
    let c1 = cancel.clone();
    let first = tokio::spawn(async move {
        q1.enqueue("running", &c1, || async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let q2 = Arc::clone(&queue);
    let c2 = cancel.clone();
    let second = tokio::spawn(async move {
        q2.enqueue("parked", &c2, || async { Ok(()) }).await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stats = queue.stats();
    assert_eq!(stats.active, 1);
    assert_eq!(stats.pending, 1);

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    let stats = queue.stats();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.pending, 0);
}
