use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::*;

#[tokio::test]
async fn same_key_runs_in_submission_order() {
    let queue = TaskQueue::new("test", 4, 8);
    let seen = Arc::new(Mutex::new(Vec::new()));
    for i in 0..20u64 {
        let seen = seen.clone();
        queue
            .submit("unit/a", async move {
                // later jobs finish faster if they were allowed to overlap
                tokio::time::sleep(Duration::from_millis(20 - i)).await;
                seen.lock().push(i);
            })
            .await;
    }
    queue.flush().await;
    assert_eq!(*seen.lock(), (0..20).collect::<Vec<_>>());
}

#[tokio::test]
async fn flush_waits_for_all_queues() {
    let queue = TaskQueue::new("test", 3, 4);
    let done = Arc::new(AtomicUsize::new(0));
    for i in 0..30 {
        let done = done.clone();
        queue
            .submit(&format!("unit/{i}"), async move {
                tokio::time::sleep(Duration::from_millis(2)).await;
                done.fetch_add(1, Ordering::SeqCst);
            })
            .await;
    }
    queue.flush().await;
    assert_eq!(done.load(Ordering::SeqCst), 30);
}

#[tokio::test]
async fn bounded_queue_applies_backpressure() {
    let queue = Arc::new(TaskQueue::new("test", 1, 1));
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    // occupies the worker
    queue.submit("k", async move { let _ = release_rx.await; }).await;
    // fills the single slot
    queue.submit("k", async {}).await;

    let q = queue.clone();
    let mut third = tokio::spawn(async move { q.submit("k", async {}).await });
    assert!(tokio::time::timeout(Duration::from_millis(50), &mut third).await.is_err(), "submit should wait for capacity");

    let _ = release_tx.send(());
    assert!(third.await.unwrap());
    queue.flush().await;
}

#[tokio::test]
async fn panicking_job_does_not_kill_worker() {
    let queue = TaskQueue::new("test", 1, 4);
    queue.submit("k", async { panic!("boom") }).await;
    let ran = Arc::new(AtomicUsize::new(0));
    let r = ran.clone();
    queue.submit("k", async move { r.fetch_add(1, Ordering::SeqCst); }).await;
    queue.flush().await;
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn shutdown_cancels_token() {
    let queue = TaskQueue::new("test", 1, 1);
    let token = queue.cancellation_token();
    assert!(!token.is_cancelled());
    queue.shutdown();
    assert!(token.is_cancelled());
}
