use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::*;

fn fast(max_attempts: u32) -> RetryPolicy {
    RetryPolicy { initial_delay: Duration::from_millis(1), factor: 2.0, max_delay: Duration::from_millis(4), max_attempts }
}

#[test]
fn delays_grow_and_cap() {
    let policy = RetryPolicy { initial_delay: Duration::from_millis(100), factor: 2.0, max_delay: Duration::from_millis(700), max_attempts: 10 };
    assert_eq!(policy.delay_for(0), Duration::from_millis(100));
    assert_eq!(policy.delay_for(1), Duration::from_millis(200));
    assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    assert_eq!(policy.delay_for(3), Duration::from_millis(700));
    assert_eq!(policy.delay_for(60), Duration::from_millis(700));
}

#[tokio::test]
async fn succeeds_after_transient_failures() {
    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();
    let out = retry_sync(&fast(5), &CancellationToken::new(), "flaky", move || {
        let c = c.clone();
        async move {
            if c.fetch_add(1, Ordering::SeqCst) < 2 { Err(StoreError::Internal("blip".into())) } else { Ok(7) }
        }
    })
    .await;
    assert_eq!(out, Ok(7));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn propagates_final_failure() {
    let calls = Arc::new(AtomicU32::new(0));
    let c = calls.clone();
    let out: StoreResult<()> = retry_sync(&fast(3), &CancellationToken::new(), "down", move || {
        let c = c.clone();
        async move {
            c.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Internal("down".into()))
        }
    })
    .await;
    assert_eq!(out, Err(StoreError::Internal("down".into())));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn best_effort_swallows() {
    let out: Option<()> = retry_best_effort(&fast(2), &CancellationToken::new(), "down", || async { Err(StoreError::Internal("x".into())) }).await;
    assert_eq!(out, None);
}

#[tokio::test]
async fn cancellation_stops_waiting() {
    let cancel = CancellationToken::new();
    let slow = RetryPolicy { initial_delay: Duration::from_secs(3600), factor: 1.0, max_delay: Duration::from_secs(3600), max_attempts: 5 };
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });
    let started = std::time::Instant::now();
    let out: StoreResult<()> = retry_sync(&slow, &cancel, "stuck", || async { Err(StoreError::Internal("nope".into())) }).await;
    assert!(out.is_err());
    assert!(started.elapsed() < Duration::from_secs(60));

    let calls = AtomicU32::new(0);
    let out: StoreResult<()> = retry_sync(&fast(5), &cancel, "pre-cancelled", || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }
    })
    .await;
    assert!(out.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
