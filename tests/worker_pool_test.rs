//! Worker pool semantics: bounded admission, completion, failure
//! isolation.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use scrapeflow::WorkerPool;

#[tokio::test(start_paused = true)]
async fn wait_for_completion_sees_every_job_settle() {
    let pool = WorkerPool::new(3);
    let completed = Arc::new(AtomicUsize::new(0));

    for _ in 0..10 {
        let completed = Arc::clone(&completed);
        pool.add_job(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            completed.fetch_add(1, Ordering::SeqCst);
        });
    }
    pool.wait_for_completion().await;

    assert_eq!(completed.load(Ordering::SeqCst), 10);
    assert_eq!(pool.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrency_never_exceeds_capacity() {
    let pool = WorkerPool::new(2);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    for _ in 0..8 {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        pool.add_job(async move {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            running.fetch_sub(1, Ordering::SeqCst);
        });
    }
    pool.wait_for_completion().await;

    assert!(peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test(start_paused = true)]
async fn a_panicking_job_does_not_wedge_completion() {
    let pool = WorkerPool::new(2);
    let completed = Arc::new(AtomicUsize::new(0));

    pool.add_job(async {
        panic!("job blew up");
    });
    for _ in 0..3 {
        let completed = Arc::clone(&completed);
        pool.add_job(async move {
            completed.fetch_add(1, Ordering::SeqCst);
        });
    }

    pool.wait_for_completion().await;
    assert_eq!(completed.load(Ordering::SeqCst), 3);
    assert_eq!(pool.pending(), 0);
}

#[tokio::test]
async fn wait_with_no_jobs_returns_immediately() {
    let pool = WorkerPool::new(1);
    pool.wait_for_completion().await;
}
