//! Bounded job pool for popup and enqueued-link pages.
//!
//! Jobs are admitted FIFO up to `capacity` concurrent executions; the rest
//! queue on the semaphore. `wait_for_completion` resolves once every job
//! scheduled so far has settled. A panicking or failing job counts as
//! settled and never wedges completion.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Notify, Semaphore};
use tracing::warn;

/// Bounded FIFO pool of spawned async jobs.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    semaphore: Arc<Semaphore>,
    pending: AtomicUsize,
    drained: Notify,
}

struct SettleGuard(Arc<PoolInner>);

impl Drop for SettleGuard {
    fn drop(&mut self) {
        if self.0.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.drained.notify_waiters();
        }
    }
}

impl WorkerPool {
    /// Create a pool admitting at most `capacity` jobs at a time.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                semaphore: Arc::new(Semaphore::new(capacity.max(1))),
                pending: AtomicUsize::new(0),
                drained: Notify::new(),
            }),
        }
    }

    /// Schedule a job. Returns immediately; the job runs once a slot frees
    /// up. Submission order is admission order (the semaphore is fair).
    pub fn add_job<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        inner.pending.fetch_add(1, Ordering::SeqCst);
        let semaphore = Arc::clone(&inner.semaphore);
        tokio::spawn(async move {
            // Settles the job on every exit path, panics included.
            let _settled = SettleGuard(inner);
            match semaphore.acquire_owned().await {
                Ok(_permit) => job.await,
                Err(_) => warn!("worker pool semaphore closed, dropping job"),
            }
        });
    }

    /// Number of jobs scheduled but not yet settled.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Resolve once every job scheduled so far has settled.
    pub async fn wait_for_completion(&self) {
        loop {
            if self.inner.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            let notified = self.inner.drained.notified();
            if self.inner.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}
