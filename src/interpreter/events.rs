//! Interpreter lifecycle events.
//!
//! Delivered over a broadcast channel so any number of observers can
//! follow a run. The `flag` action suspends the rule loop and publishes a
//! [`FlagHandle`]; the run resumes when any observer calls
//! [`FlagHandle::resume`] (or the run is aborted).

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::driver::Driver;

/// Resume handle published by the `flag` action.
#[derive(Clone, Default)]
pub struct FlagHandle {
    resumed: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl FlagHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Let the suspended run continue. Idempotent.
    pub fn resume(&self) {
        self.resumed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Whether `resume` was already called.
    #[must_use]
    pub fn is_resumed(&self) -> bool {
        self.resumed.load(Ordering::SeqCst)
    }

    /// Wait until resumed. Resolves immediately if `resume` already ran.
    pub async fn wait(&self) {
        loop {
            if self.resumed.load(Ordering::SeqCst) {
                return;
            }
            let notified = self.notify.notified();
            if self.resumed.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

impl fmt::Debug for FlagHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlagHandle")
            .field("resumed", &self.is_resumed())
            .finish()
    }
}

/// Lifecycle events of one interpretation run.
#[derive(Clone)]
pub enum InterpreterEvent {
    RunStarted {
        run_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    /// A `flag` action suspended the run.
    Flag {
        page: Arc<dyn Driver>,
        resume: FlagHandle,
        timestamp: DateTime<Utc>,
    },
    RunCompleted {
        run_id: Uuid,
        executed: usize,
        timestamp: DateTime<Utc>,
    },
    RunAborted {
        run_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

impl InterpreterEvent {
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::RunStarted { timestamp, .. }
            | Self::Flag { timestamp, .. }
            | Self::RunCompleted { timestamp, .. }
            | Self::RunAborted { timestamp, .. } => *timestamp,
        }
    }
}

impl fmt::Debug for InterpreterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RunStarted { run_id, timestamp } => f
                .debug_struct("RunStarted")
                .field("run_id", run_id)
                .field("timestamp", timestamp)
                .finish(),
            Self::Flag { resume, timestamp, .. } => f
                .debug_struct("Flag")
                .field("resume", resume)
                .field("timestamp", timestamp)
                .finish_non_exhaustive(),
            Self::RunCompleted {
                run_id,
                executed,
                timestamp,
            } => f
                .debug_struct("RunCompleted")
                .field("run_id", run_id)
                .field("executed", executed)
                .field("timestamp", timestamp)
                .finish(),
            Self::RunAborted { run_id, timestamp } => f
                .debug_struct("RunAborted")
                .field("run_id", run_id)
                .field("timestamp", timestamp)
                .finish(),
        }
    }
}
