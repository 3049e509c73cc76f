//! The workflow interpreter.
//!
//! One interpreter owns one validated workflow and its run state: the
//! mutable workflow copy shared by every page loop, the used-actions list,
//! the result aggregator, the worker pool for popup/enqueued pages, and
//! the abort/stop flags. The rule loop itself lives in `run_loop`, action
//! dispatch in `dispatch`; both are further impl blocks on
//! [`Interpreter`], the way the rest of this codebase splits one type
//! across focused files.

pub mod dispatch;
pub mod events;
pub mod options;
pub mod run_loop;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::concurrency::WorkerPool;
use crate::driver::Driver;
use crate::error::{WorkflowError, WorkflowResult};
use crate::results::ResultAggregator;
use crate::scripts;
use crate::workflow::{PageState, Rule, WorkflowFile};

pub use events::{FlagHandle, InterpreterEvent};
pub use options::{
    BinaryCallback, BinaryPayload, DebugChannel, InterpreterOptions, RunMode,
    SerializableCallback,
};

/// Hard cap on rule-loop iterations across all pages of one run.
pub const MAX_LOOP_ITERATIONS: usize = 1000;

const EVENT_CHANNEL_CAPACITY: usize = 64;

pub(crate) struct Inner {
    pub(crate) workflow: WorkflowFile,
    pub(crate) options: InterpreterOptions,
    pub(crate) results: ResultAggregator,
    pub(crate) pool: WorkerPool,
    pub(crate) aborted: Arc<AtomicBool>,
    pub(crate) stopped: AtomicBool,
    pub(crate) run_active: AtomicBool,
    pub(crate) events: broadcast::Sender<InterpreterEvent>,
    pub(crate) used_actions: parking_lot::Mutex<Vec<String>>,
    pub(crate) workflow_copy: tokio::sync::Mutex<Vec<Rule>>,
    pub(crate) total_rules: AtomicUsize,
    pub(crate) iterations: AtomicUsize,
    pub(crate) screenshot_counter: AtomicUsize,
    pub(crate) run_id: parking_lot::Mutex<Uuid>,
}

/// Workflow interpreter. Cheap to clone; clones share all run state.
#[derive(Clone)]
pub struct Interpreter {
    pub(crate) inner: Arc<Inner>,
}

impl Interpreter {
    /// Validate the workflow and build an interpreter.
    ///
    /// Malformed workflows fail here, before `run` ever touches a page.
    pub fn new(workflow: WorkflowFile, options: InterpreterOptions) -> WorkflowResult<Self> {
        workflow.validate()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let pool = WorkerPool::new(options.max_concurrency());
        Ok(Self {
            inner: Arc::new(Inner {
                workflow,
                options,
                results: ResultAggregator::new(),
                pool,
                aborted: Arc::new(AtomicBool::new(false)),
                stopped: AtomicBool::new(false),
                run_active: AtomicBool::new(false),
                events,
                used_actions: parking_lot::Mutex::new(Vec::new()),
                workflow_copy: tokio::sync::Mutex::new(Vec::new()),
                total_rules: AtomicUsize::new(0),
                iterations: AtomicUsize::new(0),
                screenshot_counter: AtomicUsize::new(0),
                run_id: parking_lot::Mutex::new(Uuid::nil()),
            }),
        })
    }

    /// Subscribe to lifecycle events (including `flag` suspensions).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<InterpreterEvent> {
        self.inner.events.subscribe()
    }

    /// Execute the workflow against `driver`'s page.
    ///
    /// Resolves once the main page loop and every spawned popup/enqueued
    /// page loop have settled, and returns the final result snapshot.
    pub async fn run(
        &self,
        driver: Arc<dyn Driver>,
        params: Option<HashMap<String, Value>>,
    ) -> WorkflowResult<Value> {
        if self.inner.run_active.swap(true, Ordering::SeqCst) {
            return Err(WorkflowError::RunActive);
        }
        let outcome = self.run_inner(driver, params.unwrap_or_default()).await;
        self.inner.run_active.store(false, Ordering::SeqCst);
        outcome
    }

    async fn run_inner(
        &self,
        driver: Arc<dyn Driver>,
        params: HashMap<String, Value>,
    ) -> WorkflowResult<Value> {
        let rules = self.inner.workflow.initialise(&params)?;
        let total = rules.len();

        self.inner.stopped.store(false, Ordering::SeqCst);
        self.inner.iterations.store(0, Ordering::SeqCst);
        self.inner.total_rules.store(total, Ordering::SeqCst);
        self.inner.used_actions.lock().clear();
        *self.inner.workflow_copy.lock().await = rules;

        let run_id = Uuid::new_v4();
        *self.inner.run_id.lock() = run_id;
        info!(%run_id, total, "starting workflow run");
        self.emit_event(InterpreterEvent::RunStarted {
            run_id,
            timestamp: Utc::now(),
        });

        if let Err(e) = scripts::inject(&driver).await {
            warn!("init-script registration failed: {e}");
        }
        if let Err(e) = scripts::ensure_injected(&driver).await {
            warn!("in-page library injection failed: {e}");
        }

        self.drive_page(Arc::clone(&driver)).await;
        self.inner.pool.wait_for_completion().await;

        let executed = self.inner.used_actions.lock().len();
        if self.get_is_aborted() {
            self.emit_event(InterpreterEvent::RunAborted {
                run_id,
                timestamp: Utc::now(),
            });
        } else {
            self.emit_event(InterpreterEvent::RunCompleted {
                run_id,
                executed,
                timestamp: Utc::now(),
            });
        }
        debug!(%run_id, executed, "workflow run finished");
        Ok(self.inner.results.snapshot())
    }

    /// Cooperative shutdown: current loops finish their iteration and exit.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
    }

    /// Hard cancellation: every loop returns its partial results at the
    /// next suspension point. Never throws.
    pub fn abort(&self) {
        self.inner.aborted.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn get_is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    /// Stop an active run, clear accumulated results, drop the initialised
    /// workflow copy, and reset the abort flag.
    pub async fn cleanup(&self) {
        self.stop();
        self.inner.results.clear();
        self.inner.workflow_copy.lock().await.clear();
        self.inner.used_actions.lock().clear();
        self.inner.aborted.store(false, Ordering::SeqCst);
    }

    /// Current result snapshot.
    #[must_use]
    pub fn results(&self) -> Value {
        self.inner.results.snapshot()
    }

    /// Ids of rules carried out so far, in order.
    #[must_use]
    pub fn used_actions(&self) -> Vec<String> {
        self.inner.used_actions.lock().clone()
    }

    /// Number of rules still in the working copy.
    pub async fn remaining_rules(&self) -> usize {
        self.inner.workflow_copy.lock().await.len()
    }

    /// Read the live page state the context-aware matcher consumes.
    ///
    /// The tail-rule policy does not gate on this; it is a documented
    /// capability for callers that drive `Condition::applicable`
    /// themselves.
    pub async fn get_state(&self, driver: &Arc<dyn Driver>) -> WorkflowResult<PageState> {
        let url = driver.current_url().await?;
        let cookies = driver.cookies().await?;

        let mut candidates = std::collections::HashSet::new();
        for rule in &self.inner.workflow.workflow {
            rule.guard.collect_selectors(&mut candidates);
        }
        let mut selectors = std::collections::HashSet::new();
        if !candidates.is_empty() {
            let list: Vec<&String> = candidates.iter().collect();
            let expr = format!(
                "window.__scrapeflow.presentSelectors({})",
                serde_json::to_string(&list).unwrap_or_else(|_| "[]".to_string())
            );
            if let Ok(Value::Array(present)) =
                driver.evaluate(&expr, crate::driver::EVALUATE_TIMEOUT).await
            {
                selectors = present
                    .into_iter()
                    .filter_map(|v| v.as_str().map(ToString::to_string))
                    .collect();
            }
        }
        Ok(PageState {
            url,
            cookies,
            selectors,
        })
    }

    pub(crate) fn emit_event(&self, event: InterpreterEvent) {
        // Delivery is best-effort: no subscriber is not an error.
        let _ = self.inner.events.send(event);
    }

    pub(crate) fn emit_snapshot(&self, snapshot: Value) {
        if let Some(cb) = &self.inner.options.serializable_callback {
            cb(snapshot);
        }
    }

    pub(crate) fn debug_channel(&self) -> Option<&DebugChannel> {
        self.inner.options.debug_channel.as_ref()
    }

    /// Queue a page loop onto the worker pool (popups, enqueued links).
    pub(crate) fn spawn_page_job(&self, driver: Arc<dyn Driver>) {
        let interpreter = self.clone();
        let job: futures::future::BoxFuture<'static, ()> = Box::pin(async move {
            interpreter.drive_page(driver).await;
        });
        self.inner.pool.add_job(job);
    }
}
