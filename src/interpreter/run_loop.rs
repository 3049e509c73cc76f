//! The rule-matching loop.
//!
//! Each page (the main one, every popup, every enqueued link) gets one
//! loop over the shared workflow copy. The matched rule is the tail of the
//! copy (normative policy; the context-aware matcher remains available
//! through [`Interpreter::get_state`] and `Condition::applicable`). After
//! carry-out the rule id is appended to used-actions and the rule is
//! spliced out, so `used ⧺ remaining` always replays the initial id
//! sequence. Two safety nets bound the loop: the consecutive-repeat guard
//! and the global iteration cap.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use tracing::{debug, error, warn};

use crate::driver::{DEFAULT_TIMEOUT, Driver, WaitUntil};
use crate::workflow::Rule;

use super::{Interpreter, MAX_LOOP_ITERATIONS};

/// Tracks consecutive carry-outs of the same rule.
#[derive(Debug, Default)]
pub(crate) struct RepeatGuard {
    last: Option<String>,
    count: usize,
}

impl RepeatGuard {
    /// Record one carry-out; true when the rule has now fired
    /// `max_repeats` times in a row and the loop must terminate.
    pub(crate) fn record(&mut self, rule_id: &str, max_repeats: usize) -> bool {
        if self.last.as_deref() == Some(rule_id) {
            self.count += 1;
        } else {
            self.last = Some(rule_id.to_string());
            self.count = 1;
        }
        self.count >= max_repeats
    }
}

impl Interpreter {
    /// Run the rule loop against one page until the copy drains, the page
    /// dies, a cap trips, or the run is stopped/aborted.
    pub(crate) fn drive_page<'a>(
        &'a self,
        driver: Arc<dyn Driver>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
        self.register_popup_handler(&driver);

        let mut repeat_guard = RepeatGuard::default();
        let max_repeats = self.inner.options.max_repeats();

        loop {
            if self.get_is_aborted() || self.inner.stopped.load(Ordering::SeqCst) {
                debug!("loop observed stop/abort, exiting");
                return;
            }
            if driver.is_closed() {
                debug!("page closed, exiting loop");
                return;
            }

            // Soft load-state wait: a page that never settles is closed
            // and its loop ends; other pages keep going.
            if let Err(e) = driver
                .wait_for_load_state(WaitUntil::Load, DEFAULT_TIMEOUT)
                .await
            {
                warn!("load state wait failed, closing page: {e}");
                let _ = driver.close().await;
                return;
            }

            // Tail-rule match policy.
            let Some(rule) = self.peek_tail().await else {
                debug!("workflow copy drained, loop complete");
                return;
            };
            let rule_id = rule.id_or(0);

            if let Err(e) = self.carry_out_rule(&driver, &rule).await {
                // Soft mode: the failure is logged and the rule still
                // counts as used.
                error!(rule = %rule_id, "rule carry-out failed: {e}");
            }

            self.consume_rule(&rule_id).await;
            self.report_progress().await;

            if repeat_guard.record(&rule_id, max_repeats) {
                warn!(rule = %rule_id, max_repeats, "repeat cap reached, exiting loop");
                return;
            }

            let iterations = self.inner.iterations.fetch_add(1, Ordering::SeqCst) + 1;
            if iterations >= MAX_LOOP_ITERATIONS {
                warn!(iterations, "iteration cap reached, exiting loop");
                return;
            }
        }
        })
    }

    async fn peek_tail(&self) -> Option<Rule> {
        self.inner.workflow_copy.lock().await.last().cloned()
    }

    /// Append the rule id to used-actions and splice the rule out of the
    /// shared copy. Concurrent loops may have raced us to the tail, so
    /// removal searches from the back by id.
    async fn consume_rule(&self, rule_id: &str) {
        self.inner.used_actions.lock().push(rule_id.to_string());
        let mut copy = self.inner.workflow_copy.lock().await;
        if let Some(index) = copy
            .iter()
            .rposition(|r| r.id.as_deref() == Some(rule_id))
        {
            copy.remove(index);
        }
    }

    async fn report_progress(&self) {
        let executed = self.inner.used_actions.lock().len();
        let total = self.inner.total_rules.load(Ordering::SeqCst);
        if let Some(channel) = self.debug_channel()
            && let Some(progress) = &channel.progress_update
        {
            progress(executed, total);
        }
    }

    /// One-shot popup handler: every page the page opens re-enters the
    /// rule loop through the worker pool, sharing the workflow copy.
    fn register_popup_handler(&self, driver: &Arc<dyn Driver>) {
        let Some(mut popups) = driver.take_popup_receiver() else {
            return;
        };
        let interpreter = self.clone();
        tokio::spawn(async move {
            while let Some(popup) = popups.recv().await {
                if interpreter.get_is_aborted()
                    || interpreter.inner.stopped.load(Ordering::SeqCst)
                {
                    break;
                }
                debug!("popup observed, scheduling page loop");
                if let Err(e) = crate::scripts::ensure_injected(&popup).await {
                    warn!("popup injection failed: {e}");
                }
                interpreter.spawn_page_job(popup);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::RepeatGuard;

    #[test]
    fn repeat_guard_trips_on_the_nth_consecutive_fire() {
        let mut guard = RepeatGuard::default();
        assert!(!guard.record("a", 3));
        assert!(!guard.record("a", 3));
        assert!(guard.record("a", 3));
    }

    #[test]
    fn repeat_guard_resets_on_rule_change() {
        let mut guard = RepeatGuard::default();
        assert!(!guard.record("a", 2));
        assert!(!guard.record("b", 2));
        assert!(!guard.record("a", 2));
        assert!(guard.record("a", 2));
    }
}
