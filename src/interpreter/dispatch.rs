//! Action dispatch: one rule's steps against one page.
//!
//! Built-in actions route to the in-page library, the pagination engine,
//! or the crawl/search engines; anything else is a driver method call.
//! Dispatch is soft: a failing step is logged and skipped, dedicated
//! retries exist for `click` (force) and `waitForLoadState`
//! (domcontentloaded), and every step ends with a pacing delay.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, error, warn};

use crate::crawl;
use crate::driver::{
    ClickOptions, DEFAULT_TIMEOUT, Driver, EVALUATE_TIMEOUT, NAVIGATION_TIMEOUT,
    ScreenshotOptions, WaitUntil,
};
use crate::error::{WorkflowError, WorkflowResult};
use crate::pagination::{PaginationEngine, PaginationType};
use crate::results::ResultKind;
use crate::search;
use crate::workflow::{Action, Rule, Step};

use super::{BinaryPayload, FlagHandle, Interpreter, InterpreterEvent, RunMode};

/// Pacing delay after every dispatched step.
const STEP_DELAY: Duration = Duration::from_millis(500);

impl Interpreter {
    /// Carry out every step of one rule, in order, soft-failing.
    pub(crate) async fn carry_out_rule(
        &self,
        driver: &Arc<dyn Driver>,
        rule: &Rule,
    ) -> WorkflowResult<()> {
        if let Some(channel) = self.debug_channel()
            && let Some(active) = &channel.active_id
            && let Some(id) = &rule.id
        {
            active(id);
        }

        for step in &rule.steps {
            if self.get_is_aborted() {
                return Ok(());
            }
            self.observe_step(step);

            let action = match Action::try_from(step) {
                Ok(action) => action,
                Err(e) => {
                    error!(action = %step.action, "unparseable step: {e}");
                    continue;
                }
            };

            if let Err(e) = self.carry_out_action(driver, action, step).await {
                error!(action = %step.action, "step failed, skipping: {e}");
            }
            tokio::time::sleep(STEP_DELAY).await;
        }
        Ok(())
    }

    fn observe_step(&self, step: &Step) {
        if self.inner.options.debug() {
            debug!(action = %step.action, args = ?step.args, "dispatching step");
        }
        if let Some(channel) = self.debug_channel() {
            if let Some(set_type) = &channel.set_action_type {
                set_type(&step.action);
            }
            if let Some(set_name) = &channel.set_action_name
                && let Some(name) = &step.name
            {
                set_name(name);
            }
        }
    }

    async fn carry_out_action(
        &self,
        driver: &Arc<dyn Driver>,
        action: Action,
        step: &Step,
    ) -> WorkflowResult<()> {
        match action {
            Action::Screenshot { options, name } => {
                let shot = ScreenshotOptions {
                    full_page: options
                        .get("fullPage")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                };
                let data = driver.screenshot(shot).await?;
                let name = name.unwrap_or_else(|| {
                    let n = self
                        .inner
                        .screenshot_counter
                        .fetch_add(1, Ordering::SeqCst)
                        + 1;
                    format!("Screenshot {n}")
                });
                if let Some(cb) = &self.inner.options.binary_callback {
                    cb(BinaryPayload {
                        name,
                        data,
                        mime_type: "image/png".to_string(),
                    });
                }
                Ok(())
            }

            Action::EnqueueLinks { selector } => self.enqueue_links(driver, &selector).await,

            Action::Scrape { selector } => {
                let expr = match selector {
                    Some(sel) => format!(
                        "window.scrape({})",
                        serde_json::to_string(&sel).unwrap_or_default()
                    ),
                    None => "window.scrape()".to_string(),
                };
                let rows = driver.evaluate(&expr, EVALUATE_TIMEOUT).await?;
                self.emit_snapshot(rows);
                Ok(())
            }

            Action::ScrapeSchema { schema, name } => {
                let name = name.unwrap_or_else(|| "Texts".to_string());
                if self.inner.options.mode() == RunMode::Editor {
                    self.emit_snapshot(json!({}));
                    return Ok(());
                }
                let expr = format!("window.scrapeSchema({schema})");
                let records = match driver.evaluate(&expr, EVALUATE_TIMEOUT).await? {
                    Value::Array(records) => records,
                    Value::Null => Vec::new(),
                    single => vec![single],
                };
                let snapshot = self.inner.results.push_schema(&name, records);
                self.emit_snapshot(snapshot);
                Ok(())
            }

            Action::ScrapeList { config, name } => {
                let name = name.unwrap_or_else(|| self.inner.results.next_list_name());
                if self.inner.options.mode() == RunMode::Editor {
                    self.emit_snapshot(json!({}));
                    return Ok(());
                }

                let has_pagination = config
                    .pagination
                    .as_ref()
                    .is_some_and(|p| p.kind != PaginationType::None);

                if !has_pagination {
                    let expr = format!("window.scrapeList({})", config.in_page_config());
                    let rows = match driver.evaluate(&expr, EVALUATE_TIMEOUT).await? {
                        Value::Array(rows) => rows,
                        _ => Vec::new(),
                    };
                    let snapshot = self.inner.results.push(ResultKind::ScrapeList, &name, rows);
                    self.emit_snapshot(snapshot);
                } else {
                    // Stream each page's new rows into the aggregate as
                    // pagination progresses.
                    let interpreter = self.clone();
                    let capture_name = name.clone();
                    let emitted = Arc::new(parking_lot::Mutex::new(0usize));
                    let engine =
                        PaginationEngine::new(Arc::clone(driver), Arc::clone(&self.inner.aborted))
                            .with_page_callback(Arc::new(move |aggregate: &[Value]| {
                                let mut last = emitted.lock();
                                if aggregate.len() > *last {
                                    let delta = aggregate[*last..].to_vec();
                                    *last = aggregate.len();
                                    let snapshot = interpreter.inner.results.push(
                                        ResultKind::ScrapeList,
                                        &capture_name,
                                        delta,
                                    );
                                    interpreter.emit_snapshot(snapshot);
                                }
                            }));
                    engine.run(&config).await?;
                }

                if let Some(channel) = self.debug_channel()
                    && let Some(bump) = &channel.increment_scrape_list_index
                {
                    bump();
                }
                Ok(())
            }

            Action::ScrapeListAuto { config } => {
                let list_selector = config
                    .get("listSelector")
                    .and_then(Value::as_str)
                    .or_else(|| config.as_str())
                    .unwrap_or_default()
                    .to_string();
                let expr = format!(
                    "window.scrapeListAuto({})",
                    serde_json::to_string(&list_selector).unwrap_or_default()
                );
                let rows = driver.evaluate(&expr, EVALUATE_TIMEOUT).await?;
                self.emit_snapshot(rows);
                Ok(())
            }

            Action::Scroll { pages } => {
                let expr = format!("window.scrollDown({pages})");
                driver.evaluate(&expr, EVALUATE_TIMEOUT).await?;
                Ok(())
            }

            Action::Script { code } => {
                // User scripts run inside the page as an async IIFE; the
                // host never compiles caller code.
                let expr = format!("(async () => {{\n{code}\n}})()");
                driver.evaluate(&expr, DEFAULT_TIMEOUT).await?;
                Ok(())
            }

            Action::Crawl { config } => {
                let rows = crawl::run_crawl(driver, &config, &self.inner.aborted).await?;
                let name = step.name.clone().unwrap_or_else(|| "Crawl".to_string());
                let snapshot = self.inner.results.push(ResultKind::Crawl, &name, rows);
                self.emit_snapshot(snapshot);
                Ok(())
            }

            Action::Search { config } => {
                let rows = search::run_search(driver, &config, &self.inner.aborted).await?;
                let name = step.name.clone().unwrap_or_else(|| "Search".to_string());
                let snapshot = self.inner.results.push(ResultKind::Search, &name, rows);
                self.emit_snapshot(snapshot);
                Ok(())
            }

            Action::Flag => {
                let resume = FlagHandle::new();
                self.emit_event(InterpreterEvent::Flag {
                    page: Arc::clone(driver),
                    resume: resume.clone(),
                    timestamp: Utc::now(),
                });
                debug!("flag raised, suspending until resumed");
                loop {
                    tokio::select! {
                        () = resume.wait() => break,
                        () = tokio::time::sleep(Duration::from_millis(100)) => {
                            if self.get_is_aborted() {
                                break;
                            }
                        }
                    }
                }
                Ok(())
            }

            Action::DriverMethod { path, args } => {
                self.dispatch_driver_method(driver, &path, args).await
            }
        }
    }

    /// Dotted / passthrough driver calls with their dedicated retries.
    async fn dispatch_driver_method(
        &self,
        driver: &Arc<dyn Driver>,
        path: &str,
        mut args: Vec<Value>,
    ) -> WorkflowResult<()> {
        match path {
            "click" => {
                let selector = args
                    .first()
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if let Err(e) = driver.click(&selector, ClickOptions::default()).await {
                    warn!(selector, "click failed, retrying with force: {e}");
                    driver
                        .click(&selector, ClickOptions { force: true })
                        .await?;
                }
                Ok(())
            }
            "waitForLoadState" => {
                if let Err(e) = driver
                    .wait_for_load_state(WaitUntil::Load, NAVIGATION_TIMEOUT)
                    .await
                {
                    warn!("load wait failed, retrying with domcontentloaded: {e}");
                    driver
                        .wait_for_load_state(WaitUntil::DomContentLoaded, NAVIGATION_TIMEOUT)
                        .await?;
                }
                Ok(())
            }
            "press" | "type" => {
                // These accept at most two positional args.
                args.truncate(2);
                driver.dispatch_method(path, &args).await?;
                Ok(())
            }
            other => match driver.dispatch_method(other, &args).await {
                Ok(_) => Ok(()),
                Err(e) => Err(WorkflowError::ActionFailed {
                    action: other.to_string(),
                    reason: e.to_string(),
                }),
            },
        }
    }

    /// `enqueueLinks`: one new page per matched href, each re-entering the
    /// rule loop with the shared workflow copy; the parent page closes
    /// once its children are spawned.
    async fn enqueue_links(
        &self,
        driver: &Arc<dyn Driver>,
        selector: &str,
    ) -> WorkflowResult<()> {
        let expr = format!(
            r#"window.__scrapeflow.findAllElements({})
                .map(el => el.getAttribute && el.getAttribute('href'))
                .filter(href => !!href)
                .map(href => new URL(href, document.baseURI).href)"#,
            serde_json::to_string(selector).unwrap_or_default()
        );
        let hrefs = match driver.evaluate(&expr, EVALUATE_TIMEOUT).await? {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(ToString::to_string))
                .collect::<Vec<_>>(),
            _ => Vec::new(),
        };
        debug!(count = hrefs.len(), selector, "enqueueing link pages");

        for href in hrefs {
            if self.get_is_aborted() {
                break;
            }
            let parent = Arc::clone(driver);
            let interpreter = self.clone();
            let job: futures::future::BoxFuture<'static, ()> = Box::pin(async move {
                let page = match parent.new_page().await {
                    Ok(page) => page,
                    Err(e) => {
                        warn!(href, "failed to open page for link: {e}");
                        return;
                    }
                };
                if let Err(e) = crate::scripts::inject(&page).await {
                    warn!("init-script registration failed for enqueued page: {e}");
                }
                if let Err(e) = page
                    .navigate(&href, WaitUntil::NetworkIdle, NAVIGATION_TIMEOUT)
                    .await
                {
                    warn!(href, "enqueued navigation failed: {e}");
                    let _ = page.close().await;
                    return;
                }
                if let Err(e) = crate::scripts::ensure_injected(&page).await {
                    warn!("enqueued page injection failed: {e}");
                }
                interpreter.drive_page(page).await;
            });
            self.inner.pool.add_job(job);
        }

        driver.close().await?;
        Ok(())
    }
}
