//! The list-pagination engine.
//!
//! Drives one of four pagination strategies over the in-page `scrapeList`
//! primitive, suppressing duplicate rows across pages, healing broken
//! candidate selectors out of the pool, detecting content change through
//! signatures, and terminating on the configured limit or on stagnation.
//! Every loop head observes the abort flag and returns the partial
//! aggregate without error.

pub mod dedup;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::driver::{ClickOptions, Driver, DriverError, EVALUATE_TIMEOUT};
use crate::error::WorkflowResult;

use dedup::{DedupSet, signature_key};

/// Max attempts per candidate selector and per click sequence.
pub const MAX_RETRIES: u32 = 3;
/// Delay between retry attempts.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);
/// Scroll iterations tolerated without new rows before giving up.
pub const MAX_UNCHANGED_RESULTS: usize = 5;
/// Global budget for one button search across all candidates.
pub const MAX_BUTTON_SEARCH_TIME: Duration = Duration::from_secs(15);
/// Consecutive load-more clicks tolerated without new rows.
pub const MAX_NO_NEW_ITEMS: usize = 5;

const SETTLE_DELAY: Duration = Duration::from_secs(2);
const BUTTON_WAIT_TIMEOUT: Duration = Duration::from_secs(2);
const NAVIGATION_RACE_TIMEOUT: Duration = Duration::from_secs(15);

/// Configuration of one `scrapeList` action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListConfig {
    pub list_selector: String,
    #[serde(default)]
    pub fields: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

impl ListConfig {
    /// The JSON the in-page `scrapeList` primitive receives.
    #[must_use]
    pub fn in_page_config(&self) -> Value {
        json!({
            "listSelector": self.list_selector,
            "fields": self.fields,
            "limit": self.limit,
        })
    }

    #[must_use]
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(usize::MAX)
    }
}

/// Pagination strategy selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(rename = "type")]
    pub kind: PaginationType,
    /// Candidate selectors, comma-separated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PaginationType {
    ScrollDown,
    ScrollUp,
    ClickNext,
    ClickLoadMore,
    None,
}

/// Callback receiving the current aggregate after each extracted page.
pub type PageCallback = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// One pagination session over one page.
pub struct PaginationEngine {
    driver: Arc<dyn Driver>,
    abort: Arc<AtomicBool>,
    on_page: Option<PageCallback>,
}

enum PageRows {
    Rows(Vec<Value>),
    PageGone,
}

impl PaginationEngine {
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>, abort: Arc<AtomicBool>) -> Self {
        Self {
            driver,
            abort,
            on_page: None,
        }
    }

    #[must_use]
    pub fn with_page_callback(mut self, callback: PageCallback) -> Self {
        self.on_page = Some(callback);
        self
    }

    /// Run the configured strategy to completion and return the aggregate.
    pub async fn run(&self, config: &ListConfig) -> WorkflowResult<Vec<Value>> {
        let strategy = config
            .pagination
            .as_ref()
            .map_or(PaginationType::None, |p| p.kind);
        let candidates = config
            .pagination
            .as_ref()
            .and_then(|p| p.selector.as_deref())
            .map(split_candidates)
            .unwrap_or_default();

        match strategy {
            PaginationType::ScrollDown => self.scroll_strategy(config, true).await,
            PaginationType::ScrollUp => self.scroll_strategy(config, false).await,
            PaginationType::ClickNext => self.click_next(config, candidates).await,
            PaginationType::ClickLoadMore => self.click_load_more(config, candidates).await,
            PaginationType::None => {
                let rows = match self.extract(config).await {
                    PageRows::Rows(rows) => rows,
                    PageRows::PageGone => Vec::new(),
                };
                let mut seen = DedupSet::new();
                let aggregate: Vec<Value> =
                    rows.into_iter().filter(|r| seen.insert(r)).collect();
                let aggregate = clamp(aggregate, config.effective_limit());
                self.emit(&aggregate);
                Ok(aggregate)
            }
        }
    }

    fn aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    fn emit(&self, aggregate: &[Value]) {
        if let Some(cb) = &self.on_page {
            cb(aggregate);
        }
    }

    /// Evaluate the in-page list extraction once.
    ///
    /// An evaluation timeout yields an empty page (pagination continues);
    /// a closed page ends the session.
    async fn extract(&self, config: &ListConfig) -> PageRows {
        let expr = format!("window.scrapeList({})", config.in_page_config());
        match self.driver.evaluate(&expr, EVALUATE_TIMEOUT).await {
            Ok(Value::Array(rows)) => PageRows::Rows(rows),
            Ok(other) => {
                debug!("scrapeList returned non-array value: {other}");
                PageRows::Rows(Vec::new())
            }
            Err(DriverError::EvaluationTimeout(t)) => {
                warn!("list extraction timed out after {t:?}, skipping page");
                PageRows::Rows(Vec::new())
            }
            Err(DriverError::PageClosed) => PageRows::PageGone,
            Err(e) => {
                warn!("list extraction failed: {e}");
                PageRows::Rows(Vec::new())
            }
        }
    }

    async fn document_height(&self) -> i64 {
        self.driver
            .evaluate("window.__scrapeflow.documentHeight()", EVALUATE_TIMEOUT)
            .await
            .ok()
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
    }

    /// `scrollDown` / `scrollUp`: extract, scroll to the extreme, wait,
    /// stop when the document height or the aggregate stops moving.
    async fn scroll_strategy(
        &self,
        config: &ListConfig,
        downward: bool,
    ) -> WorkflowResult<Vec<Value>> {
        let limit = config.effective_limit();
        let mut seen = DedupSet::new();
        let mut aggregate = Vec::new();
        let mut unchanged_iterations = 0usize;
        let mut last_height: Option<i64> = None;

        loop {
            if self.aborted() {
                return Ok(aggregate);
            }
            let rows = match self.extract(config).await {
                PageRows::Rows(rows) => rows,
                PageRows::PageGone => return Ok(aggregate),
            };
            let added = merge(&mut aggregate, rows, &mut seen);
            if aggregate.len() >= limit {
                let aggregate = clamp(aggregate, limit);
                self.emit(&aggregate);
                return Ok(aggregate);
            }
            self.emit(&aggregate);

            let scroll = if downward {
                "window.__scrapeflow.scrollToBottom()"
            } else {
                "window.__scrapeflow.scrollToTop()"
            };
            if let Err(e) = self.driver.evaluate(scroll, EVALUATE_TIMEOUT).await {
                warn!("scroll failed: {e}");
                return Ok(aggregate);
            }
            tokio::time::sleep(SETTLE_DELAY).await;

            if added == 0 {
                unchanged_iterations += 1;
                if unchanged_iterations >= MAX_UNCHANGED_RESULTS {
                    debug!("no new rows for {MAX_UNCHANGED_RESULTS} iterations, stopping");
                    return Ok(aggregate);
                }
            } else {
                unchanged_iterations = 0;
            }

            let height = self.document_height().await;
            if last_height == Some(height) {
                debug!(height, "document height unchanged, stopping");
                return Ok(aggregate);
            }
            last_height = Some(height);
        }
    }

    /// `clickNext`: paginate by clicking a next button, racing navigation,
    /// healing dead candidate selectors, verifying content change.
    async fn click_next(
        &self,
        config: &ListConfig,
        mut candidates: Vec<String>,
    ) -> WorkflowResult<Vec<Value>> {
        let limit = config.effective_limit();
        let mut seen = DedupSet::new();
        let mut aggregate = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();

        let mut current_rows = match self.extract(config).await {
            PageRows::Rows(rows) => rows,
            PageRows::PageGone => return Ok(aggregate),
        };

        loop {
            if self.aborted() {
                return Ok(aggregate);
            }
            let url = self.driver.current_url().await.unwrap_or_default();
            visited.insert(url.clone());

            merge(&mut aggregate, current_rows.clone(), &mut seen);
            if aggregate.len() >= limit {
                let aggregate = clamp(aggregate, limit);
                self.emit(&aggregate);
                return Ok(aggregate);
            }
            self.emit(&aggregate);

            let Some(button) = self.find_working_button(&mut candidates).await else {
                // Last resort: a single history-forward; only useful if it
                // lands somewhere we have not extracted yet.
                if self.driver.history_forward().await.unwrap_or(false) {
                    let forward_url = self.driver.current_url().await.unwrap_or_default();
                    if !visited.contains(&forward_url) {
                        current_rows = match self.extract(config).await {
                            PageRows::Rows(rows) => rows,
                            PageRows::PageGone => return Ok(aggregate),
                        };
                        continue;
                    }
                }
                return Ok(aggregate);
            };

            let signature_before = content_signature(&url, &current_rows);
            let mut advanced = false;

            for attempt in 0..MAX_RETRIES {
                if self.aborted() {
                    return Ok(aggregate);
                }
                self.click_racing_navigation(&button, attempt).await;
                tokio::time::sleep(Duration::from_millis(500)).await;

                let new_url = self.driver.current_url().await.unwrap_or_default();
                let new_rows = match self.extract(config).await {
                    PageRows::Rows(rows) => rows,
                    PageRows::PageGone => return Ok(aggregate),
                };
                let signature_after = content_signature(&new_url, &new_rows);

                if new_url != url
                    || signature_after != signature_before
                    || new_rows.len() != current_rows.len()
                {
                    current_rows = new_rows;
                    advanced = true;
                    break;
                }
                tokio::time::sleep(RETRY_DELAY).await;
            }

            if !advanced {
                debug!("page content did not change after click, stopping");
                return Ok(aggregate);
            }
        }
    }

    /// One click attempt with the escalation ladder: plain click raced
    /// against a navigation wait, then dispatch-event, then click with no
    /// navigation expectation.
    async fn click_racing_navigation(&self, selector: &str, attempt: u32) {
        match attempt {
            0 => {
                let click = self.driver.click(selector, ClickOptions::default());
                let nav = self.driver.wait_for_navigation(NAVIGATION_RACE_TIMEOUT);
                let (click_result, _) = tokio::join!(click, nav);
                if let Err(e) = click_result {
                    debug!("click failed, falling back to dispatch-event: {e}");
                    let expr = format!(
                        "window.__scrapeflow.dispatchClick({})",
                        serde_json::to_string(selector).unwrap_or_default()
                    );
                    let _ = self.driver.evaluate(&expr, EVALUATE_TIMEOUT).await;
                }
            }
            1 => {
                let expr = format!(
                    "window.__scrapeflow.dispatchClick({})",
                    serde_json::to_string(selector).unwrap_or_default()
                );
                let dispatch = self.driver.evaluate(&expr, EVALUATE_TIMEOUT);
                let nav = self.driver.wait_for_navigation(NAVIGATION_RACE_TIMEOUT);
                let _ = tokio::join!(dispatch, nav);
            }
            _ => {
                let _ = self
                    .driver
                    .click(selector, ClickOptions { force: true })
                    .await;
            }
        }
    }

    /// `clickLoadMore`: click, settle, scroll to the bottom, stop when the
    /// document stops growing or clicks stop producing rows.
    async fn click_load_more(
        &self,
        config: &ListConfig,
        mut candidates: Vec<String>,
    ) -> WorkflowResult<Vec<Value>> {
        let limit = config.effective_limit();
        let mut seen = DedupSet::new();
        let mut aggregate = Vec::new();
        let mut no_new_clicks = 0usize;
        let mut last_height: Option<i64> = None;

        loop {
            if self.aborted() {
                return Ok(aggregate);
            }
            let rows = match self.extract(config).await {
                PageRows::Rows(rows) => rows,
                PageRows::PageGone => return Ok(aggregate),
            };
            let added = merge(&mut aggregate, rows, &mut seen);
            if aggregate.len() >= limit {
                let aggregate = clamp(aggregate, limit);
                self.emit(&aggregate);
                return Ok(aggregate);
            }
            self.emit(&aggregate);

            if added == 0 {
                no_new_clicks += 1;
                if no_new_clicks >= MAX_NO_NEW_ITEMS {
                    debug!("{MAX_NO_NEW_ITEMS} clicks without new rows, stopping");
                    return Ok(aggregate);
                }
            } else {
                no_new_clicks = 0;
            }

            let Some(button) = self.find_working_button(&mut candidates).await else {
                return Ok(aggregate);
            };

            let mut clicked = false;
            for _ in 0..MAX_RETRIES {
                match self.driver.click(&button, ClickOptions::default()).await {
                    Ok(()) => {
                        clicked = true;
                        break;
                    }
                    Err(e) => {
                        debug!("load-more click failed: {e}");
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
            if !clicked {
                let expr = format!(
                    "window.__scrapeflow.dispatchClick({})",
                    serde_json::to_string(&button).unwrap_or_default()
                );
                let _ = self.driver.evaluate(&expr, EVALUATE_TIMEOUT).await;
            }

            tokio::time::sleep(SETTLE_DELAY).await;
            let _ = self
                .driver
                .evaluate("window.__scrapeflow.scrollToBottom()", EVALUATE_TIMEOUT)
                .await;

            let height = self.document_height().await;
            if last_height == Some(height) {
                debug!(height, "document stopped growing, stopping");
                return Ok(aggregate);
            }
            last_height = Some(height);
        }
    }

    /// Try candidates in order; a candidate that exhausts its retries is
    /// healed out of the pool for the rest of the session. The whole
    /// search respects a global time budget.
    async fn find_working_button(&self, candidates: &mut Vec<String>) -> Option<String> {
        let started = Instant::now();
        while let Some(selector) = candidates.first().cloned() {
            if self.aborted() {
                return None;
            }
            let mut exhausted = true;
            for attempt in 0..MAX_RETRIES {
                if started.elapsed() >= MAX_BUTTON_SEARCH_TIME {
                    // Budget expired mid-search; the candidate keeps its
                    // place in the pool for the next page.
                    return None;
                }
                match self
                    .driver
                    .wait_for_selector(&selector, BUTTON_WAIT_TIMEOUT)
                    .await
                {
                    Ok(()) => return Some(selector),
                    Err(DriverError::SelectorTimeout { .. }) => {
                        debug!(selector, attempt, "button selector not present");
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                    Err(e) => {
                        warn!(selector, "button wait failed: {e}");
                        exhausted = false;
                        break;
                    }
                }
            }
            if exhausted {
                debug!(selector, "healing selector out of the candidate pool");
                candidates.remove(0);
            } else {
                return None;
            }
        }
        None
    }
}

/// Split a comma-separated candidate list.
#[must_use]
pub fn split_candidates(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Signature of the visible page: URL, item count, and the text of the
/// first three items.
fn content_signature(url: &str, rows: &[Value]) -> u64 {
    let first_items: String = rows
        .iter()
        .take(3)
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("|");
    signature_key(&json!({
        "url": url,
        "itemCount": rows.len(),
        "firstItems": first_items,
    }))
}

fn merge(aggregate: &mut Vec<Value>, rows: Vec<Value>, seen: &mut DedupSet) -> usize {
    let before = aggregate.len();
    for row in rows {
        if seen.insert(&row) {
            aggregate.push(row);
        }
    }
    aggregate.len() - before
}

fn clamp(mut aggregate: Vec<Value>, limit: usize) -> Vec<Value> {
    if limit != usize::MAX && aggregate.len() > limit {
        aggregate.truncate(limit);
    }
    aggregate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_lists_split_on_commas() {
        assert_eq!(
            split_candidates("a.next, button#more ,"),
            vec!["a.next".to_string(), "button#more".to_string()]
        );
    }

    #[test]
    fn signatures_react_to_any_component() {
        let rows = vec![json!({"t": "a"}), json!({"t": "b"})];
        let base = content_signature("https://x/1", &rows);
        assert_ne!(base, content_signature("https://x/2", &rows));
        assert_ne!(
            base,
            content_signature("https://x/1", &[json!({"t": "a"})])
        );
        assert_eq!(base, content_signature("https://x/1", &rows.clone()));
    }
}
