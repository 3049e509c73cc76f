//! The `search` action: DuckDuckGo result-page driving.
//!
//! Navigates straight to the results URL, waits for the React-rendered
//! result list to appear, extracts `{url, title, description, position}`
//! rows, and pages through "More results" until the limit is met or the
//! list stops growing. In `scrape` mode every hit is then visited and its
//! content extracted like a crawl visit.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use url::Url;

use crate::driver::{Driver, DriverError, EVALUATE_TIMEOUT, NAVIGATION_TIMEOUT, WaitUntil};
use crate::error::{WorkflowError, WorkflowResult};

/// DuckDuckGo search URL base.
pub const SEARCH_URL: &str = "https://duckduckgo.com";

/// CSS selector for individual search results.
pub const SEARCH_RESULT_SELECTOR: &str = "article[data-testid='result']";

/// CSS selector for result titles (the same element carries the URL).
pub const TITLE_LINK_SELECTOR: &str = "h2 > a";

/// CSS selector for result snippets.
pub const SNIPPET_SELECTOR: &str = "div[data-result='snippet']";

/// CSS selector for the "More results" button.
pub const MORE_RESULTS_SELECTOR: &str = "#more-results";

/// Default number of results when the action does not set a limit.
pub const DEFAULT_RESULT_LIMIT: usize = 10;

const RENDER_WAIT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How the hits are delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Result rows only.
    #[default]
    List,
    /// Visit every hit and extract its content.
    Scrape,
}

/// Configuration of one `search` action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOptions {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub mode: SearchMode,
}

impl SearchOptions {
    /// Shorthand for `search("query string")`.
    #[must_use]
    pub fn for_query(query: String) -> Self {
        Self {
            query,
            limit: None,
            mode: SearchMode::default(),
        }
    }
}

/// Extraction of the visible result rows, run in page context.
const SERP_EXTRACT_SCRIPT: &str = r#"
(() => {
    const out = [];
    const results = document.querySelectorAll("article[data-testid='result']");
    results.forEach((result, index) => {
        const link = result.querySelector('h2 > a');
        if (!link) return;
        const href = link.getAttribute('href');
        if (!href) return;
        const snippet = result.querySelector("div[data-result='snippet']");
        out.push({
            url: href,
            title: (link.innerText || '').trim() || 'Untitled Result ' + (index + 1),
            description: snippet
                ? (snippet.innerText || '').trim()
                : 'No description available',
            position: index + 1
        });
    });
    return out;
})()
"#;

/// Run one search from the driver's page.
///
/// Observes `abort` between pagination steps and hit visits; returns the
/// rows gathered so far on cancellation.
pub async fn run_search(
    driver: &Arc<dyn Driver>,
    options: &SearchOptions,
    abort: &Arc<AtomicBool>,
) -> WorkflowResult<Vec<Value>> {
    let limit = options.limit.unwrap_or(DEFAULT_RESULT_LIMIT);

    let mut serp = Url::parse(SEARCH_URL).map_err(|e| WorkflowError::ActionFailed {
        action: "search".to_string(),
        reason: format!("bad search base URL: {e}"),
    })?;
    serp.query_pairs_mut()
        .append_pair("q", &options.query)
        .append_pair("ia", "web");

    info!(query = %options.query, "navigating to search results");
    driver
        .navigate(serp.as_str(), WaitUntil::DomContentLoaded, NAVIGATION_TIMEOUT)
        .await?;
    wait_for_results(driver).await?;

    let mut rows = extract_rows(driver).await?;
    let mut seen: HashSet<String> = rows
        .iter()
        .filter_map(|r| r.get("url").and_then(Value::as_str).map(ToString::to_string))
        .collect();

    // "More results" pagination until the limit is met or growth stops.
    while rows.len() < limit {
        if abort.load(Ordering::Relaxed) {
            break;
        }
        match driver
            .wait_for_selector(MORE_RESULTS_SELECTOR, Duration::from_secs(2))
            .await
        {
            Ok(()) => {}
            Err(DriverError::SelectorTimeout { .. }) => {
                debug!("no more-results button, stopping pagination");
                break;
            }
            Err(e) => return Err(e.into()),
        }
        if let Err(e) = driver
            .click(MORE_RESULTS_SELECTOR, Default::default())
            .await
        {
            warn!("more-results click failed: {e}");
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        let refreshed = extract_rows(driver).await?;
        let mut grew = false;
        for row in refreshed {
            let Some(url) = row.get("url").and_then(Value::as_str) else {
                continue;
            };
            if seen.insert(url.to_string()) {
                rows.push(row);
                grew = true;
            }
        }
        if !grew {
            debug!("result list stopped growing");
            break;
        }
    }
    rows.truncate(limit);

    if options.mode == SearchMode::List {
        return Ok(rows);
    }

    // Scrape mode: visit every hit and attach extracted page content.
    let mut enriched = Vec::with_capacity(rows.len());
    for row in rows {
        if abort.load(Ordering::Relaxed) {
            break;
        }
        let Some(url) = row
            .get("url")
            .and_then(Value::as_str)
            .map(ToString::to_string)
        else {
            continue;
        };
        match crate::crawl::visit(driver, &url).await {
            Ok(content) => enriched.push(json!({
                "result": row,
                "page": content,
            })),
            Err(e) => {
                warn!(url, "hit visit failed: {e}");
                enriched.push(row);
            }
        }
    }
    Ok(enriched)
}

/// Poll until result rows render, with CAPTCHA detection on timeout.
async fn wait_for_results(driver: &Arc<dyn Driver>) -> WorkflowResult<()> {
    let started = Instant::now();
    loop {
        if driver
            .wait_for_selector(SEARCH_RESULT_SELECTOR, POLL_INTERVAL)
            .await
            .is_ok()
        {
            debug!(
                "search results appeared after {:.2}s",
                started.elapsed().as_secs_f64()
            );
            return Ok(());
        }
        if started.elapsed() >= RENDER_WAIT {
            let url = driver.current_url().await.unwrap_or_default();
            if url.contains("/sorry/") || url.contains("captcha") {
                return Err(WorkflowError::ActionFailed {
                    action: "search".to_string(),
                    reason: "search engine presented a CAPTCHA page".to_string(),
                });
            }
            return Err(WorkflowError::ActionFailed {
                action: "search".to_string(),
                reason: format!(
                    "timeout waiting for results to render (selector {SEARCH_RESULT_SELECTOR:?})"
                ),
            });
        }
    }
}

async fn extract_rows(driver: &Arc<dyn Driver>) -> WorkflowResult<Vec<Value>> {
    match driver.evaluate(SERP_EXTRACT_SCRIPT, EVALUATE_TIMEOUT).await {
        Ok(Value::Array(rows)) => Ok(rows),
        Ok(_) => Ok(Vec::new()),
        Err(DriverError::EvaluationTimeout(t)) => {
            warn!("result extraction timed out after {t:?}");
            Ok(Vec::new())
        }
        Err(e) => Err(e.into()),
    }
}
