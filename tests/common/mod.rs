//! Scripted driver for exercising the interpreter and pagination engine
//! without a browser.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use scrapeflow::driver::{
    ClickOptions, Driver, DriverError, DriverResult, ScreenshotOptions, WaitUntil,
};

/// Mutable script/recording state of a [`MockDriver`].
#[derive(Debug, Default)]
pub struct MockState {
    pub url: String,
    pub cookies: HashMap<String, String>,
    pub closed: bool,

    /// `scrapeList` rows per page index; the index advances on clicks of
    /// selectors present in `advance_on_click` and clamps at the end.
    pub list_pages: Vec<Vec<Value>>,
    pub page_index: usize,

    /// `scrapeSchema` results in call order (last entry repeats).
    pub schema_results: Vec<Value>,
    pub schema_call: usize,

    /// Search-result rows per SERP page index; advances like `list_pages`.
    pub serp_pages: Vec<Vec<Value>>,

    /// Anchor URLs the crawl discovery script should report.
    pub anchor_urls: Vec<String>,

    /// Page-content object returned for crawl visits.
    pub page_content: Value,

    pub navigations: Vec<String>,

    /// `documentHeight()` results in call order (last entry repeats).
    pub heights: Vec<i64>,
    pub height_call: usize,

    /// Selectors `wait_for_selector` should find. Anything absent times
    /// out.
    pub present_selectors: Vec<String>,

    /// Selectors whose click advances `page_index` (and the URL).
    pub advance_on_click: Vec<String>,

    /// Popup pages delivered through the popup receiver on first take.
    pub popups: Vec<Arc<MockDriver>>,

    pub clicks: Vec<String>,
    pub selector_waits: Vec<String>,
    pub evaluations: Vec<String>,
    pub method_calls: Vec<(String, Vec<Value>)>,
    pub init_scripts: usize,
}

/// Scripted in-memory [`Driver`].
#[derive(Debug, Default)]
pub struct MockDriver {
    pub state: Mutex<MockState>,
}

impl MockDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                url: "https://example.com/page/1".to_string(),
                ..Default::default()
            }),
        })
    }

    pub fn with_state(state: MockState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }

    pub fn scrape_list_calls(&self) -> usize {
        self.state
            .lock()
            .evaluations
            .iter()
            .filter(|e| e.contains("window.scrapeList("))
            .count()
    }

    pub fn waits_for(&self, selector: &str) -> usize {
        self.state
            .lock()
            .selector_waits
            .iter()
            .filter(|s| s.as_str() == selector)
            .count()
    }

    pub fn clicks_on(&self, selector: &str) -> usize {
        self.state
            .lock()
            .clicks
            .iter()
            .filter(|s| s.as_str() == selector)
            .count()
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn navigate(
        &self,
        url: &str,
        _wait_until: WaitUntil,
        _timeout: Duration,
    ) -> DriverResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(DriverError::PageClosed);
        }
        state.url = url.to_string();
        state.navigations.push(url.to_string());
        Ok(())
    }

    async fn current_url(&self) -> DriverResult<String> {
        Ok(self.state.lock().url.clone())
    }

    async fn cookies(&self) -> DriverResult<HashMap<String, String>> {
        Ok(self.state.lock().cookies.clone())
    }

    async fn set_cookie(&self, name: &str, value: &str) -> DriverResult<()> {
        self.state
            .lock()
            .cookies
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn click(&self, selector: &str, _options: ClickOptions) -> DriverResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(DriverError::PageClosed);
        }
        state.clicks.push(selector.to_string());
        if state.advance_on_click.iter().any(|s| s == selector) {
            let pages = state.list_pages.len().max(state.serp_pages.len());
            let last = pages.saturating_sub(1);
            state.page_index = (state.page_index + 1).min(last);
            state.url = format!("https://example.com/page/{}", state.page_index + 1);
        }
        Ok(())
    }

    async fn type_text(&self, _selector: &str, _text: &str) -> DriverResult<()> {
        Ok(())
    }

    async fn press_key(&self, _key: &str) -> DriverResult<()> {
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.selector_waits.push(selector.to_string());
        if state.present_selectors.iter().any(|s| s == selector) {
            Ok(())
        } else {
            Err(DriverError::SelectorTimeout {
                selector: selector.to_string(),
                timeout,
            })
        }
    }

    async fn wait_for_load_state(
        &self,
        _state: WaitUntil,
        _timeout: Duration,
    ) -> DriverResult<()> {
        if self.state.lock().closed {
            return Err(DriverError::PageClosed);
        }
        Ok(())
    }

    async fn wait_for_navigation(&self, _timeout: Duration) -> DriverResult<()> {
        Ok(())
    }

    async fn evaluate(&self, expression: &str, _timeout: Duration) -> DriverResult<Value> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(DriverError::PageClosed);
        }
        state.evaluations.push(expression.to_string());

        if expression.contains("window.scrapeList(") {
            let index = state.page_index.min(state.list_pages.len().saturating_sub(1));
            let rows = state.list_pages.get(index).cloned().unwrap_or_default();
            return Ok(Value::Array(rows));
        }
        if expression.contains("window.scrapeSchema(") {
            let index = state
                .schema_call
                .min(state.schema_results.len().saturating_sub(1));
            state.schema_call += 1;
            return Ok(state.schema_results.get(index).cloned().unwrap_or(Value::Null));
        }
        if expression.contains("documentHeight") {
            let index = state.height_call.min(state.heights.len().saturating_sub(1));
            state.height_call += 1;
            return Ok(Value::from(*state.heights.get(index).unwrap_or(&0)));
        }
        if expression.contains("data-testid='result'") && !expression.contains("version: 2") {
            let index = state.page_index.min(state.serp_pages.len().saturating_sub(1));
            let mut visible = Vec::new();
            for page in state.serp_pages.iter().take(index + 1) {
                visible.extend(page.iter().cloned());
            }
            return Ok(Value::Array(visible));
        }
        if expression.contains("wordCount") {
            let mut content = state.page_content.clone();
            if content.is_null() {
                content = serde_json::json!({
                    "title": "Page", "description": null, "text": "body text",
                    "html": "<html></html>", "links": [], "metadata": {}, "wordCount": 2
                });
            }
            return Ok(content);
        }
        if expression.contains("a[href]") {
            let urls: Vec<Value> = state
                .anchor_urls
                .iter()
                .map(|u| Value::String(u.clone()))
                .collect();
            return Ok(Value::Array(urls));
        }
        if expression.contains("document.readyState") {
            return Ok(Value::String("complete".to_string()));
        }
        if expression.contains("typeof window.scrape") {
            // The library is never "present" on the mock; injection is
            // just recorded.
            return Ok(Value::Bool(false));
        }
        if expression.contains("presentSelectors") {
            return Ok(Value::Array(Vec::new()));
        }
        Ok(Value::Null)
    }

    async fn add_init_script(&self, _source: &str) -> DriverResult<()> {
        self.state.lock().init_scripts += 1;
        Ok(())
    }

    async fn screenshot(&self, _options: ScreenshotOptions) -> DriverResult<Vec<u8>> {
        Ok(vec![0x89, 0x50, 0x4e, 0x47])
    }

    async fn scroll_by(&self, _dx: f64, _dy: f64) -> DriverResult<()> {
        Ok(())
    }

    async fn history_forward(&self) -> DriverResult<bool> {
        Ok(false)
    }

    async fn dispatch_method(&self, path: &str, args: &[Value]) -> DriverResult<Value> {
        self.state
            .lock()
            .method_calls
            .push((path.to_string(), args.to_vec()));
        Ok(Value::Null)
    }

    async fn new_page(&self) -> DriverResult<Arc<dyn Driver>> {
        Ok(MockDriver::new() as Arc<dyn Driver>)
    }

    fn take_popup_receiver(&self) -> Option<mpsc::UnboundedReceiver<Arc<dyn Driver>>> {
        let popups = std::mem::take(&mut self.state.lock().popups);
        let (tx, rx) = mpsc::unbounded_channel();
        for popup in popups {
            let _ = tx.send(popup as Arc<dyn Driver>);
        }
        Some(rx)
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    async fn close(&self) -> DriverResult<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}
