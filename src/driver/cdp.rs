//! `chromiumoxide` implementation of the [`Driver`] trait.
//!
//! All DOM interaction goes through `page.evaluate` or typed CDP commands
//! via `page.execute`; there is no host-side HTML parsing. Element-level
//! interaction (click, type) uses in-page JS so it works uniformly for
//! elements chromiumoxide cannot hand out as handles (inside shadow roots,
//! after re-render).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat, CaptureScreenshotParams,
    EventWindowOpen,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{
    ClickOptions, Driver, DriverError, DriverResult, NAVIGATION_TIMEOUT, ScreenshotOptions,
    WaitUntil,
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Driver over one CDP page. Construct with [`CdpDriver::attach`].
pub struct CdpDriver {
    browser: Arc<Browser>,
    page: Page,
    closed: AtomicBool,
    popup_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<Arc<dyn Driver>>>>,
    popup_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl CdpDriver {
    /// Wrap an existing page and start observing popups it opens.
    pub fn attach(browser: Arc<Browser>, page: Page) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = Arc::new(Self {
            browser: Arc::clone(&browser),
            page: page.clone(),
            closed: AtomicBool::new(false),
            popup_rx: parking_lot::Mutex::new(Some(rx)),
            popup_task: parking_lot::Mutex::new(None),
        });

        let task = tokio::spawn(watch_popups(browser, page, tx));
        *driver.popup_task.lock() = Some(task);
        driver
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(DriverError::PageClosed);
        }
        Ok(())
    }

    async fn eval_raw(&self, expression: &str, timeout: Duration) -> DriverResult<Value> {
        self.ensure_open()?;
        let result = tokio::time::timeout(timeout, self.page.evaluate(expression))
            .await
            .map_err(|_| DriverError::EvaluationTimeout(timeout))?
            .map_err(|e| classify_cdp_error(&e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn dispatch_key_event(&self, kind: &str, key: &str) -> DriverResult<()> {
        let js = format!(
            r#"(() => {{
                const el = document.activeElement || document.body;
                el.dispatchEvent(new KeyboardEvent({kind}, {{
                    key: {key}, bubbles: true, cancelable: true
                }}));
                return true;
            }})()"#,
            kind = js_string(kind),
            key = js_string(key),
        );
        self.eval_raw(&js, super::DEFAULT_TIMEOUT).await.map(|_| ())
    }

    async fn mouse_event(
        &self,
        kind: DispatchMouseEventType,
        x: f64,
        y: f64,
        delta: Option<(f64, f64)>,
    ) -> DriverResult<()> {
        self.ensure_open()?;
        let mut builder = DispatchMouseEventParams::builder()
            .r#type(kind)
            .x(x)
            .y(y);
        if let Some((dx, dy)) = delta {
            builder = builder.delta_x(dx).delta_y(dy);
        }
        let params = builder
            .build()
            .map_err(DriverError::Protocol)?;
        self.page
            .execute(params)
            .await
            .map_err(|e| classify_cdp_error(&e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Driver for CdpDriver {
    async fn navigate(
        &self,
        url: &str,
        wait_until: WaitUntil,
        timeout: Duration,
    ) -> DriverResult<()> {
        self.ensure_open()?;
        self.page
            .goto(url)
            .await
            .map_err(|e| DriverError::NavigationFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        if let Err(e) =
            tokio::time::timeout(timeout, self.page.wait_for_navigation()).await
        {
            debug!(url, "navigation wait timed out: {e}");
        }
        self.wait_for_load_state(wait_until, timeout).await
    }

    async fn current_url(&self) -> DriverResult<String> {
        self.ensure_open()?;
        match self.page.url().await {
            Ok(Some(url)) => Ok(url),
            Ok(None) => Ok(String::from("about:blank")),
            Err(e) => Err(classify_cdp_error(&e.to_string())),
        }
    }

    async fn cookies(&self) -> DriverResult<HashMap<String, String>> {
        self.ensure_open()?;
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(|e| classify_cdp_error(&e.to_string()))?;
        Ok(cookies
            .into_iter()
            .map(|c| (c.name, c.value))
            .collect())
    }

    async fn set_cookie(&self, name: &str, value: &str) -> DriverResult<()> {
        use chromiumoxide::cdp::browser_protocol::network::SetCookieParams;
        self.ensure_open()?;
        let url = self.current_url().await?;
        let params = SetCookieParams::builder()
            .name(name)
            .value(value)
            .url(url)
            .build()
            .map_err(DriverError::Protocol)?;
        self.page
            .execute(params)
            .await
            .map_err(|e| classify_cdp_error(&e.to_string()))?;
        Ok(())
    }

    async fn click(&self, selector: &str, options: ClickOptions) -> DriverResult<()> {
        let js = format!(
            r#"(() => {{
                const el = window.__scrapeflow
                    ? window.__scrapeflow.queryFirst({sel})
                    : document.querySelector({sel});
                if (!el) return {{ error: 'not found' }};
                if (!{force}) {{
                    el.scrollIntoView({{ block: 'center', inline: 'center', behavior: 'instant' }});
                    const rect = el.getBoundingClientRect();
                    if (rect.width === 0 && rect.height === 0) return {{ error: 'zero size' }};
                    const style = getComputedStyle(el);
                    if (style.display === 'none' || style.visibility === 'hidden') {{
                        return {{ error: 'not visible' }};
                    }}
                }}
                el.click();
                return {{ ok: true }};
            }})()"#,
            sel = js_string(selector),
            force = options.force,
        );
        let outcome = self.eval_raw(&js, super::DEFAULT_TIMEOUT).await?;
        if let Some(error) = outcome.get("error").and_then(Value::as_str) {
            return Err(DriverError::Protocol(format!(
                "click {selector:?}: {error}"
            )));
        }
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> DriverResult<()> {
        let js = format!(
            r#"(() => {{
                const el = window.__scrapeflow
                    ? window.__scrapeflow.queryFirst({sel})
                    : document.querySelector({sel});
                if (!el) return {{ error: 'not found' }};
                el.scrollIntoView({{ block: 'center', behavior: 'instant' }});
                el.focus();
                if (el.tagName === 'INPUT' || el.tagName === 'TEXTAREA') {{
                    el.value += {text};
                    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                }} else {{
                    document.execCommand('insertText', false, {text});
                }}
                return {{ ok: true }};
            }})()"#,
            sel = js_string(selector),
            text = js_string(text),
        );
        let outcome = self.eval_raw(&js, super::DEFAULT_TIMEOUT).await?;
        if let Some(error) = outcome.get("error").and_then(Value::as_str) {
            return Err(DriverError::Protocol(format!(
                "type into {selector:?}: {error}"
            )));
        }
        Ok(())
    }

    async fn press_key(&self, key: &str) -> DriverResult<()> {
        self.dispatch_key_event("keydown", key).await?;
        self.dispatch_key_event("keyup", key).await
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> DriverResult<()> {
        let check = format!(
            r#"(() => {{
                const found = window.__scrapeflow
                    ? window.__scrapeflow.queryFirst({sel})
                    : document.querySelector({sel});
                return found !== null && found !== undefined;
            }})()"#,
            sel = js_string(selector),
        );
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.eval_raw(&check, timeout).await?.as_bool() == Some(true) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DriverError::SelectorTimeout {
                    selector: selector.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_load_state(&self, state: WaitUntil, timeout: Duration) -> DriverResult<()> {
        let accept_interactive = matches!(state, WaitUntil::DomContentLoaded);
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let ready = self
                .eval_raw("document.readyState", Duration::from_secs(5))
                .await?;
            match ready.as_str() {
                Some("complete") => break,
                Some("interactive") if accept_interactive => break,
                _ => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DriverError::NavigationFailed {
                    url: self.current_url().await.unwrap_or_default(),
                    reason: format!("load state not reached within {timeout:?}"),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        if matches!(state, WaitUntil::NetworkIdle) {
            // Approximation: CDP exposes no direct network-idle signal here.
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Ok(())
    }

    async fn wait_for_navigation(&self, timeout: Duration) -> DriverResult<()> {
        self.ensure_open()?;
        tokio::time::timeout(timeout, self.page.wait_for_navigation())
            .await
            .map_err(|_| DriverError::NavigationFailed {
                url: String::new(),
                reason: format!("no navigation within {timeout:?}"),
            })?
            .map_err(|e| classify_cdp_error(&e.to_string()))?;
        Ok(())
    }

    async fn evaluate(&self, expression: &str, timeout: Duration) -> DriverResult<Value> {
        self.eval_raw(expression, timeout).await
    }

    async fn add_init_script(&self, source: &str) -> DriverResult<()> {
        self.ensure_open()?;
        self.page
            .execute(AddScriptToEvaluateOnNewDocumentParams {
                source: source.to_string(),
                include_command_line_api: None,
                world_name: None,
                run_immediately: None,
            })
            .await
            .map_err(|e| classify_cdp_error(&e.to_string()))?;
        Ok(())
    }

    async fn screenshot(&self, options: ScreenshotOptions) -> DriverResult<Vec<u8>> {
        self.ensure_open()?;
        let params = CaptureScreenshotParams {
            format: Some(CaptureScreenshotFormat::Png),
            capture_beyond_viewport: Some(options.full_page),
            ..Default::default()
        };
        self.page
            .screenshot(params)
            .await
            .map_err(|e| classify_cdp_error(&e.to_string()))
    }

    async fn scroll_by(&self, dx: f64, dy: f64) -> DriverResult<()> {
        let js = format!("window.scrollBy({{ left: {dx}, top: {dy}, behavior: 'instant' }})");
        self.eval_raw(&js, super::DEFAULT_TIMEOUT).await.map(|_| ())
    }

    async fn history_forward(&self) -> DriverResult<bool> {
        let before = self.current_url().await?;
        self.eval_raw("history.forward()", super::DEFAULT_TIMEOUT)
            .await?;
        tokio::time::sleep(Duration::from_secs(1)).await;
        let after = self.current_url().await?;
        Ok(before != after)
    }

    async fn dispatch_method(&self, path: &str, args: &[Value]) -> DriverResult<Value> {
        let str_arg = |i: usize| -> String {
            args.get(i)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        match path {
            "goto" => {
                self.navigate(&str_arg(0), WaitUntil::Load, NAVIGATION_TIMEOUT)
                    .await?
            }
            "reload" => {
                self.eval_raw("location.reload()", super::DEFAULT_TIMEOUT)
                    .await?;
                let _ = self.wait_for_navigation(NAVIGATION_TIMEOUT).await;
            }
            "goBack" => {
                self.eval_raw("history.back()", super::DEFAULT_TIMEOUT)
                    .await?;
            }
            "goForward" => {
                self.history_forward().await?;
            }
            "waitForTimeout" => {
                let ms = args.first().and_then(Value::as_u64).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            "waitForSelector" => {
                self.wait_for_selector(&str_arg(0), super::DEFAULT_TIMEOUT)
                    .await?
            }
            "setCookie" => self.set_cookie(&str_arg(0), &str_arg(1)).await?,
            "fill" | "type" => self.type_text(&str_arg(0), &str_arg(1)).await?,
            "press" => {
                // Either press(key) or press(selector, key).
                if args.len() >= 2 {
                    self.click(&str_arg(0), ClickOptions::default()).await.ok();
                    self.press_key(&str_arg(1)).await?;
                } else {
                    self.press_key(&str_arg(0)).await?;
                }
            }
            "keyboard.press" => self.press_key(&str_arg(0)).await?,
            "keyboard.down" => self.dispatch_key_event("keydown", &str_arg(0)).await?,
            "keyboard.up" => self.dispatch_key_event("keyup", &str_arg(0)).await?,
            "keyboard.type" => {
                let js = format!(
                    "document.execCommand('insertText', false, {})",
                    js_string(&str_arg(0))
                );
                self.eval_raw(&js, super::DEFAULT_TIMEOUT).await?;
            }
            "mouse.wheel" => {
                let dx = args.first().and_then(Value::as_f64).unwrap_or(0.0);
                let dy = args.get(1).and_then(Value::as_f64).unwrap_or(0.0);
                self.mouse_event(
                    DispatchMouseEventType::MouseWheel,
                    0.0,
                    0.0,
                    Some((dx, dy)),
                )
                .await?;
            }
            "mouse.move" => {
                let x = args.first().and_then(Value::as_f64).unwrap_or(0.0);
                let y = args.get(1).and_then(Value::as_f64).unwrap_or(0.0);
                self.mouse_event(DispatchMouseEventType::MouseMoved, x, y, None)
                    .await?;
            }
            "mouse.click" => {
                let x = args.first().and_then(Value::as_f64).unwrap_or(0.0);
                let y = args.get(1).and_then(Value::as_f64).unwrap_or(0.0);
                self.mouse_event(DispatchMouseEventType::MousePressed, x, y, None)
                    .await?;
                self.mouse_event(DispatchMouseEventType::MouseReleased, x, y, None)
                    .await?;
            }
            other => return Err(DriverError::UnsupportedMethod(other.to_string())),
        }
        Ok(Value::Null)
    }

    async fn new_page(&self) -> DriverResult<Arc<dyn Driver>> {
        self.ensure_open()?;
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| classify_cdp_error(&e.to_string()))?;
        Ok(Self::attach(Arc::clone(&self.browser), page) as Arc<dyn Driver>)
    }

    fn take_popup_receiver(&self) -> Option<mpsc::UnboundedReceiver<Arc<dyn Driver>>> {
        self.popup_rx.lock().take()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    async fn close(&self) -> DriverResult<()> {
        if self.closed.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        if let Some(task) = self.popup_task.lock().take() {
            task.abort();
        }
        if let Err(e) = self.page.clone().close().await {
            warn!("failed to close page cleanly: {e}");
        }
        Ok(())
    }
}

/// Watch for `window.open` and surface the resulting sibling pages.
///
/// CDP reports the open event on the page but hands the new target to the
/// browser, so the watcher diffs the browser's page list against the
/// targets it has already seen.
async fn watch_popups(
    browser: Arc<Browser>,
    page: Page,
    tx: mpsc::UnboundedSender<Arc<dyn Driver>>,
) {
    let mut known = HashSet::new();
    if let Ok(pages) = browser.pages().await {
        for p in &pages {
            known.insert(p.target_id().clone());
        }
    }

    let mut events = match page.event_listener::<EventWindowOpen>().await {
        Ok(events) => events,
        Err(e) => {
            debug!("popup observation unavailable: {e}");
            return;
        }
    };

    while let Some(event) = events.next().await {
        debug!(url = %event.url, "page opened a popup");
        // The new target needs a beat to register with the browser.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let Ok(pages) = browser.pages().await else {
            continue;
        };
        for p in pages {
            if known.insert(p.target_id().clone())
                && tx
                    .send(CdpDriver::attach(Arc::clone(&browser), p) as Arc<dyn Driver>)
                    .is_err()
            {
                return;
            }
        }
    }
}

/// Map a CDP error message onto the driver error taxonomy.
fn classify_cdp_error(message: &str) -> DriverError {
    let lowered = message.to_lowercase();
    if lowered.contains("closed") || lowered.contains("detached") || lowered.contains("crashed") {
        DriverError::PageClosed
    } else {
        DriverError::Protocol(message.to_string())
    }
}

fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| String::from("\"\""))
}
