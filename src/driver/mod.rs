//! Browser driver adapter.
//!
//! The interpreter, pagination engine, and action engines consume a narrow
//! capability trait rather than a concrete CDP page, so the whole runtime
//! can be exercised against a scripted driver in tests. [`cdp::CdpDriver`]
//! is the production implementation over a `chromiumoxide` page.

pub mod cdp;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

pub use cdp::CdpDriver;

/// Default timeout for evaluate calls.
pub const EVALUATE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default timeout for navigation waits.
pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
/// Default timeout for screenshots and miscellaneous driver calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors produced by the driver layer.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("navigation to {url} failed: {reason}")]
    NavigationFailed { url: String, reason: String },

    #[error("timed out after {timeout:?} waiting for selector {selector:?}")]
    SelectorTimeout { selector: String, timeout: Duration },

    #[error("page evaluation timed out after {0:?}")]
    EvaluationTimeout(Duration),

    #[error("page is closed")]
    PageClosed,

    #[error("in-page script library probe timed out")]
    ScriptInjectionTimeout,

    #[error("unsupported driver method {0:?}")]
    UnsupportedMethod(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Convenience alias for driver results.
pub type DriverResult<T> = Result<T, DriverError>;

impl DriverError {
    /// Whether retrying the same operation can plausibly succeed.
    ///
    /// Timeouts mean the page or network was slow; the DOM may settle on
    /// a later attempt. A closed page, a failed injection probe, an
    /// unknown method, or a protocol-level refusal will not get better by
    /// asking again.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NavigationFailed { .. }
                | Self::SelectorTimeout { .. }
                | Self::EvaluationTimeout(_)
        )
    }
}

/// Re-run a driver operation on transient failures.
///
/// Up to `attempts` retries on top of the first call, with a doubling
/// delay (capped at 8 s) plus jitter so concurrent page loops do not
/// retry in lockstep. Non-transient errors fail fast.
pub async fn with_retries<T, F, Fut>(attempts: u32, op: F) -> DriverResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = DriverResult<T>>,
{
    use rand::Rng;

    let mut delay = Duration::from_millis(500);
    let mut tried = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && tried < attempts => {
                tried += 1;
                tracing::debug!(attempt = tried, "transient driver error, retrying: {e}");
                let jitter = Duration::from_millis(rand::rng().random_range(0..250));
                tokio::time::sleep(delay + jitter).await;
                delay = (delay * 2).min(Duration::from_secs(8));
            }
            Err(e) => return Err(e),
        }
    }
}

/// Load states a navigation or load wait can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    Load,
    DomContentLoaded,
    NetworkIdle,
}

/// Options for [`Driver::click`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ClickOptions {
    /// Skip visibility/obstruction checks and click via the DOM directly.
    pub force: bool,
}

/// Options for [`Driver::screenshot`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ScreenshotOptions {
    pub full_page: bool,
}

/// The browser capability set the core consumes. One instance per page.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Navigate and wait for the requested load state.
    async fn navigate(
        &self,
        url: &str,
        wait_until: WaitUntil,
        timeout: Duration,
    ) -> DriverResult<()>;

    async fn current_url(&self) -> DriverResult<String>;

    /// Cookie name → value for the current page.
    async fn cookies(&self) -> DriverResult<HashMap<String, String>>;

    /// Set one cookie on the current page's URL.
    async fn set_cookie(&self, name: &str, value: &str) -> DriverResult<()>;

    async fn click(&self, selector: &str, options: ClickOptions) -> DriverResult<()>;

    async fn type_text(&self, selector: &str, text: &str) -> DriverResult<()>;

    async fn press_key(&self, key: &str) -> DriverResult<()>;

    /// Resolve when `selector` is attached, or fail with `SelectorTimeout`.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> DriverResult<()>;

    async fn wait_for_load_state(&self, state: WaitUntil, timeout: Duration) -> DriverResult<()>;

    /// Wait for the next navigation to settle.
    async fn wait_for_navigation(&self, timeout: Duration) -> DriverResult<()>;

    /// Evaluate an expression in page context; the result must be
    /// JSON-serialisable.
    async fn evaluate(&self, expression: &str, timeout: Duration) -> DriverResult<Value>;

    /// Register a script to run in every new document before page scripts.
    async fn add_init_script(&self, source: &str) -> DriverResult<()>;

    async fn screenshot(&self, options: ScreenshotOptions) -> DriverResult<Vec<u8>>;

    async fn scroll_by(&self, dx: f64, dy: f64) -> DriverResult<()>;

    /// `history.forward()`; true when the URL changed as a result.
    async fn history_forward(&self) -> DriverResult<bool>;

    /// Dotted method dispatch for non-built-in actions (`keyboard.press`,
    /// `mouse.wheel`, `waitForTimeout`, …).
    async fn dispatch_method(&self, path: &str, args: &[Value]) -> DriverResult<Value>;

    /// Open a sibling page sharing cookies and session.
    async fn new_page(&self) -> DriverResult<Arc<dyn Driver>>;

    /// One-shot receiver of pages opened by the page itself (`window.open`,
    /// target=_blank). Returns `None` after the first take or when the
    /// driver cannot observe popups.
    fn take_popup_receiver(&self) -> Option<mpsc::UnboundedReceiver<Arc<dyn Driver>>>;

    fn is_closed(&self) -> bool;

    async fn close(&self) -> DriverResult<()>;
}
