//! Interpreter options and caller callbacks.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// Default cap on consecutive fires of the same rule.
pub const DEFAULT_MAX_REPEATS: usize = 5;
/// Default capacity of the popup/enqueue worker pool.
pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

/// Receives every result-snapshot push.
pub type SerializableCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Screenshot payload delivered to the binary callback.
#[derive(Debug, Clone)]
pub struct BinaryPayload {
    pub name: String,
    pub data: Vec<u8>,
    pub mime_type: String,
}

/// Receives screenshots.
pub type BinaryCallback = Arc<dyn Fn(BinaryPayload) + Send + Sync>;

/// Interpreter operating mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunMode {
    #[default]
    Production,
    /// Recording-editor mode: extraction actions short-circuit with an
    /// empty callback payload instead of touching the page.
    Editor,
}

/// Optional observer hooks for recording UIs and debuggers.
#[derive(Clone, Default)]
pub struct DebugChannel {
    pub active_id: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub debug_message: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub set_action_type: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub set_action_name: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub increment_scrape_list_index: Option<Arc<dyn Fn() + Send + Sync>>,
    pub progress_update: Option<Arc<dyn Fn(usize, usize) + Send + Sync>>,
}

impl fmt::Debug for DebugChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugChannel")
            .field("active_id", &self.active_id.is_some())
            .field("debug_message", &self.debug_message.is_some())
            .field("progress_update", &self.progress_update.is_some())
            .finish_non_exhaustive()
    }
}

/// Construction options for an [`crate::interpreter::Interpreter`].
#[derive(Clone)]
pub struct InterpreterOptions {
    pub(crate) max_repeats: usize,
    pub(crate) max_concurrency: usize,
    pub(crate) mode: RunMode,
    pub(crate) debug: bool,
    pub(crate) serializable_callback: Option<SerializableCallback>,
    pub(crate) binary_callback: Option<BinaryCallback>,
    pub(crate) debug_channel: Option<DebugChannel>,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            max_repeats: DEFAULT_MAX_REPEATS,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            mode: RunMode::default(),
            debug: false,
            serializable_callback: None,
            binary_callback: None,
            debug_channel: None,
        }
    }
}

impl InterpreterOptions {
    #[must_use]
    pub fn with_max_repeats(mut self, max_repeats: usize) -> Self {
        self.max_repeats = max_repeats.max(1);
        self
    }

    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Attach the callback that receives every result-snapshot push.
    #[must_use]
    pub fn with_serializable_callback(mut self, callback: SerializableCallback) -> Self {
        self.serializable_callback = Some(callback);
        self
    }

    /// Attach the callback that receives screenshots.
    #[must_use]
    pub fn with_binary_callback(mut self, callback: BinaryCallback) -> Self {
        self.binary_callback = Some(callback);
        self
    }

    #[must_use]
    pub fn with_debug_channel(mut self, channel: DebugChannel) -> Self {
        self.debug_channel = Some(channel);
        self
    }

    #[must_use]
    pub fn max_repeats(&self) -> usize {
        self.max_repeats
    }

    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    #[must_use]
    pub fn mode(&self) -> RunMode {
        self.mode
    }

    #[must_use]
    pub fn debug(&self) -> bool {
        self.debug
    }
}

impl fmt::Debug for InterpreterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterpreterOptions")
            .field("max_repeats", &self.max_repeats)
            .field("max_concurrency", &self.max_concurrency)
            .field("mode", &self.mode)
            .field("debug", &self.debug)
            .field("serializable_callback", &self.serializable_callback.is_some())
            .field("binary_callback", &self.binary_callback.is_some())
            .field("debug_channel", &self.debug_channel.is_some())
            .finish()
    }
}
