//! scrapeflow: a declarative web-scraping workflow interpreter.
//!
//! A workflow is an ordered list of rules, each pairing a guard (`where`)
//! with a list of browser actions (`what`). The interpreter drives a
//! headless Chrome page over CDP, carries rules out tail-first, extracts
//! structured data with an injected in-page library, paginates lists, and
//! streams growing result snapshots to caller callbacks.
//!
//! ```rust,ignore
//! use scrapeflow::{Interpreter, InterpreterOptions, WorkflowFile};
//!
//! let workflow = WorkflowFile::from_json(include_str!("workflow.json"))?;
//! let options = InterpreterOptions::default()
//!     .with_serializable_callback(std::sync::Arc::new(|snapshot| {
//!         println!("{snapshot}");
//!     }));
//! let interpreter = Interpreter::new(workflow, options)?;
//! interpreter.run(driver, None).await?;
//! ```

pub mod concurrency;
pub mod crawl;
pub mod driver;
pub mod error;
pub mod interpreter;
pub mod pagination;
pub mod results;
pub mod scripts;
pub mod search;
pub mod workflow;

pub use concurrency::WorkerPool;
pub use crawl::{CrawlMode, CrawlOptions};
pub use driver::{CdpDriver, ClickOptions, Driver, DriverError, ScreenshotOptions, WaitUntil};
pub use error::{WorkflowError, WorkflowResult};
pub use interpreter::{
    BinaryCallback, BinaryPayload, DebugChannel, FlagHandle, Interpreter, InterpreterEvent,
    InterpreterOptions, RunMode, SerializableCallback,
};
pub use pagination::{ListConfig, Pagination, PaginationEngine, PaginationType};
pub use results::{ResultAggregator, ResultKind};
pub use search::{SearchMode, SearchOptions};
pub use workflow::{Action, Condition, Matcher, PageState, Rule, Step, WorkflowFile};
