//! The `what` side of a rule: one browser step.
//!
//! Steps deserialise from `{ action, args?, name? }`. Built-in actions get
//! their own variant; anything else is a driver method call, dotted names
//! denoting nested paths (`keyboard.press`). Parsing a step into an
//! [`Action`] happens at validation time so malformed workflows fail
//! before `run` ever touches a page.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crawl::CrawlOptions;
use crate::error::WorkflowError;
use crate::pagination::ListConfig;
use crate::search::SearchOptions;

/// Raw wire form of one workflow step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Step {
    /// Positional args, normalising `args: x` to `args: [x]`.
    #[must_use]
    pub fn args_vec(&self) -> Vec<Value> {
        match &self.args {
            None => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(single) => vec![single.clone()],
        }
    }
}

/// Parsed workflow step: built-ins plus the driver-method catch-all.
#[derive(Debug, Clone)]
pub enum Action {
    Screenshot {
        options: Value,
        name: Option<String>,
    },
    EnqueueLinks {
        selector: String,
    },
    Scrape {
        selector: Option<String>,
    },
    ScrapeSchema {
        schema: Value,
        name: Option<String>,
    },
    ScrapeList {
        config: ListConfig,
        name: Option<String>,
    },
    ScrapeListAuto {
        config: Value,
    },
    Scroll {
        pages: f64,
    },
    Script {
        code: String,
    },
    Crawl {
        config: CrawlOptions,
    },
    Search {
        config: SearchOptions,
    },
    Flag,
    /// Anything that is not a built-in: `click`, `goto`, `keyboard.press`, …
    DriverMethod {
        path: String,
        args: Vec<Value>,
    },
}

impl TryFrom<&Step> for Action {
    type Error = WorkflowError;

    fn try_from(step: &Step) -> Result<Self, Self::Error> {
        let args = step.args_vec();
        let first = args.first().cloned();
        let bad = |what: &str| {
            WorkflowError::Validation(format!("action {:?}: {what}", step.action))
        };

        let action = match step.action.as_str() {
            "screenshot" => Self::Screenshot {
                options: first.unwrap_or_else(|| Value::Object(Default::default())),
                name: step.name.clone(),
            },
            "enqueueLinks" => Self::EnqueueLinks {
                selector: first
                    .as_ref()
                    .and_then(Value::as_str)
                    .ok_or_else(|| bad("expects a selector string"))?
                    .to_string(),
            },
            "scrape" => Self::Scrape {
                selector: first
                    .as_ref()
                    .and_then(Value::as_str)
                    .map(ToString::to_string),
            },
            "scrapeSchema" => {
                let schema = first.ok_or_else(|| bad("expects a schema object"))?;
                if !schema.is_object() {
                    return Err(bad("schema must be an object of field definitions"));
                }
                Self::ScrapeSchema {
                    schema,
                    name: step.name.clone(),
                }
            }
            "scrapeList" => {
                let raw = first.ok_or_else(|| bad("expects a list config object"))?;
                let config: ListConfig = serde_json::from_value(raw)
                    .map_err(|e| bad(&format!("invalid list config: {e}")))?;
                Self::ScrapeList {
                    config,
                    name: step.name.clone(),
                }
            }
            "scrapeListAuto" => Self::ScrapeListAuto {
                config: first.ok_or_else(|| bad("expects a config object"))?,
            },
            "scroll" => Self::Scroll {
                pages: first.as_ref().and_then(Value::as_f64).unwrap_or(1.0),
            },
            "script" => Self::Script {
                code: first
                    .as_ref()
                    .and_then(Value::as_str)
                    .ok_or_else(|| bad("expects source code as a string"))?
                    .to_string(),
            },
            "crawl" => {
                let raw = first.unwrap_or_else(|| Value::Object(Default::default()));
                let config: CrawlOptions = serde_json::from_value(raw)
                    .map_err(|e| bad(&format!("invalid crawl config: {e}")))?;
                Self::Crawl { config }
            }
            "search" => {
                let raw = first.ok_or_else(|| bad("expects a query or config object"))?;
                let config = match raw {
                    Value::String(query) => SearchOptions::for_query(query),
                    other => serde_json::from_value(other)
                        .map_err(|e| bad(&format!("invalid search config: {e}")))?,
                };
                Self::Search { config }
            }
            "flag" => Self::Flag,
            other if other.is_empty() => return Err(bad("empty action name")),
            other => Self::DriverMethod {
                path: other.to_string(),
                args,
            },
        };
        Ok(action)
    }
}
