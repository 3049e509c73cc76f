//! Workflow data model: rules, guards, steps, parameters, validation.
//!
//! A workflow file is an ordered list of rules; each rule pairs a guard
//! (`where`) with a step list (`what`). Validation happens at interpreter
//! construction so malformed input fails before `run`, and initialisation
//! produces the mutable working copy the rule loop consumes: parameters
//! substituted, ids assigned, piercing selectors stripped from guards.

pub mod action;
pub mod condition;
pub mod matcher;
pub mod params;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use action::{Action, Step};
pub use condition::{Condition, PageState};
pub use matcher::Matcher;

use crate::error::WorkflowError;

/// One workflow rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "where", default)]
    pub guard: Condition,
    #[serde(rename = "what", default)]
    pub steps: Vec<Step>,
}

impl Rule {
    /// Stable identity for used-actions tracking and repeat detection.
    ///
    /// Ids are guaranteed present after [`WorkflowFile::initialise`]; this
    /// accessor is for rules straight off the wire.
    #[must_use]
    pub fn id_or(&self, index: usize) -> String {
        self.id.clone().unwrap_or_else(|| format!("rule-{index}"))
    }
}

/// A parsed workflow document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    pub workflow: Vec<Rule>,
}

impl WorkflowFile {
    /// Parse a workflow from its JSON text.
    pub fn from_json(text: &str) -> Result<Self, WorkflowError> {
        serde_json::from_str(text).map_err(|e| WorkflowError::Validation(e.to_string()))
    }

    /// Structural validation, run at interpreter construction.
    ///
    /// Every step must parse into an [`Action`]; guard regexes were already
    /// compiled during deserialisation.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.workflow.is_empty() {
            return Err(WorkflowError::Validation(
                "workflow contains no rules".to_string(),
            ));
        }
        for (index, rule) in self.workflow.iter().enumerate() {
            if rule.steps.is_empty() {
                return Err(WorkflowError::Validation(format!(
                    "rule {} has an empty step list",
                    rule.id_or(index)
                )));
            }
            for step in &rule.steps {
                Action::try_from(step)?;
            }
        }
        Ok(())
    }

    /// Produce the working copy a run consumes.
    ///
    /// Deep-clones the rule list, substitutes `{$param}` placeholders in
    /// step args, assigns ids to anonymous rules, and strips
    /// shadow-/frame-piercing selectors from every guard (those are in-page
    /// primitives, not page-level presence signals).
    pub fn initialise(
        &self,
        parameters: &HashMap<String, Value>,
    ) -> Result<Vec<Rule>, WorkflowError> {
        let mut rules = self.workflow.clone();
        for (index, rule) in rules.iter_mut().enumerate() {
            if rule.id.is_none() {
                rule.id = Some(format!("rule-{index}"));
            }
            rule.guard
                .retain_selectors(&|sel| !sel.contains(">>") && !sel.contains(":>>"));
            for step in &mut rule.steps {
                if let Some(args) = &mut step.args {
                    params::substitute(args, parameters)?;
                }
            }
        }
        Ok(rules)
    }
}
