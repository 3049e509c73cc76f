//! Rule guards: the `where` side of a workflow rule.
//!
//! A condition is a tree of clauses over the live page state plus the
//! meta-operators `$before`/`$after` over the used-actions list. A single
//! condition object may carry several keys at once; they combine
//! conjunctively. The empty condition is vacuously applicable.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::matcher::Matcher;

/// Point-in-time read of the active page, consumed by condition matching.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageState {
    /// Current page URL.
    pub url: String,
    /// Cookie name → value for the current URL.
    pub cookies: HashMap<String, String>,
    /// Selectors from the workflow that are currently attached to the DOM.
    pub selectors: HashSet<String>,
}

/// Guard tree evaluated against a [`PageState`] and the used-actions list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "$and", default, skip_serializing_if = "Option::is_none")]
    pub and: Option<Vec<Condition>>,

    #[serde(rename = "$or", default, skip_serializing_if = "Option::is_none")]
    pub or: Option<Vec<Condition>>,

    #[serde(rename = "$not", default, skip_serializing_if = "Option::is_none")]
    pub not: Option<Box<Condition>>,

    /// Applicable only while no used-action id matches.
    #[serde(rename = "$before", default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Matcher>,

    /// Applicable only once some used-action id matches.
    #[serde(rename = "$after", default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Matcher>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<Matcher>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies: Option<HashMap<String, Matcher>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selectors: Option<Vec<String>>,
}

impl Condition {
    /// Recursive applicability test.
    ///
    /// Leaf semantics: `url` accepts equality or regex test; `cookies`
    /// requires every listed cookie to be present and matching; `selectors`
    /// matches when at least one listed selector is present in the state.
    /// Listed clauses combine as a conjunction; an empty `selectors` array
    /// against an empty state set compares equal (vacuous truth).
    #[must_use]
    pub fn applicable(&self, state: &PageState, used_actions: &[String]) -> bool {
        if let Some(clauses) = &self.and
            && !clauses.iter().all(|c| c.applicable(state, used_actions))
        {
            return false;
        }
        if let Some(clauses) = &self.or
            && !clauses.iter().any(|c| c.applicable(state, used_actions))
        {
            return false;
        }
        if let Some(inner) = &self.not
            && inner.applicable(state, used_actions)
        {
            return false;
        }
        if let Some(m) = &self.before
            && used_actions.iter().any(|id| m.matches(id))
        {
            return false;
        }
        if let Some(m) = &self.after
            && !used_actions.iter().any(|id| m.matches(id))
        {
            return false;
        }
        if let Some(m) = &self.url
            && !m.matches(&state.url)
        {
            return false;
        }
        if let Some(wanted) = &self.cookies {
            for (name, matcher) in wanted {
                match state.cookies.get(name) {
                    Some(value) if matcher.matches(value) => {}
                    _ => return false,
                }
            }
        }
        if let Some(wanted) = &self.selectors
            && !wanted.is_empty()
            && !wanted.iter().any(|sel| state.selectors.contains(sel))
        {
            return false;
        }
        true
    }

    /// True when no clause is present at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.and.is_none()
            && self.or.is_none()
            && self.not.is_none()
            && self.before.is_none()
            && self.after.is_none()
            && self.url.is_none()
            && self.cookies.is_none()
            && self.selectors.is_none()
    }

    /// Collect every selector string mentioned anywhere in the tree.
    pub fn collect_selectors(&self, out: &mut HashSet<String>) {
        if let Some(sels) = &self.selectors {
            out.extend(sels.iter().cloned());
        }
        for clause in self.and.iter().flatten().chain(self.or.iter().flatten()) {
            clause.collect_selectors(out);
        }
        if let Some(inner) = &self.not {
            inner.collect_selectors(out);
        }
    }

    /// Drop selectors for which `strip` returns true, recursively.
    ///
    /// Used by loop preprocessing to remove shadow-/frame-piercing selectors,
    /// which are in-page primitives rather than page-level presence signals.
    pub fn retain_selectors(&mut self, keep: &dyn Fn(&str) -> bool) {
        if let Some(sels) = &mut self.selectors {
            sels.retain(|s| keep(s));
        }
        for clause in self
            .and
            .iter_mut()
            .flatten()
            .chain(self.or.iter_mut().flatten())
        {
            clause.retain_selectors(keep);
        }
        if let Some(inner) = &mut self.not {
            inner.retain_selectors(keep);
        }
    }
}
