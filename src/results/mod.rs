//! Namespaced, append-only result accumulation.
//!
//! Results are kept per action kind and user-assigned capture name, grow
//! monotonically within a run, and are emitted in full through the
//! caller's serializable callback after every push. `scrapeSchema` uses
//! the row-merge rule: new keys extend the last row, a repeated key opens
//! a new row.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde_json::{Map, Value, json};

/// Action kinds that accumulate named result sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResultKind {
    ScrapeList,
    ScrapeSchema,
    Crawl,
    Search,
}

impl ResultKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ScrapeList => "scrapeList",
            Self::ScrapeSchema => "scrapeSchema",
            Self::Crawl => "crawl",
            Self::Search => "search",
        }
    }
}

#[derive(Debug, Default)]
struct State {
    scrape_list: BTreeMap<String, Vec<Value>>,
    scrape_schema: BTreeMap<String, Vec<Value>>,
    crawl: BTreeMap<String, Vec<Value>>,
    search: BTreeMap<String, Vec<Value>>,
    list_counter: usize,
}

impl State {
    fn bucket(&mut self, kind: ResultKind) -> &mut BTreeMap<String, Vec<Value>> {
        match kind {
            ResultKind::ScrapeList => &mut self.scrape_list,
            ResultKind::ScrapeSchema => &mut self.scrape_schema,
            ResultKind::Crawl => &mut self.crawl,
            ResultKind::Search => &mut self.search,
        }
    }

    fn snapshot(&self) -> Value {
        fn to_value(map: &BTreeMap<String, Vec<Value>>) -> Value {
            let mut out = Map::new();
            for (name, rows) in map {
                out.insert(name.clone(), Value::Array(rows.clone()));
            }
            Value::Object(out)
        }
        json!({
            "scrapeList": to_value(&self.scrape_list),
            "scrapeSchema": to_value(&self.scrape_schema),
            "crawl": to_value(&self.crawl),
            "search": to_value(&self.search),
        })
    }
}

/// Append-only result store for one interpreter run.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    state: Mutex<State>,
}

impl ResultAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next auto-assigned capture name for an unnamed list action.
    pub fn next_list_name(&self) -> String {
        let mut state = self.state.lock();
        state.list_counter += 1;
        format!("List {}", state.list_counter)
    }

    /// Append rows under `kind`/`name` and return the full snapshot.
    pub fn push(&self, kind: ResultKind, name: &str, rows: Vec<Value>) -> Value {
        let mut state = self.state.lock();
        state
            .bucket(kind)
            .entry(name.to_string())
            .or_default()
            .extend(rows);
        state.snapshot()
    }

    /// Merge-append schema records per the row-merge rule and return the
    /// full snapshot.
    ///
    /// For each incoming record: keys not yet present in the last row are
    /// merged into it; the first repeated key closes the row and opens a
    /// new one seeded with the full record.
    pub fn push_schema(&self, name: &str, records: Vec<Value>) -> Value {
        let mut state = self.state.lock();
        let rows = state
            .bucket(ResultKind::ScrapeSchema)
            .entry(name.to_string())
            .or_default();
        for record in records {
            let Value::Object(incoming) = record else {
                rows.push(record);
                continue;
            };
            let open_new = match rows.last() {
                Some(Value::Object(last)) => incoming.keys().any(|k| last.contains_key(k)),
                _ => true,
            };
            if open_new {
                rows.push(Value::Object(incoming));
            } else if let Some(Value::Object(last)) = rows.last_mut() {
                for (key, value) in incoming {
                    last.insert(key, value);
                }
            }
        }
        state.snapshot()
    }

    /// Full snapshot of everything accumulated so far.
    pub fn snapshot(&self) -> Value {
        self.state.lock().snapshot()
    }

    /// Drop all accumulated data. Called by interpreter cleanup.
    pub fn clear(&self) {
        *self.state.lock() = State::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_key_opens_a_new_row() {
        let agg = ResultAggregator::new();
        agg.push_schema("Texts", vec![json!({"a": "1", "b": "2"})]);
        let snap = agg.push_schema("Texts", vec![json!({"a": "3"})]);
        assert_eq!(
            snap["scrapeSchema"]["Texts"],
            json!([{"a": "1", "b": "2"}, {"a": "3"}])
        );
    }

    #[test]
    fn new_keys_extend_the_last_row() {
        let agg = ResultAggregator::new();
        agg.push_schema("Texts", vec![json!({"a": "1"})]);
        let snap = agg.push_schema("Texts", vec![json!({"b": "2"})]);
        assert_eq!(snap["scrapeSchema"]["Texts"], json!([{"a": "1", "b": "2"}]));
    }

    #[test]
    fn auto_names_count_up() {
        let agg = ResultAggregator::new();
        assert_eq!(agg.next_list_name(), "List 1");
        assert_eq!(agg.next_list_name(), "List 2");
    }
}
