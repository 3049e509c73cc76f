//! Row duplicate suppression.
//!
//! Rows are keyed by the xxh3-64 hash of their canonical JSON
//! serialisation. Field order is stable within a pagination session (rows
//! for one list share the same field sequence), so the stringification is
//! a sound identity.

use std::collections::HashSet;

use serde_json::Value;
use xxhash_rust::xxh3::xxh3_64;

/// Session-scoped set of row identities.
#[derive(Debug, Default)]
pub struct DedupSet {
    seen: HashSet<u64>,
}

impl DedupSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the row was not seen before (and is now recorded).
    pub fn insert(&mut self, row: &Value) -> bool {
        self.seen.insert(row_key(row))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Hash one row's canonical serialisation.
#[must_use]
pub fn row_key(row: &Value) -> u64 {
    xxh3_64(row.to_string().as_bytes())
}

/// Hash an arbitrary signature payload (used for content-change detection).
#[must_use]
pub fn signature_key(payload: &Value) -> u64 {
    xxh3_64(payload.to_string().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn duplicate_rows_are_rejected() {
        let mut set = DedupSet::new();
        assert!(set.insert(&json!({"title": "a", "price": "1"})));
        assert!(!set.insert(&json!({"title": "a", "price": "1"})));
        assert!(set.insert(&json!({"title": "a", "price": "2"})));
        assert_eq!(set.len(), 2);
    }
}
