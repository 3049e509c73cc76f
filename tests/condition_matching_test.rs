//! Condition tree evaluation against page states and used-actions.

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;
use scrapeflow::workflow::{Condition, PageState, WorkflowFile};

fn state(url: &str, cookies: &[(&str, &str)], selectors: &[&str]) -> PageState {
    PageState {
        url: url.to_string(),
        cookies: cookies
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        selectors: selectors.iter().map(ToString::to_string).collect(),
    }
}

fn condition(json: serde_json::Value) -> Condition {
    serde_json::from_value(json).expect("condition should deserialise")
}

#[test]
fn empty_condition_is_vacuously_applicable() {
    let c = Condition::default();
    assert!(c.applicable(&state("https://x", &[], &[]), &[]));
}

#[test]
fn url_matches_by_equality_or_regex() {
    let exact = condition(serde_json::json!({"url": "https://shop.example/cart"}));
    assert!(exact.applicable(&state("https://shop.example/cart", &[], &[]), &[]));
    assert!(!exact.applicable(&state("https://shop.example/cart/2", &[], &[]), &[]));

    let regex = condition(serde_json::json!({"url": {"$regex": "/cart(/\\d+)?$"}}));
    assert!(regex.applicable(&state("https://shop.example/cart/2", &[], &[]), &[]));
    assert!(!regex.applicable(&state("https://shop.example/checkout", &[], &[]), &[]));
}

#[test]
fn cookies_require_every_listed_entry() {
    let c = condition(serde_json::json!({
        "cookies": {"session": {"$regex": "^[a-f0-9]+$"}, "consent": "yes"}
    }));
    assert!(c.applicable(
        &state("u", &[("session", "deadbeef"), ("consent", "yes"), ("extra", "1")], &[]),
        &[]
    ));
    assert!(!c.applicable(&state("u", &[("session", "deadbeef")], &[]), &[]));
    assert!(!c.applicable(
        &state("u", &[("session", "NOPE"), ("consent", "yes")], &[]),
        &[]
    ));
}

#[test]
fn selectors_match_when_at_least_one_is_present() {
    let c = condition(serde_json::json!({"selectors": ["#a", ".b"]}));
    assert!(c.applicable(&state("u", &[], &[".b", ".c"]), &[]));
    assert!(!c.applicable(&state("u", &[], &[".c"]), &[]));
}

#[test]
fn empty_selector_arrays_compare_equal() {
    let c = condition(serde_json::json!({"selectors": []}));
    assert!(c.applicable(&state("u", &[], &[]), &[]));
}

#[test]
fn logical_operators_compose() {
    let c = condition(serde_json::json!({
        "$and": [
            {"url": {"$regex": "example"}},
            {"$or": [{"selectors": ["#login"]}, {"selectors": ["#logout"]}]},
            {"$not": {"selectors": ["#captcha"]}}
        ]
    }));
    assert!(c.applicable(&state("https://example.com", &[], &["#logout"]), &[]));
    assert!(!c.applicable(
        &state("https://example.com", &[], &["#logout", "#captcha"]),
        &[]
    ));
    assert!(!c.applicable(&state("https://other.com", &[], &["#login"]), &[]));
}

#[test]
fn before_and_after_are_duals_over_used_actions() {
    let before = condition(serde_json::json!({"$before": "accept-cookies"}));
    let after = condition(serde_json::json!({"$after": "accept-cookies"}));
    let s = state("u", &[], &[]);

    let unused: Vec<String> = vec![];
    assert!(before.applicable(&s, &unused));
    assert!(!after.applicable(&s, &unused));

    let used = vec!["accept-cookies".to_string()];
    assert!(!before.applicable(&s, &used));
    assert!(after.applicable(&s, &used));
}

#[test]
fn after_accepts_regex_over_rule_ids() {
    let c = condition(serde_json::json!({"$after": {"$regex": "^login-"}}));
    assert!(c.applicable(&state("u", &[], &[]), &["login-step-2".to_string()]));
    assert!(!c.applicable(&state("u", &[], &[]), &["logout".to_string()]));
}

#[test]
fn initialise_strips_piercing_selectors_from_guards() {
    let file: WorkflowFile = serde_json::from_value(serde_json::json!({
        "workflow": [{
            "id": "r",
            "where": {"selectors": ["#plain", "host >> inner", "frame :>> inner"]},
            "what": [{"action": "waitForTimeout", "args": [1]}]
        }]
    }))
    .unwrap();
    let rules = file.initialise(&HashMap::new()).unwrap();
    let mut kept = HashSet::new();
    rules[0].guard.collect_selectors(&mut kept);
    assert_eq!(kept, HashSet::from(["#plain".to_string()]));
}

proptest! {
    /// Presence of any single listed selector suffices, regardless of order.
    #[test]
    fn any_present_selector_satisfies_the_clause(
        listed in proptest::collection::vec("[a-z]{1,6}", 1..6),
        pick in 0usize..6,
    ) {
        let c = Condition {
            selectors: Some(listed.clone()),
            ..Condition::default()
        };
        let chosen = listed[pick % listed.len()].clone();
        let s = state("u", &[], &[chosen.as_str()]);
        prop_assert!(c.applicable(&s, &[]));
    }

    /// No overlap between listed and present selectors means no match.
    #[test]
    fn disjoint_selector_sets_never_match(
        listed in proptest::collection::vec("[a-f]{1,4}", 1..5),
        present in proptest::collection::vec("[g-z]{1,4}", 0..5),
    ) {
        let c = Condition {
            selectors: Some(listed),
            ..Condition::default()
        };
        let refs: Vec<&str> = present.iter().map(String::as_str).collect();
        let s = state("u", &[], &refs);
        prop_assert!(!c.applicable(&s, &[]));
    }
}
