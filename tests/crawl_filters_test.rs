//! URL scoping, dedup, and prioritisation for the crawl action.

use scrapeflow::crawl::{CrawlMode, CrawlOptions, UrlFilter, dedupe, normalise, prioritise};
use url::Url;

fn filter(base: &str, mode: CrawlMode) -> UrlFilter {
    let options = CrawlOptions {
        mode,
        ..Default::default()
    };
    UrlFilter::new(&Url::parse(base).unwrap(), &options).unwrap()
}

#[test]
fn domain_mode_accepts_the_host_only() {
    let f = filter("https://docs.example.com/guide", CrawlMode::Domain);
    assert!(f.accepts("https://docs.example.com/anything"));
    assert!(!f.accepts("https://example.com/anything"));
    assert!(!f.accepts("https://other.com/"));
    assert!(!f.accepts("ftp://docs.example.com/file"));
}

#[test]
fn subdomain_mode_accepts_children_of_the_host() {
    let f = filter("https://example.com/", CrawlMode::Subdomain);
    assert!(f.accepts("https://example.com/a"));
    assert!(f.accepts("https://docs.example.com/a"));
    assert!(!f.accepts("https://notexample.com/a"));
}

#[test]
fn path_mode_requires_the_base_path_prefix() {
    let f = filter("https://example.com/docs/", CrawlMode::Path);
    assert!(f.accepts("https://example.com/docs"));
    assert!(f.accepts("https://example.com/docs/intro"));
    assert!(!f.accepts("https://example.com/blog/post"));
    assert!(!f.accepts("https://example.com/docsish"));
}

#[test]
fn include_and_exclude_patterns_stack_on_scope() {
    let options = CrawlOptions {
        mode: CrawlMode::Domain,
        include: Some(vec![r"/guide/".to_string()]),
        exclude: Some(vec![r"\.pdf$".to_string()]),
        ..Default::default()
    };
    let f = UrlFilter::new(&Url::parse("https://example.com/").unwrap(), &options).unwrap();
    assert!(f.accepts("https://example.com/guide/intro"));
    assert!(!f.accepts("https://example.com/blog/post"));
    assert!(!f.accepts("https://example.com/guide/manual.pdf"));
}

#[test]
fn bad_patterns_are_a_validation_error() {
    let options = CrawlOptions {
        include: Some(vec!["(".to_string()]),
        ..Default::default()
    };
    assert!(UrlFilter::new(&Url::parse("https://example.com/").unwrap(), &options).is_err());
}

#[test]
fn normalisation_ignores_fragments_and_trailing_slashes() {
    assert_eq!(normalise("https://x.com/a/#frag"), "https://x.com/a");
    assert_eq!(normalise("https://x.com/a/"), "https://x.com/a");
    assert_eq!(normalise("https://x.com/a"), "https://x.com/a");
}

#[test]
fn dedupe_keeps_first_occurrence_by_canonical_identity() {
    let urls = vec![
        "https://x.com/a".to_string(),
        "https://x.com/a/".to_string(),
        "https://x.com/a#section".to_string(),
        "https://x.com/b".to_string(),
    ];
    assert_eq!(
        dedupe(urls),
        vec!["https://x.com/a".to_string(), "https://x.com/b".to_string()]
    );
}

#[test]
fn prioritise_moves_base_path_urls_first_but_keeps_order() {
    let urls = vec![
        "https://x.com/blog/1".to_string(),
        "https://x.com/docs/a".to_string(),
        "https://x.com/blog/2".to_string(),
        "https://x.com/docs/b".to_string(),
    ];
    assert_eq!(
        prioritise(urls, "/docs"),
        vec![
            "https://x.com/docs/a".to_string(),
            "https://x.com/docs/b".to_string(),
            "https://x.com/blog/1".to_string(),
            "https://x.com/blog/2".to_string(),
        ]
    );
}
