//! The crawl action end to end against a scripted driver (anchor
//! discovery only; sitemap fetching needs a network).

mod common;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use serde_json::json;

use common::{MockDriver, MockState};
use scrapeflow::driver::Driver;
use scrapeflow::crawl::{CrawlMode, CrawlOptions, run_crawl};

fn driver_with_anchors(anchors: &[&str]) -> Arc<MockDriver> {
    MockDriver::with_state(MockState {
        url: "https://docs.example.com/guide/".to_string(),
        anchor_urls: anchors.iter().map(ToString::to_string).collect(),
        page_content: json!({
            "title": "Doc", "description": "d", "text": "a b c",
            "html": "<html></html>", "links": [], "metadata": {}, "wordCount": 3
        }),
        ..Default::default()
    })
}

#[tokio::test(start_paused = true)]
async fn crawl_visits_in_scope_anchors_and_records_content() {
    let driver = driver_with_anchors(&[
        "https://docs.example.com/guide/intro",
        "https://docs.example.com/guide/intro/",
        "https://elsewhere.com/offsite",
        "https://docs.example.com/api",
    ]);
    let options = CrawlOptions {
        mode: CrawlMode::Domain,
        sitemap: false,
        ..Default::default()
    };

    let records = run_crawl(
        &(Arc::clone(&driver) as Arc<dyn Driver>),
        &options,
        &Arc::new(AtomicBool::new(false)),
    )
    .await
    .unwrap();

    // Off-site dropped, trailing-slash duplicate collapsed.
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["url"], json!("https://docs.example.com/guide/intro"));
    assert_eq!(records[0]["title"], json!("Doc"));
    assert_eq!(records[1]["url"], json!("https://docs.example.com/api"));

    let navigations = driver.state.lock().navigations.clone();
    assert_eq!(navigations.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn crawl_prioritises_the_start_path_and_honours_the_limit() {
    let driver = driver_with_anchors(&[
        "https://docs.example.com/blog/post",
        "https://docs.example.com/guide/one",
        "https://docs.example.com/guide/two",
    ]);
    let options = CrawlOptions {
        limit: Some(2),
        mode: CrawlMode::Domain,
        sitemap: false,
        ..Default::default()
    };

    let records = run_crawl(
        &(Arc::clone(&driver) as Arc<dyn Driver>),
        &options,
        &Arc::new(AtomicBool::new(false)),
    )
    .await
    .unwrap();

    // Base-path URLs first, then the cap.
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["url"], json!("https://docs.example.com/guide/one"));
    assert_eq!(records[1]["url"], json!("https://docs.example.com/guide/two"));
}

#[tokio::test(start_paused = true)]
async fn abort_between_visits_returns_partial_records() {
    let driver = driver_with_anchors(&[
        "https://docs.example.com/a",
        "https://docs.example.com/b",
    ]);
    let options = CrawlOptions {
        mode: CrawlMode::Domain,
        sitemap: false,
        ..Default::default()
    };

    let records = run_crawl(
        &(Arc::clone(&driver) as Arc<dyn Driver>),
        &options,
        &Arc::new(AtomicBool::new(true)),
    )
    .await
    .unwrap();

    assert!(records.is_empty());
    assert!(driver.state.lock().navigations.is_empty());
}
