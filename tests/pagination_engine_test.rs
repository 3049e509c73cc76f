//! Pagination strategies against a scripted driver: duplicate
//! suppression, selector healing, content-change detection, termination.

mod common;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use serde_json::{Value, json};

use common::{MockDriver, MockState};
use scrapeflow::driver::Driver;
use scrapeflow::pagination::{
    ListConfig, MAX_RETRIES, Pagination, PaginationEngine, PaginationType,
};

fn rows(range: std::ops::Range<usize>) -> Vec<Value> {
    range.map(|i| json!({"title": format!("item {i}")})).collect()
}

fn list_config(limit: Option<usize>, pagination: Option<Pagination>) -> ListConfig {
    ListConfig {
        list_selector: ".list".to_string(),
        fields: json!({}),
        limit,
        pagination,
    }
}

fn engine(driver: &Arc<MockDriver>) -> PaginationEngine {
    PaginationEngine::new(
        Arc::clone(driver) as Arc<dyn Driver>,
        Arc::new(AtomicBool::new(false)),
    )
}

#[tokio::test(start_paused = true)]
async fn click_next_heals_dead_candidates_and_dedups_across_pages() {
    // Page 1 yields 10 rows; page 2 yields 15 of which 3 duplicate page 1.
    let mut page_two = rows(0..3);
    page_two.extend(rows(10..22));
    let driver = MockDriver::with_state(MockState {
        url: "https://example.com/page/1".to_string(),
        list_pages: vec![rows(0..10), page_two],
        present_selectors: vec!["button#more".to_string()],
        advance_on_click: vec!["button#more".to_string()],
        ..Default::default()
    });

    let config = list_config(
        Some(100),
        Some(Pagination {
            kind: PaginationType::ClickNext,
            selector: Some("a.next, button#more".to_string()),
        }),
    );
    let aggregate = engine(&driver).run(&config).await.unwrap();

    assert_eq!(aggregate.len(), 22, "3 duplicate rows must be suppressed");

    // The dead candidate was retried exactly MAX_RETRIES times, then
    // healed out for the rest of the session: never waited on again,
    // never clicked.
    assert_eq!(driver.waits_for("a.next"), MAX_RETRIES as usize);
    assert_eq!(driver.clicks_on("a.next"), 0);
    assert!(driver.clicks_on("button#more") >= 1);
}

#[tokio::test(start_paused = true)]
async fn scroll_down_stops_on_static_document_height() {
    let driver = MockDriver::with_state(MockState {
        list_pages: vec![rows(0..10)],
        heights: vec![1000, 1000],
        ..Default::default()
    });

    let config = list_config(
        None,
        Some(Pagination {
            kind: PaginationType::ScrollDown,
            selector: None,
        }),
    );
    let aggregate = engine(&driver).run(&config).await.unwrap();

    assert_eq!(aggregate.len(), 10);
    // Two identical heights in a row end the strategy after the second
    // extraction, result-count change notwithstanding.
    assert_eq!(driver.scrape_list_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn pagination_is_idempotent_over_a_static_page() {
    let driver = MockDriver::with_state(MockState {
        list_pages: vec![rows(0..20)],
        heights: vec![500, 500],
        ..Default::default()
    });
    let config = list_config(
        None,
        Some(Pagination {
            kind: PaginationType::ScrollDown,
            selector: None,
        }),
    );

    let first = engine(&driver).run(&config).await.unwrap();
    let second = engine(&driver).run(&config).await.unwrap();

    assert_eq!(first.len(), 20);
    assert_eq!(first, second);
}

#[tokio::test(start_paused = true)]
async fn aggregate_is_sliced_to_the_limit() {
    let driver = MockDriver::with_state(MockState {
        list_pages: vec![rows(0..10)],
        ..Default::default()
    });
    let config = list_config(Some(5), None);
    let aggregate = engine(&driver).run(&config).await.unwrap();
    assert_eq!(aggregate.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn load_more_gives_up_after_unproductive_clicks() {
    let driver = MockDriver::with_state(MockState {
        list_pages: vec![rows(0..5)],
        present_selectors: vec!["button.load".to_string()],
        heights: (1..=12).map(|i| i * 100).collect(),
        ..Default::default()
    });

    let config = list_config(
        Some(100),
        Some(Pagination {
            kind: PaginationType::ClickLoadMore,
            selector: Some("button.load".to_string()),
        }),
    );
    let aggregate = engine(&driver).run(&config).await.unwrap();

    assert_eq!(aggregate.len(), 5);
    // First extraction adds rows, then five unproductive iterations.
    assert_eq!(driver.scrape_list_calls(), 6);
}

#[tokio::test(start_paused = true)]
async fn abort_returns_partial_results_without_error() {
    let driver = MockDriver::with_state(MockState {
        list_pages: vec![rows(0..10)],
        heights: vec![100, 200, 300],
        ..Default::default()
    });
    let abort = Arc::new(AtomicBool::new(true));
    let engine = PaginationEngine::new(Arc::clone(&driver) as Arc<dyn Driver>, abort);

    let config = list_config(
        None,
        Some(Pagination {
            kind: PaginationType::ScrollDown,
            selector: None,
        }),
    );
    let aggregate = engine.run(&config).await.unwrap();

    assert!(aggregate.is_empty());
    assert_eq!(driver.scrape_list_calls(), 0);
}
