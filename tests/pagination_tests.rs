mod common;

use audible_series_scanner::config::ScanConfig;
use audible_series_scanner::messages::{EventSink, ScanEvent};
use audible_series_scanner::pagination::{wait_for_listing, walk, BookSet};
use audible_series_scanner::session::{CancelFlag, ScanContext, ScanStatus, SharedStatus};
use common::*;
use reqwest::Url;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedReceiver;

struct Harness {
    fetcher: MockFetcher,
    config: ScanConfig,
    cancel: CancelFlag,
    events: EventSink,
    status: SharedStatus,
}

impl Harness {
    fn new(fetcher: MockFetcher) -> (Self, UnboundedReceiver<ScanEvent>) {
        let (events, rx) = EventSink::channel();
        let harness = Harness {
            fetcher,
            config: ScanConfig::immediate(),
            cancel: CancelFlag::new(),
            events,
            status: Arc::new(Mutex::new(ScanStatus::default())),
        };
        (harness, rx)
    }

    fn ctx(&self) -> ScanContext<'_, MockFetcher> {
        ScanContext {
            fetcher: &self.fetcher,
            config: &self.config,
            cancel: &self.cancel,
            events: &self.events,
            status: &self.status,
            is_background: false,
        }
    }
}

fn page1_url() -> Url {
    Url::parse(PAGE1_URL).unwrap()
}

fn drain(rx: &mut UnboundedReceiver<ScanEvent>) -> Vec<ScanEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn ids(books: &BookSet) -> Vec<&str> {
    books.books().iter().map(|b| b.id.as_str()).collect()
}

#[tokio::test]
async fn walks_remaining_pages_in_ascending_order() {
    let (h, mut rx) = Harness::new(MockFetcher::library());
    let mut books = BookSet::default();

    let report = walk(&h.ctx(), LIBRARY_PAGE1, Some(&page1_url()), false, &mut books).await;

    assert_eq!(h.fetcher.requests(), vec![PAGE2_URL, PAGE3_URL]);
    assert_eq!(ids(&books), vec!["B001", "B002", "B003", "B004", "B005"]);
    assert_eq!(report.total_pages, Some(3));
    assert_eq!(report.pages_fetched, 2);
    assert_eq!(report.books_added, 5);
    assert!(!report.cancelled);

    let found = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, ScanEvent::BookFound(_)))
        .count();
    assert_eq!(found, 5);
    assert_eq!(h.status.lock().unwrap().books_found, 5);
}

#[tokio::test]
async fn extracted_books_carry_series_and_absolute_links() {
    let (h, _rx) = Harness::new(MockFetcher::library());
    let mut books = BookSet::default();
    walk(&h.ctx(), LIBRARY_PAGE1, Some(&page1_url()), false, &mut books).await;

    let dune = &books.books()[0];
    assert_eq!(dune.title, "Dune");
    assert_eq!(dune.author, "Frank Herbert");
    assert_eq!(dune.narrator, "Scott Brick");
    assert_eq!(dune.series.as_deref(), Some("Dune Chronicles"));
    assert_eq!(dune.series_url.as_deref(), Some(DUNE_URL));
    assert_eq!(dune.book_number.as_deref(), Some("1"));
    assert_eq!(dune.book_url.as_deref(), Some(PRODUCT_URL));

    let standalone = books.books().iter().find(|b| b.id == "B004").unwrap();
    assert_eq!(standalone.series, None);
    assert_eq!(standalone.series_url, None);
}

#[tokio::test]
async fn failed_page_is_skipped() {
    let (h, _rx) = Harness::new(MockFetcher::library().failing(PAGE2_URL));
    let mut books = BookSet::default();

    let report = walk(&h.ctx(), LIBRARY_PAGE1, Some(&page1_url()), false, &mut books).await;

    assert_eq!(h.fetcher.requests(), vec![PAGE2_URL, PAGE3_URL]);
    assert_eq!(ids(&books), vec!["B001", "B002", "B005"]);
    assert_eq!(report.pages_failed, 1);
    assert_eq!(report.pages_fetched, 1);
}

#[tokio::test]
async fn current_page_only_fetches_nothing() {
    let (h, _rx) = Harness::new(MockFetcher::library());
    let mut books = BookSet::default();

    let report = walk(&h.ctx(), LIBRARY_PAGE1, Some(&page1_url()), true, &mut books).await;

    assert!(h.fetcher.requests().is_empty());
    assert_eq!(ids(&books), vec!["B001", "B002"]);
    assert_eq!(report.current_page, 1);
}

#[tokio::test]
async fn rescan_over_seeded_set_adds_nothing() {
    let (h, mut rx) = Harness::new(MockFetcher::library());
    let mut first = BookSet::default();
    walk(&h.ctx(), LIBRARY_PAGE1, Some(&page1_url()), false, &mut first).await;
    drain(&mut rx);

    let mut books = BookSet::seeded(first.into_books());
    let report = walk(&h.ctx(), LIBRARY_PAGE1, Some(&page1_url()), false, &mut books).await;

    assert_eq!(report.books_added, 0);
    assert_eq!(books.len(), 5);
    assert!(drain(&mut rx).iter().all(|e| !matches!(e, ScanEvent::BookFound(_))));
}

#[tokio::test]
async fn cancel_stops_before_next_fetch() {
    let cancel = CancelFlag::new();
    let fetcher = MockFetcher::library().cancel_on(PAGE2_URL, cancel.clone());
    let (mut h, _rx) = Harness::new(fetcher);
    h.cancel = cancel;
    let mut books = BookSet::default();

    let report = walk(&h.ctx(), LIBRARY_PAGE1, Some(&page1_url()), false, &mut books).await;

    assert!(report.cancelled);
    assert_eq!(h.fetcher.request_count(PAGE3_URL), 0);
    // the page already in flight is still absorbed
    assert_eq!(ids(&books), vec!["B001", "B002", "B003", "B004"]);
}

#[tokio::test]
async fn progress_reports_pages_against_total() {
    let (h, mut rx) = Harness::new(MockFetcher::library());
    let mut books = BookSet::default();
    walk(&h.ctx(), LIBRARY_PAGE1, Some(&page1_url()), false, &mut books).await;

    let pages: Vec<(Option<u32>, Option<u32>)> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            ScanEvent::ScanProgress(p) => Some((p.current_page, p.total_pages)),
            _ => None,
        })
        .collect();
    assert_eq!(pages, vec![(Some(1), Some(3)), (Some(2), Some(3)), (Some(3), Some(3))]);
}

#[tokio::test]
async fn waits_until_listing_rows_appear() {
    let fetcher = MockFetcher::new().with_responses(PAGE1_URL, &[LOADING_PAGE, LIBRARY_PAGE1]);
    let (h, _rx) = Harness::new(fetcher);

    let body = wait_for_listing(&h.ctx(), PAGE1_URL).await;

    assert_eq!(body, LIBRARY_PAGE1);
    assert_eq!(h.fetcher.request_count(PAGE1_URL), 2);
}

#[tokio::test]
async fn gives_up_waiting_after_configured_attempts() {
    let fetcher = MockFetcher::new().with_page(PAGE1_URL, LOADING_PAGE);
    let (h, _rx) = Harness::new(fetcher);

    let body = wait_for_listing(&h.ctx(), PAGE1_URL).await;

    assert_eq!(body, LOADING_PAGE);
    assert_eq!(h.fetcher.request_count(PAGE1_URL), 3);
}

#[tokio::test]
async fn page_without_rows_or_spinner_is_loaded_at_once() {
    let empty = r#"<html><body><h1>My Library</h1><p>You have no titles yet.</p></body></html>"#;
    let fetcher = MockFetcher::new().with_page(PAGE1_URL, empty);
    let (mut h, _rx) = Harness::new(fetcher);
    h.config = ScanConfig::default();

    let body = wait_for_listing(&h.ctx(), PAGE1_URL).await;

    assert_eq!(body, empty);
    assert_eq!(h.fetcher.request_count(PAGE1_URL), 1);
}

#[tokio::test]
async fn failed_listing_fetch_is_retried_within_budget() {
    let (h, _rx) = Harness::new(MockFetcher::new().failing(PAGE1_URL));

    let body = wait_for_listing(&h.ctx(), PAGE1_URL).await;

    assert!(body.is_empty());
    assert_eq!(h.fetcher.request_count(PAGE1_URL), 3);
}

#[tokio::test]
async fn same_page_under_two_targets_adds_no_duplicates() {
    let alt = "https://www.audible.com/library/titles?page=2&ref=next";
    let first = LIBRARY_PAGE1.replace(
        r#"<span class="nextButton"><a href="/library/titles?page=2">"#,
        r#"<span class="nextButton"><a href="/library/titles?page=2&amp;ref=next">"#,
    );
    let (h, _rx) = Harness::new(MockFetcher::library().with_page(alt, LIBRARY_PAGE2));
    let mut books = BookSet::default();

    walk(&h.ctx(), &first, Some(&page1_url()), false, &mut books).await;

    assert_eq!(h.fetcher.requests(), vec![PAGE2_URL, alt, PAGE3_URL]);
    assert_eq!(ids(&books), vec!["B001", "B002", "B003", "B004", "B005"]);
}
