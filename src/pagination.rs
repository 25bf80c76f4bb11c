//! Library listing pagination: page discovery, the book accumulator, and the
//! sequential page walk.

use crate::dom::{link_target, DomNode};
use crate::extractor::{extract_books, listing_rows};
use crate::http_client::PageFetcher;
use crate::messages::{EventSink, ScanEvent};
use crate::models::Book;
use crate::session::ScanContext;
use regex::Regex;
use reqwest::Url;
use scraper::Html;
use std::collections::HashSet;
use std::sync::LazyLock;
use tokio::time::sleep;

const PAGINATION_SELECTORS: &[&str] = &[
    ".pageNumberElement a",
    ".pagingElements a",
    ".bc-pagination a",
    ".adbl-pagination a",
    "[data-test-id=\"pagination\"] a",
];
const NEXT_SELECTOR: &str = ".nextButton a";
const LOADING_SELECTOR: &str = ".bc-spinner, .spinner, .adbl-loading, [aria-busy=\"true\"]";
const SUMMARY_SELECTORS: &[&str] = &[
    ".bc-pagination-summary",
    ".adbl-pagination-summary",
    "[data-test-id=\"pagination-summary\"]",
];

static PAGE_PARAM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[?&]page=(\d+)").expect("valid regex"));
static SUMMARY_TOTAL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)of\s+(\d+)").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLink {
    pub page: u32,
    pub url: String,
}

pub fn page_param(url: &str) -> Option<u32> {
    PAGE_PARAM_RE.captures(url).and_then(|c| c[1].parse().ok())
}

/// Turn raw pagination links into the fetch plan.
///
/// Only pages after the first are kept. Links are de-duplicated by literal
/// target and sorted ascending by page number, so the result never depends
/// on which selector matched first. Distinct targets for the same page are
/// all kept; the book set absorbs the repeat.
pub fn order_page_links(raw: Vec<PageLink>, next: Option<PageLink>) -> Vec<PageLink> {
    let mut seen_urls = HashSet::new();
    let mut links = Vec::new();

    for link in raw {
        if seen_urls.insert(link.url.clone()) && link.page > 1 {
            links.push(link);
        }
    }
    if let Some(next) = next {
        if next.page > 1 && seen_urls.insert(next.url.clone()) {
            links.push(next);
        }
    }

    links.sort_by_key(|l| l.page);
    links
}

fn as_page_link<N: DomNode>(anchor: &N, base: Option<&Url>) -> Option<PageLink> {
    let url = link_target(anchor, base)?;
    let page = page_param(&url)?;
    Some(PageLink { page, url })
}

/// All further listing pages reachable from this document's pagination.
pub fn discover_page_links<N: DomNode>(root: &N, base: Option<&Url>) -> Vec<PageLink> {
    let raw = PAGINATION_SELECTORS
        .iter()
        .flat_map(|sel| root.select_all(sel))
        .filter_map(|a| as_page_link(&a, base))
        .collect();
    let next = root.select_first(NEXT_SELECTOR).and_then(|a| as_page_link(&a, base));

    let links = order_page_links(raw, next);
    log::debug!("Found {} additional page URLs from pagination", links.len());
    links
}

/// Page number of the loaded document.
pub fn current_page<N: DomNode>(root: &N) -> u32 {
    if let Some(page) = root
        .select_first("input[name=\"page\"]")
        .and_then(|input| input.attr("value"))
        .and_then(|v| v.trim().parse().ok())
    {
        return page;
    }

    // The current page is rendered as a bare span rather than a link
    root.select_all(".pageNumberElement")
        .into_iter()
        .filter(|el| el.tag_name() == "span" && el.closest("a").is_none())
        .find_map(|el| el.trimmed_text().parse().ok())
        .unwrap_or(1)
}

pub fn total_pages<N: DomNode>(root: &N) -> Option<u32> {
    let max_numbered = root
        .select_all(".pageNumberElement")
        .iter()
        .filter_map(|el| el.trimmed_text().parse::<u32>().ok())
        .max()
        .filter(|n| *n > 0);
    if max_numbered.is_some() {
        return max_numbered;
    }

    SUMMARY_SELECTORS.iter().find_map(|sel| {
        let text = root.select_first(sel)?.text();
        SUMMARY_TOTAL_RE.captures(&text).and_then(|c| c[1].parse().ok())
    })
}

/// Books accumulated by a scan, unique by `Book::id`.
#[derive(Debug, Default)]
pub struct BookSet {
    seen: HashSet<String>,
    books: Vec<Book>,
}

impl BookSet {
    /// Start from previously stored results so re-scans only add.
    pub fn seeded(existing: Vec<Book>) -> Self {
        let mut set = BookSet::default();
        for book in existing {
            if set.seen.insert(book.id.clone()) {
                set.books.push(book);
            }
        }
        set
    }

    /// Add unseen books, announcing each one. Returns how many were new.
    pub fn absorb(&mut self, page_books: Vec<Book>, events: &EventSink) -> usize {
        let mut added = 0;
        for book in page_books {
            if self.seen.insert(book.id.clone()) {
                events.emit(ScanEvent::BookFound(book.clone()));
                self.books.push(book);
                added += 1;
            }
        }
        added
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn books(&self) -> &[Book] {
        &self.books
    }

    pub fn books_mut(&mut self) -> &mut Vec<Book> {
        &mut self.books
    }

    pub fn into_books(self) -> Vec<Book> {
        self.books
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WalkReport {
    pub current_page: u32,
    pub total_pages: Option<u32>,
    pub pages_fetched: usize,
    pub pages_failed: usize,
    pub books_added: usize,
    pub cancelled: bool,
}

fn absorb_document<F>(ctx: &ScanContext<'_, F>, body: &str, base: Option<&Url>, books: &mut BookSet) -> usize {
    let html = Html::parse_document(body);
    let added = books.absorb(extract_books(&html.root_element(), base), ctx.events);
    ctx.set_books_found(books.len());
    added
}

/// Walk the listing starting from an already-loaded first document.
///
/// The loaded page is always scanned before anything is fetched. Failed
/// pages are logged and skipped; cancellation is honoured before each fetch.
pub async fn walk<F: PageFetcher>(
    ctx: &ScanContext<'_, F>,
    first_page: &str,
    page_url: Option<&Url>,
    current_page_only: bool,
    books: &mut BookSet,
) -> WalkReport {
    let (links, mut report) = {
        let html = Html::parse_document(first_page);
        let root = html.root_element();
        let current = current_page(&root);
        let links = discover_page_links(&root, page_url);

        let mut total = total_pages(&root);
        if let Some(max_link) = links.iter().map(|l| l.page).max() {
            if total.map_or(true, |t| max_link > t) {
                total = Some(max_link);
            }
        }

        log::info!(
            "Starting page scan. Current page: {}, total pages: {}, found {} page URLs",
            current,
            total.map(|t| t.to_string()).unwrap_or_else(|| "unknown".into()),
            links.len()
        );
        ctx.page_progress(current, total);

        let added = books.absorb(extract_books(&root, page_url), ctx.events);
        ctx.set_books_found(books.len());
        log::debug!("Page {}: found {} new books (total: {})", current, added, books.len());

        let report = WalkReport {
            current_page: current,
            total_pages: total,
            books_added: added,
            ..Default::default()
        };
        (links, report)
    };

    if current_page_only {
        log::info!("Current page only mode - skipping other pages");
        return report;
    }

    for link in links {
        if ctx.cancel.is_cancelled() {
            log::info!("Scanning stopped by user");
            report.cancelled = true;
            break;
        }

        report.current_page = link.page;
        ctx.page_progress(link.page, report.total_pages);

        log::debug!("Fetching page {}: {}", link.page, link.url);
        match ctx.fetcher.fetch_page(&link.url).await {
            Ok(body) => {
                let base = Url::parse(&link.url).ok();
                let added = absorb_document(ctx, &body, base.as_ref(), books);
                report.pages_fetched += 1;
                report.books_added += added;
                log::debug!("Page {}: found {} new books (total: {})", link.page, added, books.len());
            }
            Err(e) => {
                log::warn!("Failed to fetch page {}: {}", link.page, e);
                report.pages_failed += 1;
            }
        }

        sleep(ctx.config.page_delay()).await;
    }

    log::info!("Page scan complete. Total books found: {}", books.len());
    report
}

/// Load the first listing page.
///
/// A page that came back with listing rows, or without rows and without a
/// loading placeholder (an empty library, a sign-in page), is returned as
/// is. Only failed fetches and placeholder pages are polled again, at most
/// `page_load_attempts` times and a page delay apart. After the last attempt
/// whatever the last successful fetch produced is returned.
pub async fn wait_for_listing<F: PageFetcher>(ctx: &ScanContext<'_, F>, url: &str) -> String {
    let attempts = ctx.config.page_load_attempts.max(1);
    let mut last_body = String::new();

    for attempt in 1..=attempts {
        match ctx.fetcher.fetch_page(url).await {
            Ok(body) => {
                let loading = {
                    let html = Html::parse_document(&body);
                    let root = html.root_element();
                    listing_rows(&root).is_empty() && root.select_first(LOADING_SELECTOR).is_some()
                };
                last_body = body;
                if !loading {
                    log::debug!("listing loaded after {} attempt(s)", attempt);
                    return last_body;
                }
                log::debug!("listing still loading (attempt {})", attempt);
            }
            Err(e) => log::debug!("listing fetch attempt {} failed: {}", attempt, e),
        }
        if attempt < attempts {
            sleep(ctx.config.page_delay()).await;
        }
    }

    log::warn!("Page load timeout after {} attempts, proceeding anyway", attempts);
    last_body
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(page: u32, url: &str) -> PageLink {
        PageLink { page, url: url.to_string() }
    }

    #[test]
    fn orders_and_dedups_links() {
        let raw = vec![link(3, "C"), link(2, "B"), link(2, "B")];
        let ordered = order_page_links(raw, Some(link(4, "D")));
        let urls: Vec<&str> = ordered.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(urls, vec!["B", "C", "D"]);
    }

    #[test]
    fn drops_first_page_and_keeps_distinct_targets() {
        let raw = vec![
            link(5, "p5"),
            link(1, "p1"),
            link(2, "p2?a"),
            link(2, "p2?b"),
        ];
        let ordered = order_page_links(raw, Some(link(2, "p2?a")));
        let urls: Vec<&str> = ordered.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(urls, vec!["p2?a", "p2?b", "p5"]);
    }

    #[test]
    fn reads_page_param() {
        assert_eq!(page_param("https://x/library/titles?pageSize=50&page=3"), Some(3));
        assert_eq!(page_param("https://x/library/titles?page=12&ref=a"), Some(12));
        assert_eq!(page_param("https://x/library/titles"), None);
    }

    #[test]
    fn page_metadata_from_markup() {
        let html = Html::parse_document(
            r#"<html><body><div class="pagingElements">
                <span class="pageNumberElement">1</span>
                <a href="/library/titles?page=2"><span class="pageNumberElement">2</span></a>
                <a href="/library/titles?page=7"><span class="pageNumberElement">7</span></a>
                <span class="nextButton"><a href="/library/titles?page=2">Next</a></span>
            </div></body></html>"#,
        );
        let root = html.root_element();
        assert_eq!(current_page(&root), 1);
        assert_eq!(total_pages(&root), Some(7));

        let base = Url::parse("https://www.audible.com/library/titles?page=1").unwrap();
        let links = discover_page_links(&root, Some(&base));
        let pages: Vec<u32> = links.iter().map(|l| l.page).collect();
        assert_eq!(pages, vec![2, 7]);
        assert_eq!(links[0].url, "https://www.audible.com/library/titles?page=2");
    }

    #[test]
    fn total_pages_from_summary_and_input_page() {
        let html = Html::parse_document(
            r#"<html><body><input name="page" value="4">
               <div class="bc-pagination-summary">Page 4 of 9</div></body></html>"#,
        );
        let root = html.root_element();
        assert_eq!(current_page(&root), 4);
        assert_eq!(total_pages(&root), Some(9));

        let empty = Html::parse_document("<html><body></body></html>");
        assert_eq!(current_page(&empty.root_element()), 1);
        assert_eq!(total_pages(&empty.root_element()), None);
    }
}
