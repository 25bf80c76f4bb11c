//! Series reconciliation: fetch each distinct series catalog in bounded
//! batches, classify it, and write the counts back onto the library books.

use crate::classifier::parse_series_page;
use crate::coverage::{analyze_series, SeriesResult};
use crate::error::FetchError;
use crate::http_client::PageFetcher;
use crate::messages::{ScanEvent, SeriesUpdate};
use crate::models::Book;
use crate::session::ScanContext;
use futures::future::join_all;
use scraper::Html;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tokio::time::sleep;

/// Per-scan cache of reconciled series, keyed by catalog URL.
///
/// Owned by a single scan and dropped with it; availability changes between
/// scans, so nothing carries over.
#[derive(Debug, Default)]
pub struct SeriesCache {
    entries: HashMap<String, SeriesResult>,
}

impl SeriesCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> Option<&SeriesResult> {
        self.entries.get(url)
    }

    pub fn insert(&mut self, url: String, result: SeriesResult) {
        self.entries.insert(url, result);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Distinct series URLs in first-seen order.
pub fn distinct_series_urls(books: &[Book]) -> Vec<String> {
    let mut seen = HashSet::new();
    books
        .iter()
        .filter_map(|b| b.series_url.as_ref())
        .filter(|url| seen.insert(url.as_str()))
        .cloned()
        .collect()
}

/// Fetch and fully analyze one series catalog page.
pub async fn fetch_series<F: PageFetcher>(fetcher: &F, url: &str) -> Result<SeriesResult, FetchError> {
    let body = fetcher.fetch_page(url).await?;
    let page = {
        let html = Html::parse_document(&body);
        parse_series_page(&html.root_element())
    };
    log::debug!("Found {} books in series page {}", page.entries.len(), url);
    Ok(analyze_series(page))
}

/// Copy a series result onto every book that links to `series_url`.
pub fn apply_result(books: &mut [Book], series_url: &str, result: &SeriesResult) -> usize {
    let mut touched = 0;
    for book in books
        .iter_mut()
        .filter(|b| b.series_url.as_deref() == Some(series_url))
    {
        book.new_books_available = result.new_books_count;
        book.total_in_series = result.total_in_series;
        book.owned_in_series = result.owned_count;
        book.preordered_in_series = result.preorder_count;
        book.all_series_books = result.all_books.clone();
        touched += 1;
    }
    touched
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub series_total: usize,
    pub fetched: usize,
    pub from_cache: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Reconcile every series referenced by `books`, `batch_size` at a time.
///
/// Fetches inside a batch run concurrently; their results are applied only
/// after the whole batch resolved. A failed series gets an empty result and
/// is not cached. `books` is sorted afterwards.
pub async fn reconcile<F: PageFetcher>(
    ctx: &ScanContext<'_, F>,
    books: &mut Vec<Book>,
    cache: &mut SeriesCache,
    batch_size: usize,
) -> ReconcileReport {
    let batch_size = batch_size.max(1);
    let urls = distinct_series_urls(books);
    let total = urls.len();
    let mut report = ReconcileReport {
        series_total: total,
        ..Default::default()
    };

    log::info!("Scanning {} unique series for new books...", total);
    ctx.status_progress(format!("Checking {} series for new books...", total));

    for (index, batch) in urls.chunks(batch_size).enumerate() {
        if ctx.cancel.is_cancelled() {
            log::info!("Series scan stopped by user");
            report.cancelled = true;
            break;
        }

        let completed = ((index + 1) * batch_size).min(total);
        ctx.status_progress(format!("Checking series {}/{}...", completed, total));

        let (cached, to_fetch): (Vec<&String>, Vec<&String>) =
            batch.iter().partition(|url| cache.get(url).is_some());

        let mut results: Vec<(String, SeriesResult)> = cached
            .into_iter()
            .filter_map(|url| cache.get(url).map(|r| (url.clone(), r.clone())))
            .collect();
        report.from_cache += results.len();

        let fetched = join_all(to_fetch.iter().map(|url| async move {
            (url.to_string(), fetch_series(ctx.fetcher, url).await)
        }))
        .await;

        for (url, outcome) in fetched {
            match outcome {
                Ok(result) => {
                    cache.insert(url.clone(), result.clone());
                    report.fetched += 1;
                    results.push((url, result));
                }
                Err(e) => {
                    log::warn!("Error checking series {}: {}", url, e);
                    report.failed += 1;
                    results.push((url, SeriesResult::empty()));
                }
            }
        }

        for (url, result) in results {
            apply_result(books, &url, &result);
            ctx.events.emit(ScanEvent::SeriesUpdate(SeriesUpdate {
                series_url: url,
                new_books_count: result.new_books_count,
                total_in_series: result.total_in_series,
                owned_count: result.owned_count,
                preorder_count: result.preorder_count,
                all_books: result.all_books,
            }));
        }

        if completed < total {
            sleep(ctx.config.batch_delay()).await;
        }
    }

    sort_books(books);
    report
}

/// Case-insensitive ordering with a deterministic tie-break.
pub fn case_insensitive_cmp(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b))
}

fn compare_books(a: &Book, b: &Book) -> Ordering {
    b.new_books_available
        .cmp(&a.new_books_available)
        .then_with(|| match (&a.series, &b.series) {
            (Some(x), Some(y)) => case_insensitive_cmp(x, y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
}

/// Most new books first, then series name; books without a series last.
pub fn sort_books(books: &mut [Book]) {
    books.sort_by(compare_books);
}
