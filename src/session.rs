//! Scan orchestration.
//!
//! A `ScanSession` is the owned state of one scan (its book set and series
//! cache). `Scanner` is the long-lived front: it holds the collaborators,
//! refuses to start a second session while one is active, and publishes the
//! shared `ScanStatus`.

use crate::aggregate::count_new_books;
use crate::config::ScanConfig;
use crate::error::{ScanError, StorageError};
use crate::extractor::is_listing_page;
use crate::http_client::PageFetcher;
use crate::messages::{EventSink, ScanEvent, ScanProgress, ScanSummary};
use crate::models::{Book, ScanHistoryEntry, ScanOptions, ScanOutcomeKind, StoragePatch, StoredData};
use crate::pagination::{wait_for_listing, walk, BookSet};
use crate::reconcile::{reconcile, SeriesCache};
use crate::scheduler::background_scan_due;
use crate::store::Store;
use chrono::{DateTime, Duration, Utc};
use reqwest::Url;
use scraper::Html;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

pub const HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    #[default]
    Idle,
    Scanning,
    Complete,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStatus {
    pub state: ScanState,
    pub is_scanning: bool,
    pub is_background_scan: bool,
    pub books_found: usize,
    pub current_page: u32,
    pub total_pages: Option<u32>,
    pub last_error: Option<String>,
}

pub type SharedStatus = Arc<Mutex<ScanStatus>>;

fn lock_status(status: &SharedStatus) -> MutexGuard<'_, ScanStatus> {
    status.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cooperative stop signal, checked at page and batch boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything the walker and the reconciler need from the running scan.
pub struct ScanContext<'a, F> {
    pub fetcher: &'a F,
    pub config: &'a ScanConfig,
    pub cancel: &'a CancelFlag,
    pub events: &'a EventSink,
    pub status: &'a SharedStatus,
    pub is_background: bool,
}

impl<F> ScanContext<'_, F> {
    fn emit_progress(&self, current_page: Option<u32>, total_pages: Option<u32>, status: Option<String>) {
        self.events.emit(ScanEvent::ScanProgress(ScanProgress {
            current_page,
            total_pages,
            status,
            is_background_scan: self.is_background,
        }));
    }

    pub fn page_progress(&self, current: u32, total: Option<u32>) {
        {
            let mut s = lock_status(self.status);
            s.current_page = current;
            s.total_pages = total;
        }
        let text = self.is_background.then(|| match total {
            Some(t) => format!("Background scan: page {}/{}...", current, t),
            None => format!("Background scan: page {}...", current),
        });
        self.emit_progress(Some(current), total, text);
    }

    pub fn status_progress(&self, text: String) {
        self.emit_progress(None, None, Some(text));
    }

    pub fn set_books_found(&self, count: usize) {
        lock_status(self.status).books_found = count;
    }
}

/// Where the first listing document comes from.
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ListingSource {
    /// Already loaded by the caller.
    Document { url: Option<String>, html: String },
    /// Load it, waiting for listing rows to appear.
    Fetch { url: String },
}

#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub options: ScanOptions,
    pub listing: ListingSource,
    pub background: bool,
}

/// State owned by one scan from start to terminal outcome.
#[derive(Debug)]
pub struct ScanSession {
    pub id: Uuid,
    pub request: ScanRequest,
    pub started_at: DateTime<Utc>,
    state: ScanState,
    books: BookSet,
    cache: SeriesCache,
}

impl ScanSession {
    fn new(request: ScanRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            started_at: Utc::now(),
            state: ScanState::Scanning,
            books: BookSet::default(),
            cache: SeriesCache::new(),
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanOutcome {
    pub scan_id: String,
    pub kind: ScanOutcomeKind,
    pub summary: Option<ScanSummary>,
    pub error: Option<String>,
    pub storage_error: Option<String>,
}

/// Number of distinct series values, with "no series" counted once.
pub fn count_distinct_series(books: &[Book]) -> usize {
    books.iter().map(|b| b.series.as_deref()).collect::<HashSet<_>>().len()
}

pub struct Scanner<F, S> {
    fetcher: F,
    store: S,
    config: ScanConfig,
    library_url: String,
    events: EventSink,
    status: SharedStatus,
    cancel: CancelFlag,
}

impl<F: PageFetcher, S: Store> Scanner<F, S> {
    pub fn new(fetcher: F, store: S, config: ScanConfig, library_url: String, events: EventSink) -> Self {
        Self {
            fetcher,
            store,
            config,
            library_url,
            events,
            status: Arc::new(Mutex::new(ScanStatus::default())),
            cancel: CancelFlag::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn status(&self) -> ScanStatus {
        lock_status(&self.status).clone()
    }

    pub fn shared_status(&self) -> SharedStatus {
        Arc::clone(&self.status)
    }

    pub fn is_scanning(&self) -> bool {
        lock_status(&self.status).is_scanning
    }

    /// Request a stop; the running scan notices at its next boundary.
    pub fn stop(&self) {
        if self.is_scanning() {
            log::info!("Stop requested");
        }
        self.cancel.cancel();
    }

    pub fn default_listing(&self) -> ListingSource {
        ListingSource::Fetch {
            url: self.library_url.clone(),
        }
    }

    /// A background scan request if one should run now. `force` skips the
    /// enabled/interval checks.
    pub fn background_request(&self, force: bool) -> Result<Option<ScanRequest>, StorageError> {
        let data = self.store.load()?;
        if !force {
            if !data.settings.background_scan {
                log::debug!("Background scan: disabled in settings");
                return Ok(None);
            }
            let interval = Duration::hours(self.config.background_interval_hours);
            if !background_scan_due(data.last_background_scan, Utc::now(), interval) {
                log::debug!("Background scan: not due yet, skipping");
                return Ok(None);
            }
        }
        Ok(Some(ScanRequest {
            options: ScanOptions {
                current_page_only: false,
                ..data.settings.scan_options()
            },
            listing: self.default_listing(),
            background: true,
        }))
    }

    /// Reserve the scanner for a new session. `None` while a scan is active.
    pub fn begin(&self, request: ScanRequest) -> Option<ScanSession> {
        let mut status = lock_status(&self.status);
        if status.is_scanning {
            return None;
        }
        *status = ScanStatus {
            state: ScanState::Scanning,
            is_scanning: true,
            is_background_scan: request.background,
            ..Default::default()
        };
        self.cancel.reset();
        Some(ScanSession::new(request))
    }

    /// Start and run to completion. `None` if another scan is active.
    pub async fn scan(&self, request: ScanRequest) -> Option<ScanOutcome> {
        let session = self.begin(request)?;
        Some(self.run(session).await)
    }

    fn context(&self, background: bool) -> ScanContext<'_, F> {
        ScanContext {
            fetcher: &self.fetcher,
            config: &self.config,
            cancel: &self.cancel,
            events: &self.events,
            status: &self.status,
            is_background: background,
        }
    }

    /// Drive a reserved session to a terminal state. Always settles the
    /// shared status and always reports the outcome.
    pub async fn run(&self, mut session: ScanSession) -> ScanOutcome {
        let background = session.request.background;
        log::info!(
            "Starting {:?} scan {} (background: {})",
            session.request.options.scan_type,
            session.id,
            background
        );
        self.events.emit(ScanEvent::ScanStarted);

        let result = self.execute(&mut session).await;
        let outcome = match result {
            Ok(baseline) => self.finish(&mut session, baseline),
            Err(e) => self.fail(&mut session, e),
        };

        self.events.emit(ScanEvent::ScanEnded);
        outcome
    }

    /// Load, walk, reconcile. Returns the stored baseline for the finish step.
    async fn execute(&self, session: &mut ScanSession) -> Result<Baseline, ScanError> {
        let ctx = self.context(session.request.background);
        let options = session.request.options.clone();

        ctx.emit_progress(Some(0), None, Some("Loading existing data...".into()));
        let stored = match self.store.load() {
            Ok(data) => data,
            Err(e) => {
                log::warn!("Failed to load existing data: {}", e);
                StoredData::default()
            }
        };
        log::debug!("Loaded {} existing books from storage", stored.scan_results.len());
        session.books = BookSet::seeded(stored.scan_results.clone());
        session.cache.clear();
        ctx.set_books_found(session.books.len());
        let books_before = session.books.len();

        ctx.emit_progress(Some(0), None, Some("Initializing scan...".into()));

        if options.scan_type.walks_library() {
            let (url, html) = match &session.request.listing {
                ListingSource::Document { url, html } => (url.clone(), html.clone()),
                ListingSource::Fetch { url } => (Some(url.clone()), wait_for_listing(&ctx, url).await),
            };
            let page_url = url.as_deref().and_then(|u| Url::parse(u).ok());

            let recognized = {
                let doc = Html::parse_document(&html);
                is_listing_page(&doc.root_element(), page_url.as_ref())
            };
            if !recognized {
                return Err(ScanError::NotOnListingPage);
            }

            let report = walk(&ctx, &html, page_url.as_ref(), options.current_page_only, &mut session.books).await;
            log::info!(
                "Library scan complete. Found {} new books ({} pages fetched, {} failed)",
                report.books_added,
                report.pages_fetched,
                report.pages_failed
            );
        } else {
            log::debug!("Skipping library scan (series-only mode)");
        }
        let new_books_found = session.books.len() - books_before;

        if options.scan_type.reconciles_series() && !self.cancel.is_cancelled() {
            if session.books.is_empty() {
                log::debug!("No books in library to scan series for");
            } else {
                let report = reconcile(
                    &ctx,
                    session.books.books_mut(),
                    &mut session.cache,
                    options.concurrent_requests,
                )
                .await;
                log::info!(
                    "Series scan finished: {} fetched, {} cached, {} failed of {}",
                    report.fetched,
                    report.from_cache,
                    report.failed,
                    report.series_total
                );
            }
        }

        Ok(Baseline {
            stored,
            new_books_found,
        })
    }

    fn finish(&self, session: &mut ScanSession, baseline: Baseline) -> ScanOutcome {
        let Baseline { stored, new_books_found } = baseline;
        let stopped = self.cancel.is_cancelled();
        let kind = if stopped {
            ScanOutcomeKind::Stopped
        } else {
            ScanOutcomeKind::Complete
        };

        let books = std::mem::take(&mut session.books).into_books();
        let series_count = count_distinct_series(&books);
        let badge_count = count_new_books(&books, &stored.settings, &stored.ignored_series, &stored.ignored_books);
        let finished_at = Utc::now();

        let mut history = stored.scan_history;
        history.push(ScanHistoryEntry {
            scan_id: session.id.to_string(),
            started_at: session.started_at,
            finished_at,
            scan_type: session.request.options.scan_type,
            total_books: books.len(),
            new_books_found,
            series_count,
            outcome: kind,
        });
        if history.len() > HISTORY_LIMIT {
            let excess = history.len() - HISTORY_LIMIT;
            history.drain(..excess);
        }

        let patch = StoragePatch {
            scan_results: Some(books.clone()),
            scan_history: Some(history),
            last_scan_date: Some(finished_at),
            last_background_scan: session.request.background.then_some(finished_at),
            badge_count: Some(badge_count),
            ..Default::default()
        };
        let storage_error = match self.store.save(patch) {
            Ok(()) => None,
            Err(e) => {
                log::error!("Failed to persist scan results: {}", e);
                Some(e.to_string())
            }
        };

        self.events.emit(ScanEvent::UpdateBadge { count: badge_count });

        let summary = ScanSummary {
            total_books: books.len(),
            new_books_found,
            series_count,
            all_results: books,
        };
        self.events.emit(ScanEvent::ScanComplete(summary.clone()));

        session.state = if stopped { ScanState::Idle } else { ScanState::Complete };
        {
            let mut status = lock_status(&self.status);
            status.state = session.state;
            status.is_scanning = false;
            status.is_background_scan = false;
            status.books_found = summary.total_books;
        }
        log::info!(
            "Scan {} {:?}: {} books, {} new, {} series",
            session.id,
            kind,
            summary.total_books,
            summary.new_books_found,
            summary.series_count
        );

        ScanOutcome {
            scan_id: session.id.to_string(),
            kind,
            summary: Some(summary),
            error: None,
            storage_error,
        }
    }

    fn fail(&self, session: &mut ScanSession, error: ScanError) -> ScanOutcome {
        let message = error.to_string();
        log::error!("Scan error: {}", message);
        self.events.emit(ScanEvent::ScanError {
            message: message.clone(),
        });

        session.state = ScanState::Error;
        {
            let mut status = lock_status(&self.status);
            status.state = ScanState::Error;
            status.is_scanning = false;
            status.is_background_scan = false;
            status.last_error = Some(message.clone());
        }

        ScanOutcome {
            scan_id: session.id.to_string(),
            kind: ScanOutcomeKind::Error,
            summary: None,
            error: Some(message),
            storage_error: None,
        }
    }
}

struct Baseline {
    stored: StoredData,
    new_books_found: usize,
}
