use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Grouping key for books that carry no series information.
pub const NO_SERIES: &str = "No Series";

/// One row of the owned library.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub narrator: String,
    #[serde(default)]
    pub book_url: Option<String>,
    #[serde(default)]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub series: Option<String>,
    #[serde(default)]
    pub series_url: Option<String>,
    #[serde(default)]
    pub book_number: Option<String>,
    pub scanned_at: DateTime<Utc>,
    // Populated by series reconciliation
    #[serde(default)]
    pub new_books_available: usize,
    #[serde(default)]
    pub total_in_series: usize,
    #[serde(default)]
    pub owned_in_series: usize,
    #[serde(default)]
    pub preordered_in_series: usize,
    #[serde(default)]
    pub all_series_books: Vec<CatalogEntry>,
}

impl Book {
    pub fn series_key(&self) -> &str {
        self.series.as_deref().unwrap_or(NO_SERIES)
    }
}

/// Ownership status of a catalog entry.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Owned,
    Preordered,
    PlusCatalog,
    NotOwned,
    Unavailable,
    CoveredByCompilation,
    #[default]
    Unknown,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Owned => "owned",
            Status::Preordered => "preordered",
            Status::PlusCatalog => "plus_catalog",
            Status::NotOwned => "not_owned",
            Status::Unavailable => "unavailable",
            Status::CoveredByCompilation => "covered_by_compilation",
            Status::Unknown => "unknown",
        }
    }
}

/// Inclusive span of series positions a bundle covers.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct CompilationRange {
    pub start: f64,
    pub end: f64,
}

impl CompilationRange {
    pub fn contains(&self, number: f64) -> bool {
        number >= self.start && number <= self.end
    }
}

/// One entry on a series catalog page.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub asin: String,
    pub title: String,
    pub book_number: f64,
    #[serde(default)]
    pub is_compilation: bool,
    #[serde(default)]
    pub compilation_range: Option<CompilationRange>,
    #[serde(default)]
    pub length: String,
    #[serde(default)]
    pub length_minutes: u32,
    #[serde(default)]
    pub release_date: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub narrator: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub ratings_count: u64,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub in_wishlist: bool,
    pub scanned_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    #[default]
    Full,
    Library,
    Series,
}

impl ScanType {
    pub fn walks_library(&self) -> bool {
        matches!(self, ScanType::Full | ScanType::Library)
    }

    pub fn reconciles_series(&self) -> bool {
        matches!(self, ScanType::Full | ScanType::Series)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanOptions {
    #[serde(default)]
    pub current_page_only: bool,
    #[serde(default)]
    pub scan_type: ScanType,
    #[serde(default = "default_concurrent_requests")]
    pub concurrent_requests: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            current_page_only: false,
            scan_type: ScanType::Full,
            concurrent_requests: default_concurrent_requests(),
        }
    }
}

fn default_concurrent_requests() -> usize { 5 }

/// User settings persisted in the store.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub concurrent_requests: usize,
    pub auto_scan: bool,
    pub background_scan: bool,
    pub default_sort: String,
    pub exclude_wishlisted: bool,
    pub exclude_preordered: bool,
    pub exclude_unavailable: bool,
    pub exclude_bundled: bool,
    pub hide_single_book: bool,
    pub default_view: String,
    pub show_details_by_default: bool,
    pub current_page_only: bool,
    pub scan_type: ScanType,
    pub show_ignored: bool,
    pub show_badge: bool,
    pub debug_mode: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            concurrent_requests: default_concurrent_requests(),
            auto_scan: false,
            background_scan: false,
            default_sort: "newBooks-desc".to_string(),
            exclude_wishlisted: true,
            exclude_preordered: true,
            exclude_unavailable: true,
            exclude_bundled: true,
            hide_single_book: false,
            default_view: "dashboard".to_string(),
            show_details_by_default: false,
            current_page_only: false,
            scan_type: ScanType::Full,
            show_ignored: false,
            show_badge: true,
            debug_mode: false,
        }
    }
}

impl Settings {
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            current_page_only: self.current_page_only,
            scan_type: self.scan_type,
            concurrent_requests: self.concurrent_requests.max(1),
        }
    }
}

/// View filters for the series list.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Filters {
    pub search: String,
    pub sort_by: String,
    pub max_to_buy: Option<usize>,
    pub show_all_details: bool,
    pub only_with_new: bool,
}

impl Default for Filters {
    fn default() -> Self {
        Self {
            search: String::new(),
            sort_by: "newBooks-desc".to_string(),
            max_to_buy: None,
            show_all_details: false,
            only_with_new: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanOutcomeKind {
    Complete,
    Stopped,
    Error,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanHistoryEntry {
    pub scan_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub scan_type: ScanType,
    pub total_books: usize,
    pub new_books_found: usize,
    pub series_count: usize,
    pub outcome: ScanOutcomeKind,
}

/// Everything the store keeps, in its logical layout.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct StoredData {
    pub scan_results: Vec<Book>,
    pub scan_history: Vec<ScanHistoryEntry>,
    pub last_scan_date: Option<DateTime<Utc>>,
    pub last_background_scan: Option<DateTime<Utc>>,
    pub settings: Settings,
    pub filters: Filters,
    pub ignored_series: Vec<String>,
    pub ignored_books: Vec<String>,
    pub badge_count: usize,
}

/// Partial update merged into the stored state; `None` fields are left alone.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct StoragePatch {
    pub scan_results: Option<Vec<Book>>,
    pub scan_history: Option<Vec<ScanHistoryEntry>>,
    pub last_scan_date: Option<DateTime<Utc>>,
    pub last_background_scan: Option<DateTime<Utc>>,
    pub settings: Option<Settings>,
    pub filters: Option<Filters>,
    pub ignored_series: Option<Vec<String>>,
    pub ignored_books: Option<Vec<String>>,
    pub badge_count: Option<usize>,
}
