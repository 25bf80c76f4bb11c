//! Series-level view over scan results: grouping, "to buy" counting,
//! filtering, sorting, the new-books feed and the export summary.
//!
//! Groups are rebuilt from the book list on every call and never patched.
//! Nothing here writes a catalog entry's status.

use crate::models::{Book, CatalogEntry, Filters, Settings, Status, NO_SERIES};
use crate::reconcile::case_insensitive_cmp;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

pub const DEFAULT_FEED_LIMIT: usize = 12;

/// Whether a roster entry still counts as something to buy under `settings`.
pub fn counts_as_new(entry: &CatalogEntry, settings: &Settings, ignored_books: &HashSet<&str>) -> bool {
    match entry.status {
        Status::Owned => false,
        Status::CoveredByCompilation if settings.exclude_bundled => false,
        Status::Preordered if settings.exclude_preordered => false,
        Status::Unavailable if settings.exclude_unavailable => false,
        _ if !settings.show_ignored && ignored_books.contains(entry.asin.as_str()) => false,
        _ if settings.exclude_wishlisted && entry.in_wishlist => false,
        _ => true,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesGroup {
    pub name: String,
    pub books: Vec<Book>,
    pub series_url: Option<String>,
    pub cover_image: Option<String>,
    pub new_books_available: usize,
    pub total_in_series: usize,
    pub owned_in_series: usize,
    pub preordered_in_series: usize,
    pub all_series_books: Vec<CatalogEntry>,
    pub average_length_minutes: u32,
    pub total_length_minutes: u32,
    pub latest_scanned_at: Option<DateTime<Utc>>,
    /// New-book count after the exclusion settings; `None` until a roster is known.
    pub new_books_adjusted: Option<usize>,
}

impl SeriesGroup {
    fn new(name: &str, first: &Book) -> Self {
        SeriesGroup {
            name: name.to_string(),
            books: Vec::new(),
            series_url: first.series_url.clone(),
            cover_image: None,
            new_books_available: 0,
            total_in_series: 0,
            owned_in_series: 0,
            preordered_in_series: 0,
            all_series_books: Vec::new(),
            average_length_minutes: 0,
            total_length_minutes: 0,
            latest_scanned_at: None,
            new_books_adjusted: None,
        }
    }

    /// The count shown to the user: adjusted when a roster exists.
    pub fn new_count(&self) -> usize {
        self.new_books_adjusted.unwrap_or(self.new_books_available)
    }

    pub fn is_single_book(&self) -> bool {
        self.books.len() <= 1
    }

    fn take_roster(&mut self, roster: &[CatalogEntry], settings: &Settings, ignored_books: &HashSet<&str>) {
        self.all_series_books = roster.to_vec();

        let lengths: Vec<u32> = roster.iter().map(|e| e.length_minutes).filter(|m| *m > 0).collect();
        if !lengths.is_empty() {
            let total: u32 = lengths.iter().sum();
            self.total_length_minutes = total;
            self.average_length_minutes = (total as f64 / lengths.len() as f64).round() as u32;
        }

        self.new_books_adjusted = Some(
            roster
                .iter()
                .filter(|e| counts_as_new(e, settings, ignored_books))
                .count(),
        );
    }
}

/// Group books by series name in first-seen order.
///
/// Counts take the maximum over the group's books; the roster is replaced
/// wholesale whenever a longer one turns up.
pub fn group_by_series(books: &[Book], settings: &Settings, ignored_books: &[String]) -> Vec<SeriesGroup> {
    let ignored: HashSet<&str> = ignored_books.iter().map(String::as_str).collect();
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<SeriesGroup> = Vec::new();

    for book in books {
        let key = book.series_key();
        let slot = *index.entry(key).or_insert_with(|| {
            groups.push(SeriesGroup::new(key, book));
            groups.len() - 1
        });
        let group = &mut groups[slot];

        group.new_books_available = group.new_books_available.max(book.new_books_available);
        group.total_in_series = group.total_in_series.max(book.total_in_series);
        group.owned_in_series = group.owned_in_series.max(book.owned_in_series);
        group.preordered_in_series = group.preordered_in_series.max(book.preordered_in_series);

        if group.cover_image.is_none() {
            group.cover_image = book.cover_image.clone().filter(|c| !c.is_empty());
        }
        if !book.all_series_books.is_empty() && book.all_series_books.len() > group.all_series_books.len() {
            group.take_roster(&book.all_series_books, settings, &ignored);
        }
        if group.latest_scanned_at.map_or(true, |t| book.scanned_at > t) {
            group.latest_scanned_at = Some(book.scanned_at);
        }
        group.books.push(book.clone());
    }
    groups
}

fn visible_in_totals(group: &SeriesGroup, settings: &Settings, ignored_series: &HashSet<&str>, ignore_filters: bool) -> bool {
    if ignored_series.contains(group.name.as_str()) && !settings.show_ignored {
        return false;
    }
    !(settings.hide_single_book && !ignore_filters && group.is_single_book())
}

/// Total books to buy across visible series. This is the badge number.
pub fn count_new_books(books: &[Book], settings: &Settings, ignored_series: &[String], ignored_books: &[String]) -> usize {
    let ignored: HashSet<&str> = ignored_series.iter().map(String::as_str).collect();
    group_by_series(books, settings, ignored_books)
        .iter()
        .filter(|g| visible_in_totals(g, settings, &ignored, false))
        .map(SeriesGroup::new_count)
        .sum()
}

/// Number of visible series; `ignore_filters` counts single-book series too.
pub fn count_series(groups: &[SeriesGroup], settings: &Settings, ignored_series: &[String], ignore_filters: bool) -> usize {
    let ignored: HashSet<&str> = ignored_series.iter().map(String::as_str).collect();
    groups
        .iter()
        .filter(|g| visible_in_totals(g, settings, &ignored, ignore_filters))
        .count()
}

fn matches_search(group: &SeriesGroup, needle: &str) -> bool {
    group.name.to_lowercase().contains(needle)
        || group.books.iter().any(|b| {
            b.title.to_lowercase().contains(needle) || b.author.to_lowercase().contains(needle)
        })
}

pub fn filter_series(
    groups: Vec<SeriesGroup>,
    filters: &Filters,
    settings: &Settings,
    ignored_series: &[String],
) -> Vec<SeriesGroup> {
    let ignored: HashSet<&str> = ignored_series.iter().map(String::as_str).collect();
    let needle = filters.search.trim().to_lowercase();

    groups
        .into_iter()
        .filter(|g| {
            if ignored.contains(g.name.as_str()) && !settings.show_ignored {
                return false;
            }
            if filters.only_with_new && g.new_count() == 0 {
                return false;
            }
            if !needle.is_empty() && !matches_search(g, &needle) {
                return false;
            }
            if settings.hide_single_book && g.is_single_book() {
                return false;
            }
            filters.max_to_buy.map_or(true, |max| g.new_count() <= max)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    NewBooks,
    Alphabetical,
    ReleaseDate,
    BookLength,
    Owned,
}

/// Parse `field-direction`, e.g. `newBooks-desc`. Unknown fields fall back
/// to the default order.
pub fn parse_sort(sort_by: &str) -> (SortField, bool) {
    let (field, dir) = sort_by.split_once('-').unwrap_or((sort_by, "desc"));
    let field = match field {
        "alphabetical" => SortField::Alphabetical,
        "releaseDate" => SortField::ReleaseDate,
        "bookLength" => SortField::BookLength,
        "owned" => SortField::Owned,
        _ => SortField::NewBooks,
    };
    (field, dir == "asc")
}

fn compare_groups(a: &SeriesGroup, b: &SeriesGroup, field: SortField, ascending: bool) -> Ordering {
    match (a.name == NO_SERIES, b.name == NO_SERIES) {
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        _ => {}
    }

    let by_name = || case_insensitive_cmp(&a.name, &b.name);
    let result = match field {
        SortField::NewBooks => match b.new_count().cmp(&a.new_count()) {
            Ordering::Equal => return by_name(),
            other => other,
        },
        SortField::Owned => match b.books.len().cmp(&a.books.len()) {
            Ordering::Equal => return by_name(),
            other => other,
        },
        // Names read A to Z when ascending
        SortField::Alphabetical => by_name().reverse(),
        SortField::ReleaseDate => b.latest_scanned_at.cmp(&a.latest_scanned_at),
        SortField::BookLength => b.average_length_minutes.cmp(&a.average_length_minutes),
    };
    if ascending {
        result.reverse()
    } else {
        result
    }
}

/// Sort for display. "No Series" always goes last, and ties on the
/// new-book or owned counts break by name ascending in either direction.
pub fn sort_series(groups: &mut [SeriesGroup], sort_by: &str) {
    let (field, ascending) = parse_sort(sort_by);
    groups.sort_by(|a, b| compare_groups(a, b, field, ascending));
}

/// Grouped, filtered and sorted view of the stored results.
pub fn series_view(
    books: &[Book],
    filters: &Filters,
    settings: &Settings,
    ignored_series: &[String],
    ignored_books: &[String],
) -> Vec<SeriesGroup> {
    let groups = group_by_series(books, settings, ignored_books);
    let mut visible = filter_series(groups, filters, settings, ignored_series);
    sort_series(&mut visible, &filters.sort_by);
    visible
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBook {
    #[serde(flatten)]
    pub entry: CatalogEntry,
    pub series_name: String,
    pub series_url: Option<String>,
    pub series_cover_image: Option<String>,
}

fn release_date(entry: &CatalogEntry) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(entry.release_date.trim(), "%m-%d-%Y").ok()
}

/// Dashboard feed: purchasable entries of visible series, newest first.
pub fn new_books_feed(
    books: &[Book],
    settings: &Settings,
    ignored_series: &[String],
    ignored_books: &[String],
    limit: usize,
) -> Vec<NewBook> {
    let ignored_series: HashSet<&str> = ignored_series.iter().map(String::as_str).collect();
    let ignored: HashSet<&str> = ignored_books.iter().map(String::as_str).collect();

    let mut feed: Vec<NewBook> = group_by_series(books, settings, ignored_books)
        .into_iter()
        .filter(|g| visible_in_totals(g, settings, &ignored_series, false))
        .flat_map(|g| {
            let SeriesGroup {
                name,
                series_url,
                cover_image,
                all_series_books,
                ..
            } = g;
            all_series_books
                .into_iter()
                .filter(|e| counts_as_new(e, settings, &ignored))
                .map(move |entry| NewBook {
                    entry,
                    series_name: name.clone(),
                    series_url: series_url.clone(),
                    series_cover_image: cover_image.clone(),
                })
                .collect::<Vec<_>>()
        })
        .collect();

    feed.sort_by(|a, b| {
        b.entry
            .scanned_at
            .cmp(&a.entry.scanned_at)
            .then_with(|| release_date(&b.entry).cmp(&release_date(&a.entry)))
    });
    feed.truncate(limit);
    feed
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnedBookSummary {
    pub title: String,
    pub author: String,
    pub narrator: String,
    pub book_number: Option<String>,
    pub book_url: Option<String>,
    pub cover_image: Option<String>,
    pub scanned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesExport {
    pub series_name: String,
    pub series_url: Option<String>,
    pub cover_image: Option<String>,
    pub total_in_series: usize,
    pub owned_count: usize,
    pub preordered_count: usize,
    pub new_books_available: usize,
    pub average_length_minutes: u32,
    pub total_length_minutes: u32,
    pub all_series_books: Vec<CatalogEntry>,
    pub owned_books: Vec<OwnedBookSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub export_date: DateTime<Utc>,
    pub total_books: usize,
    pub series: Vec<SeriesExport>,
    pub books: Vec<Book>,
}

/// Full library export: one summary per series plus the raw books.
pub fn export_library(books: &[Book], settings: &Settings) -> ExportDocument {
    let series = group_by_series(books, settings, &[])
        .into_iter()
        .map(|g| SeriesExport {
            owned_books: g
                .books
                .iter()
                .map(|b| OwnedBookSummary {
                    title: b.title.clone(),
                    author: b.author.clone(),
                    narrator: b.narrator.clone(),
                    book_number: b.book_number.clone(),
                    book_url: b.book_url.clone(),
                    cover_image: b.cover_image.clone(),
                    scanned_at: b.scanned_at,
                })
                .collect(),
            series_name: g.name,
            series_url: g.series_url,
            cover_image: g.cover_image,
            total_in_series: g.total_in_series,
            owned_count: g.owned_in_series,
            preordered_count: g.preordered_in_series,
            new_books_available: g.new_books_available,
            average_length_minutes: g.average_length_minutes,
            total_length_minutes: g.total_length_minutes,
            all_series_books: g.all_series_books,
        })
        .collect();

    ExportDocument {
        export_date: Utc::now(),
        total_books: books.len(),
        series,
        books: books.to_vec(),
    }
}
