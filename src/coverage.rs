//! Bundle coverage resolution and per-series tallies.

use crate::classifier::SeriesPage;
use crate::models::{CatalogEntry, CompilationRange, Status};
use serde::Serialize;

/// Rewrite purchasable single entries that fall inside an owned bundle.
///
/// Runs once, after every entry on the page has been classified, so each
/// decision sees the complete range set.
pub fn resolve_coverage(entries: &mut [CatalogEntry], ranges: &[CompilationRange]) -> usize {
    if ranges.is_empty() {
        return 0;
    }
    let mut covered = 0;
    for entry in entries.iter_mut() {
        if entry.is_compilation || !matches!(entry.status, Status::NotOwned | Status::PlusCatalog) {
            continue;
        }
        if ranges.iter().any(|r| r.contains(entry.book_number)) {
            log::debug!(
                "book {} ({}) covered by an owned bundle",
                entry.book_number,
                entry.title
            );
            entry.status = Status::CoveredByCompilation;
            covered += 1;
        }
    }
    covered
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesCounts {
    /// `owned` plus `covered_by_compilation`.
    pub owned: usize,
    pub preordered: usize,
    /// Truly purchasable: `not_owned` only.
    pub new_books: usize,
    pub plus_catalog: usize,
    pub unavailable: usize,
    pub unknown: usize,
    pub total: usize,
}

impl SeriesCounts {
    pub fn tally(entries: &[CatalogEntry]) -> Self {
        let mut counts = SeriesCounts {
            total: entries.len(),
            ..Default::default()
        };
        for entry in entries {
            match entry.status {
                Status::Owned | Status::CoveredByCompilation => counts.owned += 1,
                Status::Preordered => counts.preordered += 1,
                Status::NotOwned => counts.new_books += 1,
                Status::PlusCatalog => counts.plus_catalog += 1,
                Status::Unavailable => counts.unavailable += 1,
                Status::Unknown => counts.unknown += 1,
            }
        }
        counts
    }
}

/// Reconciled state of one series, as cached for the scan and written back
/// onto every book of that series.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesResult {
    pub new_books_count: usize,
    pub total_in_series: usize,
    pub owned_count: usize,
    pub preorder_count: usize,
    pub plus_catalog_count: usize,
    pub unavailable_count: usize,
    pub unknown_count: usize,
    pub all_books: Vec<CatalogEntry>,
}

impl SeriesResult {
    /// Stand-in for a series whose page could not be fetched.
    pub fn empty() -> Self {
        SeriesResult {
            new_books_count: 0,
            total_in_series: 0,
            owned_count: 0,
            preorder_count: 0,
            plus_catalog_count: 0,
            unavailable_count: 0,
            unknown_count: 0,
            all_books: Vec::new(),
        }
    }
}

/// Second pass over a classified page: resolve coverage, then count.
pub fn analyze_series(page: SeriesPage) -> SeriesResult {
    let SeriesPage { mut entries, coverage } = page;
    resolve_coverage(&mut entries, &coverage);
    let counts = SeriesCounts::tally(&entries);

    SeriesResult {
        new_books_count: counts.new_books,
        total_in_series: counts.total,
        owned_count: counts.owned,
        preorder_count: counts.preordered,
        plus_catalog_count: counts.plus_catalog,
        unavailable_count: counts.unavailable,
        unknown_count: counts.unknown,
        all_books: entries,
    }
}
