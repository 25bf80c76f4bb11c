//! Series catalog page parsing and ownership classification.
//!
//! Classification is a small decision table: buy-box widget rules are tried
//! in order, then literal text phrases, and an "unavailable" signal always
//! overrides whatever the commerce widgets said.

use crate::dom::DomNode;
use crate::models::{CatalogEntry, CompilationRange, Status};
use chrono::Utc;
use regex::Regex;
use std::sync::LazyLock;

pub const CATALOG_ITEM_SELECTOR: &str = ".productListItem, li[id^=\"product-list-item-\"]";
pub const ITEM_ID_PREFIX: &str = "product-list-item-";

/// A buy-box widget whose visible presence decides the status.
pub struct WidgetRule {
    pub status: Status,
    pub selector: &'static str,
}

pub const WIDGET_RULES: &[WidgetRule] = &[
    WidgetRule {
        status: Status::Owned,
        selector: ".adblBuyBoxInLibraryButton, [class*=\"InLibraryButton\"]",
    },
    WidgetRule {
        status: Status::Preordered,
        selector: ".adblBuyBoxPreorderButton, [class*=\"PreorderButton\"]",
    },
    WidgetRule {
        status: Status::PlusCatalog,
        selector: ".adblAddToLibrary, [class*=\"AddToLibrary\"]",
    },
    WidgetRule {
        status: Status::NotOwned,
        selector: ".adblAddToCartButton, .adblAddToCartText, [class*=\"AddToCartButton\"]",
    },
];

pub const TEXT_RULES: &[(&str, Status)] = &[
    ("In your Library", Status::Owned),
    ("In your Pre-orders", Status::Preordered),
    ("Add to Library", Status::PlusCatalog),
    ("Add to library", Status::PlusCatalog),
    ("Add to cart", Status::NotOwned),
];

const GO_TO_WISHLIST_SELECTOR: &str = ".adblGoToWishlistButton, [class*=\"GoToWishlistButton\"]";
const ERROR_BOX_SELECTOR: &str = ".adblErrorBuyBox, [class*=\"ErrorBuyBox\"]";
const UNAVAILABLE_COVER_SELECTOR: &str = "img[src*=\"prod-unavailable\"]";

static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Books?\s+(\d+(?:\.\d+)?)\s*[-–—]\s*(\d+(?:\.\d+)?)").expect("valid regex")
});
static HEADING_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Book\s+(\d+(?:\.\d+)?)").expect("valid regex"));
static HOURS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*hrs?").expect("valid regex"));
static MINUTES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*mins?").expect("valid regex"));
static RATING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([\d.]+)\s*out of 5").expect("valid regex"));
static RATINGS_COUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([\d,]+)\s*ratings?").expect("valid regex"));

/// Observations about one catalog entry, gathered from its markup.
#[derive(Debug, Clone, Default)]
pub struct Signals {
    /// Visible widgets, indexed like `WIDGET_RULES`.
    pub visible_widgets: [bool; 4],
    pub text: String,
    pub unavailable: bool,
}

/// Apply the decision table. First matching rule wins; unavailable overrides.
pub fn decide(signals: &Signals) -> Status {
    let primary = WIDGET_RULES
        .iter()
        .zip(signals.visible_widgets.iter())
        .find(|(_, visible)| **visible)
        .map(|(rule, _)| rule.status)
        .or_else(|| {
            TEXT_RULES
                .iter()
                .find(|(phrase, _)| signals.text.contains(phrase))
                .map(|(_, status)| *status)
        })
        .unwrap_or(Status::Unknown);

    if signals.unavailable {
        Status::Unavailable
    } else {
        primary
    }
}

fn widget_visible<N: DomNode>(item: &N, selector: &str) -> bool {
    item.select_first(selector).map(|w| w.is_visible()).unwrap_or(false)
}

/// Region-locked titles show an error buy box or a placeholder cover.
pub fn is_unavailable<N: DomNode>(item: &N) -> bool {
    let error_box = item
        .select_first(ERROR_BOX_SELECTOR)
        .map(|b| b.text().contains("Not Available"))
        .unwrap_or(false);
    error_box || item.select_first(UNAVAILABLE_COVER_SELECTOR).is_some()
}

pub fn gather_signals<N: DomNode>(item: &N) -> Signals {
    let mut visible_widgets = [false; 4];
    for (slot, rule) in visible_widgets.iter_mut().zip(WIDGET_RULES) {
        *slot = widget_visible(item, rule.selector);
    }
    Signals {
        visible_widgets,
        text: item.text(),
        unavailable: is_unavailable(item),
    }
}

pub fn classify_status<N: DomNode>(item: &N) -> Status {
    decide(&gather_signals(item))
}

/// "Go to wishlist" is only visible while the title is wishlisted.
pub fn in_wishlist<N: DomNode>(item: &N) -> bool {
    widget_visible(item, GO_TO_WISHLIST_SELECTOR)
}

/// `Books 1-3`, `Book 1 – 5`, `Books 1-3.5`.
pub fn parse_book_range(text: &str) -> Option<CompilationRange> {
    let caps = RANGE_RE.captures(text)?;
    let start = caps[1].parse::<f64>().ok()?;
    let end = caps[2].parse::<f64>().ok()?;
    Some(CompilationRange { start, end })
}

/// `48 hrs and 7 mins` -> 2887.
pub fn parse_length_to_minutes(length: &str) -> u32 {
    let hours = HOURS_RE
        .captures(length)
        .and_then(|c| c[1].parse::<u32>().ok())
        .unwrap_or(0);
    let minutes = MINUTES_RE
        .captures(length)
        .and_then(|c| c[1].parse::<u32>().ok())
        .unwrap_or(0);
    hours * 60 + minutes
}

fn label_value<N: DomNode>(item: &N, selector: &str, prefix: &str) -> String {
    item.select_first(selector)
        .map(|s| s.text().replace(prefix, "").trim().to_string())
        .unwrap_or_default()
}

fn label_contributor<N: DomNode>(item: &N, selector: &str, prefix: &str) -> String {
    match item.select_first(selector) {
        Some(label) => match label.select_first("a") {
            Some(a) => a.trimmed_text(),
            None => label.text().replace(prefix, "").trim().to_string(),
        },
        None => String::new(),
    }
}

fn rating<N: DomNode>(item: &N) -> f64 {
    item.select_first(".bc-review-stars[aria-label], [aria-label*=\"out of 5 stars\"]")
        .and_then(|el| el.attr("aria-label"))
        .and_then(|label| RATING_RE.captures(&label).and_then(|c| c[1].parse::<f64>().ok()))
        .unwrap_or(0.0)
}

fn ratings_count<N: DomNode>(item: &N) -> u64 {
    item.select_first("li.ratingsLabel, .ratingsLabel")
        .and_then(|el| {
            let text = el.text();
            RATINGS_COUNT_RE
                .captures(&text)
                .and_then(|c| c[1].replace(',', "").parse::<u64>().ok())
        })
        .unwrap_or(0)
}

/// Parse one catalog item. `position` is its 1-based place on the page and
/// stands in for the book number when the heading has none.
pub fn classify_entry<N: DomNode>(item: &N, position: usize) -> CatalogEntry {
    let asin = item
        .attr("id")
        .map(|id| id.replace(ITEM_ID_PREFIX, ""))
        .unwrap_or_default();
    let title = item
        .attr("aria-label")
        .filter(|t| !t.trim().is_empty())
        .or_else(|| item.find_first(&["h3.bc-heading a", "h3 a"]).map(|a| a.trimmed_text()))
        .unwrap_or_default();

    let book_number = item
        .select_first("h2.bc-heading")
        .and_then(|h| {
            let text = h.text();
            HEADING_NUMBER_RE
                .captures(&text)
                .and_then(|c| c[1].parse::<f64>().ok())
        })
        .unwrap_or(position as f64);

    let compilation_range = parse_book_range(&title).or_else(|| parse_book_range(&item.text()));

    let length = label_value(item, ".runtimeLabel span, li.runtimeLabel span", "Length:");
    let length_minutes = parse_length_to_minutes(&length);

    CatalogEntry {
        asin,
        title,
        book_number,
        is_compilation: compilation_range.is_some(),
        compilation_range,
        length,
        length_minutes,
        release_date: label_value(item, ".releaseDateLabel span, li.releaseDateLabel span", "Release date:"),
        author: label_contributor(item, "li.authorLabel span, .authorLabel span", "By:"),
        narrator: label_contributor(item, "li.narratorLabel span, .narratorLabel span", "Narrated by:"),
        language: label_value(item, "li.languageLabel span, .languageLabel span", "Language:"),
        rating: rating(item),
        ratings_count: ratings_count(item),
        status: classify_status(item),
        in_wishlist: in_wishlist(item),
        scanned_at: Utc::now(),
    }
}

/// A fully classified series page, before coverage resolution.
#[derive(Debug, Clone, Default)]
pub struct SeriesPage {
    pub entries: Vec<CatalogEntry>,
    /// Ranges of bundles that are owned or preordered.
    pub coverage: Vec<CompilationRange>,
}

/// First pass over a series page: classify every entry and collect the
/// ranges of owned/preordered bundles.
pub fn parse_series_page<N: DomNode>(root: &N) -> SeriesPage {
    let items = root.select_all(CATALOG_ITEM_SELECTOR);
    log::debug!("found {} entries on series page", items.len());

    let mut page = SeriesPage::default();
    for (index, item) in items.iter().enumerate() {
        let entry = classify_entry(item, index + 1);
        if let (Some(range), Status::Owned | Status::Preordered) = (entry.compilation_range, entry.status) {
            log::debug!(
                "{} bundle {:?} covers books {}-{}",
                entry.status.as_str(),
                entry.title,
                range.start,
                range.end
            );
            page.coverage.push(range);
        }
        page.entries.push(entry);
    }
    page
}
