use crate::dom::{link_target, DomNode};
use crate::error::ExtractionError;
use crate::models::Book;
use chrono::Utc;
use regex::Regex;
use reqwest::Url;
use std::sync::LazyLock;

pub const ROW_ID_PREFIX: &str = "adbl-library-content-row-";

const PRIMARY_ROW_SELECTOR: &str = ".adbl-library-content-row";

const FALLBACK_ROW_SELECTORS: &[&str] = &[
    "[id^=\"adbl-library-content-row-\"]",
    "[data-test-id=\"library-book\"]",
    ".library-item",
    ".adbl-library-item",
];

const TITLE_SELECTORS: &[&str] = &[
    ".bc-size-headline3",
    "span.bc-size-headline3",
    "li a span.bc-size-headline3",
    "h1.bc-heading a",
    "h2.bc-heading a",
    "h3.bc-heading a",
];

const LISTING_MARKER_SELECTORS: &[&str] = &[
    "[data-test-id=\"library-book\"]",
    ".adbl-library-content-row",
    ".bc-list-item",
    ".library-item",
    ".adbl-library-item",
    ".bc-row-responsive",
    ".productListItem",
    "[class*=\"library\"]",
    "[class*=\"Library\"]",
];

const COVER_SELECTOR: &str =
    "img.bc-pub-block, img.bc-image-inset-border, img[src*=\"media-amazon.com\"]";

static AUTHOR_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^By:\s*").expect("valid regex"));
static NARRATOR_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^Narrated by:\s*").expect("valid regex"));

// Priority order matters: the first pattern that matches wins.
static BOOK_NUMBER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)Book\s+(\d+(?:\.\d+)?)",
        r"#\s*(\d+)",
        r"(?i)Volume\s+(\d+)",
        r"(?i)Part\s+(\d+)",
        r"(?i)(\d+)(?:st|nd|rd|th)?\s+book",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesInfo {
    pub name: Option<String>,
    pub number: Option<String>,
    pub url: Option<String>,
}

/// Series position from free text: `Book 5`, `#5`, `Volume 5`, `Part 5`, `5th book`.
pub fn parse_book_number(text: &str) -> Option<String> {
    BOOK_NUMBER_PATTERNS
        .iter()
        .find_map(|re| re.captures(text).map(|c| c[1].to_string()))
}

/// Identity key for a listing row.
pub fn book_identity(element_id: Option<&str>, title: &str, author: &str) -> String {
    if let Some(id) = element_id.and_then(|id| id.strip_prefix(ROW_ID_PREFIX)) {
        return id.to_string();
    }
    format!("{}-{}", title, author)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// Author or narrator: nested link text, else the label text without its prefix.
fn contributor<N: DomNode>(element: &N, selector: &str, prefix: &Regex) -> String {
    let Some(label) = element.select_first(selector) else {
        return String::new();
    };
    let link = label
        .select_first("a")
        .or_else(|| (label.tag_name() == "a").then_some(label));
    match link {
        Some(a) => a.trimmed_text(),
        None => prefix.replace(label.trimmed_text().as_str(), "").trim().to_string(),
    }
}

pub fn extract_series_info<N: DomNode>(element: &N, base: Option<&Url>) -> SeriesInfo {
    let Some(label) = element.select_first(".seriesLabel, li.seriesLabel") else {
        return SeriesInfo::default();
    };
    let Some(link) = label.select_first("a[href*=\"/series/\"]") else {
        log::debug!("series label without a series link");
        return SeriesInfo::default();
    };

    let name = link.trimmed_text();
    let url = link_target(&link, base);

    let number = parse_book_number(&label.text()).or_else(|| {
        element
            .select_first(".bc-size-headline3")
            .and_then(|t| parse_book_number(&t.text()))
    });

    SeriesInfo {
        name: Some(name),
        number,
        url,
    }
}

/// Turn one listing row into a `Book`.
pub fn extract_book<N: DomNode>(element: &N, base: Option<&Url>) -> Result<Book, ExtractionError> {
    let mut title = String::new();
    let mut book_url = None;
    for selector in TITLE_SELECTORS {
        if let Some(t) = element.select_first(selector) {
            let text = t.trimmed_text();
            if text.is_empty() {
                continue;
            }
            title = text;
            book_url = t
                .closest("a")
                .or_else(|| element.select_first("a[href*=\"/pd/\"]"))
                .and_then(|a| link_target(&a, base));
            break;
        }
    }
    if title.is_empty() {
        return Err(ExtractionError::MissingTitle);
    }

    let author = contributor(element, ".authorLabel a, .authorLabel", &AUTHOR_PREFIX);
    let narrator = contributor(element, ".narratorLabel a, .narratorLabel", &NARRATOR_PREFIX);
    let series = extract_series_info(element, base);

    let element_id = element.attr("id");
    let id = book_identity(element_id.as_deref(), &title, &author);

    let cover_image = element
        .select_first(COVER_SELECTOR)
        .and_then(|img| img.attr("src"))
        .filter(|src| !src.is_empty());

    Ok(Book {
        id,
        title,
        author,
        narrator,
        book_url,
        cover_image,
        series: series.name,
        series_url: series.url,
        book_number: series.number,
        scanned_at: Utc::now(),
        new_books_available: 0,
        total_in_series: 0,
        owned_in_series: 0,
        preordered_in_series: 0,
        all_series_books: Vec::new(),
    })
}

/// Listing rows of a page: the primary selector, else the first fallback with hits.
pub fn listing_rows<N: DomNode>(root: &N) -> Vec<N> {
    let rows = root.select_all(PRIMARY_ROW_SELECTOR);
    if !rows.is_empty() {
        return rows;
    }
    FALLBACK_ROW_SELECTORS
        .iter()
        .map(|sel| root.select_all(sel))
        .find(|rows| !rows.is_empty())
        .unwrap_or_default()
}

/// Extract every book on a listing page, skipping rows that cannot be parsed.
pub fn extract_books<N: DomNode>(root: &N, base: Option<&Url>) -> Vec<Book> {
    let rows = listing_rows(root);
    log::debug!("found {} listing rows", rows.len());

    let mut books = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        match extract_book(row, base) {
            Ok(book) => books.push(book),
            Err(e) => log::warn!("skipping listing row {}: {}", index + 1, e),
        }
    }
    books
}

/// Whether the document looks like the library listing.
pub fn is_listing_page<N: DomNode>(root: &N, url: Option<&Url>) -> bool {
    let url_check = url
        .map(|u| {
            let s = u.as_str();
            u.path().contains("/library") || s.contains("/lib/") || s.contains("library")
        })
        .unwrap_or(false);
    if url_check {
        return true;
    }

    if LISTING_MARKER_SELECTORS
        .iter()
        .any(|sel| root.select_first(sel).is_some())
    {
        return true;
    }

    let body_text = root.select_first("body").map(|b| b.text()).unwrap_or_default();
    let page_title = root
        .select_first("title")
        .map(|t| t.text().to_lowercase())
        .unwrap_or_default();
    body_text.contains("My Library") || body_text.contains("Your Library") || page_title.contains("library")
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    const ROW: &str = r#"<html><body><div class="adbl-library-content-row" id="adbl-library-content-row-B0001">
        <ul>
          <li><a href="/pd/Leviathan-Wakes/B0001"><span class="bc-text bc-size-headline3">Leviathan Wakes</span></a></li>
          <li class="authorLabel"><span>By: </span><a href="/author/James">James S. A. Corey</a></li>
          <li class="narratorLabel"><span>Narrated by: Jefferson Mays</span></li>
          <li class="seriesLabel"><span>Series: </span><a href="/series/The-Expanse/B00X">The Expanse</a>, <span>Book 1</span></li>
        </ul>
        <img class="bc-pub-block" src="https://m.media-amazon.com/images/I/cover.jpg">
    </div></body></html>"#;

    #[test]
    fn book_number_patterns_in_priority_order() {
        assert_eq!(parse_book_number("Book 5").as_deref(), Some("5"));
        assert_eq!(parse_book_number("Book 3.5, #7").as_deref(), Some("3.5"));
        assert_eq!(parse_book_number("Series #12").as_deref(), Some("12"));
        assert_eq!(parse_book_number("Volume 4").as_deref(), Some("4"));
        assert_eq!(parse_book_number("Part 2").as_deref(), Some("2"));
        assert_eq!(parse_book_number("the 3rd book").as_deref(), Some("3"));
        assert_eq!(parse_book_number("Standalone"), None);
    }

    #[test]
    fn identity_strips_row_prefix_or_normalizes() {
        assert_eq!(book_identity(Some("adbl-library-content-row-B0001"), "x", "y"), "B0001");
        assert_eq!(
            book_identity(Some("other"), "The Way of Kings!", "Brandon Sanderson"),
            "thewayofkingsbrandonsanderson"
        );
        assert_eq!(book_identity(None, "Dune", "Frank Herbert"), "dunefrankherbert");
    }

    #[test]
    fn extracts_full_row() {
        let base = Url::parse("https://www.audible.com/library/titles").unwrap();
        let html = Html::parse_document(ROW);
        let books = extract_books(&html.root_element(), Some(&base));
        assert_eq!(books.len(), 1);
        let book = &books[0];
        assert_eq!(book.id, "B0001");
        assert_eq!(book.title, "Leviathan Wakes");
        assert_eq!(book.author, "James S. A. Corey");
        assert_eq!(book.narrator, "Jefferson Mays");
        assert_eq!(book.series.as_deref(), Some("The Expanse"));
        assert_eq!(book.series_url.as_deref(), Some("https://www.audible.com/series/The-Expanse/B00X"));
        assert_eq!(book.book_number.as_deref(), Some("1"));
        assert_eq!(book.book_url.as_deref(), Some("https://www.audible.com/pd/Leviathan-Wakes/B0001"));
        assert_eq!(book.cover_image.as_deref(), Some("https://m.media-amazon.com/images/I/cover.jpg"));
        assert_eq!(book.new_books_available, 0);
    }

    #[test]
    fn row_without_title_is_not_extractable() {
        let html = Html::parse_document(
            r#"<html><body><div class="adbl-library-content-row"><span class="authorLabel">By: Nobody</span></div></body></html>"#,
        );
        let rows = listing_rows(&html.root_element());
        assert_eq!(rows.len(), 1);
        assert_eq!(extract_book(&rows[0], None), Err(ExtractionError::MissingTitle));
        assert!(extract_books(&html.root_element(), None).is_empty());
    }

    #[test]
    fn book_number_falls_back_to_title() {
        let html = Html::parse_document(
            r#"<html><body><div class="library-item">
                <span class="bc-size-headline3">Red Rising, Book 2</span>
                <span class="seriesLabel"><a href="/series/Red-Rising/B01">Red Rising</a></span>
            </div></body></html>"#,
        );
        let books = extract_books(&html.root_element(), None);
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].book_number.as_deref(), Some("2"));
        assert_eq!(books[0].id, "redrisingbook2");
    }

    #[test]
    fn recognizes_listing_page() {
        let html = Html::parse_document(ROW);
        assert!(is_listing_page(&html.root_element(), None));

        let other = Html::parse_document("<html><head><title>Home</title></head><body><p>Hello</p></body></html>");
        let home = Url::parse("https://www.audible.com/").unwrap();
        assert!(!is_listing_page(&other.root_element(), Some(&home)));
        let lib = Url::parse("https://www.audible.com/library/titles").unwrap();
        assert!(is_listing_page(&other.root_element(), Some(&lib)));
    }
}
