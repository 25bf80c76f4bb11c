//! Minimal DOM capability used by the extractor and classifier.
//!
//! The parsing code only ever asks a node for descendants matching a CSS
//! selector, its text, and its attributes. `DomNode` captures exactly that,
//! and is implemented for `scraper::ElementRef` so both a full document
//! (`Html::root_element`) and a single listing row can be handed around.

use reqwest::Url;
use scraper::{ElementRef, Selector};

pub trait DomNode: Copy {
    /// First descendant matching `selector`. Invalid selectors match nothing.
    fn select_first(&self, selector: &str) -> Option<Self>;

    /// All descendants matching `selector`, in document order.
    fn select_all(&self, selector: &str) -> Vec<Self>;

    /// Concatenated text content of the node and its descendants.
    fn text(&self) -> String;

    fn attr(&self, name: &str) -> Option<String>;

    fn tag_name(&self) -> String;

    fn has_class(&self, class: &str) -> bool;

    /// Nearest node (self included) matching `selector`, walking up.
    fn closest(&self, selector: &str) -> Option<Self>;

    /// Probe `selectors` in order; first match wins.
    fn find_first(&self, selectors: &[&str]) -> Option<Self> {
        selectors.iter().find_map(|sel| self.select_first(sel))
    }

    fn trimmed_text(&self) -> String {
        self.text().trim().to_string()
    }

    /// Buy-box widgets are toggled with the `bc-hidden` class.
    fn is_visible(&self) -> bool {
        !self.has_class("bc-hidden")
    }
}

fn parse_selector(selector: &str) -> Option<Selector> {
    match Selector::parse(selector) {
        Ok(s) => Some(s),
        Err(e) => {
            log::debug!("ignoring invalid selector {:?}: {:?}", selector, e);
            None
        }
    }
}

impl<'a> DomNode for ElementRef<'a> {
    fn select_first(&self, selector: &str) -> Option<Self> {
        let sel = parse_selector(selector)?;
        self.select(&sel).next()
    }

    fn select_all(&self, selector: &str) -> Vec<Self> {
        match parse_selector(selector) {
            Some(sel) => self.select(&sel).collect(),
            None => Vec::new(),
        }
    }

    fn text(&self) -> String {
        ElementRef::text(self).collect::<String>()
    }

    fn attr(&self, name: &str) -> Option<String> {
        self.value().attr(name).map(|v| v.to_string())
    }

    fn tag_name(&self) -> String {
        self.value().name().to_lowercase()
    }

    fn has_class(&self, class: &str) -> bool {
        self.value().classes().any(|c| c == class)
    }

    fn closest(&self, selector: &str) -> Option<Self> {
        let sel = parse_selector(selector)?;
        if sel.matches(self) {
            return Some(*self);
        }
        self.ancestors()
            .filter_map(ElementRef::wrap)
            .find(|el| sel.matches(el))
    }
}

/// Resolve `href` against the page it was found on, like a browser's
/// `link.href` would.
pub fn resolve_url(base: Option<&Url>, href: &str) -> String {
    let href = href.trim();
    match base {
        Some(b) => b
            .join(href)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| href.to_string()),
        None => href.to_string(),
    }
}

/// `href` of a link node, resolved to an absolute URL.
pub fn link_target<N: DomNode>(node: &N, base: Option<&Url>) -> Option<String> {
    node.attr("href")
        .filter(|h| !h.trim().is_empty())
        .map(|h| resolve_url(base, &h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    const DOC: &str = r#"<html><body>
        <div id="row" class="row">
          <a href="/pd/abc"><span class="title">  Dune  </span></a>
          <span class="btn bc-hidden">hidden</span>
          <span class="other">shown</span>
        </div>
    </body></html>"#;

    #[test]
    fn find_first_tries_selectors_in_order() {
        let html = Html::parse_document(DOC);
        let root = html.root_element();
        let found = root.find_first(&[".missing", "span.other", ".title"]).unwrap();
        assert_eq!(found.trimmed_text(), "shown");
    }

    #[test]
    fn invalid_selector_matches_nothing() {
        let html = Html::parse_document(DOC);
        let root = html.root_element();
        assert!(root.select_first("[[[").is_none());
        assert!(root.select_all("[[[").is_empty());
    }

    #[test]
    fn visibility_follows_hidden_class() {
        let html = Html::parse_document(DOC);
        let root = html.root_element();
        assert!(!root.select_first(".btn").unwrap().is_visible());
        assert!(root.select_first(".other").unwrap().is_visible());
    }

    #[test]
    fn closest_walks_up_to_link() {
        let html = Html::parse_document(DOC);
        let root = html.root_element();
        let title = root.select_first(".title").unwrap();
        let link = title.closest("a").unwrap();
        assert_eq!(link.attr("href").as_deref(), Some("/pd/abc"));
        assert_eq!(link.tag_name(), "a");
    }

    #[test]
    fn resolves_relative_links() {
        let base = Url::parse("https://www.audible.com/library/titles?page=1").unwrap();
        assert_eq!(
            resolve_url(Some(&base), "/series/Dune-Audiobooks/B00?ref=x"),
            "https://www.audible.com/series/Dune-Audiobooks/B00?ref=x"
        );
        assert_eq!(resolve_url(None, " /pd/abc "), "/pd/abc");
    }
}
