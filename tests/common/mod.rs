#![allow(dead_code)]

use audible_series_scanner::error::FetchError;
use audible_series_scanner::http_client::PageFetcher;
use audible_series_scanner::session::CancelFlag;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

pub const PAGE1_URL: &str = "https://www.audible.com/library/titles?page=1";
pub const PAGE2_URL: &str = "https://www.audible.com/library/titles?page=2";
pub const PAGE3_URL: &str = "https://www.audible.com/library/titles?page=3";
pub const DUNE_URL: &str = "https://www.audible.com/series/Dune-Audiobooks/S1";
pub const EXPANSE_URL: &str = "https://www.audible.com/series/The-Expanse-Audiobooks/S2";
pub const PRODUCT_URL: &str = "https://www.audible.com/pd/Dune-Audiobook/B001";

pub const LIBRARY_PAGE1: &str = include_str!("../fixtures/library_page1.html");
pub const LIBRARY_PAGE2: &str = include_str!("../fixtures/library_page2.html");
pub const LIBRARY_PAGE3: &str = include_str!("../fixtures/library_page3.html");
pub const SERIES_DUNE: &str = include_str!("../fixtures/series_dune.html");
pub const SERIES_EXPANSE: &str = include_str!("../fixtures/series_expanse.html");
pub const PRODUCT_PAGE: &str = include_str!("../fixtures/product_page.html");
pub const LOADING_PAGE: &str = include_str!("../fixtures/loading.html");

#[derive(Default)]
struct MockState {
    pages: HashMap<String, VecDeque<String>>,
    failing: HashSet<String>,
    cancel_on: Option<(String, CancelFlag)>,
    requests: Vec<String>,
}

/// In-memory fetcher. Clones share their pages and request log.
#[derive(Clone, Default)]
pub struct MockFetcher {
    state: Rc<RefCell<MockState>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// The whole fixture site: three library pages and two series pages.
    pub fn library() -> Self {
        Self::new()
            .with_page(PAGE1_URL, LIBRARY_PAGE1)
            .with_page(PAGE2_URL, LIBRARY_PAGE2)
            .with_page(PAGE3_URL, LIBRARY_PAGE3)
            .with_page(DUNE_URL, SERIES_DUNE)
            .with_page(EXPANSE_URL, SERIES_EXPANSE)
    }

    pub fn with_page(self, url: &str, html: &str) -> Self {
        self.with_responses(url, &[html])
    }

    /// Successive fetches of `url` get successive bodies; the last repeats.
    pub fn with_responses(self, url: &str, bodies: &[&str]) -> Self {
        self.state
            .borrow_mut()
            .pages
            .insert(url.to_string(), bodies.iter().map(|b| b.to_string()).collect());
        self
    }

    pub fn failing(self, url: &str) -> Self {
        self.state.borrow_mut().failing.insert(url.to_string());
        self
    }

    /// Trip `flag` as soon as `url` is requested.
    pub fn cancel_on(self, url: &str, flag: CancelFlag) -> Self {
        self.state.borrow_mut().cancel_on = Some((url.to_string(), flag));
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.state.borrow().requests.clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.state.borrow().requests.iter().filter(|r| r.as_str() == url).count()
    }

    pub fn clear_requests(&self) {
        self.state.borrow_mut().requests.clear();
    }
}

impl PageFetcher for MockFetcher {
    async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
        let mut state = self.state.borrow_mut();
        state.requests.push(url.to_string());

        if let Some((trigger, flag)) = &state.cancel_on {
            if trigger == url {
                flag.cancel();
            }
        }
        if state.failing.contains(url) {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: 503,
            });
        }
        let not_found = || FetchError::Status {
            url: url.to_string(),
            status: 404,
        };
        let bodies = state.pages.get_mut(url).ok_or_else(not_found)?;
        let body = if bodies.len() > 1 {
            bodies.pop_front()
        } else {
            bodies.front().cloned()
        };
        body.ok_or_else(not_found)
    }
}
