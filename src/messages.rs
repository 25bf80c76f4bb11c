//! Typed messages between the scanner and its collaborators.
//!
//! Progress and results flow outward as fire-and-forget `ScanEvent`s on an
//! unbounded channel. Control flows inward as `ScanCommand`s; the two
//! request-style commands carry a oneshot sender for the reply.

use crate::error::CommandError;
use crate::http_client::PageFetcher;
use crate::models::{Book, CatalogEntry, ScanOptions, StoragePatch, StoredData};
use crate::session::{ListingSource, ScanRequest, ScanStatus, Scanner};
use crate::store::Store;
use serde::Serialize;
use std::rc::Rc;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanProgress {
    pub current_page: Option<u32>,
    pub total_pages: Option<u32>,
    pub status: Option<String>,
    pub is_background_scan: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesUpdate {
    pub series_url: String,
    pub new_books_count: usize,
    pub total_in_series: usize,
    pub owned_count: usize,
    pub preorder_count: usize,
    pub all_books: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub total_books: usize,
    pub new_books_found: usize,
    pub series_count: usize,
    pub all_results: Vec<Book>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ScanEvent {
    ScanProgress(ScanProgress),
    BookFound(Book),
    SeriesUpdate(SeriesUpdate),
    ScanComplete(ScanSummary),
    ScanError { message: String },
    UpdateBadge { count: usize },
    ScanStarted,
    ScanEnded,
}

impl ScanEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ScanEvent::ScanProgress(_) => "scanProgress",
            ScanEvent::BookFound(_) => "bookFound",
            ScanEvent::SeriesUpdate(_) => "seriesUpdate",
            ScanEvent::ScanComplete(_) => "scanComplete",
            ScanEvent::ScanError { .. } => "scanError",
            ScanEvent::UpdateBadge { .. } => "updateBadge",
            ScanEvent::ScanStarted => "scanStarted",
            ScanEvent::ScanEnded => "scanEnded",
        }
    }
}

/// Outbound side of the event channel. Sending never blocks and never fails
/// the scan; a dropped receiver only means nobody is listening.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<ScanEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<ScanEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ScanEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// A sink that drops everything.
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: ScanEvent) {
        log::debug!("event {}", event.name());
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                log::debug!("event receiver dropped");
            }
        }
    }
}

pub enum ScanCommand {
    StartScan {
        options: ScanOptions,
        listing: Option<ListingSource>,
    },
    StopScan,
    /// Background scan now, regardless of when the last one ran.
    TriggerBackgroundScan,
    /// Background scan if enabled and due.
    CheckBackgroundScan,
    GetScanStatus {
        reply: oneshot::Sender<ScanStatus>,
    },
    GetStoredData {
        reply: oneshot::Sender<Result<StoredData, String>>,
    },
    SaveData {
        patch: StoragePatch,
        reply: oneshot::Sender<Result<(), String>>,
    },
}

/// Cloneable, thread-safe handle for issuing commands.
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<ScanCommand>,
}

impl CommandSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ScanCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, command: ScanCommand) -> Result<(), CommandError> {
        self.tx.send(command).map_err(|_| CommandError::Closed)
    }

    pub fn start_scan(&self, options: ScanOptions, listing: Option<ListingSource>) -> Result<(), CommandError> {
        self.send(ScanCommand::StartScan { options, listing })
    }

    pub fn stop_scan(&self) -> Result<(), CommandError> {
        self.send(ScanCommand::StopScan)
    }

    pub fn trigger_background_scan(&self) -> Result<(), CommandError> {
        self.send(ScanCommand::TriggerBackgroundScan)
    }

    pub fn check_background_scan(&self) -> Result<(), CommandError> {
        self.send(ScanCommand::CheckBackgroundScan)
    }

    pub async fn scan_status(&self) -> Result<ScanStatus, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.send(ScanCommand::GetScanStatus { reply })?;
        rx.await.map_err(|_| CommandError::Closed)
    }

    pub async fn stored_data(&self) -> Result<StoredData, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.send(ScanCommand::GetStoredData { reply })?;
        rx.await.map_err(|_| CommandError::Closed)?.map_err(CommandError::Storage)
    }

    pub async fn save_data(&self, patch: StoragePatch) -> Result<(), CommandError> {
        let (reply, rx) = oneshot::channel();
        self.send(ScanCommand::SaveData { patch, reply })?;
        rx.await.map_err(|_| CommandError::Closed)?.map_err(CommandError::Storage)
    }
}

fn spawn_scan<F, S>(scanner: &Rc<Scanner<F, S>>, request: ScanRequest)
where
    F: PageFetcher + 'static,
    S: Store + 'static,
{
    match scanner.begin(request) {
        Some(session) => {
            let scanner = Rc::clone(scanner);
            tokio::task::spawn_local(async move {
                scanner.run(session).await;
            });
        }
        None => log::info!("Already scanning, ignoring start request"),
    }
}

/// Serve commands until every sender is dropped. Scans run as local tasks,
/// so this must be driven inside a `tokio::task::LocalSet`.
pub async fn run_command_loop<F, S>(scanner: Rc<Scanner<F, S>>, mut rx: mpsc::UnboundedReceiver<ScanCommand>)
where
    F: PageFetcher + 'static,
    S: Store + 'static,
{
    while let Some(command) = rx.recv().await {
        match command {
            ScanCommand::StartScan { options, listing } => {
                let request = ScanRequest {
                    listing: listing.unwrap_or_else(|| scanner.default_listing()),
                    options,
                    background: false,
                };
                spawn_scan(&scanner, request);
            }
            ScanCommand::StopScan => scanner.stop(),
            ScanCommand::TriggerBackgroundScan => match scanner.background_request(true) {
                Ok(Some(request)) => spawn_scan(&scanner, request),
                Ok(None) => {}
                Err(e) => log::error!("Background scan check failed: {}", e),
            },
            ScanCommand::CheckBackgroundScan => match scanner.background_request(false) {
                Ok(Some(request)) => spawn_scan(&scanner, request),
                Ok(None) => {}
                Err(e) => log::error!("Background scan check failed: {}", e),
            },
            ScanCommand::GetScanStatus { reply } => {
                let _ = reply.send(scanner.status());
            }
            ScanCommand::GetStoredData { reply } => {
                let _ = reply.send(scanner.store().load().map_err(|e| e.to_string()));
            }
            ScanCommand::SaveData { patch, reply } => {
                let _ = reply.send(scanner.store().save(patch).map_err(|e| e.to_string()));
            }
        }
    }
    log::info!("command channel closed; scanner loop exiting");
}
