//! Failure classes of a scan.
//!
//! Per-element and per-page failures (`ExtractionError`, `FetchError`) are
//! absorbed where they happen; only `ScanError` ends a scan.

/// One listing element could not be turned into a book.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("no title element found")]
    MissingTitle,
}

/// A page or series catalog could not be fetched.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} returned status {status}")]
    Status { url: String, status: u16 },
}

/// Persisted state could not be read or written.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Scan-level failures; these end the current scan.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Please navigate to your Audible library page")]
    NotOnListingPage,
}

/// A command could not be delivered or answered.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("scanner is not running")]
    Closed,

    #[error("storage error: {0}")]
    Storage(String),
}

/// A backup document could not be restored.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("Invalid backup file format")]
    InvalidFormat,

    #[error("invalid backup JSON: {0}")]
    Json(#[from] serde_json::Error),
}
