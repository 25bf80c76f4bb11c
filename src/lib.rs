// Library interface for audible_series_scanner
// The binary and the integration tests both build on these modules.

pub mod aggregate;
pub mod backup;
pub mod badge;
pub mod classifier;
pub mod config;
pub mod coverage;
pub mod dom;
pub mod error;
pub mod extractor;
pub mod http_client;
pub mod messages;
pub mod models;
pub mod pagination;
pub mod reconcile;
pub mod scheduler;
pub mod session;
pub mod store;
