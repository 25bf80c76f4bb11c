use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// First listing page, loaded when a scan is not handed a document.
    #[serde(default = "default_library_url")]
    pub library_url: String,
    /// Raw `Cookie` header for the signed-in session.
    #[serde(default)]
    pub cookie: Option<String>,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub scan: ScanConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// First port to try binding
    #[serde(default = "default_port_start")]
    pub port_start: u16,
    /// Last port to try binding (inclusive)
    #[serde(default = "default_port_end")]
    pub port_end: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// Maximum number of retry attempts for failed requests
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Initial retry delay in milliseconds
    #[serde(default = "default_initial_retry_delay")]
    pub initial_retry_delay_ms: u64,

    /// Maximum retry delay in milliseconds
    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_ms: u64,

    /// Timeout for HTTP requests in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_true")]
    pub enable_cookies: bool,

    /// Enable gzip/brotli compression
    #[serde(default = "default_true")]
    pub enable_compression: bool,
}

/// Pacing of a scan. All delays are fixed, not adaptive.
#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_page_delay")]
    pub page_delay_ms: u64,
    #[serde(default = "default_batch_delay")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_page_load_attempts")]
    pub page_load_attempts: u32,
    #[serde(default = "default_scheduler_tick")]
    pub scheduler_tick_secs: u64,
    #[serde(default = "default_background_interval")]
    pub background_interval_hours: i64,
}

fn default_true() -> bool { true }
fn default_database_path() -> String { "scanner.db".to_string() }
fn default_library_url() -> String {
    "https://www.audible.com/library/titles?pageSize=50&page=1".to_string()
}
fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port_start() -> u16 { 8080 }
fn default_port_end() -> u16 { 8090 }
fn default_max_retries() -> usize { 4 }
fn default_initial_retry_delay() -> u64 { 500 }
fn default_max_retry_delay() -> u64 { 8000 }
fn default_timeout() -> u64 { 30 }
fn default_page_delay() -> u64 { 300 }
fn default_batch_delay() -> u64 { 300 }
fn default_page_load_attempts() -> u32 { 5 }
fn default_scheduler_tick() -> u64 { 60 }
fn default_background_interval() -> i64 { 24 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port_start: default_port_start(),
            port_end: default_port_end(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            initial_retry_delay_ms: 500,
            max_retry_delay_ms: 8000,
            timeout_secs: 30,
            enable_cookies: true,
            enable_compression: true,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            page_delay_ms: 300,
            batch_delay_ms: 300,
            page_load_attempts: 5,
            scheduler_tick_secs: 60,
            background_interval_hours: 24,
        }
    }
}

impl ScanConfig {
    /// No pauses at all; used by tests driving an in-memory fetcher.
    pub fn immediate() -> Self {
        Self {
            page_delay_ms: 0,
            batch_delay_ms: 0,
            page_load_attempts: 3,
            ..Self::default()
        }
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database_path: default_database_path(),
            library_url: default_library_url(),
            cookie: None,
            http: HttpConfig::default(),
            scan: ScanConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        Self::load_from(Path::new("config.toml"))
    }

    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<Config>(&content) {
                    Ok(cfg) => return cfg,
                    Err(e) => log::warn!("ignoring invalid {}: {}", path.display(), e),
                },
                Err(e) => log::warn!("could not read {}: {}", path.display(), e),
            }
        }
        Self::default()
    }
}

impl HttpConfig {
    /// Build the retrying page fetcher from this configuration
    pub fn create_http_client(
        &self,
        cookie: Option<&str>,
    ) -> Result<crate::http_client::EnhancedHttpClient, reqwest::Error> {
        use crate::http_client::{EnhancedHttpClient, HttpClientConfig};

        let config = HttpClientConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
            initial_retry_delay_ms: self.initial_retry_delay_ms,
            max_retry_delay_ms: self.max_retry_delay_ms,
            enable_cookies: self.enable_cookies,
            enable_gzip: self.enable_compression,
            cookie: cookie.map(|c| c.to_string()),
        };

        EnhancedHttpClient::with_config(config)
    }
}
