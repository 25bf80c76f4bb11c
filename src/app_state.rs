//! Application state for the Actix-web server
//!
//! Handlers never touch the scanner directly. They talk to it through the
//! command channel; the scanner lives on its own thread.

use audible_series_scanner::badge::BadgeState;
use audible_series_scanner::config::Config;
use audible_series_scanner::messages::CommandSender;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Shared application state for Actix-web handlers
pub struct AppState {
    /// Handle to the scanner's command loop
    pub commands: CommandSender,
    /// Badge, folded from scan events
    pub badge: Mutex<BadgeState>,
    /// Application configuration
    pub config: Config,
}

impl AppState {
    pub fn new(commands: CommandSender, config: Config) -> Self {
        Self {
            commands,
            badge: Mutex::new(BadgeState::default()),
            config,
        }
    }

    pub fn badge(&self) -> MutexGuard<'_, BadgeState> {
        self.badge.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
