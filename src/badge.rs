use crate::messages::ScanEvent;
use serde::Serialize;

pub const COUNT_COLOR: &str = "#e74c3c";
pub const SCANNING_COLOR: &str = "#3498db";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BadgeDisplay {
    pub text: String,
    pub color: &'static str,
}

/// Badge state. Count updates that arrive mid-scan are kept and shown once
/// the scan ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BadgeState {
    count: usize,
    scanning: bool,
}

impl BadgeState {
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn update_count(&mut self, count: usize) {
        self.count = count;
    }

    pub fn scan_started(&mut self) {
        self.scanning = true;
    }

    pub fn scan_ended(&mut self) {
        self.scanning = false;
    }

    /// Fold a scan event into the badge; other events are ignored.
    pub fn apply(&mut self, event: &ScanEvent) {
        match event {
            ScanEvent::UpdateBadge { count } => self.update_count(*count),
            ScanEvent::ScanStarted => self.scan_started(),
            ScanEvent::ScanEnded => self.scan_ended(),
            _ => {}
        }
    }

    pub fn display(&self, show_badge: bool) -> BadgeDisplay {
        if self.scanning {
            return BadgeDisplay {
                text: "...".to_string(),
                color: SCANNING_COLOR,
            };
        }
        let text = match self.count {
            0 => String::new(),
            _ if !show_badge => String::new(),
            n if n > 99 => "99+".to_string(),
            n => n.to_string(),
        };
        BadgeDisplay { text, color: COUNT_COLOR }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_counts() {
        let mut badge = BadgeState::default();
        assert_eq!(badge.display(true).text, "");
        badge.update_count(7);
        assert_eq!(badge.display(true), BadgeDisplay { text: "7".into(), color: COUNT_COLOR });
        assert_eq!(badge.display(false).text, "");
        badge.update_count(140);
        assert_eq!(badge.display(true).text, "99+");
    }

    #[test]
    fn scanning_masks_count_until_scan_ends() {
        let mut badge = BadgeState::default();
        badge.apply(&ScanEvent::UpdateBadge { count: 3 });
        badge.apply(&ScanEvent::ScanStarted);
        badge.apply(&ScanEvent::UpdateBadge { count: 5 });
        assert_eq!(badge.display(true), BadgeDisplay { text: "...".into(), color: SCANNING_COLOR });
        badge.apply(&ScanEvent::ScanEnded);
        assert_eq!(badge.display(true).text, "5");
    }
}
