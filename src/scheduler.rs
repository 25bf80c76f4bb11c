use crate::messages::CommandSender;
use chrono::{DateTime, Duration, Utc};

/// Whether a background scan is due: never ran, or ran at least `interval` ago.
pub fn background_scan_due(last: Option<DateTime<Utc>>, now: DateTime<Utc>, interval: Duration) -> bool {
    match last {
        Some(last) => now - last >= interval,
        None => true,
    }
}

/// Ask the scanner every `tick` whether a background scan should run. The
/// scanner itself decides, from the stored settings and last run time.
pub fn spawn(commands: CommandSender, tick: std::time::Duration) {
    actix_web::rt::spawn(async move {
        loop {
            // sleep between cycles
            actix_web::rt::time::sleep(tick).await;
            if let Err(e) = commands.check_background_scan() {
                log::error!("Background scheduler stopping: {}", e);
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn due_after_interval_or_when_never_run() {
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap();
        let day = Duration::hours(24);
        assert!(background_scan_due(None, now, day));
        assert!(!background_scan_due(Some(now - Duration::hours(23)), now, day));
        assert!(background_scan_due(Some(now - Duration::hours(24)), now, day));
        assert!(background_scan_due(Some(now - Duration::days(3)), now, day));
    }
}
