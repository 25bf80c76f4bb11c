mod common;

use audible_series_scanner::badge::BadgeState;
use audible_series_scanner::config::ScanConfig;
use audible_series_scanner::error::CommandError;
use audible_series_scanner::messages::{run_command_loop, CommandSender, EventSink, ScanEvent};
use audible_series_scanner::models::{ScanOptions, ScanType, StoragePatch};
use audible_series_scanner::session::{ScanState, Scanner};
use audible_series_scanner::store::SqliteStore;
use common::*;
use std::rc::Rc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::LocalSet;

fn start(fetcher: MockFetcher) -> (CommandSender, UnboundedReceiver<ScanEvent>, tokio::task::JoinHandle<()>) {
    let store = SqliteStore::open_in_memory().unwrap();
    let (events, event_rx) = EventSink::channel();
    let (commands, command_rx) = CommandSender::channel();
    let scanner = Rc::new(Scanner::new(fetcher, store, ScanConfig::immediate(), PAGE1_URL.to_string(), events));
    let handle = tokio::task::spawn_local(run_command_loop(scanner, command_rx));
    (commands, event_rx, handle)
}

/// Collect events until the scan reports its result.
async fn until_finished(rx: &mut UnboundedReceiver<ScanEvent>) -> Vec<ScanEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let done = matches!(event, ScanEvent::ScanComplete(_) | ScanEvent::ScanError { .. });
        events.push(event);
        if done {
            break;
        }
    }
    events
}

#[tokio::test]
async fn start_scan_runs_and_persists() {
    LocalSet::new()
        .run_until(async {
            let fetcher = MockFetcher::library();
            let (commands, mut events, _loop) = start(fetcher.clone());

            commands.start_scan(ScanOptions::default(), None).unwrap();
            let events = until_finished(&mut events).await;

            match events.last() {
                Some(ScanEvent::ScanComplete(summary)) => assert_eq!(summary.total_books, 5),
                other => panic!("unexpected final event: {:?}", other),
            }
            // default listing is loaded from the configured library URL
            assert_eq!(fetcher.request_count(PAGE1_URL), 1);

            let status = commands.scan_status().await.unwrap();
            assert_eq!(status.state, ScanState::Complete);
            assert!(!status.is_scanning);

            let stored = commands.stored_data().await.unwrap();
            assert_eq!(stored.scan_results.len(), 5);
        })
        .await;
}

#[tokio::test]
async fn save_data_merges_into_stored_state() {
    LocalSet::new()
        .run_until(async {
            let (commands, _events, _loop) = start(MockFetcher::library());

            let mut settings = commands.stored_data().await.unwrap().settings;
            settings.hide_single_book = true;
            commands
                .save_data(StoragePatch {
                    settings: Some(settings),
                    ignored_series: Some(vec!["Dune Chronicles".into()]),
                    ..Default::default()
                })
                .await
                .unwrap();

            let stored = commands.stored_data().await.unwrap();
            assert!(stored.settings.hide_single_book);
            assert_eq!(stored.ignored_series, vec!["Dune Chronicles"]);
            assert!(stored.ignored_books.is_empty());
        })
        .await;
}

#[tokio::test]
async fn background_trigger_updates_badge_state() {
    LocalSet::new()
        .run_until(async {
            let (commands, mut events, _loop) = start(MockFetcher::library());
            let mut badge = BadgeState::default();

            commands.trigger_background_scan().unwrap();
            for event in until_finished(&mut events).await {
                badge.apply(&event);
            }
            assert!(badge.is_scanning());
            assert_eq!(badge.display(true).text, "...");

            // the end signal follows the result
            let ended = events.recv().await.unwrap();
            assert_eq!(ended, ScanEvent::ScanEnded);
            badge.apply(&ended);
            assert_eq!(badge.display(true).text, "3");
        })
        .await;
}

#[tokio::test]
async fn check_does_nothing_while_background_scanning_is_off() {
    LocalSet::new()
        .run_until(async {
            let fetcher = MockFetcher::library();
            let (commands, _events, _loop) = start(fetcher.clone());

            commands.check_background_scan().unwrap();
            let status = commands.scan_status().await.unwrap();

            assert_eq!(status.state, ScanState::Idle);
            assert!(fetcher.requests().is_empty());
        })
        .await;
}

#[tokio::test]
async fn loop_exits_when_senders_are_dropped() {
    LocalSet::new()
        .run_until(async {
            let (commands, _events, handle) = start(MockFetcher::library());
            let spare = commands.clone();
            drop(commands);
            drop(spare);

            handle.await.unwrap();
        })
        .await;
}

#[tokio::test]
async fn commands_fail_once_the_loop_is_gone() {
    let (commands, rx) = CommandSender::channel();
    drop(rx);

    assert!(matches!(
        commands.start_scan(ScanOptions { scan_type: ScanType::Library, ..Default::default() }, None),
        Err(CommandError::Closed)
    ));
    assert!(matches!(commands.scan_status().await, Err(CommandError::Closed)));
}
