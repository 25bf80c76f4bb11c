mod app_state;

use actix_web::{get, post, web, App, HttpResponse, HttpServer, Responder};
use app_state::AppState;
use audible_series_scanner::aggregate::{
    count_new_books, export_library, new_books_feed, series_view, DEFAULT_FEED_LIMIT,
};
use audible_series_scanner::backup::{create_backup, restore_patch};
use audible_series_scanner::config::Config;
use audible_series_scanner::error::CommandError;
use audible_series_scanner::messages::{run_command_loop, CommandSender, EventSink, ScanCommand, ScanEvent};
use audible_series_scanner::models::{ScanOptions, Settings, StoragePatch, StoredData};
use audible_series_scanner::scheduler;
use audible_series_scanner::session::{ListingSource, Scanner};
use audible_series_scanner::store::{SqliteStore, Store};
use log::{error, info, warn, LevelFilter};
use serde::Deserialize;
use serde_json::json;
use std::rc::Rc;
use tokio::sync::mpsc;

fn init_logging() {
    if let Err(e) = log4rs::init_file("log4rs.yml", Default::default()) {
        use log4rs::append::console::ConsoleAppender;
        use log4rs::config::{Appender, Config as LogConfig, Root};
        use log4rs::encode::pattern::PatternEncoder;

        let stdout = ConsoleAppender::builder()
            .encoder(Box::new(PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S)} {l} {t} - {m}{n}")))
            .build();
        let fallback = LogConfig::builder()
            .appender(Appender::builder().build("stdout", Box::new(stdout)))
            .build(Root::builder().appender("stdout").build(LevelFilter::Debug));
        match fallback {
            Ok(config) => {
                if log4rs::init_config(config).is_err() {
                    eprintln!("logger already initialised");
                }
            }
            Err(errors) => eprintln!("could not build console logger: {:?}", errors),
        }
        warn!("log4rs.yml not loaded ({}); logging to console", e);
    }
}

/// `debugMode` opens up debug output; otherwise info and above.
fn apply_log_level(settings: &Settings) {
    let level = if settings.debug_mode {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    log::set_max_level(level);
}

fn command_failed(e: CommandError) -> HttpResponse {
    error!("Scanner command failed: {}", e);
    match e {
        CommandError::Closed => {
            HttpResponse::ServiceUnavailable().json(json!({"error": e.to_string()}))
        }
        CommandError::Storage(_) => {
            HttpResponse::InternalServerError().json(json!({"error": e.to_string()}))
        }
    }
}

/// Recompute the badge from freshly stored data.
fn refresh_badge(data: &AppState, stored: &StoredData) {
    let count = count_new_books(
        &stored.scan_results,
        &stored.settings,
        &stored.ignored_series,
        &stored.ignored_books,
    );
    data.badge().update_count(count);
}

/// Save a patch, then reload so the badge and log level follow it.
async fn save_and_refresh(data: &AppState, patch: StoragePatch) -> Result<StoredData, CommandError> {
    data.commands.save_data(patch).await?;
    let stored = data.commands.stored_data().await?;
    apply_log_level(&stored.settings);
    refresh_badge(data, &stored);
    Ok(stored)
}

#[derive(Debug, Deserialize)]
struct StartScanBody {
    #[serde(flatten)]
    options: ScanOptions,
    #[serde(default)]
    listing: Option<ListingSource>,
}

#[post("/scan/start")]
async fn start_scan(data: web::Data<AppState>, body: web::Json<StartScanBody>) -> impl Responder {
    match data.commands.scan_status().await {
        Ok(status) if status.is_scanning => {
            return HttpResponse::Conflict().json(json!({"error": "scan already in progress"}))
        }
        Ok(_) => {}
        Err(e) => return command_failed(e),
    }
    let StartScanBody { options, listing } = body.into_inner();
    info!("Scan requested: {:?}", options);
    match data.commands.start_scan(options, listing) {
        Ok(()) => HttpResponse::Accepted().finish(),
        Err(e) => command_failed(e),
    }
}

#[post("/scan/stop")]
async fn stop_scan(data: web::Data<AppState>) -> impl Responder {
    match data.commands.stop_scan() {
        Ok(()) => HttpResponse::Accepted().finish(),
        Err(e) => command_failed(e),
    }
}

#[post("/scan/background")]
async fn trigger_background(data: web::Data<AppState>) -> impl Responder {
    match data.commands.trigger_background_scan() {
        Ok(()) => HttpResponse::Accepted().finish(),
        Err(e) => command_failed(e),
    }
}

#[get("/scan/status")]
async fn scan_status(data: web::Data<AppState>) -> impl Responder {
    match data.commands.scan_status().await {
        Ok(status) => HttpResponse::Ok().json(status),
        Err(e) => command_failed(e),
    }
}

#[get("/data")]
async fn get_data(data: web::Data<AppState>) -> impl Responder {
    match data.commands.stored_data().await {
        Ok(stored) => HttpResponse::Ok().json(stored),
        Err(e) => command_failed(e),
    }
}

#[post("/data")]
async fn save_data(data: web::Data<AppState>, body: web::Json<StoragePatch>) -> impl Responder {
    match save_and_refresh(&data, body.into_inner()).await {
        Ok(_) => HttpResponse::Ok().json(json!({"success": true})),
        Err(e) => command_failed(e),
    }
}

/// Overrides for the stored filters; absent keys keep the stored value.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeriesQuery {
    search: Option<String>,
    sort_by: Option<String>,
    max_to_buy: Option<usize>,
    only_with_new: Option<bool>,
}

#[get("/series")]
async fn list_series(data: web::Data<AppState>, query: web::Query<SeriesQuery>) -> impl Responder {
    let stored = match data.commands.stored_data().await {
        Ok(stored) => stored,
        Err(e) => return command_failed(e),
    };
    let query = query.into_inner();
    let mut filters = stored.filters.clone();
    if let Some(search) = query.search {
        filters.search = search;
    }
    if let Some(sort_by) = query.sort_by {
        filters.sort_by = sort_by;
    }
    if query.max_to_buy.is_some() {
        filters.max_to_buy = query.max_to_buy;
    }
    if let Some(only_with_new) = query.only_with_new {
        filters.only_with_new = only_with_new;
    }

    let series = series_view(
        &stored.scan_results,
        &filters,
        &stored.settings,
        &stored.ignored_series,
        &stored.ignored_books,
    );
    let total_new = count_new_books(
        &stored.scan_results,
        &stored.settings,
        &stored.ignored_series,
        &stored.ignored_books,
    );
    HttpResponse::Ok().json(json!({
        "seriesCount": series.len(),
        "totalNewBooks": total_new,
        "lastScanDate": stored.last_scan_date,
        "series": series,
    }))
}

#[get("/series/new")]
async fn new_books(
    data: web::Data<AppState>,
    query: web::Query<std::collections::HashMap<String, String>>,
) -> impl Responder {
    let limit = query
        .get("limit")
        .and_then(|l| l.parse::<usize>().ok())
        .unwrap_or(DEFAULT_FEED_LIMIT);
    match data.commands.stored_data().await {
        Ok(stored) => HttpResponse::Ok().json(new_books_feed(
            &stored.scan_results,
            &stored.settings,
            &stored.ignored_series,
            &stored.ignored_books,
            limit,
        )),
        Err(e) => command_failed(e),
    }
}

#[get("/badge")]
async fn badge(data: web::Data<AppState>) -> impl Responder {
    match data.commands.stored_data().await {
        Ok(stored) => HttpResponse::Ok().json(data.badge().display(stored.settings.show_badge)),
        Err(e) => command_failed(e),
    }
}

#[get("/export")]
async fn export(data: web::Data<AppState>) -> impl Responder {
    match data.commands.stored_data().await {
        Ok(stored) => HttpResponse::Ok().json(export_library(&stored.scan_results, &stored.settings)),
        Err(e) => command_failed(e),
    }
}

#[get("/backup")]
async fn backup(data: web::Data<AppState>) -> impl Responder {
    match data.commands.stored_data().await {
        Ok(stored) => HttpResponse::Ok().json(create_backup(&stored)),
        Err(e) => command_failed(e),
    }
}

#[post("/restore")]
async fn restore(data: web::Data<AppState>, body: String) -> impl Responder {
    let current = match data.commands.stored_data().await {
        Ok(stored) => stored,
        Err(e) => return command_failed(e),
    };
    let patch = match restore_patch(&body, &current) {
        Ok(patch) => patch,
        Err(e) => {
            warn!("Restore rejected: {}", e);
            return HttpResponse::BadRequest().json(json!({"error": e.to_string()}));
        }
    };
    match save_and_refresh(&data, patch).await {
        Ok(_) => HttpResponse::Ok().json(json!({"success": true})),
        Err(e) => command_failed(e),
    }
}

/// Add `item` when absent, remove it when present. Returns whether it is now in the list.
fn toggle(list: &mut Vec<String>, item: &str) -> bool {
    if let Some(pos) = list.iter().position(|i| i == item) {
        list.remove(pos);
        false
    } else {
        list.push(item.to_string());
        true
    }
}

#[post("/ignore/series/{name}")]
async fn ignore_series(data: web::Data<AppState>, name: web::Path<String>) -> impl Responder {
    let mut ignored = match data.commands.stored_data().await {
        Ok(stored) => stored.ignored_series,
        Err(e) => return command_failed(e),
    };
    let now_ignored = toggle(&mut ignored, &name);
    let patch = StoragePatch {
        ignored_series: Some(ignored),
        ..Default::default()
    };
    match save_and_refresh(&data, patch).await {
        Ok(_) => HttpResponse::Ok().json(json!({"series": name.as_str(), "ignored": now_ignored})),
        Err(e) => command_failed(e),
    }
}

#[post("/ignore/book/{asin}")]
async fn ignore_book(data: web::Data<AppState>, asin: web::Path<String>) -> impl Responder {
    let mut ignored = match data.commands.stored_data().await {
        Ok(stored) => stored.ignored_books,
        Err(e) => return command_failed(e),
    };
    let now_ignored = toggle(&mut ignored, &asin);
    let patch = StoragePatch {
        ignored_books: Some(ignored),
        ..Default::default()
    };
    match save_and_refresh(&data, patch).await {
        Ok(_) => HttpResponse::Ok().json(json!({"asin": asin.as_str(), "ignored": now_ignored})),
        Err(e) => command_failed(e),
    }
}

/// Start the scanner on its own thread. Scans are single-threaded local
/// tasks, so the thread runs a current-thread runtime with a `LocalSet`.
fn spawn_scanner(
    cfg: &Config,
    store: SqliteStore,
    events: EventSink,
    commands: mpsc::UnboundedReceiver<ScanCommand>,
) -> std::io::Result<()> {
    let fetcher = cfg
        .http
        .create_http_client(cfg.cookie.as_deref())
        .map_err(std::io::Error::other)?;
    let scan_config = cfg.scan.clone();
    let library_url = cfg.library_url.clone();

    std::thread::Builder::new()
        .name("scanner".to_string())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    error!("Could not start scanner runtime: {}", e);
                    return;
                }
            };
            let scanner = Rc::new(Scanner::new(fetcher, store, scan_config, library_url, events));
            let local = tokio::task::LocalSet::new();
            local.block_on(&rt, run_command_loop(scanner, commands));
        })?;
    Ok(())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    init_logging();

    let cfg = Config::load();
    let store = SqliteStore::open(&cfg.database_path).map_err(std::io::Error::other)?;
    let initial = match store.load() {
        Ok(data) => data,
        Err(e) => {
            warn!("Could not read stored data, starting empty: {}", e);
            StoredData::default()
        }
    };
    apply_log_level(&initial.settings);

    info!("HTTP client configured:");
    info!("  Max retries: {}", cfg.http.max_retries);
    info!("  Timeout: {}s", cfg.http.timeout_secs);
    info!("  Cookie set: {}", cfg.cookie.is_some());

    let (events, mut event_rx) = EventSink::channel();
    let (commands, command_rx) = CommandSender::channel();
    spawn_scanner(&cfg, store, events, command_rx)?;

    let tick = std::time::Duration::from_secs(cfg.scan.scheduler_tick_secs);
    let data = web::Data::new(AppState::new(commands.clone(), cfg));
    refresh_badge(&data, &initial);

    // fold scan events into the badge
    let events_data = data.clone();
    actix_web::rt::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match &event {
                ScanEvent::ScanComplete(summary) => info!(
                    "Scan complete: {} books, {} series, {} new",
                    summary.total_books, summary.series_count, summary.new_books_found
                ),
                ScanEvent::ScanError { message } => error!("Scan failed: {}", message),
                _ => {}
            }
            events_data.badge().apply(&event);
        }
    });

    // start background scheduler
    scheduler::spawn(commands.clone(), tick);

    if initial.settings.auto_scan {
        info!("Auto scan enabled, starting a scan");
        if let Err(e) = commands.start_scan(initial.settings.scan_options(), None) {
            error!("Auto scan could not start: {}", e);
        }
    }

    // Try to bind to an available port in the configured range
    let host = data.config.server.host.clone();
    let mut last_err: Option<std::io::Error> = None;
    for port in data.config.server.port_start..=data.config.server.port_end {
        let data_clone = data.clone();
        let addr = format!("{}:{}", host, port);
        match HttpServer::new(move || {
            App::new()
                .app_data(data_clone.clone())
                .service(start_scan)
                .service(stop_scan)
                .service(trigger_background)
                .service(scan_status)
                .service(get_data)
                .service(save_data)
                .service(new_books)
                .service(list_series)
                .service(badge)
                .service(export)
                .service(backup)
                .service(restore)
                .service(ignore_series)
                .service(ignore_book)
        })
        .bind(&addr)
        {
            Ok(server) => {
                info!("Listening on http://{}", addr);
                return server.run().await;
            }
            Err(e) => {
                warn!("Could not bind {}: {}", addr, e);
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| std::io::Error::other("no port available in configured range")))
}
