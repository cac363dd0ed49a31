mod api;
mod data;
mod gaps;
mod monitor;
mod search;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use chrono::Utc;
use chrono_tz::Tz;
use clap::Parser;
use tokio::sync::{RwLock, watch};
use tracing::{error, info, warn};

use crate::api::server::AppState;
use crate::data::HttpDataSource;
use crate::monitor::{DateRange, SharedBuckets};
use crate::search::SearchStore;
use crate::search::session::{JsonFileSession, SessionStore};
use crate::search::sync::{self, MemoryNavigation};

#[derive(Parser)]
#[command(name = "transit-gaps-monitor")]
#[command(about = "Planned vs. observed transit service gap monitor")]
struct Args {
    /// Port to run the HTTP server on
    #[arg(short, long, env = "SERVER_PORT", default_value = "3001")]
    port: u16,

    /// Base URL of the gaps/routes API
    #[arg(long, env = "GAPS_API_BASE", default_value = data::DEFAULT_API_BASE)]
    api_base: String,

    /// Path of the session-scoped search state file
    #[arg(long, env = "SESSION_FILE", default_value = "search_session.json")]
    session_file: String,

    /// Timezone the hourly buckets are rendered in
    #[arg(long, env = "DISPLAY_TZ", default_value = "Asia/Jerusalem")]
    timezone: String,

    /// Page the session starts on
    #[arg(long, default_value = "/dashboard")]
    start_path: String,

    /// Query string seeding the initial location, e.g. "operatorId=3&lineNumber=17"
    #[arg(long, default_value = "")]
    query: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt::init();

    let tz: Tz = match args.timezone.parse() {
        Ok(tz) => tz,
        Err(_) => {
            error!(timezone = %args.timezone, "unknown timezone name");
            return;
        }
    };

    // Captured once; every clock-derived default below comes from here.
    let now = Utc::now();

    let session = JsonFileSession::new(&args.session_file);
    let persisted = match session.load() {
        Ok(state) => state,
        Err(e) => {
            warn!(error = %e, "failed to read session file, starting fresh");
            None
        }
    };

    let nav = Arc::new(MemoryNavigation::new(sync::parse_location(
        &args.start_path,
        &args.query,
    )));
    let initial = sync::bootstrap_state(&nav.location(), persisted, now.timestamp_millis());
    info!(
        operator = %initial.operator_id,
        line = %initial.line_number,
        route = %initial.route_key,
        "bootstrapped search state"
    );
    let store = Arc::new(SearchStore::bootstrap(initial, Box::new(session)));

    let (range_tx, range_rx) = watch::channel(DateRange::trailing_week(now));
    let source = Arc::new(HttpDataSource::new(&args.api_base));
    let buckets: SharedBuckets = Arc::new(RwLock::new(Vec::new()));
    let routes_loading = Arc::new(AtomicBool::new(false));

    let sync_handle = tokio::spawn(sync::run_synchronizer(store.clone(), nav.clone()));
    let resolver_handle = tokio::spawn(monitor::resolver::run_route_resolver(
        store.clone(),
        source.clone(),
        range_rx.clone(),
        routes_loading.clone(),
    ));
    let monitor_handle = tokio::spawn(monitor::fetcher::run_gap_monitor(
        store.clone(),
        source,
        range_rx,
        buckets.clone(),
        tz,
    ));

    let app_state = AppState {
        store,
        nav,
        buckets,
        routes_loading,
        range_tx: Arc::new(range_tx),
    };
    let api_handle = tokio::spawn(api::server::run_server(app_state, args.port));

    tokio::select! {
        _ = sync_handle => error!("synchronizer task exited"),
        _ = resolver_handle => error!("route resolver exited"),
        _ = monitor_handle => error!("gap monitor exited"),
        _ = api_handle => error!("API server exited"),
    }
}
