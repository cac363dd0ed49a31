use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

use crate::monitor::{BucketView, DateRange, SharedBuckets};
use crate::search::sync::{MemoryNavigation, find_page};
use crate::search::{SearchState, SearchStore};

/// Everything the handlers need, cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SearchStore>,
    pub nav: Arc<MemoryNavigation>,
    pub buckets: SharedBuckets,
    pub routes_loading: Arc<AtomicBool>,
    pub range_tx: Arc<watch::Sender<DateRange>>,
}

pub async fn run_server(state: AppState, port: u16) {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/search", get(get_search).post(update_search))
        .route("/api/location", get(get_location))
        .route("/api/navigate", post(navigate))
        .route("/api/date-range", post(set_date_range))
        .route("/api/gaps-patterns", get(get_gaps_patterns))
        .with_state(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(%addr, "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[derive(Serialize)]
struct SearchResponse {
    #[serde(flatten)]
    state: SearchState,
    routes_loading: bool,
}

async fn get_search(State(app): State<AppState>) -> impl IntoResponse {
    Json(SearchResponse {
        state: app.store.current(),
        routes_loading: app.routes_loading.load(Ordering::SeqCst),
    })
}

/// Partial update, standing in for the operator/line/route/date pickers.
#[derive(Deserialize)]
struct SearchUpdate {
    #[serde(default, rename = "operatorId")]
    operator_id: Option<String>,
    #[serde(default, rename = "lineNumber")]
    line_number: Option<String>,
    #[serde(default, rename = "routeKey")]
    route_key: Option<String>,
    #[serde(default)]
    timestamp: Option<i64>,
}

async fn update_search(
    State(app): State<AppState>,
    Json(update): Json<SearchUpdate>,
) -> impl IntoResponse {
    app.store.mutate(|mut current| {
        if let Some(operator_id) = update.operator_id {
            current.operator_id = operator_id;
        }
        if let Some(line_number) = update.line_number {
            current.line_number = line_number;
        }
        if let Some(route_key) = update.route_key {
            current.route_key = route_key;
        }
        if let Some(timestamp) = update.timestamp {
            current.timestamp = timestamp;
        }
        current
    });

    Json(app.store.current())
}

#[derive(Serialize)]
struct LocationResponse {
    path: String,
    query: Vec<(String, String)>,
    query_string: String,
}

async fn get_location(State(app): State<AppState>) -> impl IntoResponse {
    let location = app.nav.location();
    Json(LocationResponse {
        query_string: location.query_string(),
        path: location.path,
        query: location.query,
    })
}

#[derive(Deserialize)]
struct NavigateRequest {
    path: String,
}

async fn navigate(
    State(app): State<AppState>,
    Json(request): Json<NavigateRequest>,
) -> impl IntoResponse {
    let Some(page) = find_page(&request.path) else {
        return (StatusCode::NOT_FOUND, "unknown page").into_response();
    };
    info!(page = page.label, "navigating");
    app.nav.navigate(&request.path);
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Deserialize)]
struct DateRangeRequest {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

async fn set_date_range(
    State(app): State<AppState>,
    Json(request): Json<DateRangeRequest>,
) -> impl IntoResponse {
    if request.end < request.start {
        return (StatusCode::BAD_REQUEST, "end precedes start").into_response();
    }
    app.range_tx.send_replace(DateRange {
        start: request.start,
        end: request.end,
    });
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Serialize)]
struct GapsPatternsResponse {
    buckets: Vec<BucketView>,
}

async fn get_gaps_patterns(State(app): State<AppState>) -> impl IntoResponse {
    let buckets = app.buckets.read().await.clone();
    Json(GapsPatternsResponse { buckets })
}
