use std::sync::{Arc, Mutex};

use qstring::QString;
use tokio::sync::watch;
use tracing::debug;

use crate::search::state::{SearchState, SearchStore};

pub const TIMESTAMP_PARAM: &str = "timestamp";
pub const OPERATOR_PARAM: &str = "operatorId";
pub const LINE_PARAM: &str = "lineNumber";
pub const ROUTE_PARAM: &str = "routeKey";

/// One entry of the application's page table.
pub struct Page {
    pub label: &'static str,
    pub path: &'static str,
    /// Pages that render from the shared query keep it mirrored into the
    /// location's query string, so the view stays shareable.
    pub search_params_required: bool,
}

pub const PAGES: &[Page] = &[
    Page {
        label: "Dashboard",
        path: "/dashboard",
        search_params_required: false,
    },
    Page {
        label: "Timeline",
        path: "/timeline",
        search_params_required: true,
    },
    Page {
        label: "Gaps",
        path: "/gaps",
        search_params_required: true,
    },
    Page {
        label: "Gaps patterns",
        path: "/gaps_patterns",
        search_params_required: false,
    },
    Page {
        label: "Realtime map",
        path: "/map",
        search_params_required: false,
    },
    Page {
        label: "Single line map",
        path: "/single-line-map",
        search_params_required: true,
    },
    Page {
        label: "About",
        path: "/about",
        search_params_required: false,
    },
];

pub fn find_page(path: &str) -> Option<&'static Page> {
    PAGES.iter().find(|page| page.path == path)
}

/// A navigation location: path plus query pairs in publish order.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl Location {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn query_string(&self) -> String {
        QString::new(self.query.clone()).to_string()
    }
}

/// Parse a path and raw query string into a location.
pub fn parse_location(path: &str, query_str: &str) -> Location {
    Location {
        path: path.to_string(),
        query: QString::from(query_str).into_pairs(),
    }
}

/// In-process navigation surface standing in for the browser location.
///
/// `navigate` pushes a new entry; `replace_query` rewrites the current one
/// in place, so publishing the search state never grows the history.
pub struct MemoryNavigation {
    entries: Mutex<Vec<Location>>,
    tx: watch::Sender<Location>,
}

impl MemoryNavigation {
    pub fn new(initial: Location) -> Self {
        let (tx, _) = watch::channel(initial.clone());
        Self {
            entries: Mutex::new(vec![initial]),
            tx,
        }
    }

    pub fn location(&self) -> Location {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Location> {
        self.tx.subscribe()
    }

    pub fn history_len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn navigate(&self, path: &str) {
        let location = Location::new(path);
        self.entries.lock().unwrap().push(location.clone());
        self.tx.send_replace(location);
    }

    pub fn replace_query(&self, query: Vec<(String, String)>) {
        let mut location = self.tx.borrow().clone();
        location.query = query;

        let mut entries = self.entries.lock().unwrap();
        if let Some(current) = entries.last_mut() {
            *current = location.clone();
        }
        drop(entries);

        self.tx.send_replace(location);
    }
}

/// Merge the initial location's query over the persisted session state.
///
/// Fields present in the query win; absent fields fall back to the
/// persisted value; a fresh session starts from `now_ms` and empty strings.
/// Runs once per session, before any task observes the store.
pub fn bootstrap_state(
    location: &Location,
    persisted: Option<SearchState>,
    now_ms: i64,
) -> SearchState {
    let base = persisted.unwrap_or_else(|| SearchState::with_defaults(now_ms));

    let timestamp = location
        .param(TIMESTAMP_PARAM)
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(base.timestamp);
    let field = |name: &str, fallback: &str| {
        location
            .param(name)
            .map(str::to_string)
            .unwrap_or_else(|| fallback.to_string())
    };

    let line_number = field(LINE_PARAM, &base.line_number);
    // Resolved routes belong to the line they were resolved for.
    let routes = if line_number == base.line_number {
        base.routes
    } else {
        None
    };

    SearchState {
        timestamp,
        operator_id: field(OPERATOR_PARAM, &base.operator_id),
        line_number,
        route_key: field(ROUTE_PARAM, &base.route_key),
        routes,
    }
}

/// Build the query pairs a state-dependent page must carry.
///
/// The timestamp is always written; the string fields only when set.
pub fn state_query(state: &SearchState) -> Vec<(String, String)> {
    let mut params = vec![(TIMESTAMP_PARAM.to_string(), state.timestamp.to_string())];
    if !state.operator_id.is_empty() {
        params.push((OPERATOR_PARAM.to_string(), state.operator_id.clone()));
    }
    if !state.line_number.is_empty() {
        params.push((LINE_PARAM.to_string(), state.line_number.clone()));
    }
    if !state.route_key.is_empty() {
        params.push((ROUTE_PARAM.to_string(), state.route_key.clone()));
    }
    params
}

/// Mirror the store into the location's query for pages that require it.
///
/// Returns whether a write happened. Writing only when the rendered query
/// differs from the location's current one is what stops a publish from
/// re-triggering itself through the location watch.
pub fn publish(state: &SearchState, nav: &MemoryNavigation) -> bool {
    let location = nav.location();
    let Some(page) = find_page(&location.path) else {
        return false;
    };
    if !page.search_params_required {
        return false;
    }

    let desired = state_query(state);
    if desired == location.query {
        return false;
    }

    debug!(path = %location.path, "publishing search state to query params");
    nav.replace_query(desired);
    true
}

/// Background reconciliation: re-publish whenever the search state or the
/// current location changes.
pub async fn run_synchronizer(store: Arc<SearchStore>, nav: Arc<MemoryNavigation>) {
    let mut search_rx = store.subscribe();
    let mut location_rx = nav.subscribe();

    loop {
        let state = store.current();
        publish(&state, &nav);

        tokio::select! {
            changed = search_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = location_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}
