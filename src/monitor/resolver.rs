use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::data::{DataSource, FetchError};
use crate::monitor::DateRange;
use crate::search::{Route, SearchState, SearchStore};

/// Background route resolution.
///
/// Whenever the operator and line number are both set, fetch the candidate
/// routes for the current window and merge them into the search state. The
/// loading flag is raised for the duration of the fetch and lowered on
/// every path out of it.
pub async fn run_route_resolver<D: DataSource>(
    store: Arc<SearchStore>,
    source: Arc<D>,
    mut range_rx: watch::Receiver<DateRange>,
    loading: Arc<AtomicBool>,
) {
    let mut search_rx = store.subscribe();
    let mut last_input: Option<(String, String, DateRange)> = None;

    loop {
        let state = search_rx.borrow_and_update().clone();
        let range = *range_rx.borrow_and_update();

        if state.operator_id.is_empty() || state.line_number.is_empty() {
            last_input = None;
        } else {
            let input = (state.operator_id.clone(), state.line_number.clone(), range);

            // Refetch only when one of the inputs actually moved; the merge
            // below mutates the store, and that wake-up must not loop back
            // into another fetch.
            if last_input.as_ref() != Some(&input) {
                last_input = Some(input);

                loading.store(true, Ordering::SeqCst);
                let result = source
                    .fetch_routes(range.start, range.end, &state.operator_id, &state.line_number)
                    .await;
                apply_route_result(&store, &state.line_number, result);
                loading.store(false, Ordering::SeqCst);
            }
        }

        tokio::select! {
            changed = search_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = range_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}

/// Merge a completed route fetch, unless the line has moved on since the
/// request was issued.
fn apply_route_result(
    store: &SearchStore,
    issued_for_line: &str,
    result: Result<Vec<Route>, FetchError>,
) {
    match result {
        Ok(routes) => {
            store.mutate(|current| {
                if current.line_number == issued_for_line {
                    info!(
                        line = %issued_for_line,
                        routes = routes.len(),
                        "resolved routes for line"
                    );
                    SearchState {
                        routes: Some(routes),
                        ..current
                    }
                } else {
                    debug!(
                        issued = %issued_for_line,
                        current = %current.line_number,
                        "discarding stale route response"
                    );
                    current
                }
            });
        }
        Err(e) => {
            warn!(error = %e, line = %issued_for_line, "route fetch failed, keeping previous routes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::session::MemorySession;
    use chrono::{DateTime, Utc};
    use std::time::Duration;

    fn store_with(operator: &str, line: &str) -> Arc<SearchStore> {
        let state = SearchState {
            timestamp: 1_700_000_000_000,
            operator_id: operator.to_string(),
            line_number: line.to_string(),
            route_key: String::new(),
            routes: None,
        };
        Arc::new(SearchStore::bootstrap(
            state,
            Box::new(MemorySession::default()),
        ))
    }

    fn route_for(line: &str) -> Route {
        Route {
            key: format!("route-{line}"),
            line_ref: line.parse().unwrap_or(0),
            long_name: None,
        }
    }

    /// Answers every route request for the line it was asked about, after a
    /// simulated network delay.
    struct SlowSource;

    impl DataSource for SlowSource {
        async fn fetch_gaps(
            &self,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
            _operator_id: &str,
            _line_ref: i64,
        ) -> Result<Vec<crate::gaps::GapRecord>, FetchError> {
            Ok(Vec::new())
        }

        async fn fetch_routes(
            &self,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
            _operator_id: &str,
            line_number: &str,
        ) -> Result<Vec<Route>, FetchError> {
            let line = line_number.to_string();
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(vec![route_for(&line)])
        }
    }

    #[test]
    fn matching_line_merges_the_routes() {
        let store = store_with("3", "17");

        apply_route_result(&store, "17", Ok(vec![route_for("17")]));

        let state = store.current();
        assert_eq!(state.routes.as_ref().map(Vec::len), Some(1));
        assert_eq!(state.routes.unwrap()[0].key, "route-17");
    }

    #[test]
    fn superseded_line_discards_the_response() {
        let store = store_with("3", "18");

        apply_route_result(&store, "17", Ok(vec![route_for("17")]));

        assert!(store.current().routes.is_none());
    }

    #[test]
    fn failed_fetch_keeps_previous_routes() {
        let store = store_with("3", "17");
        store.mutate(|current| SearchState {
            routes: Some(vec![route_for("17")]),
            ..current
        });

        apply_route_result(
            &store,
            "17",
            Err(FetchError::Status(reqwest::StatusCode::BAD_GATEWAY)),
        );

        assert_eq!(store.current().routes.as_ref().map(Vec::len), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn resolver_populates_routes_and_clears_the_flag() {
        let store = store_with("3", "17");
        let loading = Arc::new(AtomicBool::new(false));
        let (_range_tx, range_rx) = watch::channel(DateRange::trailing_week(Utc::now()));

        tokio::spawn(run_route_resolver(
            store.clone(),
            Arc::new(SlowSource),
            range_rx,
            loading.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(200)).await;

        let state = store.current();
        assert_eq!(state.routes.unwrap()[0].key, "route-17");
        assert!(!loading.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn response_for_a_superseded_line_never_lands() {
        let store = store_with("3", "17");
        let loading = Arc::new(AtomicBool::new(false));
        let (_range_tx, range_rx) = watch::channel(DateRange::trailing_week(Utc::now()));

        tokio::spawn(run_route_resolver(
            store.clone(),
            Arc::new(SlowSource),
            range_rx,
            loading.clone(),
        ));

        // Change the line while the first request is still in flight.
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.mutate(|current| SearchState {
            line_number: "18".to_string(),
            ..current
        });

        tokio::time::sleep(Duration::from_millis(500)).await;

        let state = store.current();
        assert_eq!(state.routes.unwrap()[0].key, "route-18");
        assert!(!loading.load(Ordering::SeqCst));
    }
}
