use std::sync::Arc;

use chrono_tz::Tz;
use serde::Serialize;
use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};

use crate::data::DataSource;
use crate::gaps::{Severity, aggregate_hourly, classify};
use crate::monitor::DateRange;
use crate::search::{SearchState, SearchStore};

/// One rendered bucket, ready for the visualization layer.
#[derive(Debug, Clone, Serialize)]
pub struct BucketView {
    pub hour: String,
    pub planned: u32,
    pub actual: u32,
    pub severity: Severity,
    pub color: &'static str,
}

pub type SharedBuckets = Arc<RwLock<Vec<BucketView>>>;

/// The input tuple a gap fetch is issued for.
#[derive(Debug, Clone, PartialEq)]
struct GapQuery {
    operator_id: String,
    line_ref: i64,
    range: DateRange,
}

/// Decide what to fetch for the current state, if anything.
///
/// A route key that does not match a resolved route means no route is
/// selected, and nothing is fetched.
fn plan_query(state: &SearchState, range: DateRange) -> Option<GapQuery> {
    if state.operator_id.is_empty() {
        return None;
    }
    let route = state.selected_route()?;
    Some(GapQuery {
        operator_id: state.operator_id.clone(),
        line_ref: route.line_ref,
        range,
    })
}

/// Background gap aggregation.
///
/// Fetches the gap listing for the current query tuple, reduces it into
/// hourly buckets with a severity tier, and publishes the result for the
/// API to serve. A response for a superseded tuple is discarded, and a
/// failed fetch leaves the previously published buckets in place.
pub async fn run_gap_monitor<D: DataSource>(
    store: Arc<SearchStore>,
    source: Arc<D>,
    mut range_rx: watch::Receiver<DateRange>,
    buckets: SharedBuckets,
    tz: Tz,
) {
    let mut search_rx = store.subscribe();
    let mut last_query: Option<GapQuery> = None;

    loop {
        let state = search_rx.borrow_and_update().clone();
        let range = *range_rx.borrow_and_update();

        let planned = plan_query(&state, range);
        if planned.is_none() {
            // Deselecting forgets the memo, so reselecting the same
            // filters fetches fresh data.
            last_query = None;
        }

        if let Some(query) = planned {
            if last_query.as_ref() != Some(&query) {
                last_query = Some(query.clone());

                let result = source
                    .fetch_gaps(
                        query.range.start,
                        query.range.end,
                        &query.operator_id,
                        query.line_ref,
                    )
                    .await;

                // The inputs may have moved on while the fetch was in
                // flight; the next iteration issues the fresh request.
                let still_current =
                    plan_query(&search_rx.borrow(), *range_rx.borrow()).as_ref() == Some(&query);

                if !still_current {
                    debug!(
                        operator = %query.operator_id,
                        line_ref = query.line_ref,
                        "discarding stale gap response"
                    );
                } else {
                    match result {
                        Ok(records) => {
                            let views: Vec<BucketView> = aggregate_hourly(&records, tz)
                                .into_iter()
                                .map(|bucket| {
                                    let severity = classify(bucket.planned, bucket.actual);
                                    BucketView {
                                        hour: bucket.hour,
                                        planned: bucket.planned,
                                        actual: bucket.actual,
                                        severity,
                                        color: severity.color(),
                                    }
                                })
                                .collect();

                            info!(
                                operator = %query.operator_id,
                                line_ref = query.line_ref,
                                rides = records.len(),
                                buckets = views.len(),
                                "aggregated gap buckets"
                            );
                            *buckets.write().await = views;
                        }
                        Err(e) => {
                            warn!(error = %e, "gap fetch failed, keeping previous buckets");
                        }
                    }
                }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::FetchError;
    use crate::gaps::GapRecord;
    use crate::search::Route;
    use crate::search::session::MemorySession;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn state_with_route(line_ref: i64) -> SearchState {
        SearchState {
            timestamp: 1_700_000_000_000,
            operator_id: "3".to_string(),
            line_number: "17".to_string(),
            route_key: format!("R{line_ref}"),
            routes: Some(vec![
                Route {
                    key: "R4001".to_string(),
                    line_ref: 4001,
                    long_name: None,
                },
                Route {
                    key: "R4002".to_string(),
                    line_ref: 4002,
                    long_name: None,
                },
            ]),
        }
    }

    fn ride(hour: u32, observed: bool) -> GapRecord {
        GapRecord {
            gtfs_time: Some(Utc.with_ymd_and_hms(2023, 11, 15, hour, 0, 0).unwrap()),
            siri_time: observed.then(|| Utc.with_ymd_and_hms(2023, 11, 15, hour, 1, 0).unwrap()),
        }
    }

    /// Returns one planned-and-missed ride per requested line_ref unit
    /// digit, after a simulated network delay; errors when told to.
    struct ScriptedSource {
        fail: AtomicBool,
    }

    impl ScriptedSource {
        fn new() -> Self {
            Self {
                fail: AtomicBool::new(false),
            }
        }
    }

    impl DataSource for ScriptedSource {
        async fn fetch_gaps(
            &self,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
            _operator_id: &str,
            line_ref: i64,
        ) -> Result<Vec<GapRecord>, FetchError> {
            let fail = self.fail.load(Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if fail {
                return Err(FetchError::Status(reqwest::StatusCode::BAD_GATEWAY));
            }
            let planned = (line_ref % 10) as usize;
            Ok((0..planned).map(|_| ride(8, false)).collect())
        }

        async fn fetch_routes(
            &self,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
            _operator_id: &str,
            _line_number: &str,
        ) -> Result<Vec<Route>, FetchError> {
            Ok(Vec::new())
        }
    }

    fn store_with(state: SearchState) -> Arc<SearchStore> {
        Arc::new(SearchStore::bootstrap(
            state,
            Box::new(MemorySession::default()),
        ))
    }

    #[test]
    fn no_query_without_an_operator() {
        let mut state = state_with_route(4001);
        state.operator_id = String::new();
        let range = DateRange::trailing_week(Utc.with_ymd_and_hms(2023, 11, 15, 0, 0, 0).unwrap());

        assert!(plan_query(&state, range).is_none());
    }

    #[test]
    fn unmatched_route_key_means_no_route_selected() {
        let mut state = state_with_route(4001);
        state.route_key = "gone".to_string();
        let range = DateRange::trailing_week(Utc.with_ymd_and_hms(2023, 11, 15, 0, 0, 0).unwrap());

        assert!(plan_query(&state, range).is_none());
    }

    #[test]
    fn matched_route_key_yields_its_line_ref() {
        let state = state_with_route(4002);
        let range = DateRange::trailing_week(Utc.with_ymd_and_hms(2023, 11, 15, 0, 0, 0).unwrap());

        let query = plan_query(&state, range).unwrap();
        assert_eq!(query.operator_id, "3");
        assert_eq!(query.line_ref, 4002);
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_publishes_classified_buckets() {
        let store = store_with(state_with_route(4001));
        let buckets: SharedBuckets = Arc::new(RwLock::new(Vec::new()));
        let (_range_tx, range_rx) = watch::channel(DateRange::trailing_week(Utc::now()));

        tokio::spawn(run_gap_monitor(
            store.clone(),
            Arc::new(ScriptedSource::new()),
            range_rx,
            buckets.clone(),
            Tz::UTC,
        ));

        tokio::time::sleep(Duration::from_millis(200)).await;

        let published = buckets.read().await.clone();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].hour, "08:00");
        assert_eq!(published[0].planned, 1);
        assert_eq!(published[0].actual, 0);
        assert_eq!(published[0].severity, Severity::High);
        assert_eq!(published[0].color, "red");
    }

    #[tokio::test(start_paused = true)]
    async fn stale_response_is_discarded_in_favor_of_the_newer_query() {
        let store = store_with(state_with_route(4001));
        let buckets: SharedBuckets = Arc::new(RwLock::new(Vec::new()));
        let (_range_tx, range_rx) = watch::channel(DateRange::trailing_week(Utc::now()));

        tokio::spawn(run_gap_monitor(
            store.clone(),
            Arc::new(ScriptedSource::new()),
            range_rx,
            buckets.clone(),
            Tz::UTC,
        ));

        // Switch routes while the first request is still in flight.
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.mutate(|current| SearchState {
            route_key: "R4002".to_string(),
            ..current
        });

        tokio::time::sleep(Duration::from_millis(500)).await;

        let published = buckets.read().await.clone();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].planned, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_retains_the_previous_buckets() {
        let store = store_with(state_with_route(4001));
        let buckets: SharedBuckets = Arc::new(RwLock::new(Vec::new()));
        let now = Utc::now();
        let (range_tx, range_rx) = watch::channel(DateRange::trailing_week(now));
        let source = Arc::new(ScriptedSource::new());

        tokio::spawn(run_gap_monitor(
            store.clone(),
            source.clone(),
            range_rx,
            buckets.clone(),
            Tz::UTC,
        ));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(buckets.read().await.len(), 1);

        // Make the next fetch fail and trigger it by widening the window.
        source.fail.store(true, Ordering::SeqCst);
        range_tx
            .send(DateRange {
                start: now - chrono::Duration::days(14),
                end: now - chrono::Duration::days(1),
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;

        let published = buckets.read().await.clone();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].planned, 1);
    }
}
