use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::warn;

use crate::search::session::SessionStore;

/// A resolved route for the selected operator/line pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub key: String,
    pub line_ref: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_name: Option<String>,
}

/// The single shared "current query" record.
///
/// Empty strings mean "unset". `routes` stays `None` until the resolver has
/// answered for the current operator/line, and becomes an empty vec when it
/// answered with nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchState {
    pub timestamp: i64,
    #[serde(default)]
    pub operator_id: String,
    #[serde(default)]
    pub line_number: String,
    #[serde(default)]
    pub route_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routes: Option<Vec<Route>>,
}

impl SearchState {
    pub fn with_defaults(now_ms: i64) -> Self {
        Self {
            timestamp: now_ms,
            operator_id: String::new(),
            line_number: String::new(),
            route_key: String::new(),
            routes: None,
        }
    }

    /// The route the current `route_key` points at, if it resolves.
    ///
    /// A key left over from an earlier route list simply fails to match,
    /// which downstream code reads as "no route selected".
    pub fn selected_route(&self) -> Option<&Route> {
        if self.route_key.is_empty() {
            return None;
        }
        self.routes
            .as_deref()?
            .iter()
            .find(|route| route.key == self.route_key)
    }
}

/// Owner of the shared search record.
///
/// All mutation goes through [`SearchStore::mutate`], which applies a pure
/// transform to the latest state under the channel lock, persists the new
/// snapshot to the session store, and publishes it to subscribers. Consumers
/// never see a half-applied update.
pub struct SearchStore {
    tx: watch::Sender<SearchState>,
    session: Box<dyn SessionStore>,
}

impl SearchStore {
    /// Install the bootstrapped state and seed the session store with it.
    pub fn bootstrap(initial: SearchState, session: Box<dyn SessionStore>) -> Self {
        if let Err(e) = session.save(&initial) {
            warn!(error = %e, "failed to seed session store");
        }
        let (tx, _) = watch::channel(initial);
        Self { tx, session }
    }

    pub fn current(&self) -> SearchState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchState> {
        self.tx.subscribe()
    }

    /// The only mutation entry point.
    ///
    /// Two near-simultaneous transforms compose instead of clobbering each
    /// other, because each one receives the state left by the previous.
    pub fn mutate(&self, transform: impl FnOnce(SearchState) -> SearchState) {
        let mut snapshot: Option<SearchState> = None;
        self.tx.send_modify(|state| {
            *state = transform(state.clone());
            snapshot = Some(state.clone());
        });

        if let Some(state) = snapshot {
            if let Err(e) = self.session.save(&state) {
                warn!(error = %e, "failed to persist search state");
            }
        }
    }
}
