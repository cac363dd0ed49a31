use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::gaps::GapRecord;
use crate::search::Route;

pub const DEFAULT_API_BASE: &str = "https://open-bus-stride-api.hasadna.org.il";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// The external gaps/routes API.
///
/// The monitor tasks only depend on this trait, so tests drive them with
/// canned sources instead of a live server.
pub trait DataSource: Send + Sync + 'static {
    fn fetch_gaps(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        operator_id: &str,
        line_ref: i64,
    ) -> impl Future<Output = Result<Vec<GapRecord>, FetchError>> + Send;

    fn fetch_routes(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        operator_id: &str,
        line_number: &str,
    ) -> impl Future<Output = Result<Vec<Route>, FetchError>> + Send;
}

/// Row shape of the gaps listing.
#[derive(Debug, Deserialize)]
struct GapRow {
    gtfs_start_time: Option<DateTime<Utc>>,
    siri_start_time: Option<DateTime<Utc>>,
}

impl GapRow {
    fn into_record(self) -> GapRecord {
        GapRecord {
            gtfs_time: self.gtfs_start_time,
            siri_time: self.siri_start_time,
        }
    }
}

/// Row shape of the routes listing.
#[derive(Debug, Deserialize)]
struct RouteRow {
    key: String,
    line_ref: i64,
    #[serde(default)]
    route_long_name: Option<String>,
}

impl RouteRow {
    fn into_route(self) -> Route {
        Route {
            key: self.key,
            line_ref: self.line_ref,
            long_name: self.route_long_name,
        }
    }
}

#[derive(Clone)]
pub struct HttpDataSource {
    client: reqwest::Client,
    base: String,
}

impl HttpDataSource {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Fetch and decode in two steps, so transport and decode failures stay
    /// distinguishable.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let url = format!("{}{}", self.base, path);
        let response = self.client.get(&url).query(query).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

impl DataSource for HttpDataSource {
    async fn fetch_gaps(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        operator_id: &str,
        line_ref: i64,
    ) -> Result<Vec<GapRecord>, FetchError> {
        let rows: Vec<GapRow> = self
            .get_json(
                "/gaps_patterns/list",
                &[
                    ("date_from", from.to_rfc3339()),
                    ("date_to", to.to_rfc3339()),
                    ("operator_ref", operator_id.to_string()),
                    ("line_ref", line_ref.to_string()),
                ],
            )
            .await?;

        Ok(rows.into_iter().map(GapRow::into_record).collect())
    }

    async fn fetch_routes(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        operator_id: &str,
        line_number: &str,
    ) -> Result<Vec<Route>, FetchError> {
        let rows: Vec<RouteRow> = self
            .get_json(
                "/gtfs_routes/list",
                &[
                    ("date_from", from.to_rfc3339()),
                    ("date_to", to.to_rfc3339()),
                    ("operator_ref", operator_id.to_string()),
                    ("route_short_name", line_number.to_string()),
                ],
            )
            .await?;

        Ok(rows.into_iter().map(RouteRow::into_route).collect())
    }
}
