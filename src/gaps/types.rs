use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One scheduled-or-observed ride returned by the gaps listing.
///
/// `gtfs_time` is the scheduled start, `siri_time` the observed one. A ride
/// with no `siri_time` is a gap: it was planned but never seen running.
#[derive(Debug, Clone, Deserialize)]
pub struct GapRecord {
    pub gtfs_time: Option<DateTime<Utc>>,
    pub siri_time: Option<DateTime<Utc>>,
}

impl GapRecord {
    /// Records without a schedule anchor carry no planned time and are
    /// skipped by the aggregation.
    pub fn is_schedule_anchored(&self) -> bool {
        self.gtfs_time.is_some()
    }

    pub fn was_observed(&self) -> bool {
        self.siri_time.is_some()
    }
}

/// Planned vs. observed ride counts for one hour-of-day key.
///
/// `hour` is zero-padded `HH:MM`, so sorting the keys as strings sorts the
/// buckets chronologically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HourlyBucket {
    pub hour: String,
    pub planned: u32,
    pub actual: u32,
}

/// How badly a bucket missed its planned service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn color(&self) -> &'static str {
        match self {
            Severity::Low => "green",
            Severity::Medium => "orange",
            Severity::High => "red",
        }
    }
}
