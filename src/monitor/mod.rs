pub mod fetcher;
pub mod resolver;

use chrono::{DateTime, Duration, Utc};

pub use fetcher::{BucketView, SharedBuckets};

/// The time window the resolver and the gap monitor query over.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    /// The default window: the trailing week, ending yesterday.
    pub fn trailing_week(now: DateTime<Utc>) -> Self {
        Self {
            start: now - Duration::days(7),
            end: now - Duration::days(1),
        }
    }
}
