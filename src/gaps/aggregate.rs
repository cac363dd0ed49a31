use std::collections::HashMap;

use chrono_tz::Tz;

use crate::gaps::types::{GapRecord, HourlyBucket, Severity};

const LOW_MISS_PERCENT_MAX: f64 = 5.0;
const MEDIUM_MISS_PERCENT_MAX: f64 = 50.0;

/// Reduce raw gap records into per-hour planned/observed counts.
///
/// Records without a schedule time are not counted at all, whatever their
/// observed time says. Bucket keys are the scheduled time rendered as
/// `HH:MM` in `tz`, truncated to the minute.
pub fn aggregate_hourly(records: &[GapRecord], tz: Tz) -> Vec<HourlyBucket> {
    let mut mapping: HashMap<String, (u32, u32)> = HashMap::new();

    for ride in records {
        let Some(gtfs_time) = ride.gtfs_time else {
            continue;
        };
        let planned_hour = gtfs_time.with_timezone(&tz).format("%H:%M").to_string();

        let entry = mapping.entry(planned_hour).or_insert((0, 0));
        entry.0 += 1;
        if ride.siri_time.is_some() {
            entry.1 += 1;
        }
    }

    let mut buckets: Vec<HourlyBucket> = mapping
        .into_iter()
        .map(|(hour, (planned, actual))| HourlyBucket {
            hour,
            planned,
            actual,
        })
        .collect();

    buckets.sort_by(|a, b| a.hour.cmp(&b.hour));
    buckets
}

/// Severity of the misses in one bucket.
///
/// A bucket with no planned rides has nothing to miss and rates Low.
pub fn classify(planned: u32, actual: u32) -> Severity {
    if planned == 0 {
        return Severity::Low;
    }

    let misses = planned.saturating_sub(actual);
    let percentage_misses = misses as f64 / planned as f64 * 100.0;

    if percentage_misses <= LOW_MISS_PERCENT_MAX {
        Severity::Low
    } else if percentage_misses <= MEDIUM_MISS_PERCENT_MAX {
        Severity::Medium
    } else {
        Severity::High
    }
}
