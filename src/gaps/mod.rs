pub mod aggregate;
pub mod types;

pub use aggregate::{aggregate_hourly, classify};
pub use types::{GapRecord, HourlyBucket, Severity};
