pub mod client;

pub use client::{DEFAULT_API_BASE, DataSource, FetchError, HttpDataSource};
