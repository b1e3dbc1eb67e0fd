//! Reverse geocoding pipeline
//!
//! Keeps the latency and rate limits of the external address lookup off the
//! attendance clock-in/out path. The attendance flow enqueues a
//! [`GeocodeJob`]; a single worker drains the queue through the
//! [`RateLimiter`] and [`AddressResolver`] and writes the address back to the
//! attendance row. Completion is only observable through that row.

pub mod rate_limiter;
pub mod resolver;
pub mod store;
pub mod worker;

pub use rate_limiter::RateLimiter;
pub use resolver::{
    coordinates_label, unknown_location, AddressLookup, AddressResolver, NominatimClient,
};
pub use store::{AddressColumn, AttendanceStore, SqliteAttendanceStore};
pub use worker::{GeocodeQueue, GeocodeWorker};

use thiserror::Error;

/// Request to resolve the coordinates of one attendance event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeocodeJob {
    pub attendance_id: i64,
    pub latitude: f64,
    pub longitude: f64,
    /// Selects the check-out address column instead of check-in
    pub is_checkout: bool,
}

/// Geocoding errors
#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("Lookup request failed: {0}")]
    Lookup(String),

    #[error("Lookup returned HTTP {0}")]
    Status(u16),

    #[error("Lookup response could not be decoded: {0}")]
    Decode(String),

    #[error("Lookup returned no address")]
    EmptyResult,

    #[error("Geocode queue is saturated, job dropped")]
    QueueSaturated,

    #[error("Geocode worker has stopped")]
    QueueClosed,
}
