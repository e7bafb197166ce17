//! Forecast Client (C2): fetches hourly temperature forecasts keyed by
//! (lat, lon, local-midnight-with-timezone, hours).

pub mod client;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;

pub use client::ForecastClient;

/// The `start_local` argument as it arrives at the client boundary. Modeled
/// as an enum (rather than requiring the type system to rule out "naive"
/// entirely) because callers — in principle — may have a naive instant on
/// hand and the contract is that the client rejects it rather than guessing
/// an offset.
#[derive(Debug, Clone)]
pub enum StartLocal {
    /// Timezone-aware instant; emitted to the provider with its offset intact.
    Aware(DateTime<FixedOffset>),
    /// Lacks a timezone offset. Always rejected with `invalid_argument`.
    Naive(NaiveDateTime),
}

impl StartLocal {
    pub fn aware(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            StartLocal::Aware(dt) => Some(*dt),
            StartLocal::Naive(_) => None,
        }
    }
}

/// One hourly sample.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ForecastPoint {
    pub time: DateTime<FixedOffset>,
    pub temperature_kelvin: f64,
}

/// An ordered sequence of hourly samples starting at the event day's local
/// midnight, plus the metadata needed to snapshot and re-derive it.
#[derive(Debug, Clone, Serialize)]
pub struct Forecast {
    pub points: Vec<ForecastPoint>,
    pub fetch_time: DateTime<Utc>,
    pub event_day: NaiveDate,
    pub station_code: String,
    /// The local-midnight instant passed to the provider, offset preserved —
    /// not normalized to UTC.
    pub start_local: DateTime<FixedOffset>,
}

impl Forecast {
    pub fn temperatures_kelvin(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.temperature_kelvin).collect()
    }
}
