//! Market Client (C3): event discovery, mid-price extraction, and outcome
//! resolution for a city's bracket-contract event on a given day.

pub mod client;

use chrono::NaiveDate;

pub use client::MarketClient;

/// One temperature bracket within an event (`[min_temp, max_temp)`, with
/// `max_temp = f64::INFINITY` for an open-ended "or higher" bucket and
/// `min_temp = f64::NEG_INFINITY` for "or lower").
#[derive(Debug, Clone)]
pub struct Bracket {
    pub market_id: String,
    pub condition_id: String,
    pub label: String,
    pub min_temp: f64,
    pub max_temp: f64,
    pub closed: bool,
    pub liquidity: Option<f64>,
}

impl Bracket {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min_temp && value < self.max_temp
    }
}

/// The brackets discovered for one (city, event_day) pair, plus the event
/// identifier needed later for `outcome_prices`.
#[derive(Debug, Clone)]
pub struct BracketSet {
    pub event_identifier: String,
    pub city: String,
    pub event_day: NaiveDate,
    pub brackets: Vec<Bracket>,
}

impl BracketSet {
    /// §4.10 step (b): an event has terminated when no bracket is open.
    pub fn any_open(&self) -> bool {
        self.brackets.iter().any(|b| !b.closed)
    }
}
