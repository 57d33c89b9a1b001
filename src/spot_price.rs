//! Day-ahead spot prices
//!
//! Prices are fetched per UTC day from a [`PriceFeed`], aligned to the local
//! day and kept in a small rolling cache that the control policy queries once
//! per hour.

pub mod cache;
pub mod entsoe;
pub mod selector;

pub use cache::{PriceCache, PriceLookup, PriceTable, RefreshOutcome, align_to_local_day};
pub use entsoe::EntsoeClient;
pub use selector::cheapest_hours;

use crate::error::Result;
use chrono::NaiveDate;

/// Filler for hours the fetched window does not cover. High enough that the
/// selector never picks it.
pub const HIGH_PRICE: f64 = 9999.99;

/// Feed prices are per MWh; dividing by this gives the display unit (c/kWh).
pub const DISPLAY_UNIT_DIVISOR: f64 = 10.0;

/// Hours in a stored day
pub const HOURS_PER_DAY: usize = 24;

/// Source of day-ahead prices
#[async_trait::async_trait]
pub trait PriceFeed: Send + Sync {
    /// Fetch the 24 hourly prices of the UTC day `day`, hour 0 first.
    async fn fetch_day(&self, day: NaiveDate) -> Result<Vec<f64>>;
}
