//! # Thermia - spot price driven EVU control for heat pumps
//!
//! Once an hour the controller looks at the day-ahead electricity price and
//! decides whether the heat pump may run normally or should drop into EVU
//! (lowered temperature) mode, then drives a network relay wired to the heat
//! pump's EVU input.
//!
//! ## Architecture
//!
//! - `config`: YAML configuration, environment overrides and validation
//! - `logging`: tracing setup and per-component loggers
//! - `spot_price`: day-ahead price feed, rolling per-day cache and the
//!   cheapest-hour selector
//! - `policy`: the hourly decision rules
//! - `relay`: idempotent relay actuation and the Shelly HTTP relay
//! - `scheduler`: the hourly tick loop and optional background refresher
//!
//! Data flows one way per tick: refresh prices, decide, actuate.

pub mod config;
pub mod error;
pub mod logging;
pub mod policy;
pub mod relay;
pub mod scheduler;
pub mod spot_price;

// Re-export commonly used types
pub use config::Config;
pub use error::{Result, ThermiaError};
pub use policy::{Decision, DecisionConfig, HourSet, Verdict, decide};
pub use relay::{ApplyOutcome, Relay, RelayController, RelayStatus};
pub use scheduler::{Scheduler, TickReport};
pub use spot_price::{PriceCache, PriceFeed, PriceLookup, PriceTable};
