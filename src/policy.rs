//! Heating control policy
//!
//! Turns the current price situation into a [`Verdict`] once per hour. Rules
//! are checked in a fixed priority order; whenever a price rule lacks data the
//! fixed schedule decides instead.

use crate::error::{Result, ThermiaError};
use crate::spot_price::PriceLookup;
use chrono::{DateTime, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use std::fmt;
use std::str::FromStr;

/// What the heat pump should do this hour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// Run unrestricted
    Normal = 0,
    /// Assert the EVU / lowered temperature signal
    Reduced = 1,
}

impl Verdict {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Reduced => "REDUCED",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which rule produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    ThresholdAndActiveHours,
    ActiveHours,
    Threshold,
    Schedule,
}

impl Rule {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ThresholdAndActiveHours => "threshold+active_hours",
            Self::ActiveHours => "active_hours",
            Self::Threshold => "threshold",
            Self::Schedule => "schedule",
        }
    }
}

/// Set of hours of the day (0-23)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HourSet([bool; 24]);

/// Schedule entries beyond this count are rejected
pub const MAX_SCHEDULE_ENTRIES: usize = 24;

impl HourSet {
    pub const fn empty() -> Self {
        Self([false; 24])
    }

    pub fn contains(&self, hour: u32) -> bool {
        usize::try_from(hour)
            .ok()
            .and_then(|h| self.0.get(h))
            .copied()
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.0.iter().filter(|set| **set).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hours(&self) -> impl Iterator<Item = u32> + '_ {
        (0_u32..).zip(self.0.iter()).filter(|(_, set)| **set).map(|(h, _)| h)
    }
}

impl FromIterator<u32> for HourSet {
    /// Hours outside 0-23 are ignored
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        let mut set = Self::empty();
        for hour in iter {
            if let Ok(h) = usize::try_from(hour)
                && let Some(slot) = set.0.get_mut(h)
            {
                *slot = true;
            }
        }
        set
    }
}

impl FromStr for HourSet {
    type Err = ThermiaError;

    /// Parse a comma separated hour list such as `"0,1,2,22"`. Duplicates
    /// collapse; an empty string is an empty set.
    fn from_str(s: &str) -> Result<Self> {
        let mut hours = Vec::new();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let hour: u32 = entry
                .parse()
                .map_err(|e| ThermiaError::config(format!("invalid schedule hour '{entry}': {e}")))?;
            if hour > 23 {
                return Err(ThermiaError::config(format!(
                    "invalid schedule hour '{entry}': must be 0-23"
                )));
            }
            hours.push(hour);
        }
        let set: Self = hours.into_iter().collect();
        if set.len() > MAX_SCHEDULE_ENTRIES {
            return Err(ThermiaError::config(format!(
                "too many hours in schedule ({} > {MAX_SCHEDULE_ENTRIES})",
                set.len()
            )));
        }
        Ok(set)
    }
}

impl fmt::Display for HourSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hours: Vec<String> = self.hours().map(|h| h.to_string()).collect();
        f.write_str(&hours.join(","))
    }
}

/// Immutable inputs of the policy, built once at startup
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionConfig {
    /// Price ceiling (c/kWh); presence enables threshold mode
    pub threshold: Option<f64>,
    /// Cheapest hour count; presence enables cheapest-hours mode
    pub active_hours: Option<usize>,
    /// Fallback schedule, and the only rule when neither of the above is set
    pub schedule: HourSet,
    /// Local timezone for day and hour boundaries
    pub timezone: Tz,
    /// Suppress actuation
    pub dry_run: bool,
}

impl DecisionConfig {
    /// The rule this configuration evaluates first
    pub const fn primary_rule(&self) -> Rule {
        match (self.threshold, self.active_hours) {
            (Some(_), Some(_)) => Rule::ThresholdAndActiveHours,
            (None, Some(_)) => Rule::ActiveHours,
            (Some(_), None) => Rule::Threshold,
            (None, None) => Rule::Schedule,
        }
    }
}

/// Outcome of one policy evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub verdict: Verdict,
    /// Rule that produced the verdict
    pub rule: Rule,
    /// True when a price rule lacked data and the schedule decided
    pub fallback: bool,
    /// Current price (c/kWh) when known
    pub price: Option<f64>,
    /// Human readable reason, logged every tick
    pub explanation: String,
}

/// Evaluate the policy for `now`
pub fn decide(now: DateTime<Utc>, config: &DecisionConfig, prices: &impl PriceLookup) -> Decision {
    let local = now.with_timezone(&config.timezone);
    let day = local.date_naive();
    let hour = local.hour();

    let evaluated = match (config.threshold, config.active_hours) {
        (Some(threshold), Some(n)) => threshold_and_active_hours(prices, day, hour, threshold, n),
        (None, Some(n)) => active_hours(prices, day, hour, n),
        (Some(threshold), None) => threshold_only(prices, day, hour, threshold),
        (None, None) => return schedule(prices, day, hour, &config.schedule, false),
    };

    evaluated.unwrap_or_else(|e| {
        let mut decision = schedule(prices, day, hour, &config.schedule, true);
        decision.explanation = format!(
            "{} unavailable ({e}), {}",
            config.primary_rule().as_str(),
            decision.explanation
        );
        decision
    })
}

fn is_cheapest_hour(
    prices: &impl PriceLookup,
    day: NaiveDate,
    hour: u32,
    n: usize,
) -> Result<bool> {
    let cheapest = prices.cheapest_hours(n, day)?;
    Ok(cheapest
        .iter()
        .any(|&h| u32::try_from(h).is_ok_and(|h| h == hour)))
}

fn threshold_and_active_hours(
    prices: &impl PriceLookup,
    day: NaiveDate,
    hour: u32,
    threshold: f64,
    n: usize,
) -> Result<Decision> {
    let price = prices.price(day, hour)?;
    let (verdict, explanation) = if price <= threshold {
        (
            Verdict::Normal,
            format!("Heating ON: price {price:.2} at or below threshold {threshold:.2}"),
        )
    } else if is_cheapest_hour(prices, day, hour, n)? {
        (
            Verdict::Normal,
            format!(
                "Heating ON: price {price:.2} above threshold {threshold:.2} but hour {hour} is one of the {n} cheapest"
            ),
        )
    } else {
        (
            Verdict::Reduced,
            format!(
                "Heating OFF: price {price:.2} above threshold {threshold:.2} and hour {hour} is not one of the {n} cheapest"
            ),
        )
    };
    Ok(Decision {
        verdict,
        rule: Rule::ThresholdAndActiveHours,
        fallback: false,
        price: Some(price),
        explanation,
    })
}

fn active_hours(
    prices: &impl PriceLookup,
    day: NaiveDate,
    hour: u32,
    n: usize,
) -> Result<Decision> {
    let cheapest = is_cheapest_hour(prices, day, hour, n)?;
    let price = prices.price(day, hour).ok();
    let (verdict, explanation) = if cheapest {
        (
            Verdict::Normal,
            format!("Heating ON: hour {hour} is one of the {n} cheapest hours"),
        )
    } else {
        (
            Verdict::Reduced,
            format!("Heating OFF: hour {hour} is not one of the {n} cheapest hours"),
        )
    };
    Ok(Decision {
        verdict,
        rule: Rule::ActiveHours,
        fallback: false,
        price,
        explanation,
    })
}

fn threshold_only(
    prices: &impl PriceLookup,
    day: NaiveDate,
    hour: u32,
    threshold: f64,
) -> Result<Decision> {
    let price = prices.price(day, hour)?;
    let (verdict, explanation) = if price <= threshold {
        (
            Verdict::Normal,
            format!("Heating ON: price {price:.2} at or below threshold {threshold:.2}"),
        )
    } else {
        (
            Verdict::Reduced,
            format!("Heating OFF: price {price:.2} above threshold {threshold:.2}"),
        )
    };
    Ok(Decision {
        verdict,
        rule: Rule::Threshold,
        fallback: false,
        price: Some(price),
        explanation,
    })
}

fn schedule(
    prices: &impl PriceLookup,
    day: NaiveDate,
    hour: u32,
    schedule: &HourSet,
    fallback: bool,
) -> Decision {
    let price = prices.price(day, hour).ok();
    let shown = price.map_or_else(|| "n/a".to_string(), |p| format!("{p:.2}"));
    let (verdict, explanation) = if schedule.contains(hour) {
        (
            Verdict::Normal,
            format!("Heating ON: hour {hour} is scheduled (price: {shown})"),
        )
    } else {
        (
            Verdict::Reduced,
            format!("Heating OFF: hour {hour} is not scheduled (price: {shown})"),
        )
    };
    Decision {
        verdict,
        rule: Rule::Schedule,
        fallback,
        price,
        explanation,
    }
}
