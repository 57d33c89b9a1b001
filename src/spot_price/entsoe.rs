//! ENTSO-E transparency platform day-ahead prices (document type A44)

use super::{HIGH_PRICE, HOURS_PER_DAY, PriceFeed};
use crate::config::EntsoeConfig;
use crate::error::{Result, ThermiaError};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);
const PERIOD_FORMAT: &str = "%Y%m%d%H%M";
const ACKNOWLEDGEMENT_ROOT: &str = "Acknowledgement_MarketDocument";

#[derive(Debug, Deserialize)]
struct PublicationDocument {
    #[serde(rename = "TimeSeries", default)]
    time_series: Vec<TimeSeries>,
}

#[derive(Debug, Deserialize)]
struct TimeSeries {
    #[serde(rename = "Period", default)]
    periods: Vec<Period>,
}

#[derive(Debug, Deserialize)]
struct Period {
    #[serde(rename = "timeInterval")]
    time_interval: TimeInterval,
    resolution: String,
    #[serde(rename = "Point", default)]
    points: Vec<Point>,
}

#[derive(Debug, Deserialize)]
struct TimeInterval {
    start: String,
    end: String,
}

#[derive(Debug, Deserialize)]
struct Point {
    position: u32,
    #[serde(rename = "price.amount")]
    price: f64,
}

#[derive(Debug, Deserialize)]
struct AcknowledgementDocument {
    #[serde(rename = "Reason", default)]
    reasons: Vec<Reason>,
}

#[derive(Debug, Deserialize)]
struct Reason {
    #[serde(default)]
    code: String,
    #[serde(default)]
    text: String,
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%MZ")
        .map(|dt| dt.and_utc())
        .map_err(|e| ThermiaError::api(format!("bad timestamp '{trimmed}': {e}")))
}

fn resolution_minutes(resolution: &str) -> Result<i64> {
    match resolution.trim() {
        "PT60M" | "PT1H" => Ok(60),
        "PT30M" => Ok(30),
        "PT15M" => Ok(15),
        other => Err(ThermiaError::api(format!("unsupported resolution '{other}'"))),
    }
}

impl Period {
    /// Absolute UTC slots of this period. Positions the curve leaves out
    /// repeat the previous point.
    fn slots(&self) -> Result<Vec<(DateTime<Utc>, f64)>> {
        let start = parse_timestamp(&self.time_interval.start)?;
        let end = parse_timestamp(&self.time_interval.end)?;
        let step = TimeDelta::minutes(resolution_minutes(&self.resolution)?);
        let slot_count = (end - start).num_minutes() / step.num_minutes();

        let mut points: Vec<&Point> = self.points.iter().collect();
        points.sort_by_key(|p| p.position);

        let mut slots = Vec::new();
        let mut next = points.iter().peekable();
        let mut current: Option<f64> = None;
        for position in 1..=slot_count {
            while let Some(point) = next.next_if(|p| i64::from(p.position) <= position) {
                current = Some(point.price);
            }
            if let Some(price) = current {
                slots.push((start + step * i32::try_from(position - 1).unwrap_or(i32::MAX), price));
            }
        }
        Ok(slots)
    }
}

/// Parse an A44 reply into the 24 hourly prices of UTC day `day`.
///
/// Sub-hourly slots are averaged per hour; hours the document does not cover
/// get [`HIGH_PRICE`].
pub fn parse_day_ahead(xml: &str, day: NaiveDate) -> Result<Vec<f64>> {
    if xml.contains(ACKNOWLEDGEMENT_ROOT) {
        let ack: AcknowledgementDocument = from_str(xml)?;
        let reasons: Vec<String> = ack
            .reasons
            .iter()
            .map(|r| format!("{} {}", r.code, r.text).trim().to_string())
            .collect();
        return Err(ThermiaError::api(format!(
            "no day-ahead prices for {day}: {}",
            reasons.join("; ")
        )));
    }

    let document: PublicationDocument = from_str(xml)?;
    let day_start = day.and_hms_opt(0, 0, 0).map(|d| d.and_utc()).ok_or_else(|| {
        ThermiaError::generic(format!("cannot build midnight for {day}"))
    })?;

    let mut sums = [0.0_f64; HOURS_PER_DAY];
    let mut counts = [0_u32; HOURS_PER_DAY];
    for period in document.time_series.iter().flat_map(|ts| &ts.periods) {
        for (at, price) in period.slots()? {
            let offset = (at - day_start).num_hours();
            if let Ok(hour) = usize::try_from(offset)
                && hour < HOURS_PER_DAY
                && at >= day_start
            {
                sums[hour] += price;
                counts[hour] += 1;
            }
        }
    }

    if counts.iter().all(|c| *c == 0) {
        return Err(ThermiaError::api(format!("no price points for {day}")));
    }

    Ok(sums
        .iter()
        .zip(counts)
        .map(|(sum, count)| {
            if count == 0 {
                HIGH_PRICE
            } else {
                sum / f64::from(count)
            }
        })
        .collect())
}

enum FetchFailure {
    Retryable(ThermiaError),
    Fatal(ThermiaError),
}

impl From<reqwest::Error> for FetchFailure {
    fn from(e: reqwest::Error) -> Self {
        let err = ThermiaError::from(e);
        if err.is_transient() {
            Self::Retryable(err)
        } else {
            Self::Fatal(err)
        }
    }
}

/// HTTP client for the ENTSO-E REST API
pub struct EntsoeClient {
    client: reqwest::Client,
    api_url: String,
    security_token: String,
    bidding_zone: String,
    max_retries: u32,
    retry_delay: Duration,
    logger: StructuredLogger,
}

impl EntsoeClient {
    pub fn new(config: &EntsoeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        let logger = get_logger_with_context(
            LogContext::new("entsoe").with_field("zone", &config.bidding_zone),
        );
        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            security_token: config.security_token.clone(),
            bidding_zone: config.bidding_zone.clone(),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            logger,
        })
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_delay
            .saturating_mul(attempt.saturating_mul(attempt))
            .min(MAX_RETRY_DELAY)
    }

    async fn request_once(&self, day: NaiveDate) -> std::result::Result<String, FetchFailure> {
        let period = |d: NaiveDate| {
            d.and_hms_opt(0, 0, 0)
                .map(|dt| dt.format(PERIOD_FORMAT).to_string())
                .unwrap_or_default()
        };
        let next_day = day.succ_opt().unwrap_or(day);

        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("securityToken", self.security_token.as_str()),
                ("documentType", "A44"),
                ("in_Domain", self.bidding_zone.as_str()),
                ("out_Domain", self.bidding_zone.as_str()),
                ("periodStart", period(day).as_str()),
                ("periodEnd", period(next_day).as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            return Ok(body);
        }
        let err = ThermiaError::api(format!("HTTP {status} from price API"));
        if status.is_server_error() {
            Err(FetchFailure::Retryable(err))
        } else {
            // 4xx replies usually carry an acknowledgement explaining why
            let explained = body
                .contains(ACKNOWLEDGEMENT_ROOT)
                .then(|| parse_day_ahead(&body, day).err())
                .flatten();
            Err(FetchFailure::Fatal(explained.unwrap_or(err)))
        }
    }
}

#[async_trait::async_trait]
impl PriceFeed for EntsoeClient {
    async fn fetch_day(&self, day: NaiveDate) -> Result<Vec<f64>> {
        let mut attempt = 0;
        let body = loop {
            match self.request_once(day).await {
                Ok(body) => break body,
                Err(FetchFailure::Retryable(e)) if attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.backoff(attempt);
                    self.logger.warn(&format!(
                        "Price request for {day} failed (attempt {attempt}): {e}; retrying in {delay:?}"
                    ));
                    sleep(delay).await;
                }
                Err(FetchFailure::Retryable(e) | FetchFailure::Fatal(e)) => return Err(e),
            }
        };

        let prices = parse_day_ahead(&body, day)?;
        self.logger.debug(&format!(
            "Received {} hourly prices for {day} ({} from {})",
            prices.len(),
            self.bidding_zone,
            self.api_url
        ));
        Ok(prices)
    }
}
