//! Rolling cache of local-day price tables
//!
//! The table holds at most yesterday, today and tomorrow. Each stored day is
//! exactly 24 prices indexed by local hour; index 0 is local midnight.

use super::{DISPLAY_UNIT_DIVISOR, HIGH_PRICE, HOURS_PER_DAY, PriceFeed, cheapest_hours};
use crate::error::{Result, ThermiaError};
use crate::logging::{StructuredLogger, get_logger};
use chrono::{DateTime, NaiveDate, Offset, TimeDelta, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Read access to cached prices by local date
pub trait PriceLookup {
    /// Price for a local date and hour in display unit (c/kWh)
    fn price(&self, day: NaiveDate, hour: u32) -> Result<f64>;

    /// The `n` cheapest hours of a local date, cheapest first
    fn cheapest_hours(&self, n: usize, day: NaiveDate) -> Result<Vec<usize>>;
}

/// Per-day hourly prices in feed units, keyed by local date
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceTable {
    days: BTreeMap<NaiveDate, [f64; HOURS_PER_DAY]>,
}

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, day: NaiveDate, prices: [f64; HOURS_PER_DAY]) {
        self.days.insert(day, prices);
    }

    pub fn get(&self, day: NaiveDate) -> Option<&[f64; HOURS_PER_DAY]> {
        self.days.get(&day)
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.days.contains_key(&day)
    }

    pub fn remove(&mut self, day: NaiveDate) -> bool {
        self.days.remove(&day).is_some()
    }

    /// Drop every day before `oldest_kept`; returns how many were dropped
    pub fn purge_before(&mut self, oldest_kept: NaiveDate) -> usize {
        let before = self.days.len();
        self.days.retain(|day, _| *day >= oldest_kept);
        before - self.days.len()
    }

    pub fn days(&self) -> Vec<NaiveDate> {
        self.days.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}

impl PriceLookup for PriceTable {
    fn price(&self, day: NaiveDate, hour: u32) -> Result<f64> {
        self.days
            .get(&day)
            .and_then(|prices| prices.get(usize::try_from(hour).ok()?))
            .map(|price| price / DISPLAY_UNIT_DIVISOR)
            .ok_or(ThermiaError::no_price_data(day, hour))
    }

    fn cheapest_hours(&self, n: usize, day: NaiveDate) -> Result<Vec<usize>> {
        self.days
            .get(&day)
            .map(|prices| cheapest_hours(prices, n))
            .ok_or(ThermiaError::no_price_data_for_day(day))
    }
}

/// Rotate one UTC day of prices onto the local day with the same date.
///
/// Local hour `h` reads UTC hour `h - offset_hours`. Local hours whose UTC
/// hour falls outside the fetched day get [`HIGH_PRICE`].
pub fn align_to_local_day(utc_prices: &[f64], offset_hours: i32) -> Result<[f64; HOURS_PER_DAY]> {
    if utc_prices.len() != HOURS_PER_DAY {
        return Err(ThermiaError::api(format!(
            "expected {HOURS_PER_DAY} hourly prices, got {}",
            utc_prices.len()
        )));
    }
    let mut aligned = [HIGH_PRICE; HOURS_PER_DAY];
    for (local_hour, slot) in (0_i64..).zip(aligned.iter_mut()) {
        let utc_hour = local_hour - i64::from(offset_hours);
        if let Ok(idx) = usize::try_from(utc_hour)
            && let Some(price) = utc_prices.get(idx)
        {
            *slot = *price;
        }
    }
    Ok(aligned)
}

/// Whole-hour UTC offset of `tz` on `day`, taken at local noon
pub fn utc_offset_hours(tz: Tz, day: NaiveDate) -> i32 {
    day.and_hms_opt(12, 0, 0)
        .and_then(|noon| tz.offset_from_local_datetime(&noon).earliest())
        .map_or(0, |offset| offset.fix().local_minus_utc() / 3600)
}

/// Result of a refresh call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Nothing needed fetching
    UpToDate,
    /// Prices for this local date were fetched and stored
    Fetched(NaiveDate),
}

// Which local date needs fetching, if any
fn fetch_target(
    table: &PriceTable,
    today: NaiveDate,
    local_hour: u32,
    tomorrow_cutoff_hour: u32,
) -> Option<NaiveDate> {
    if !table.contains(today) {
        return Some(today);
    }
    if local_hour < tomorrow_cutoff_hour {
        return None;
    }
    today.succ_opt().filter(|tomorrow| !table.contains(*tomorrow))
}

/// Shared price cache. The table lock is held for reads and writes, never
/// across a network call.
pub struct PriceCache {
    table: Mutex<PriceTable>,
    feed: Arc<dyn PriceFeed>,
    timezone: Tz,
    tomorrow_cutoff_hour: u32,
    logger: StructuredLogger,
}

impl PriceCache {
    pub fn new(feed: Arc<dyn PriceFeed>, timezone: Tz, tomorrow_cutoff_hour: u32) -> Self {
        Self {
            table: Mutex::new(PriceTable::new()),
            feed,
            timezone,
            tomorrow_cutoff_hour,
            logger: get_logger("price_cache"),
        }
    }

    pub const fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Fetch today's prices when missing, or tomorrow's once the cutoff hour
    /// has passed. On failure the cached days stay as they were.
    pub async fn refresh(&self, now: DateTime<Utc>) -> Result<RefreshOutcome> {
        let local = now.with_timezone(&self.timezone);
        let today = local.date_naive();
        let yesterday = (now - TimeDelta::hours(24))
            .with_timezone(&self.timezone)
            .date_naive();

        let target = {
            let mut table = self.table.lock().await;
            let purged = table.purge_before(yesterday);
            if purged > 0 {
                self.logger
                    .debug(&format!("Purged {purged} stale price day(s) before {yesterday}"));
            }
            match fetch_target(&table, today, local.hour(), self.tomorrow_cutoff_hour) {
                Some(day) => day,
                None => {
                    self.logger.debug("Enough pricing data in store");
                    return Ok(RefreshOutcome::UpToDate);
                }
            }
        };

        self.logger
            .info(&format!("Getting day-ahead prices for {target}"));
        let utc_prices = self.feed.fetch_day(target).await?;
        let aligned = align_to_local_day(&utc_prices, utc_offset_hours(self.timezone, target))?;

        let mut table = self.table.lock().await;
        table.insert(target, aligned);
        table.remove(yesterday);
        self.logger.debug(&format!(
            "Stored prices for {target}; cached days: {:?}",
            table.days()
        ));
        Ok(RefreshOutcome::Fetched(target))
    }

    /// Price for `now`'s local date and hour in c/kWh
    pub async fn price_at(&self, now: DateTime<Utc>) -> Result<f64> {
        let local = now.with_timezone(&self.timezone);
        self.table
            .lock()
            .await
            .price(local.date_naive(), local.hour())
    }

    /// The `n` cheapest local hours of `day`
    pub async fn cheapest_hours(&self, n: usize, day: NaiveDate) -> Result<Vec<usize>> {
        self.table.lock().await.cheapest_hours(n, day)
    }

    /// Consistent copy of the table for one policy evaluation
    pub async fn snapshot(&self) -> PriceTable {
        self.table.lock().await.clone()
    }

    pub async fn days(&self) -> Vec<NaiveDate> {
        self.table.lock().await.days()
    }

    /// Store an already aligned local day
    pub async fn store(&self, day: NaiveDate, prices: [f64; HOURS_PER_DAY]) {
        self.table.lock().await.insert(day, prices);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct FakeFeed {
        prices: Option<Vec<f64>>,
        requested: StdMutex<Vec<NaiveDate>>,
    }

    impl FakeFeed {
        fn serving(prices: Vec<f64>) -> Arc<Self> {
            Arc::new(Self {
                prices: Some(prices),
                requested: StdMutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                prices: None,
                requested: StdMutex::new(Vec::new()),
            })
        }

        fn requested(&self) -> Vec<NaiveDate> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl PriceFeed for FakeFeed {
        async fn fetch_day(&self, day: NaiveDate) -> Result<Vec<f64>> {
            self.requested.lock().unwrap().push(day);
            self.prices
                .clone()
                .ok_or_else(|| ThermiaError::network("connection refused"))
        }
    }

    fn ascending() -> Vec<f64> {
        (1..=24).map(f64::from).collect()
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn utc(d: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, hour, 0, 1).unwrap()
    }

    fn utc_cache(feed: Arc<FakeFeed>) -> PriceCache {
        PriceCache::new(feed, chrono_tz::UTC, 18)
    }

    #[tokio::test]
    async fn no_fetch_when_today_cached_before_cutoff() {
        let feed = FakeFeed::serving(ascending());
        let cache = utc_cache(feed.clone());
        cache.store(date(15), [5.0; 24]).await;

        let outcome = cache.refresh(utc(15, 10)).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::UpToDate);
        assert!(feed.requested().is_empty());
    }

    #[tokio::test]
    async fn fetches_tomorrow_from_cutoff_hour() {
        for hour in [18, 19, 23] {
            let feed = FakeFeed::serving(ascending());
            let cache = utc_cache(feed.clone());
            cache.store(date(15), [5.0; 24]).await;

            let outcome = cache.refresh(utc(15, hour)).await.unwrap();
            assert_eq!(outcome, RefreshOutcome::Fetched(date(16)));
            assert_eq!(feed.requested(), vec![date(16)]);
            assert_eq!(cache.days().await, vec![date(15), date(16)]);
        }
    }

    #[tokio::test]
    async fn no_fetch_when_tomorrow_already_cached() {
        let feed = FakeFeed::serving(ascending());
        let cache = utc_cache(feed.clone());
        cache.store(date(15), [5.0; 24]).await;
        cache.store(date(16), [6.0; 24]).await;

        assert_eq!(
            cache.refresh(utc(15, 20)).await.unwrap(),
            RefreshOutcome::UpToDate
        );
        assert!(feed.requested().is_empty());
    }

    #[tokio::test]
    async fn fetches_today_whenever_missing() {
        for hour in [0, 10, 18, 22] {
            let feed = FakeFeed::serving(ascending());
            let cache = utc_cache(feed.clone());

            let outcome = cache.refresh(utc(15, hour)).await.unwrap();
            assert_eq!(outcome, RefreshOutcome::Fetched(date(15)));
            assert_eq!(feed.requested(), vec![date(15)]);
        }
    }

    #[tokio::test]
    async fn refresh_evicts_yesterday_and_older() {
        let feed = FakeFeed::serving(ascending());
        let cache = utc_cache(feed);
        for d in [12, 13, 14] {
            cache.store(date(d), [1.0; 24]).await;
        }

        cache.refresh(utc(15, 9)).await.unwrap();
        assert_eq!(cache.days().await, vec![date(15)]);
    }

    #[tokio::test]
    async fn stale_days_purged_even_without_fetch() {
        let feed = FakeFeed::serving(ascending());
        let cache = utc_cache(feed.clone());
        cache.store(date(13), [1.0; 24]).await;
        cache.store(date(15), [1.0; 24]).await;

        assert_eq!(
            cache.refresh(utc(15, 9)).await.unwrap(),
            RefreshOutcome::UpToDate
        );
        assert_eq!(cache.days().await, vec![date(15)]);
        assert!(feed.requested().is_empty());
    }

    #[tokio::test]
    async fn failed_fetch_leaves_cache_untouched() {
        let feed = FakeFeed::failing();
        let cache = utc_cache(feed.clone());
        cache.store(date(15), [70.0; 24]).await;

        let err = cache.refresh(utc(15, 19)).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(feed.requested(), vec![date(16)]);
        assert_eq!(cache.days().await, vec![date(15)]);
        assert!((cache.price_at(utc(15, 19)).await.unwrap() - 7.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn partial_day_is_never_stored() {
        let feed = FakeFeed::serving(vec![1.0; 20]);
        let cache = utc_cache(feed);

        assert!(cache.refresh(utc(15, 9)).await.is_err());
        assert!(cache.days().await.is_empty());
    }

    #[tokio::test]
    async fn stored_day_starts_at_local_midnight() {
        // Helsinki is UTC+2 in January
        let feed = FakeFeed::serving(ascending());
        let cache = PriceCache::new(feed, chrono_tz::Europe::Helsinki, 18);
        let now = utc(15, 8); // 10:00 local

        cache.refresh(now).await.unwrap();
        let table = cache.snapshot().await;
        let stored = table.get(date(15)).unwrap();
        assert_eq!(stored[0], HIGH_PRICE);
        assert_eq!(stored[1], HIGH_PRICE);
        assert_eq!(stored[2], 1.0);
        assert_eq!(stored[23], 22.0);

        // Local 10:00 reads UTC hour 8, whose price is 9.0 per MWh
        assert!((cache.price_at(now).await.unwrap() - 0.9).abs() < 1e-9);

        // Sentinel hours are never the cheapest
        assert_eq!(
            cache.cheapest_hours(3, date(15)).await.unwrap(),
            vec![2, 3, 4]
        );
    }

    #[tokio::test]
    async fn lookups_fail_without_data() {
        let cache = utc_cache(FakeFeed::failing());
        assert!(matches!(
            cache.price_at(utc(15, 9)).await,
            Err(ThermiaError::NoPriceData { .. })
        ));
        assert!(matches!(
            cache.cheapest_hours(3, date(15)).await,
            Err(ThermiaError::NoPriceData { hour: None, .. })
        ));
    }

    #[test]
    fn align_handles_offsets_both_ways() {
        let utc_prices = ascending();

        assert_eq!(align_to_local_day(&utc_prices, 0).unwrap().to_vec(), utc_prices);

        let east = align_to_local_day(&utc_prices, 3).unwrap();
        assert_eq!(&east[..3], &[HIGH_PRICE; 3]);
        assert_eq!(east[3], 1.0);
        assert_eq!(east[23], 21.0);

        let west = align_to_local_day(&utc_prices, -5).unwrap();
        assert_eq!(west[0], 6.0);
        assert_eq!(west[18], 24.0);
        assert_eq!(&west[19..], &[HIGH_PRICE; 5]);

        assert!(align_to_local_day(&utc_prices[..23], 0).is_err());
    }

    #[test]
    fn offset_follows_daylight_saving() {
        let helsinki = chrono_tz::Europe::Helsinki;
        assert_eq!(utc_offset_hours(helsinki, date(15)), 2);
        let summer = NaiveDate::from_ymd_opt(2024, 7, 15).unwrap();
        assert_eq!(utc_offset_hours(helsinki, summer), 3);
        assert_eq!(utc_offset_hours(chrono_tz::America::New_York, date(15)), -5);
        assert_eq!(utc_offset_hours(chrono_tz::UTC, summer), 0);
    }

    #[test]
    fn table_lookup_divides_to_display_unit() {
        let mut table = PriceTable::new();
        let mut raw = [100.0; 24];
        raw[6] = 42.0;
        table.insert(date(15), raw);

        assert!((table.price(date(15), 6).unwrap() - 4.2).abs() < 1e-9);
        assert!(table.price(date(15), 24).is_err());
        assert!(table.price(date(16), 6).is_err());
        assert_eq!(table.cheapest_hours(1, date(15)).unwrap(), vec![6]);
    }
}
