//! Hourly control loop
//!
//! One tick per hour, one second past the top of the hour: refresh prices,
//! decide, actuate. Failures inside a tick are logged and the next tick
//! starts from scratch. An optional background task fetches prices on its
//! own daily timetable so the hourly tick rarely has to wait for the network.

use crate::config::Config;
use crate::error::{Result, ThermiaError};
use crate::logging::{StructuredLogger, get_logger};
use crate::policy::{Decision, DecisionConfig, decide};
use crate::relay::{ApplyOutcome, RelayController, ShellyRelay};
use crate::spot_price::{EntsoeClient, PriceCache, RefreshOutcome};
use chrono::{DateTime, DurationRound, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep, timeout};

/// Delay before the first tick after startup
pub const STARTUP_DELAY: Duration = Duration::from_secs(1);

const FAILURE_BACKOFF_STEP: Duration = Duration::from_secs(5 * 60);
const MAX_FAILURE_BACKOFF: Duration = Duration::from_secs(60 * 60);

/// Time until the next tick: top of the next hour plus one second
pub fn next_tick_delay(now: DateTime<Utc>) -> Duration {
    let hour_start = now.duration_trunc(TimeDelta::hours(1)).unwrap_or(now);
    (hour_start + TimeDelta::hours(1) + TimeDelta::seconds(1) - now)
        .to_std()
        .unwrap_or(STARTUP_DELAY)
}

/// Next background refresh: local midnight or the cutoff hour, one second in
pub fn next_refresh_at(now: DateTime<Utc>, timezone: Tz, tomorrow_cutoff_hour: u32) -> DateTime<Utc> {
    let today = now.with_timezone(&timezone).date_naive();
    [Some(today), today.succ_opt()]
        .into_iter()
        .flatten()
        .flat_map(|day| [0, tomorrow_cutoff_hour].map(|hour| (day, hour)))
        .filter_map(|(day, hour)| {
            let at = day.and_time(NaiveTime::from_hms_opt(hour, 0, 1)?);
            timezone.from_local_datetime(&at).earliest()
        })
        .map(|local| local.with_timezone(&Utc))
        .filter(|at| *at > now)
        .min()
        .unwrap_or(now + TimeDelta::hours(1))
}

/// Outcome of one tick
#[derive(Debug)]
pub struct TickReport {
    pub at: DateTime<Utc>,
    pub refresh: Result<RefreshOutcome>,
    pub decision: Decision,
    pub actuation: Result<ApplyOutcome>,
}

/// Fetches prices at local midnight and at the cutoff hour, independent of
/// the hourly tick
pub struct BackgroundRefresher {
    cache: Arc<PriceCache>,
    tomorrow_cutoff_hour: u32,
    max_consecutive_failures: u32,
    backoff_step: Duration,
    logger: StructuredLogger,
}

impl BackgroundRefresher {
    pub fn new(cache: Arc<PriceCache>, tomorrow_cutoff_hour: u32, max_consecutive_failures: u32) -> Self {
        Self {
            cache,
            tomorrow_cutoff_hour,
            max_consecutive_failures,
            backoff_step: FAILURE_BACKOFF_STEP,
            logger: get_logger("price_refresher"),
        }
    }

    /// Override the per-failure backoff step (5 minutes by default)
    #[must_use]
    pub fn with_backoff_step(mut self, step: Duration) -> Self {
        self.backoff_step = step;
        self
    }

    fn backoff(&self, failures: u32) -> Duration {
        self.backoff_step
            .saturating_mul(failures)
            .min(MAX_FAILURE_BACKOFF)
    }

    /// Refresh right away, then on the daily timetable. Returns `Ok` on
    /// shutdown and an error once too many refreshes in a row have failed.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let timezone = self.cache.timezone();
        let mut failures = 0_u32;
        let mut wake_at = Utc::now();

        loop {
            let wait = (wake_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                () = sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.logger.debug("Background refresher stopping");
                        return Ok(());
                    }
                    continue;
                }
            }

            let now = Utc::now();
            match self.cache.refresh(now).await {
                Ok(outcome) => {
                    failures = 0;
                    wake_at = next_refresh_at(now, timezone, self.tomorrow_cutoff_hour);
                    self.logger.debug(&format!(
                        "Background refresh: {outcome:?}; next at {wake_at}"
                    ));
                }
                Err(e) => {
                    failures += 1;
                    if failures >= self.max_consecutive_failures {
                        self.logger.error(&format!(
                            "Giving up after {failures} consecutive price refresh failures: {e}"
                        ));
                        return Err(ThermiaError::generic(format!(
                            "price refresh failed {failures} times in a row: {e}"
                        )));
                    }
                    let delay = self.backoff(failures);
                    self.logger.warn(&format!(
                        "Background price refresh failed ({failures}/{}): {e}; retrying in {delay:?}",
                        self.max_consecutive_failures
                    ));
                    wake_at = now + TimeDelta::from_std(delay).unwrap_or(TimeDelta::hours(1));
                }
            }
        }
    }
}

/// The hourly control loop
pub struct Scheduler {
    cache: Arc<PriceCache>,
    policy: DecisionConfig,
    relay: RelayController,
    refresh_budget: Duration,
    background: Option<BackgroundRefresher>,
    logger: StructuredLogger,
}

impl Scheduler {
    pub fn new(
        cache: Arc<PriceCache>,
        policy: DecisionConfig,
        relay: RelayController,
        refresh_budget: Duration,
    ) -> Self {
        Self {
            cache,
            policy,
            relay,
            refresh_budget,
            background: None,
            logger: get_logger("scheduler"),
        }
    }

    #[must_use]
    pub fn with_background_refresh(mut self, refresher: BackgroundRefresher) -> Self {
        self.background = Some(refresher);
        self
    }

    /// Wire the ENTSO-E feed and the Shelly relay from configuration
    pub fn from_config(config: &Config, dry_run_flag: bool) -> Result<Self> {
        let policy = config.decision_config(dry_run_flag)?;
        let feed = Arc::new(EntsoeClient::new(&config.entsoe)?);
        let cache = Arc::new(PriceCache::new(
            feed,
            policy.timezone,
            config.control.tomorrow_cutoff_hour,
        ));
        let relay = RelayController::new(Arc::new(ShellyRelay::new(&config.relay)?), policy.dry_run);

        let scheduler = Self::new(
            Arc::clone(&cache),
            policy,
            relay,
            config.control.refresh_timeout(),
        );
        Ok(if config.control.background_refresh {
            scheduler.with_background_refresh(BackgroundRefresher::new(
                cache,
                config.control.tomorrow_cutoff_hour,
                config.control.max_consecutive_refresh_failures,
            ))
        } else {
            scheduler
        })
    }

    pub const fn policy(&self) -> &DecisionConfig {
        &self.policy
    }

    pub fn cache(&self) -> &Arc<PriceCache> {
        &self.cache
    }

    /// Refresh, decide and actuate once
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let refresh = timeout(self.refresh_budget, self.cache.refresh(now))
            .await
            .unwrap_or_else(|_| {
                Err(ThermiaError::timeout(format!(
                    "price refresh exceeded {:?}",
                    self.refresh_budget
                )))
            });
        match &refresh {
            Ok(RefreshOutcome::Fetched(day)) => {
                self.logger.info(&format!("Fetched spot prices for {day}"));
            }
            Ok(RefreshOutcome::UpToDate) => {}
            Err(e) => self.logger.warn(&format!("Price refresh failed: {e}")),
        }

        let table = self.cache.snapshot().await;
        let decision = decide(now, &self.policy, &table);
        self.logger.info(&decision.explanation);

        let actuation = self.relay.apply(decision.verdict).await;
        if let Err(e) = &actuation {
            self.logger
                .error(&format!("Failed to drive relay to {}: {e}", decision.verdict));
        }

        TickReport {
            at: now,
            refresh,
            decision,
            actuation,
        }
    }

    /// Tick every hour until `shutdown` flips to true. Ends with an error if
    /// the background refresher gives up or dies.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut background: Option<JoinHandle<Result<()>>> = self
            .background
            .take()
            .map(|refresher| tokio::spawn(refresher.run(shutdown.clone())));

        let mut delay = STARTUP_DELAY;
        loop {
            tokio::select! {
                () = sleep(delay) => {
                    let report = self.tick(Utc::now()).await;
                    delay = next_tick_delay(Utc::now());
                    self.logger.debug(&format!(
                        "Tick at {} done ({} via {}); next in {}s",
                        report.at,
                        report.decision.verdict,
                        report.decision.rule.as_str(),
                        delay.as_secs()
                    ));
                }
                joined = join_background(&mut background) => {
                    background = None;
                    match joined {
                        Ok(Ok(())) => self.logger.debug("Background refresher finished"),
                        Ok(Err(e)) => return Err(e),
                        Err(e) => {
                            return Err(ThermiaError::generic(format!(
                                "background price refresher died: {e}"
                            )));
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.logger.info("Shutdown signal received");
                        break;
                    }
                }
            }
        }

        if let Some(handle) = background {
            match handle.await {
                Ok(Err(e)) => self.logger.warn(&format!("Background refresher ended with: {e}")),
                Err(e) => self.logger.warn(&format!("Background refresher died: {e}")),
                Ok(Ok(())) => {}
            }
        }
        self.logger.info("Scheduler stopped");
        Ok(())
    }
}

async fn join_background(
    handle: &mut Option<JoinHandle<Result<()>>>,
) -> std::result::Result<Result<()>, JoinError> {
    match handle.as_mut() {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spot_price::PriceFeed;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingFeed {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl PriceFeed for CountingFeed {
        async fn fetch_day(&self, _day: NaiveDate) -> Result<Vec<f64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ThermiaError::network("unreachable"))
            } else {
                Ok(vec![10.0; 24])
            }
        }
    }

    fn feed(fail: bool) -> Arc<CountingFeed> {
        Arc::new(CountingFeed {
            calls: AtomicU32::new(0),
            fail,
        })
    }

    fn utc(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, h, m, s).unwrap()
    }

    #[test]
    fn tick_fires_one_second_past_next_hour() {
        assert_eq!(next_tick_delay(utc(10, 0, 0)), Duration::from_secs(3601));
        assert_eq!(next_tick_delay(utc(10, 0, 1)), Duration::from_secs(3600));
        assert_eq!(next_tick_delay(utc(10, 59, 59)), Duration::from_secs(2));
        assert_eq!(next_tick_delay(utc(23, 30, 0)), Duration::from_secs(1801));

        let half_second = utc(10, 59, 59) + TimeDelta::milliseconds(500);
        assert_eq!(next_tick_delay(half_second), Duration::from_millis(1500));
    }

    #[test]
    fn refresh_timetable_follows_local_clock() {
        let helsinki = chrono_tz::Europe::Helsinki;
        // 10:00 UTC is 12:00 in Helsinki; next is the 18:00:01 cutoff
        assert_eq!(next_refresh_at(utc(10, 0, 0), helsinki, 18), utc(16, 0, 1));
        // 17:00 UTC is 19:00 local; next is local midnight
        assert_eq!(next_refresh_at(utc(17, 0, 0), helsinki, 18), utc(22, 0, 1));
        // Right at a refresh time, the next one is picked
        assert_eq!(next_refresh_at(utc(22, 0, 1), helsinki, 18), utc(16, 0, 1) + TimeDelta::days(1));

        assert_eq!(next_refresh_at(utc(3, 0, 0), chrono_tz::UTC, 18), utc(18, 0, 1));
    }

    #[test]
    fn failure_backoff_grows_linearly_and_caps() {
        let cache = Arc::new(PriceCache::new(feed(true), chrono_tz::UTC, 18));
        let refresher = BackgroundRefresher::new(cache, 18, 24);
        assert_eq!(refresher.backoff(1), Duration::from_secs(300));
        assert_eq!(refresher.backoff(3), Duration::from_secs(900));
        assert_eq!(refresher.backoff(20), MAX_FAILURE_BACKOFF);
    }

    #[tokio::test]
    async fn background_refresher_gives_up_after_repeated_failures() {
        let feed = feed(true);
        let cache = Arc::new(PriceCache::new(feed.clone(), chrono_tz::UTC, 18));
        let refresher =
            BackgroundRefresher::new(cache, 18, 3).with_backoff_step(Duration::from_millis(1));
        let (_tx, rx) = watch::channel(false);

        let result = refresher.run(rx).await;
        assert!(result.is_err());
        assert_eq!(feed.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn background_refresher_stops_on_shutdown() {
        let feed = feed(false);
        let cache = Arc::new(PriceCache::new(feed.clone(), chrono_tz::UTC, 18));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(BackgroundRefresher::new(Arc::clone(&cache), 18, 3).run(rx));

        // Startup refresh fills today
        for _ in 0..100 {
            if !cache.days().await.is_empty() {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        assert!(!cache.days().await.is_empty());

        tx.send(true).unwrap();
        assert!(handle.await.unwrap().is_ok());
    }
}
