use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use thermia::policy::{DecisionConfig, HourSet, Rule, Verdict, decide};
use thermia::spot_price::PriceTable;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
}

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, hour, 0, 1).unwrap()
}

fn config(threshold: Option<f64>, active_hours: Option<usize>, schedule: &str) -> DecisionConfig {
    DecisionConfig {
        threshold,
        active_hours,
        schedule: schedule.parse::<HourSet>().unwrap(),
        timezone: chrono_tz::UTC,
        dry_run: false,
    }
}

// Feed prices are per MWh; the policy sees them divided by ten
fn table_with(hour: usize, display_price: f64) -> PriceTable {
    let mut raw = [100.0; 24];
    raw[hour] = display_price * 10.0;
    let mut table = PriceTable::new();
    table.insert(today(), raw);
    table
}

#[test]
fn threshold_rule_compares_current_price() {
    let cfg = config(Some(8.0), None, "0,1,2");

    let cheap = decide(at(9), &cfg, &table_with(9, 5.0));
    assert_eq!(cheap.verdict, Verdict::Normal);
    assert_eq!(cheap.rule, Rule::Threshold);

    let expensive = decide(at(9), &cfg, &table_with(9, 12.0));
    assert_eq!(expensive.verdict, Verdict::Reduced);
    assert!(!expensive.fallback);
}

#[test]
fn active_hours_rule_uses_cheapest_hours_of_today() {
    let cfg = config(None, Some(3), "");
    let mut raw = [100.0; 24];
    raw[3] = 10.0;
    raw[4] = 10.0;
    raw[5] = 10.0;
    let mut table = PriceTable::new();
    table.insert(today(), raw);

    assert_eq!(decide(at(4), &cfg, &table).verdict, Verdict::Normal);
    assert_eq!(decide(at(0), &cfg, &table).verdict, Verdict::Reduced);
}

#[test]
fn missing_price_falls_back_to_schedule() {
    let cfg = config(Some(8.0), None, "3");
    let empty = PriceTable::new();

    let scheduled = decide(at(3), &cfg, &empty);
    assert_eq!(scheduled.verdict, Verdict::Normal);
    assert_eq!(scheduled.rule, Rule::Schedule);
    assert!(scheduled.fallback);

    assert_eq!(decide(at(4), &cfg, &empty).verdict, Verdict::Reduced);
}

#[test]
fn combined_rule_allows_cheap_hours_above_threshold() {
    let cfg = config(Some(2.0), Some(1), "");
    let table = table_with(6, 5.0);

    let decision = decide(at(6), &cfg, &table);
    assert_eq!(decision.verdict, Verdict::Normal);
    assert_eq!(decision.rule, Rule::ThresholdAndActiveHours);
    assert_eq!(decide(at(7), &cfg, &table).verdict, Verdict::Reduced);
}

#[test]
fn schedule_only_ignores_prices() {
    let cfg = config(None, None, "22,23");
    let table = table_with(22, 500.0);

    let decision = decide(at(22), &cfg, &table);
    assert_eq!(decision.verdict, Verdict::Normal);
    assert!(!decision.fallback);
    assert_eq!(decide(at(12), &cfg, &PriceTable::new()).verdict, Verdict::Reduced);
}
