//! Grouping of logged meals by local calendar day and period totals.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use chrono_tz::Tz;

use crate::domain::ConsumptionEntry;

/// Parses an IANA time zone name.
///
/// Unknown names are logged and replaced with UTC; reports never fail on a
/// malformed zone.
pub fn resolve_timezone(name: &str) -> Tz {
    match name.trim().parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            log::warn!("Unknown time zone '{}', using UTC", name);
            Tz::UTC
        }
    }
}

/// Sums consumed calories per local calendar date of `tz_name`.
pub fn group_by_local_day(
    entries: &[ConsumptionEntry],
    tz_name: &str,
) -> BTreeMap<NaiveDate, u64> {
    let tz = resolve_timezone(tz_name);
    let mut by_day: BTreeMap<NaiveDate, u64> = BTreeMap::new();

    for entry in entries {
        let local_date = entry.timestamp.with_timezone(&tz).date_naive();
        *by_day.entry(local_date).or_default() += u64::from(entry.calories_consumed);
    }

    by_day
}

/// Returns `round(total / period_days)`, or 0 for an empty period.
/// Averages beyond `u32::MAX` saturate.
pub fn calculate_average(total: u64, period_days: i64) -> u32 {
    if period_days <= 0 {
        return 0;
    }
    (total as f64 / period_days as f64).round_ties_even() as u32
}

/// Total of all days and the average over a fixed-length period.
///
/// The divisor is the period length, not the number of days with entries, so
/// the average is a daily rate over the nominal period.
pub fn total_and_average(by_day: &BTreeMap<NaiveDate, u64>, period_days: i64) -> (u64, u32) {
    let total: u64 = by_day.values().sum();
    (total, calculate_average(total, period_days))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
            .unwrap()
    }

    fn meal(timestamp: DateTime<Utc>, calories: u32) -> ConsumptionEntry {
        ConsumptionEntry {
            product_name: "oats".to_string(),
            weight_grams: 100,
            calories_consumed: calories,
            timestamp,
        }
    }

    #[test]
    fn test_resolve_timezone_valid() {
        assert_eq!(resolve_timezone("Europe/Moscow"), Tz::Europe__Moscow);
        assert_eq!(resolve_timezone(" UTC "), Tz::UTC);
    }

    #[test]
    fn test_resolve_timezone_invalid_falls_back_to_utc() {
        assert_eq!(resolve_timezone("Mars/Olympus"), Tz::UTC);
        assert_eq!(resolve_timezone(""), Tz::UTC);
    }

    #[test]
    fn test_group_by_local_day_shifts_across_midnight() {
        let entries = vec![meal(at(2026, 1, 1, 22, 30), 500)];

        let moscow = group_by_local_day(&entries, "Europe/Moscow");
        assert_eq!(moscow.get(&date(2026, 1, 2)), Some(&500));
        assert_eq!(moscow.get(&date(2026, 1, 1)), None);

        let fallback = group_by_local_day(&entries, "Not/AZone");
        assert_eq!(fallback.get(&date(2026, 1, 1)), Some(&500));
    }

    #[test]
    fn test_group_by_local_day_sums_same_day() {
        let entries = vec![
            meal(at(2026, 1, 3, 8, 0), 350),
            meal(at(2026, 1, 3, 13, 0), 700),
            meal(at(2026, 1, 4, 9, 0), 400),
        ];

        let by_day = group_by_local_day(&entries, "UTC");
        assert_eq!(by_day.len(), 2);
        assert_eq!(by_day[&date(2026, 1, 3)], 1050);
        assert_eq!(by_day[&date(2026, 1, 4)], 400);
    }

    #[test]
    fn test_group_by_local_day_sum_exceeds_u32() {
        let entries = vec![
            meal(at(2026, 1, 3, 8, 0), 4_000_000_000),
            meal(at(2026, 1, 3, 9, 0), 4_000_000_000),
        ];

        let by_day = group_by_local_day(&entries, "UTC");
        assert_eq!(by_day[&date(2026, 1, 3)], 8_000_000_000);

        let (total, average) = total_and_average(&by_day, 1);
        assert_eq!(total, 8_000_000_000);
        assert_eq!(average, u32::MAX);
    }

    #[test]
    fn test_calculate_average() {
        assert_eq!(calculate_average(14000, 7), 2000);
        assert_eq!(calculate_average(14000, 0), 0);
        assert_eq!(calculate_average(100, -1), 0);
        assert_eq!(calculate_average(10, 3), 3);
    }

    #[test]
    fn test_total_and_average_uses_fixed_period() {
        let by_day: BTreeMap<NaiveDate, u64> =
            [(date(2026, 1, 1), 2000), (date(2026, 1, 2), 1500)]
                .into_iter()
                .collect();

        // Two days with entries, averaged over a 7-day week
        let (total, average) = total_and_average(&by_day, 7);
        assert_eq!(total, 3500);
        assert_eq!(average, 500);
    }

    #[test]
    fn test_total_and_average_empty() {
        let (total, average) = total_and_average(&BTreeMap::new(), 7);
        assert_eq!((total, average), (0, 0));
    }
}
