//! Domain types for profiles, goal history and logged meals.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::str::FromStr;

use crate::error::ParseError;

/// Biological sex used by the lean body mass formulas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    /// Returns the lower-case key stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }

    /// Returns the display name for the gender.
    pub fn display_name(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
        }
    }
}

impl FromStr for Gender {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "male" | "m" => Ok(Gender::Male),
            "female" | "f" => Ok(Gender::Female),
            _ => Err(ParseError::UnknownGender(s.to_string())),
        }
    }
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Dietary objective of the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Goal {
    Deficit,
    Maintenance,
    Surplus,
}

impl Goal {
    /// Returns all goal variants.
    pub fn all() -> &'static [Goal] {
        &[Goal::Deficit, Goal::Maintenance, Goal::Surplus]
    }

    /// Returns the lower-case key stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Goal::Deficit => "deficit",
            Goal::Maintenance => "maintenance",
            Goal::Surplus => "surplus",
        }
    }

    /// Returns the display name for the goal.
    pub fn display_name(&self) -> &'static str {
        match self {
            Goal::Deficit => "Deficit",
            Goal::Maintenance => "Maintenance",
            Goal::Surplus => "Surplus",
        }
    }
}

impl FromStr for Goal {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "deficit" | "cut" => Ok(Goal::Deficit),
            "maintenance" | "maintain" => Ok(Goal::Maintenance),
            "surplus" | "bulk" => Ok(Goal::Surplus),
            _ => Err(ParseError::UnknownGoal(s.to_string())),
        }
    }
}

impl std::fmt::Display for Goal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Per-user profile.
///
/// `daily_calorie_goal` is a cache derived from the four body inputs; it is
/// present only when weight, height, gender and goal are all set and yield a
/// plausible lean body mass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Profile {
    pub weight_kg: Option<f64>,
    pub height_cm: Option<u32>,
    pub gender: Option<Gender>,
    pub goal: Option<Goal>,
    pub daily_calorie_goal: Option<u32>,
    /// IANA zone name; `None` means the deployment default.
    pub timezone: Option<String>,
}

impl Profile {
    /// Returns true if every input of the calorie goal derivation is set.
    pub fn is_complete(&self) -> bool {
        self.weight_kg.is_some()
            && self.height_cm.is_some()
            && self.gender.is_some()
            && self.goal.is_some()
    }

    /// Returns the user's zone name, falling back to `default_tz`.
    pub fn timezone_or<'a>(&'a self, default_tz: &'a str) -> &'a str {
        self.timezone.as_deref().unwrap_or(default_tz)
    }
}

/// A calorie goal that became effective on `effective_date` and stays in
/// effect until a later-dated entry supersedes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GoalVersionEntry {
    pub effective_date: NaiveDate,
    pub daily_calorie_goal: u32,
}

impl GoalVersionEntry {
    /// Creates a new goal history entry.
    pub fn new(effective_date: NaiveDate, daily_calorie_goal: u32) -> Self {
        Self {
            effective_date,
            daily_calorie_goal,
        }
    }
}

/// A logged meal. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumptionEntry {
    pub product_name: String,
    pub weight_grams: u32,
    pub calories_consumed: u32,
    pub timestamp: DateTime<Utc>,
}

impl ConsumptionEntry {
    /// Creates an entry from a product's energy density.
    ///
    /// ```text
    /// calories_consumed = round(calories_per_100g / 100 × weight_grams)
    /// ```
    pub fn from_density(
        product_name: impl Into<String>,
        weight_grams: u32,
        calories_per_100g: u32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            product_name: product_name.into(),
            weight_grams,
            calories_consumed: calories_for_portion(calories_per_100g, weight_grams),
            timestamp,
        }
    }
}

/// Heaviest portion accepted for a single meal (g).
pub const MAX_PORTION_GRAMS: u32 = 10_000;

/// Highest accepted energy density (kcal per 100 g); pure fat is about 900.
pub const MAX_CALORIES_PER_100G: u32 = 900;

/// Calories in a portion of `weight_grams` of a product.
pub fn calories_for_portion(calories_per_100g: u32, weight_grams: u32) -> u32 {
    (calories_per_100g as f64 / 100.0 * weight_grams as f64).round_ties_even() as u32
}

/// Normalizes a product name for catalogue lookups: trimmed, inner whitespace
/// collapsed to single spaces, lower-cased.
pub fn normalize_product_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Inclusive calendar-day range in the user's local calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ReportWindow {
    /// Creates a window covering `[start, end]`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Window containing only `today`.
    pub fn today(today: NaiveDate) -> Self {
        Self::new(today, today)
    }

    /// The `days` most recent days ending with `today`.
    pub fn last_n_days(today: NaiveDate, days: i64) -> Self {
        Self::new(today - Duration::days(days.max(1) - 1), today)
    }

    /// From the first of `today`'s month up to and including `today`.
    pub fn month_to_date(today: NaiveDate) -> Self {
        let start = today.with_day0(0).unwrap_or(today);
        Self::new(start, today)
    }

    /// Number of days in the window; zero or negative when `end < start`.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Iterates the dates of the window in ascending order.
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let days = self.days().max(0) as usize;
        self.start.iter_days().take(days)
    }

    /// UTC instants `[start, end)` covering the window in `tz`.
    ///
    /// `start` is local midnight of the first day, `end` local midnight of the
    /// day after the last one.
    pub fn utc_bounds(&self, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = local_midnight(self.start, tz);
        let end = local_midnight(self.end + Duration::days(1), tz);
        (start, end)
    }
}

/// First instant of a local calendar day, in UTC.
///
/// If a DST jump skips midnight, the day starts at the first valid local time
/// after the gap.
fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);

    (0..=2)
        .find_map(|hour| {
            tz.from_local_datetime(&(midnight + Duration::hours(hour)))
                .earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| midnight.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn test_gender_from_str() {
        assert_eq!(Gender::from_str("male").unwrap(), Gender::Male);
        assert_eq!(Gender::from_str("  FEMALE ").unwrap(), Gender::Female);
        assert_eq!(Gender::from_str("f").unwrap(), Gender::Female);
    }

    #[test]
    fn test_gender_from_str_invalid() {
        assert!(Gender::from_str("other").is_err());
        assert!(Gender::from_str("").is_err());
    }

    #[test]
    fn test_goal_from_str() {
        assert_eq!(Goal::from_str("deficit").unwrap(), Goal::Deficit);
        assert_eq!(Goal::from_str("Maintenance").unwrap(), Goal::Maintenance);
        assert_eq!(Goal::from_str("bulk").unwrap(), Goal::Surplus);
        assert!(Goal::from_str("unknown").is_err());
    }

    #[test]
    fn test_storage_keys_parse_back() {
        for goal in Goal::all() {
            assert_eq!(Goal::from_str(goal.as_str()).unwrap(), *goal);
        }
        for gender in [Gender::Male, Gender::Female] {
            assert_eq!(Gender::from_str(gender.as_str()).unwrap(), gender);
        }
    }

    #[test]
    fn test_profile_completeness() {
        let mut profile = Profile {
            weight_kg: Some(80.0),
            height_cm: Some(180),
            gender: Some(Gender::Male),
            ..Profile::default()
        };
        assert!(!profile.is_complete());

        profile.goal = Some(Goal::Deficit);
        assert!(profile.is_complete());
    }

    #[test]
    fn test_calories_for_portion() {
        // 250 kcal/100g, 150g -> 375 kcal
        assert_eq!(calories_for_portion(250, 150), 375);
        assert_eq!(calories_for_portion(0, 500), 0);
        // 33 kcal/100g, 40g -> 13.2
        assert_eq!(calories_for_portion(33, 40), 13);
        // Largest accepted portion of the densest accepted product
        assert_eq!(
            calories_for_portion(MAX_CALORIES_PER_100G, MAX_PORTION_GRAMS),
            90_000
        );
    }

    #[test]
    fn test_normalize_product_name() {
        assert_eq!(normalize_product_name("  Chicken   Breast "), "chicken breast");
        assert_eq!(normalize_product_name("RICE"), "rice");
    }

    #[test]
    fn test_report_window_last_n_days() {
        let window = ReportWindow::last_n_days(date(2026, 1, 7), 7);
        assert_eq!(window.start, date(2026, 1, 1));
        assert_eq!(window.days(), 7);
    }

    #[test]
    fn test_report_window_month_to_date() {
        let window = ReportWindow::month_to_date(date(2026, 3, 15));
        assert_eq!(window.start, date(2026, 3, 1));
        assert_eq!(window.end, date(2026, 3, 15));
        assert_eq!(window.days(), 15);
    }

    #[test]
    fn test_report_window_dates() {
        let window = ReportWindow::new(date(2025, 12, 30), date(2026, 1, 2));
        let dates: Vec<NaiveDate> = window.dates().collect();
        assert_eq!(dates.len(), 4);
        assert_eq!(dates[0], date(2025, 12, 30));
        assert_eq!(dates[3], date(2026, 1, 2));

        let inverted = ReportWindow::new(date(2026, 1, 2), date(2026, 1, 1));
        assert_eq!(inverted.days(), 0);
        assert_eq!(inverted.dates().count(), 0);
    }

    #[test]
    fn test_report_window_utc_bounds() {
        let window = ReportWindow::today(date(2026, 1, 2));

        let (start, end) = window.utc_bounds(Tz::Europe__Moscow);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 1, 1, 21, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 1, 2, 21, 0, 0).unwrap());

        let (start, end) = window.utc_bounds(Tz::UTC);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap());
        assert_eq!((end - start).num_hours(), 24);
    }

    #[test]
    fn test_report_window_utc_bounds_midnight_gap() {
        // Sao Paulo skipped 00:00-01:00 local on 2018-11-04 (UTC-3 -> UTC-2)
        let window = ReportWindow::today(date(2018, 11, 4));
        let (start, _) = window.utc_bounds(Tz::America__Sao_Paulo);
        assert_eq!(start, Utc.with_ymd_and_hms(2018, 11, 4, 3, 0, 0).unwrap());
    }
}
