//! Assembly of the numbers shown in the today, week and month reports.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};

use crate::aggregate::{group_by_local_day, resolve_timezone, total_and_average};
use crate::domain::{ConsumptionEntry, Goal, ReportWindow};
use crate::error::StoreError;
use crate::motivation::{Motivation, classify_motivation};
use crate::norm::{NormSummary, resolve_historical_norm};
use crate::store::NutritionStore;

/// Length of the rolling week report.
pub const WEEK_DAYS: i64 = 7;

/// Today's intake of a user.
#[derive(Debug, Clone, PartialEq)]
pub struct TodaySummary {
    pub date: NaiveDate,
    pub timezone: String,
    pub entries: Vec<ConsumptionEntry>,
    pub consumed: u64,
    pub goal: Option<Goal>,
    pub daily_calorie_goal: Option<u32>,
    pub motivation: Motivation,
}

/// Consumption and norm over a multi-day window.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodReport {
    pub window: ReportWindow,
    pub timezone: String,
    /// Consumed calories per local date; days without entries are absent.
    pub daily: BTreeMap<NaiveDate, u64>,
    pub consumed_total: u64,
    /// `round(consumed_total / window days)`.
    pub consumed_average: u32,
    pub norm: NormSummary,
}

impl PeriodReport {
    /// Returns true if anything was logged in the window.
    pub fn has_entries(&self) -> bool {
        !self.daily.is_empty()
    }

    /// Consumed calories for every date of the window, newest first.
    pub fn days_newest_first(&self) -> Vec<(NaiveDate, u64)> {
        let mut days: Vec<(NaiveDate, u64)> = self
            .window
            .dates()
            .map(|date| (date, self.daily.get(&date).copied().unwrap_or(0)))
            .collect();
        days.reverse();
        days
    }
}

/// Builds today's summary for the user's local calendar day.
pub async fn build_today_summary<S: NutritionStore>(
    store: &S,
    user_id: i64,
    default_tz: &str,
    now: DateTime<Utc>,
) -> Result<TodaySummary, StoreError> {
    let profile = store.profile(user_id).await?.unwrap_or_default();
    let timezone = profile.timezone_or(default_tz).to_string();
    let tz = resolve_timezone(&timezone);

    let today = now.with_timezone(&tz).date_naive();
    let (start, end) = ReportWindow::today(today).utc_bounds(tz);
    let entries = store.consumption_entries(user_id, start, end).await?;

    let consumed: u64 = entries.iter().map(|e| u64::from(e.calories_consumed)).sum();
    let motivation = classify_motivation(profile.goal, profile.daily_calorie_goal, consumed);

    log::debug!(
        "Today for user {} ({}, {}): {} entries, {} kcal, {:?}",
        user_id,
        today,
        timezone,
        entries.len(),
        consumed,
        motivation
    );

    Ok(TodaySummary {
        date: today,
        timezone,
        entries,
        consumed,
        goal: profile.goal,
        daily_calorie_goal: profile.daily_calorie_goal,
        motivation,
    })
}

/// Builds a report for `window`, interpreted in the zone `tz_name`.
///
/// The consumed average and the norm average both divide by the window
/// length, including days without entries.
pub async fn build_period_report<S: NutritionStore>(
    store: &S,
    user_id: i64,
    window: ReportWindow,
    tz_name: &str,
) -> Result<PeriodReport, StoreError> {
    let tz = resolve_timezone(tz_name);
    let (start, end) = window.utc_bounds(tz);

    let entries = store.consumption_entries(user_id, start, end).await?;
    let daily = group_by_local_day(&entries, tz_name);
    let (consumed_total, consumed_average) = total_and_average(&daily, window.days());

    let current_goal = store
        .profile(user_id)
        .await?
        .and_then(|profile| profile.daily_calorie_goal);
    let history = store.goal_history(user_id, window.start, window.end).await?;
    let norm = resolve_historical_norm(window.start, window.days(), &history, current_goal);

    log::debug!(
        "Report for user {} {}..={} ({}): {} kcal consumed, norm {:?}",
        user_id,
        window.start,
        window.end,
        tz_name,
        consumed_total,
        norm
    );

    Ok(PeriodReport {
        window,
        timezone: tz_name.to_string(),
        daily,
        consumed_total,
        consumed_average,
        norm,
    })
}

/// Rolling seven-day report ending with the user's local today.
pub async fn build_week_report<S: NutritionStore>(
    store: &S,
    user_id: i64,
    default_tz: &str,
    now: DateTime<Utc>,
) -> Result<PeriodReport, StoreError> {
    let (today, tz_name) = local_today_and_zone(store, user_id, default_tz, now).await?;
    build_period_report(
        store,
        user_id,
        ReportWindow::last_n_days(today, WEEK_DAYS),
        &tz_name,
    )
    .await
}

/// Month-to-date report in the user's local calendar.
pub async fn build_month_report<S: NutritionStore>(
    store: &S,
    user_id: i64,
    default_tz: &str,
    now: DateTime<Utc>,
) -> Result<PeriodReport, StoreError> {
    let (today, tz_name) = local_today_and_zone(store, user_id, default_tz, now).await?;
    build_period_report(
        store,
        user_id,
        ReportWindow::month_to_date(today),
        &tz_name,
    )
    .await
}

async fn local_today_and_zone<S: NutritionStore>(
    store: &S,
    user_id: i64,
    default_tz: &str,
    now: DateTime<Utc>,
) -> Result<(NaiveDate, String), StoreError> {
    let profile = store.profile(user_id).await?.unwrap_or_default();
    let tz_name = profile.timezone_or(default_tz).to_string();
    let today = now.with_timezone(&resolve_timezone(&tz_name)).date_naive();
    Ok((today, tz_name))
}
