//! Reconstruction of the calorie norm that applied on each day of a report window.
//!
//! The goal history is a date-keyed timeline of "goal effective from this day
//! on". For every day of the window the applicable goal is found with a floor
//! lookup (latest effective date not after the day). Days that precede the
//! whole timeline fall back to the user's current goal.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::aggregate::calculate_average;
use crate::domain::GoalVersionEntry;

/// Norm over a report window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormSummary {
    /// Sum of the daily norms over the window (kcal).
    pub total: u64,
    /// `round(total / window_days)`.
    pub average: u32,
    /// False when no day of the window could be resolved.
    pub determined: bool,
}

impl NormSummary {
    /// Sentinel for a window whose norm cannot be determined.
    pub const UNDETERMINED: NormSummary = NormSummary {
        total: 0,
        average: 0,
        determined: false,
    };
}

/// Resolves the total and average calorie norm for `window_days` days starting
/// at `window_start`.
///
/// `history` must contain every entry effective inside the window plus the
/// latest entry effective before `window_start`, if any. Order does not
/// matter; for duplicate dates the later element wins.
///
/// Per day:
/// 1. the entry with the greatest `effective_date <= day` applies;
/// 2. otherwise `current_goal` applies;
/// 3. otherwise the day contributes nothing.
///
/// Returns [`NormSummary::UNDETERMINED`] when `window_days <= 0` or no day
/// resolved.
pub fn resolve_historical_norm(
    window_start: NaiveDate,
    window_days: i64,
    history: &[GoalVersionEntry],
    current_goal: Option<u32>,
) -> NormSummary {
    if window_days <= 0 {
        return NormSummary::UNDETERMINED;
    }

    let current_goal = current_goal.filter(|goal| *goal > 0);

    if history.is_empty() {
        return match current_goal {
            Some(goal) => NormSummary {
                total: u64::from(goal).saturating_mul(window_days as u64),
                average: goal,
                determined: true,
            },
            None => NormSummary::UNDETERMINED,
        };
    }

    let timeline: BTreeMap<NaiveDate, u32> = history
        .iter()
        .map(|entry| (entry.effective_date, entry.daily_calorie_goal))
        .collect();

    let mut total: u64 = 0;
    let mut any_day_resolved = false;

    for day in window_start.iter_days().take(window_days as usize) {
        let applicable = timeline
            .range(..=day)
            .next_back()
            .map(|(_, goal)| *goal)
            .or(current_goal);

        if let Some(goal) = applicable {
            total = total.saturating_add(u64::from(goal));
            any_day_resolved = true;
        }
    }

    if !any_day_resolved {
        log::debug!(
            "No norm applicable to any of {} days from {}",
            window_days,
            window_start
        );
        return NormSummary::UNDETERMINED;
    }

    NormSummary {
        total,
        average: calculate_average(total, window_days),
        determined: true,
    }
}
