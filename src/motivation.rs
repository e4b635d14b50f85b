//! Classification of today's intake against the daily calorie goal.

use crate::domain::Goal;

/// Maintenance is on track while `|Δ| < target / 20` (5%).
const MAINTENANCE_TOLERANCE_DIVISOR: u64 = 20;

/// Motivational state for today's summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motivation {
    /// No calorie goal could be derived from the profile.
    NormNotCalculated,
    /// Within the goal (deficit) or within tolerance (maintenance).
    OnTrack,
    /// Consumed more than the target by the given amount.
    Over(u32),
    /// Consumed less than the maintenance target by the given amount.
    Under(u32),
    /// Reached or exceeded the surplus target.
    InSurplus,
    /// Still needs the given amount to reach the surplus target.
    NeedMore(u32),
}

/// Classifies today's consumption.
///
/// | goal | rule |
/// |---|---|
/// | deficit | `consumed ≤ target` → on track, else over |
/// | maintenance | `|Δ| < 5% of target` → on track, else over / under |
/// | surplus | `consumed ≥ target` → in surplus, else need more |
pub fn classify_motivation(goal: Option<Goal>, target: Option<u32>, consumed: u64) -> Motivation {
    let (Some(goal), Some(target)) = (goal, target.filter(|t| *t > 0)) else {
        return Motivation::NormNotCalculated;
    };

    let diff = consumed as i64 - target as i64;
    let magnitude = diff.unsigned_abs().min(u32::MAX as u64) as u32;

    match goal {
        Goal::Deficit => {
            if diff <= 0 {
                Motivation::OnTrack
            } else {
                Motivation::Over(magnitude)
            }
        }
        Goal::Maintenance => {
            if magnitude as u64 * MAINTENANCE_TOLERANCE_DIVISOR < target as u64 {
                Motivation::OnTrack
            } else if diff > 0 {
                Motivation::Over(magnitude)
            } else {
                Motivation::Under(magnitude)
            }
        }
        Goal::Surplus => {
            if diff >= 0 {
                Motivation::InSurplus
            } else {
                Motivation::NeedMore(magnitude)
            }
        }
    }
}
