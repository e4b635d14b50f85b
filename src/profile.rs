//! Profile updates and recalculation of the derived daily calorie goal.
//!
//! Whenever one of the body inputs (weight, height, gender, goal) changes, the
//! calorie goal is recomputed immediately. A successful computation is cached
//! on the profile and upserted into the goal history under the user's local
//! date in one transaction; an incomplete or implausible profile clears the
//! cached goal.

use chrono::{DateTime, NaiveDate, Utc};

use crate::aggregate::resolve_timezone;
use crate::domain::{Gender, Goal, Profile};
use crate::error::{ProfileError, StoreError};
use crate::nutrition::{CalorieTarget, calculate_lbm, calculate_target_calories};
use crate::store::NutritionStore;

/// Accepted bodyweight range (kg).
pub const WEIGHT_RANGE_KG: (f64, f64) = (30.0, 300.0);

/// Accepted height range (cm).
pub const HEIGHT_RANGE_CM: (u32, u32) = (100, 250);

/// A single profile field change.
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileUpdate {
    Weight(f64),
    Height(u32),
    Gender(Gender),
    Goal(Goal),
    Timezone(String),
}

impl ProfileUpdate {
    /// Checks the value against the accepted ranges.
    pub fn validate(&self) -> Result<(), ProfileError> {
        match self {
            ProfileUpdate::Weight(kg) => {
                let (min, max) = WEIGHT_RANGE_KG;
                if !(min..=max).contains(kg) {
                    return Err(ProfileError::WeightOutOfRange {
                        value: *kg,
                        min,
                        max,
                    });
                }
            }
            ProfileUpdate::Height(cm) => {
                let (min, max) = HEIGHT_RANGE_CM;
                if !(min..=max).contains(cm) {
                    return Err(ProfileError::HeightOutOfRange {
                        value: *cm,
                        min,
                        max,
                    });
                }
            }
            ProfileUpdate::Timezone(name) => {
                if name.trim().parse::<chrono_tz::Tz>().is_err() {
                    return Err(ProfileError::UnknownTimezone(name.clone()));
                }
            }
            ProfileUpdate::Gender(_) | ProfileUpdate::Goal(_) => {}
        }
        Ok(())
    }

    /// Returns true if the change affects the calorie goal.
    pub fn affects_goal(&self) -> bool {
        !matches!(self, ProfileUpdate::Timezone(_))
    }

    fn apply_to(self, profile: &mut Profile) {
        match self {
            ProfileUpdate::Weight(kg) => profile.weight_kg = Some(kg),
            ProfileUpdate::Height(cm) => profile.height_cm = Some(cm),
            ProfileUpdate::Gender(gender) => profile.gender = Some(gender),
            ProfileUpdate::Goal(goal) => profile.goal = Some(goal),
            ProfileUpdate::Timezone(name) => profile.timezone = Some(name.trim().to_string()),
        }
    }
}

/// Derives the calorie target from a profile, or None if the profile is
/// incomplete or yields an implausible lean body mass.
pub fn derive_calorie_target(profile: &Profile) -> Option<CalorieTarget> {
    let (Some(weight), Some(height), Some(gender), Some(goal)) =
        (profile.weight_kg, profile.height_cm, profile.gender, profile.goal)
    else {
        return None;
    };

    let lbm = calculate_lbm(weight, height, gender)?;
    calculate_target_calories(lbm, goal)
}

/// Local calendar date of `now` for the user's zone.
pub fn local_today(profile: &Profile, default_tz: &str, now: DateTime<Utc>) -> NaiveDate {
    let tz = resolve_timezone(profile.timezone_or(default_tz));
    now.with_timezone(&tz).date_naive()
}

/// Recomputes and persists the daily calorie goal of a user.
///
/// Returns the new goal, or None if it could not be computed (in which case
/// the cached goal is cleared).
pub async fn recalculate_goal<S: NutritionStore>(
    store: &S,
    user_id: i64,
    today: NaiveDate,
) -> Result<Option<u32>, StoreError> {
    let Some(profile) = store.profile(user_id).await? else {
        log::warn!("No profile for user {}, goal not calculated", user_id);
        return Ok(None);
    };

    if !profile.is_complete() {
        log::info!("Profile of user {} incomplete, goal cleared", user_id);
        store.set_current_goal(user_id, None).await?;
        return Ok(None);
    }

    let Some(target) = derive_calorie_target(&profile) else {
        log::warn!("Cannot derive calorie goal for user {}, goal cleared", user_id);
        store.set_current_goal(user_id, None).await?;
        return Ok(None);
    };

    if let Err(e) = store.record_goal(user_id, today, target.calories).await {
        log::error!("Failed to save goal for user {}: {}", user_id, e);
        return Err(e);
    }

    log::info!(
        "Goal for user {} recalculated: {} kcal from {}",
        user_id,
        target.calories,
        today
    );
    Ok(Some(target.calories))
}

/// Validates and applies a profile change, recalculating the goal if needed.
///
/// Returns the user's daily calorie goal after the update.
pub async fn apply_profile_update<S: NutritionStore>(
    store: &S,
    user_id: i64,
    update: ProfileUpdate,
    default_tz: &str,
    now: DateTime<Utc>,
) -> Result<Option<u32>, ProfileError> {
    update.validate()?;

    let mut profile = store.profile(user_id).await?.unwrap_or_default();
    let affects_goal = update.affects_goal();
    update.apply_to(&mut profile);
    let current_goal = profile.daily_calorie_goal;
    let today = local_today(&profile, default_tz, now);
    store.update_profile(user_id, &profile).await?;

    if !affects_goal {
        return Ok(current_goal);
    }

    Ok(recalculate_goal(store, user_id, today).await?)
}
