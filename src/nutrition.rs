//! Lean body mass and calorie target calculations from profile attributes.

use crate::domain::{Gender, Goal};

/// Upper bound of a plausible LBM relative to total bodyweight.
const MAX_LBM_RATIO: f64 = 1.05;

/// Energy density of macronutrients (kcal per gram).
mod kcal_per_gram {
    pub const PROTEIN: u32 = 4;
    pub const FAT: u32 = 9;
    pub const CARBS: u32 = 4;
}

/// Daily macro targets in grams per kg of lean body mass.
#[derive(Debug, Clone, Copy, PartialEq)]
struct MacroRatios {
    protein: f64,
    fat: f64,
    carbs: f64,
}

const DEFICIT_RATIOS: MacroRatios = MacroRatios {
    protein: 1.5,
    fat: 0.8,
    carbs: 2.0,
};

const SURPLUS_RATIOS: MacroRatios = MacroRatios {
    protein: 2.2,
    fat: 1.5,
    carbs: 4.0,
};

impl MacroRatios {
    /// Maintenance sits halfway between deficit and surplus.
    fn for_goal(goal: Goal) -> Self {
        match goal {
            Goal::Deficit => DEFICIT_RATIOS,
            Goal::Surplus => SURPLUS_RATIOS,
            Goal::Maintenance => MacroRatios {
                protein: (DEFICIT_RATIOS.protein + SURPLUS_RATIOS.protein) / 2.0,
                fat: (DEFICIT_RATIOS.fat + SURPLUS_RATIOS.fat) / 2.0,
                carbs: (DEFICIT_RATIOS.carbs + SURPLUS_RATIOS.carbs) / 2.0,
            },
        }
    }
}

/// Daily macronutrient targets in grams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacroTargets {
    pub protein_g: u32,
    pub fat_g: u32,
    pub carbs_g: u32,
}

impl MacroTargets {
    /// Total energy of the macros in kcal.
    pub fn calories(&self) -> u64 {
        u64::from(self.protein_g) * u64::from(kcal_per_gram::PROTEIN)
            + u64::from(self.fat_g) * u64::from(kcal_per_gram::FAT)
            + u64::from(self.carbs_g) * u64::from(kcal_per_gram::CARBS)
    }
}

/// Daily calorie target together with its macro breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalorieTarget {
    pub macros: MacroTargets,
    pub calories: u32,
}

/// Estimates lean body mass (kg).
///
/// Formulas (W in kg, H in cm):
/// ```text
/// male:   LBM = 0.407 × W + 0.267 × H − 19.2
/// female: LBM = 0.252 × W + 0.473 × H − 48.3
/// ```
///
/// Returns None for non-positive inputs, or when the estimate falls outside
/// `0 < LBM ≤ 1.05 × W`.
pub fn calculate_lbm(weight_kg: f64, height_cm: u32, gender: Gender) -> Option<f64> {
    if !weight_kg.is_finite() || weight_kg <= 0.0 || height_cm == 0 {
        return None;
    }

    let h = height_cm as f64;
    let lbm = match gender {
        Gender::Male => 0.407 * weight_kg + 0.267 * h - 19.2,
        Gender::Female => 0.252 * weight_kg + 0.473 * h - 48.3,
    };

    if lbm <= 0.0 || lbm > weight_kg * MAX_LBM_RATIO {
        log::warn!(
            "Implausible LBM {:.2} kg for W={} kg, H={} cm, gender={}",
            lbm,
            weight_kg,
            height_cm,
            gender
        );
        return None;
    }

    log::debug!(
        "LBM: W={} kg, H={} cm, gender={} -> {:.2} kg",
        weight_kg,
        height_cm,
        gender,
        lbm
    );
    Some(lbm)
}

/// Calculates macro grams and the total daily calorie target for a goal.
///
/// ```text
/// grams(nutrient) = round(ratio(goal, nutrient) × LBM)
/// calories        = 4 × protein + 9 × fat + 4 × carbs
/// ```
///
/// Returns None if `lbm` is not a positive number, or if a macro or the
/// calorie total does not fit in `u32`.
pub fn calculate_target_calories(lbm: f64, goal: Goal) -> Option<CalorieTarget> {
    if !lbm.is_finite() || lbm <= 0.0 {
        return None;
    }

    let ratios = MacroRatios::for_goal(goal);
    let grams = |ratio: f64| {
        let grams = (ratio * lbm).round_ties_even();
        (grams <= u32::MAX as f64).then_some(grams as u32)
    };

    let macros = MacroTargets {
        protein_g: grams(ratios.protein)?,
        fat_g: grams(ratios.fat)?,
        carbs_g: grams(ratios.carbs)?,
    };
    let Ok(calories) = u32::try_from(macros.calories()) else {
        log::warn!("Calorie target for LBM={:.2} kg does not fit in u32", lbm);
        return None;
    };

    log::debug!(
        "Targets for LBM={:.2} kg, goal={}: P={}g F={}g C={}g, {} kcal",
        lbm,
        goal,
        macros.protein_g,
        macros.fat_g,
        macros.carbs_g,
        calories
    );

    Some(CalorieTarget { macros, calories })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper to check floating point equality with tolerance
    fn approx_eq(a: f64, b: f64, tolerance: f64) -> bool {
        (a - b).abs() < tolerance
    }

    #[test]
    fn test_lbm_male() {
        let lbm = calculate_lbm(80.0, 180, Gender::Male).unwrap();
        assert!(approx_eq(lbm, 0.407 * 80.0 + 0.267 * 180.0 - 19.2, 1e-9));
    }

    #[test]
    fn test_lbm_female() {
        let lbm = calculate_lbm(65.0, 170, Gender::Female).unwrap();
        assert!(approx_eq(lbm, 0.252 * 65.0 + 0.473 * 170.0 - 48.3, 1e-9));
    }

    #[test]
    fn test_lbm_invalid_inputs() {
        assert!(calculate_lbm(0.0, 180, Gender::Male).is_none());
        assert!(calculate_lbm(-80.0, 180, Gender::Male).is_none());
        assert!(calculate_lbm(80.0, 0, Gender::Male).is_none());
        assert!(calculate_lbm(f64::NAN, 180, Gender::Female).is_none());
    }

    #[test]
    fn test_lbm_implausible() {
        // Very low weight with very tall height exceeds total bodyweight
        assert!(calculate_lbm(30.0, 220, Gender::Male).is_none());
        // Short and light female yields a negative estimate
        assert!(calculate_lbm(30.0, 60, Gender::Female).is_none());
    }

    #[test]
    fn test_lbm_never_exceeds_bodyweight_bound() {
        for weight in [35.0, 50.0, 70.0, 90.0, 120.0, 160.0] {
            for height in [120, 150, 170, 190, 210, 240] {
                for gender in [Gender::Male, Gender::Female] {
                    if let Some(lbm) = calculate_lbm(weight, height, gender) {
                        assert!(lbm > 0.0);
                        assert!(lbm <= weight * MAX_LBM_RATIO, "LBM = {}", lbm);
                    }
                }
            }
        }
    }

    #[test]
    fn test_targets_deficit() {
        let target = calculate_target_calories(60.0, Goal::Deficit).unwrap();
        assert_eq!(
            target.macros,
            MacroTargets {
                protein_g: 90,
                fat_g: 48,
                carbs_g: 120
            }
        );
        assert_eq!(target.calories, 90 * 4 + 48 * 9 + 120 * 4);
        assert_eq!(target.macros.calories(), u64::from(target.calories));
    }

    #[test]
    fn test_targets_maintenance_between_deficit_and_surplus() {
        let deficit = calculate_target_calories(60.0, Goal::Deficit).unwrap();
        let maintenance = calculate_target_calories(60.0, Goal::Maintenance).unwrap();
        let surplus = calculate_target_calories(60.0, Goal::Surplus).unwrap();

        assert_eq!(maintenance.macros.protein_g, 111);
        assert_eq!(maintenance.macros.fat_g, 69);
        assert_eq!(maintenance.macros.carbs_g, 180);
        assert!(deficit.calories < maintenance.calories);
        assert!(maintenance.calories < surplus.calories);
    }

    #[test]
    fn test_targets_positive_for_every_goal() {
        for goal in Goal::all() {
            let target = calculate_target_calories(60.0, *goal).unwrap();
            assert!(target.calories > 0);
        }
    }

    #[test]
    fn test_targets_invalid_lbm() {
        assert!(calculate_target_calories(0.0, Goal::Deficit).is_none());
        assert!(calculate_target_calories(-5.0, Goal::Surplus).is_none());
    }

    #[test]
    fn test_targets_too_large_for_u32() {
        // Grams fit in u32, the kcal total does not
        assert!(calculate_target_calories(1.0e9, Goal::Surplus).is_none());
        // Grams alone overflow u32
        assert!(calculate_target_calories(1.0e12, Goal::Deficit).is_none());
    }

    #[test]
    fn test_macro_calories_do_not_wrap() {
        let macros = MacroTargets {
            protein_g: u32::MAX,
            fat_g: u32::MAX,
            carbs_g: u32::MAX,
        };
        assert_eq!(macros.calories(), 17 * u64::from(u32::MAX));
    }
}
