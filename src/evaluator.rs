//! Composition Evaluator
//!
//! Turns raw per-category mass scores from the vision backend into the
//! achieved composition of a batch and compares it with the target.
//!
//! Scores are relative: they are normalised by their own sum and scaled to
//! the declared batch weight. No signal (all-zero scores) or a zero batch
//! weight yields an all-zero composition instead of an error.

use serde::{Deserialize, Serialize};

use crate::config::Tolerances;
use crate::profile::{Category, NutrientValues, TargetProfile};

/// Raw mass scores per category, in arbitrary device units
pub type MassScoreSet = NutrientValues<f64>;

/// Achieved composition of a measured batch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluatedComposition {
    /// Share of the batch, percent
    pub percentages: NutrientValues,
    /// Mass scaled to the declared batch weight
    pub masses: NutrientValues,
    /// Percentage minus target, percentage points
    pub deviation: NutrientValues,
    pub within_tolerance: NutrientValues<bool>,
}

/// Per-category evaluation line, for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NutrientReport {
    pub category: Category,
    pub label: &'static str,
    pub percentage: f64,
    pub mass: f64,
    pub target: f64,
    pub deviation: f64,
    pub within_tolerance: bool,
}

impl NutrientReport {
    /// Signed deviation with one decimal, e.g. "+1.3%"
    pub fn deviation_label(&self) -> String {
        let sign = if self.deviation > 0.0 { "+" } else { "" };
        format!("{}{:.1}%", sign, self.deviation)
    }
}

impl EvaluatedComposition {
    /// True when every category is inside the tolerance band
    pub fn all_within_tolerance(&self) -> bool {
        self.within_tolerance.all()
    }

    /// One report line per category in N, P, K, Filler order
    pub fn report(&self, target: &TargetProfile) -> Vec<NutrientReport> {
        let targets = target.as_values();
        Category::ALL
            .into_iter()
            .map(|category| NutrientReport {
                category,
                label: category.display_label(),
                percentage: self.percentages.get(category),
                mass: self.masses.get(category),
                target: targets.get(category),
                deviation: self.deviation.get(category),
                within_tolerance: self.within_tolerance.get(category),
            })
            .collect()
    }
}

/// Evaluator with a configurable tolerance band
#[derive(Debug, Clone, Copy, Default)]
pub struct CompositionEvaluator {
    tolerances: Tolerances,
}

impl CompositionEvaluator {
    pub fn new(tolerances: Tolerances) -> Self {
        Self { tolerances }
    }

    pub fn evaluate(&self, scores: &MassScoreSet, total_weight: f64, target: &TargetProfile) -> EvaluatedComposition {
        let sum_scores = scores.sum();
        let scale_factor = if sum_scores > 0.0 { total_weight / sum_scores } else { 0.0 };

        let masses = scores.map(|score| score * scale_factor);
        let percentages = masses.map(|mass| {
            if total_weight > 0.0 {
                mass / total_weight * 100.0
            } else {
                0.0
            }
        });

        let deviation = percentages.zip_with(&target.as_values(), |pct, goal| pct - goal);
        let band = self.tolerances.evaluation_band;
        let within_tolerance = deviation.map(|d| d.abs() <= band);

        EvaluatedComposition {
            percentages,
            masses,
            deviation,
            within_tolerance,
        }
    }
}

/// Evaluate with the default ±2.0 point band
pub fn evaluate(scores: &MassScoreSet, total_weight: f64, target: &TargetProfile) -> EvaluatedComposition {
    CompositionEvaluator::default().evaluate(scores, total_weight, target)
}
