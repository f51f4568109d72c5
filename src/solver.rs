//! Recipe Solver
//!
//! Decomposes a target N-P-K percentage profile into masses of Urea, DAP, MOP
//! and inert filler by credit-and-residual elimination:
//!
//! 1. DAP share from the P target alone
//! 2. N credit that DAP brings along (18% of the DAP share)
//! 3. Urea share from the residual N; a residual below the overshoot
//!    tolerance means DAP alone oversupplies N
//! 4. MOP share from the K target
//! 5. Filler takes what is left; a remainder below the concentration
//!    tolerance means the actives alone exceed the batch
//! 6. Shares are scaled to the batch weight
//!
//! The solver is stateless: identical inputs give identical plans or errors.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Tolerances;
use crate::materials::{MaterialRole, MaterialTable, Nutrient};
use crate::profile::TargetProfile;

/// N, P, K target in percent of total mass (filler is derived)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NpkTarget {
    pub n: f64,
    pub p: f64,
    pub k: f64,
}

impl NpkTarget {
    pub fn new(n: f64, p: f64, k: f64) -> Self {
        Self { n, p, k }
    }

    pub fn get(&self, nutrient: Nutrient) -> f64 {
        match nutrient {
            Nutrient::N => self.n,
            Nutrient::P => self.p,
            Nutrient::K => self.k,
        }
    }
}

impl From<&TargetProfile> for NpkTarget {
    fn from(target: &TargetProfile) -> Self {
        Self::new(target.n, target.p, target.k)
    }
}

impl From<TargetProfile> for NpkTarget {
    fn from(target: TargetProfile) -> Self {
        Self::from(&target)
    }
}

/// Error classification, stable across message changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipeErrorKind {
    NitrogenOversupply,
    OverConcentration,
    InvalidInput,
}

/// Why a target cannot be mixed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecipeError {
    /// DAP needed for the P target already carries more N than the N target
    #[error("Impossible: DAP provides too much N ({n_credit:.1}%) for this target.")]
    NitrogenOversupply { n_credit: f64, target_n: f64 },

    /// Urea + DAP + MOP exceed the whole batch before any filler
    #[error("Over concentration! Total raw materials exceed 100% ({used:.1}%).")]
    OverConcentration { used: f64 },

    /// Negative or non-finite target or weight
    #[error("Invalid input: {field} = {value}")]
    InvalidInput { field: &'static str, value: f64 },
}

impl RecipeError {
    pub fn kind(&self) -> RecipeErrorKind {
        match self {
            RecipeError::NitrogenOversupply { .. } => RecipeErrorKind::NitrogenOversupply,
            RecipeError::OverConcentration { .. } => RecipeErrorKind::OverConcentration,
            RecipeError::InvalidInput { .. } => RecipeErrorKind::InvalidInput,
        }
    }

    /// N delivered beyond the target (nitrogen oversupply only)
    pub fn nitrogen_excess(&self) -> Option<f64> {
        match self {
            RecipeError::NitrogenOversupply { n_credit, target_n } => Some(n_credit - target_n),
            _ => None,
        }
    }

    /// Active share above 100% (over-concentration only)
    pub fn concentration_excess(&self) -> Option<f64> {
        match self {
            RecipeError::OverConcentration { used } => Some(used - 100.0),
            _ => None,
        }
    }

    /// Message for application display
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

/// Amount per recipe slot (mass or percent, depending on context)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MaterialAmounts {
    pub nitrogen_source: f64,
    pub phosphorus_source: f64,
    pub potassium_source: f64,
    pub filler: f64,
}

impl MaterialAmounts {
    pub fn get(&self, role: MaterialRole) -> f64 {
        match role {
            MaterialRole::NitrogenSource => self.nitrogen_source,
            MaterialRole::PhosphorusSource => self.phosphorus_source,
            MaterialRole::PotassiumSource => self.potassium_source,
            MaterialRole::Filler => self.filler,
        }
    }

    pub fn sum(&self) -> f64 {
        self.nitrogen_source + self.phosphorus_source + self.potassium_source + self.filler
    }

    fn scaled(&self, factor: f64) -> Self {
        Self {
            nitrogen_source: self.nitrogen_source * factor,
            phosphorus_source: self.phosphorus_source * factor,
            potassium_source: self.potassium_source * factor,
            filler: self.filler * factor,
        }
    }
}

/// Mixing plan: material masses for one batch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecipePlan {
    pub nitrogen_source: f64,
    pub phosphorus_source: f64,
    pub potassium_source: f64,
    pub filler: f64,
    pub total: f64,
    /// Material shares in percent of the batch
    pub shares: MaterialAmounts,
}

/// One line of a recipe listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipeRow {
    pub role: MaterialRole,
    pub material: &'static str,
    pub sub_label: &'static str,
    pub mass: f64,
    /// Mass as percent of the batch total
    pub share: f64,
}

impl RecipePlan {
    pub fn masses(&self) -> MaterialAmounts {
        MaterialAmounts {
            nitrogen_source: self.nitrogen_source,
            phosphorus_source: self.phosphorus_source,
            potassium_source: self.potassium_source,
            filler: self.filler,
        }
    }

    /// Combined share of the three active materials (before filler)
    pub fn active_share(&self) -> f64 {
        self.shares.nitrogen_source + self.shares.phosphorus_source + self.shares.potassium_source
    }

    /// Recipe listing in display order
    pub fn rows(&self, materials: &MaterialTable) -> Vec<RecipeRow> {
        let masses = self.masses();
        materials
            .iter()
            .map(|(role, material)| {
                let mass = masses.get(role);
                RecipeRow {
                    role,
                    material: material.name,
                    sub_label: material.sub_label,
                    mass,
                    share: if self.total > 0.0 { mass / self.total * 100.0 } else { 0.0 },
                }
            })
            .collect()
    }

    /// N, P, K percentages the plan actually delivers
    pub fn nutrient_content(&self, materials: &MaterialTable) -> NpkTarget {
        let delivered = |nutrient: Nutrient| {
            materials
                .iter()
                .map(|(role, material)| self.shares.get(role) * material.assay.get(nutrient) / 100.0)
                .sum::<f64>()
        };
        NpkTarget::new(delivered(Nutrient::N), delivered(Nutrient::P), delivered(Nutrient::K))
    }
}

/// Recipe solver over a material table
#[derive(Debug, Clone, Copy, Default)]
pub struct RecipeSolver {
    materials: MaterialTable,
    tolerances: Tolerances,
}

impl RecipeSolver {
    pub fn new(materials: MaterialTable, tolerances: Tolerances) -> Self {
        Self { materials, tolerances }
    }

    pub fn with_tolerances(tolerances: Tolerances) -> Self {
        Self::new(MaterialTable::STANDARD, tolerances)
    }

    pub fn materials(&self) -> &MaterialTable {
        &self.materials
    }

    pub fn tolerances(&self) -> &Tolerances {
        &self.tolerances
    }

    /// Solve one target for a batch of `total_weight`
    pub fn solve(&self, target: &NpkTarget, total_weight: f64) -> Result<RecipePlan, RecipeError> {
        validate_inputs(target, total_weight)?;

        let dap = &self.materials.phosphorus_source.assay;
        let urea = &self.materials.nitrogen_source.assay;
        let mop = &self.materials.potassium_source.assay;

        // 1. DAP for the P target
        let pct_p = if target.p > 0.0 { target.p / dap.p * 100.0 } else { 0.0 };

        // 2-3. N credit from DAP, Urea for the residual
        let n_credit = pct_p * dap.n / 100.0;
        let residual_n = target.n - n_credit;
        if residual_n < -self.tolerances.nitrogen_overshoot {
            tracing::debug!(
                "DAP oversupplies N: credit {:.3}% > target {:.3}%",
                n_credit, target.n
            );
            return Err(RecipeError::NitrogenOversupply { n_credit, target_n: target.n });
        }
        let pct_n = if residual_n > 0.0 { residual_n / urea.n * 100.0 } else { 0.0 };

        // 4. MOP for the K target
        let pct_k = if target.k > 0.0 { target.k / mop.k * 100.0 } else { 0.0 };

        // 5. Filler is the remainder
        let used = pct_p + pct_n + pct_k;
        let pct_filler = 100.0 - used;
        if pct_filler < -self.tolerances.concentration_overshoot {
            tracing::debug!("Active materials exceed batch: {:.3}%", used);
            return Err(RecipeError::OverConcentration { used });
        }

        let shares = MaterialAmounts {
            nitrogen_source: pct_n,
            phosphorus_source: pct_p,
            potassium_source: pct_k,
            filler: pct_filler.max(0.0),
        };

        // 6. Scale to the batch
        let masses = shares.scaled(total_weight / 100.0);

        Ok(RecipePlan {
            nitrogen_source: masses.nitrogen_source,
            phosphorus_source: masses.phosphorus_source,
            potassium_source: masses.potassium_source,
            filler: masses.filler,
            total: total_weight,
            shares,
        })
    }

    /// Solve a target profile (its filler field is ignored)
    pub fn solve_profile(&self, target: &TargetProfile, total_weight: f64) -> Result<RecipePlan, RecipeError> {
        self.solve(&NpkTarget::from(target), total_weight)
    }

    /// Solve many (target, weight) pairs in parallel, preserving order
    pub fn solve_batch(&self, requests: &[(NpkTarget, f64)]) -> Vec<Result<RecipePlan, RecipeError>> {
        requests
            .par_iter()
            .map(|(target, weight)| self.solve(target, *weight))
            .collect()
    }
}

fn validate_inputs(target: &NpkTarget, total_weight: f64) -> Result<(), RecipeError> {
    for (field, value) in [
        ("n", target.n),
        ("p", target.p),
        ("k", target.k),
        ("total_weight", total_weight),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(RecipeError::InvalidInput { field, value });
        }
    }
    Ok(())
}

/// Solve with the standard materials and default tolerances
pub fn solve(target: &NpkTarget, total_weight: f64) -> Result<RecipePlan, RecipeError> {
    RecipeSolver::default().solve(target, total_weight)
}

/// Solve with the standard materials and the given tolerances
pub fn solve_with(tolerances: &Tolerances, target: &NpkTarget, total_weight: f64) -> Result<RecipePlan, RecipeError> {
    RecipeSolver::with_tolerances(*tolerances).solve(target, total_weight)
}
