//! Target profile and per-category value records
//!
//! Everything on the analysis side is reported for four categories: the three
//! nutrients plus filler. `NutrientValues<T>` carries one value per category
//! so percentages, masses, deviations and tolerance flags share one shape.

use serde::{Deserialize, Serialize};
use crate::filler_policy::complement_filler;

/// Default batch size when none is given
pub const DEFAULT_TOTAL_WEIGHT: f64 = 100.0;

/// Default N, P and K target percentage
pub const DEFAULT_NUTRIENT_PCT: f64 = 15.0;

/// Reporting category (N, P, K, Filler)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    N,
    P,
    K,
    Filler,
}

impl Category {
    /// Display order
    pub const ALL: [Category; 4] = [Category::N, Category::P, Category::K, Category::Filler];

    /// Card label with source material, e.g. "N (Urea)"
    pub fn display_label(&self) -> &'static str {
        match self {
            Category::N => "N (Urea)",
            Category::P => "P (DAP)",
            Category::K => "K (Potash)",
            Category::Filler => "Filler",
        }
    }
}

/// One value per reporting category
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NutrientValues<T = f64> {
    pub n: T,
    pub p: T,
    pub k: T,
    pub filler: T,
}

impl<T: Copy> NutrientValues<T> {
    pub fn new(n: T, p: T, k: T, filler: T) -> Self {
        Self { n, p, k, filler }
    }

    pub fn get(&self, category: Category) -> T {
        match category {
            Category::N => self.n,
            Category::P => self.p,
            Category::K => self.k,
            Category::Filler => self.filler,
        }
    }

    pub fn map<U, F: FnMut(T) -> U>(&self, mut f: F) -> NutrientValues<U> {
        NutrientValues {
            n: f(self.n),
            p: f(self.p),
            k: f(self.k),
            filler: f(self.filler),
        }
    }

    /// Combine two records category by category
    pub fn zip_with<U: Copy, V, F: FnMut(T, U) -> V>(&self, other: &NutrientValues<U>, mut f: F) -> NutrientValues<V> {
        NutrientValues {
            n: f(self.n, other.n),
            p: f(self.p, other.p),
            k: f(self.k, other.k),
            filler: f(self.filler, other.filler),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, T)> + '_ {
        Category::ALL.into_iter().map(move |c| (c, self.get(c)))
    }
}

impl NutrientValues<f64> {
    pub fn sum(&self) -> f64 {
        self.n + self.p + self.k + self.filler
    }
}

impl NutrientValues<bool> {
    pub fn all(&self) -> bool {
        self.n && self.p && self.k && self.filler
    }
}

/// Target composition in percent of total mass
///
/// `filler` follows the nutrient fields unless it was the last field edited
/// (see `filler_policy`), so the four fields need not sum to 100.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetProfile {
    pub n: f64,
    pub p: f64,
    pub k: f64,
    pub filler: f64,
}

impl TargetProfile {
    /// Build from N, P, K with the complementary filler share
    pub fn from_npk(n: f64, p: f64, k: f64) -> Self {
        Self {
            n,
            p,
            k,
            filler: complement_filler(n, p, k),
        }
    }

    pub fn as_values(&self) -> NutrientValues {
        NutrientValues::new(self.n, self.p, self.k, self.filler)
    }

    pub fn total(&self) -> f64 {
        self.n + self.p + self.k + self.filler
    }

    /// Grade-style label, e.g. "15-15-15"
    pub fn grade(&self) -> String {
        format!("{}-{}-{}", self.n, self.p, self.k)
    }
}

impl Default for TargetProfile {
    fn default() -> Self {
        Self::from_npk(DEFAULT_NUTRIENT_PCT, DEFAULT_NUTRIENT_PCT, DEFAULT_NUTRIENT_PCT)
    }
}

impl From<TargetProfile> for NutrientValues {
    fn from(target: TargetProfile) -> Self {
        target.as_values()
    }
}
