//! Material Table
//!
//! The four raw materials a blend is mixed from, with their nutrient assays.
//! Assays are percent by mass of N, P (as P2O5) and K (as K2O) in the pure
//! material, following fertilizer grade labelling (46-0-0 = 46% N).
//!
//! The set is fixed: only DAP contributes more than one nutrient, and each of
//! P and K has exactly one supplying material.

use serde::Serialize;

/// Primary nutrients tracked by the grade label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Nutrient {
    N,
    P,
    K,
}

impl Nutrient {
    pub const ALL: [Nutrient; 3] = [Nutrient::N, Nutrient::P, Nutrient::K];

    pub fn display_name(&self) -> &'static str {
        match self {
            Nutrient::N => "Nitrogen",
            Nutrient::P => "Phosphorus",
            Nutrient::K => "Potassium",
        }
    }
}

/// Nutrient content of a pure material (percent by mass)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Assay {
    pub n: f64,
    pub p: f64,
    pub k: f64,
}

impl Assay {
    pub const fn new(n: f64, p: f64, k: f64) -> Self {
        Self { n, p, k }
    }

    pub fn get(&self, nutrient: Nutrient) -> f64 {
        match nutrient {
            Nutrient::N => self.n,
            Nutrient::P => self.p,
            Nutrient::K => self.k,
        }
    }

    /// Total nutrient share; the rest of the granule is carrier
    pub fn total(&self) -> f64 {
        self.n + self.p + self.k
    }

    /// Grade label, e.g. "18-46-0"
    pub fn grade(&self) -> String {
        format!("{}-{}-{}", self.n, self.p, self.k)
    }
}

/// A raw blending material
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Material {
    pub name: &'static str,
    /// Short label shown next to the name ("46-0-0", "Inert")
    pub sub_label: &'static str,
    pub assay: Assay,
}

impl Material {
    /// "Urea (46-0-0)"
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.sub_label)
    }

    pub fn is_inert(&self) -> bool {
        self.assay.total() == 0.0
    }
}

pub const UREA: Material = Material {
    name: "Urea",
    sub_label: "46-0-0",
    assay: Assay::new(46.0, 0.0, 0.0),
};

pub const DAP: Material = Material {
    name: "DAP",
    sub_label: "18-46-0",
    assay: Assay::new(18.0, 46.0, 0.0),
};

pub const MOP: Material = Material {
    name: "MOP",
    sub_label: "0-0-60",
    assay: Assay::new(0.0, 0.0, 60.0),
};

pub const FILLER: Material = Material {
    name: "Filler",
    sub_label: "Inert",
    assay: Assay::new(0.0, 0.0, 0.0),
};

/// Which slot of the recipe a material fills
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialRole {
    NitrogenSource,
    PhosphorusSource,
    PotassiumSource,
    Filler,
}

impl MaterialRole {
    /// Recipe display order
    pub const ALL: [MaterialRole; 4] = [
        MaterialRole::NitrogenSource,
        MaterialRole::PhosphorusSource,
        MaterialRole::PotassiumSource,
        MaterialRole::Filler,
    ];
}

/// Registry of the fixed materials
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MaterialTable {
    pub nitrogen_source: Material,
    pub phosphorus_source: Material,
    pub potassium_source: Material,
    pub filler: Material,
}

impl MaterialTable {
    pub const STANDARD: MaterialTable = MaterialTable {
        nitrogen_source: UREA,
        phosphorus_source: DAP,
        potassium_source: MOP,
        filler: FILLER,
    };

    pub fn standard() -> &'static MaterialTable {
        &Self::STANDARD
    }

    pub fn get(&self, role: MaterialRole) -> &Material {
        match role {
            MaterialRole::NitrogenSource => &self.nitrogen_source,
            MaterialRole::PhosphorusSource => &self.phosphorus_source,
            MaterialRole::PotassiumSource => &self.potassium_source,
            MaterialRole::Filler => &self.filler,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (MaterialRole, &Material)> + '_ {
        MaterialRole::ALL.into_iter().map(move |role| (role, self.get(role)))
    }

    /// Materials that carry a given nutrient
    pub fn suppliers(&self, nutrient: Nutrient) -> Vec<&Material> {
        self.iter()
            .map(|(_, m)| m)
            .filter(|m| m.assay.get(nutrient) > 0.0)
            .collect()
    }
}

impl Default for MaterialTable {
    fn default() -> Self {
        Self::STANDARD
    }
}
