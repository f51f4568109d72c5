//! NPK Mixer
//!
//! Fertilizer blending in both directions:
//! - `solver`: target N-P-K percentages + batch weight -> masses of Urea, DAP, MOP and filler
//! - `evaluator`: measured mass scores -> achieved composition, compared against the target
//! - `filler_policy`: how the implicit filler share follows target edits
//! - `session`: explicit session state, share links and analysis sequencing
//!
//! With the `api` feature the crate also carries the vision backend client
//! (`vision`) and the Axum server (`api_server`).

pub mod materials;
pub mod profile;
pub mod config;
pub mod filler_policy;
pub mod solver;
pub mod evaluator;
pub mod session;

#[cfg(feature = "api")]
pub mod vision;

#[cfg(feature = "api")]
pub mod api_server;

// Re-export commonly used types
pub use materials::{Material, MaterialRole, Assay, MaterialTable, Nutrient};
pub use profile::{Category, NutrientValues, TargetProfile, DEFAULT_TOTAL_WEIGHT};
pub use config::Tolerances;
pub use filler_policy::{update_target, TargetEdit, TargetField};
pub use solver::{solve, solve_with, RecipeError, RecipeErrorKind, RecipePlan, RecipeRow, RecipeSolver, NpkTarget};
pub use evaluator::{evaluate, CompositionEvaluator, EvaluatedComposition, MassScoreSet, NutrientReport};
pub use session::{SessionEvent, SessionState, ShareLink, CropPoint, AnalysisSnapshot};

#[cfg(feature = "api")]
pub use vision::{VisionClient, VisionError};

#[cfg(feature = "api")]
pub use api_server::{AppState, create_router};
