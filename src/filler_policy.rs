//! Filler Allocation Policy
//!
//! Last-writer-wins coupling between the nutrient fields and filler:
//! - editing N, P or K recomputes filler as `max(0, 100 - (n + p + k))`
//! - editing filler sets it verbatim and leaves N, P, K untouched, so the
//!   profile may no longer sum to 100 until a nutrient field is edited again
//!
//! Edits are explicit events, the policy is a pure reducer over them.

use serde::{Deserialize, Serialize};
use crate::profile::{Category, TargetProfile};

/// Editable target field
pub type TargetField = Category;

/// A single edit to the target profile
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "lowercase")]
pub enum TargetEdit {
    N(f64),
    P(f64),
    K(f64),
    Filler(f64),
}

impl TargetEdit {
    pub fn new(field: TargetField, value: f64) -> Self {
        match field {
            Category::N => TargetEdit::N(value),
            Category::P => TargetEdit::P(value),
            Category::K => TargetEdit::K(value),
            Category::Filler => TargetEdit::Filler(value),
        }
    }

    pub fn field(&self) -> TargetField {
        match self {
            TargetEdit::N(_) => Category::N,
            TargetEdit::P(_) => Category::P,
            TargetEdit::K(_) => Category::K,
            TargetEdit::Filler(_) => Category::Filler,
        }
    }

    pub fn value(&self) -> f64 {
        match *self {
            TargetEdit::N(v) | TargetEdit::P(v) | TargetEdit::K(v) | TargetEdit::Filler(v) => v,
        }
    }
}

/// Filler share that completes N + P + K to 100%
pub fn complement_filler(n: f64, p: f64, k: f64) -> f64 {
    (100.0 - (n + p + k)).max(0.0)
}

/// Apply one edit to the target profile
pub fn update_target(current: &TargetProfile, edit: TargetEdit) -> TargetProfile {
    let mut next = *current;
    match edit {
        TargetEdit::Filler(value) => {
            next.filler = value;
            return next;
        }
        TargetEdit::N(value) => next.n = value,
        TargetEdit::P(value) => next.p = value,
        TargetEdit::K(value) => next.k = value,
    }
    next.filler = complement_filler(next.n, next.p, next.k);
    next
}

/// Fold a sequence of edits onto a starting profile
pub fn apply_edits<I>(start: &TargetProfile, edits: I) -> TargetProfile
where
    I: IntoIterator<Item = TargetEdit>,
{
    edits
        .into_iter()
        .fold(*start, |target, edit| update_target(&target, edit))
}
