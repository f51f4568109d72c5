//! Session State
//!
//! The interactive session as an explicit value: target profile, batch
//! weight, analysis controls and the latest analysis result. Every user
//! action is a `SessionEvent`; `SessionState::apply` returns the next
//! snapshot and never mutates the previous one.
//!
//! Analysis requests are tagged with a monotonically increasing sequence
//! number. Only the response to the latest issued request is applied; seeding
//! the session or choosing a new image also advances the counter, so a slow
//! response for earlier state cannot overwrite fresher state.

use serde::{Deserialize, Serialize};

use crate::evaluator::{CompositionEvaluator, EvaluatedComposition, MassScoreSet};
use crate::filler_policy::{complement_filler, update_target, TargetEdit};
use crate::profile::{TargetProfile, DEFAULT_NUTRIENT_PCT, DEFAULT_TOTAL_WEIGHT};
use crate::solver::{RecipeError, RecipePlan, RecipeSolver};

/// Saturation threshold used until the backend suggests one
pub const DEFAULT_THRESHOLD: u8 = 35;

/// Bins in the saturation histogram
pub const HISTOGRAM_BINS: usize = 256;

/// Message shown when an analysis request fails
pub const ANALYSIS_FAILED_MESSAGE: &str = "Backend connection failed.";

/// Crop corner as fractions of image width and height
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropPoint {
    pub x: f64,
    pub y: f64,
}

impl CropPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_normalized(&self) -> bool {
        (0.0..=1.0).contains(&self.x) && (0.0..=1.0).contains(&self.y)
    }
}

/// Perspective crop: top-left, top-right, bottom-right, bottom-left
pub type CropQuad = [CropPoint; 4];

/// Full-frame crop quad
pub fn full_frame() -> CropQuad {
    [
        CropPoint::new(0.0, 0.0),
        CropPoint::new(1.0, 0.0),
        CropPoint::new(1.0, 1.0),
        CropPoint::new(0.0, 1.0),
    ]
}

/// Result of one image analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    /// Annotated image (base64 JPEG)
    pub processed_image_b64: String,
    /// Cropped source image (base64 JPEG)
    pub raw_cropped_b64: String,
    pub scores: MassScoreSet,
    /// Only present on a first-load analysis
    pub histogram: Option<Vec<u32>>,
    pub auto_threshold: Option<u8>,
}

/// Parameters of an issued analysis request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisTicket {
    pub sequence: u64,
    pub threshold: u8,
    pub crop: Option<CropQuad>,
    /// First analysis of a newly cropped image; adopts the suggested threshold
    pub first_load: bool,
}

/// User actions and backend responses
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    EditTarget(TargetEdit),
    SetTotalWeight(f64),
    SetThreshold(u8),
    /// Replace target and weight from a share link; analysis state resets
    Seed(ShareLink),
    /// A new image was chosen: previous analysis and crop are cleared
    ImageSelected,
    SetCrop(Option<CropQuad>),
    AnalysisRequested { first_load: bool },
    AnalysisSucceeded { sequence: u64, first_load: bool, snapshot: AnalysisSnapshot },
    AnalysisFailed { sequence: u64, message: String },
}

/// Session snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub target: TargetProfile,
    pub total_weight: f64,
    pub threshold: u8,
    pub auto_threshold: u8,
    pub histogram: Vec<u32>,
    pub crop: Option<CropQuad>,
    pub analysis: Option<AnalysisSnapshot>,
    /// Sequence number of the most recently issued analysis request
    pub latest_request: u64,
    pub loading: bool,
    pub last_error: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            target: TargetProfile::default(),
            total_weight: DEFAULT_TOTAL_WEIGHT,
            threshold: DEFAULT_THRESHOLD,
            auto_threshold: DEFAULT_THRESHOLD,
            histogram: vec![0; HISTOGRAM_BINS],
            crop: None,
            analysis: None,
            latest_request: 0,
            loading: false,
            last_error: None,
        }
    }
}

impl SessionState {
    /// Session seeded from a share link
    pub fn from_share_link(link: &ShareLink) -> Self {
        Self {
            target: link.target,
            total_weight: link.total_weight,
            ..Self::default()
        }
    }

    /// Next snapshot after `event`
    pub fn apply(&self, event: SessionEvent) -> SessionState {
        let mut next = self.clone();
        match event {
            SessionEvent::EditTarget(edit) => {
                next.target = update_target(&self.target, edit);
            }
            SessionEvent::SetTotalWeight(weight) => {
                next.total_weight = weight;
            }
            SessionEvent::SetThreshold(threshold) => {
                next.threshold = threshold;
            }
            SessionEvent::Seed(link) => {
                next = Self::from_share_link(&link);
                next.latest_request = self.latest_request + 1;
            }
            SessionEvent::ImageSelected => {
                // Invalidates responses still in flight for the previous image
                next.latest_request = self.latest_request + 1;
                next.analysis = None;
                next.crop = None;
                next.loading = false;
                next.last_error = None;
            }
            SessionEvent::SetCrop(crop) => {
                next.crop = crop;
            }
            SessionEvent::AnalysisRequested { .. } => {
                next.latest_request = self.latest_request + 1;
                next.loading = true;
            }
            SessionEvent::AnalysisSucceeded { sequence, first_load, snapshot } => {
                if self.is_stale(sequence) {
                    return next;
                }
                if first_load {
                    if let Some(histogram) = &snapshot.histogram {
                        next.histogram = histogram.clone();
                    }
                    if let Some(auto) = snapshot.auto_threshold {
                        next.auto_threshold = auto;
                        next.threshold = auto;
                    }
                }
                next.analysis = Some(snapshot);
                next.loading = false;
                next.last_error = None;
            }
            SessionEvent::AnalysisFailed { sequence, message } => {
                if self.is_stale(sequence) {
                    return next;
                }
                tracing::warn!("Analysis request {} failed: {}", sequence, message);
                next.loading = false;
                next.last_error = Some(ANALYSIS_FAILED_MESSAGE.to_string());
            }
        }
        next
    }

    /// Issue an analysis request: the next snapshot plus the request parameters
    pub fn request_analysis(&self, first_load: bool) -> (SessionState, AnalysisTicket) {
        let next = self.apply(SessionEvent::AnalysisRequested { first_load });
        let ticket = AnalysisTicket {
            sequence: next.latest_request,
            threshold: next.threshold,
            crop: next.crop,
            first_load,
        };
        (next, ticket)
    }

    /// Only the most recently issued request may land
    fn is_stale(&self, sequence: u64) -> bool {
        if sequence != self.latest_request {
            tracing::debug!(
                "Dropping stale analysis response {} (latest request {})",
                sequence, self.latest_request
            );
            true
        } else {
            false
        }
    }

    /// Mixing plan for the current target and weight
    pub fn recipe(&self, solver: &RecipeSolver) -> Result<RecipePlan, RecipeError> {
        solver.solve_profile(&self.target, self.total_weight)
    }

    /// Current analysis scores, zero until the first analysis arrives
    pub fn scores(&self) -> MassScoreSet {
        self.analysis
            .as_ref()
            .map(|a| a.scores)
            .unwrap_or_default()
    }

    /// Measured composition against the current target
    pub fn evaluation(&self, evaluator: &CompositionEvaluator) -> EvaluatedComposition {
        evaluator.evaluate(&self.scores(), self.total_weight, &self.target)
    }

    pub fn share_link(&self) -> ShareLink {
        ShareLink {
            target: self.target,
            total_weight: self.total_weight,
        }
    }
}

/// Target and weight carried in URL query parameters (`n`, `p`, `k`, `weight`)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShareLink {
    pub target: TargetProfile,
    pub total_weight: f64,
}

impl Default for ShareLink {
    fn default() -> Self {
        Self {
            target: TargetProfile::default(),
            total_weight: DEFAULT_TOTAL_WEIGHT,
        }
    }
}

impl ShareLink {
    /// Query string without the leading '?'
    pub fn to_query(&self) -> String {
        format!(
            "n={}&p={}&k={}&weight={}",
            urlencoding::encode(&self.target.n.to_string()),
            urlencoding::encode(&self.target.p.to_string()),
            urlencoding::encode(&self.target.k.to_string()),
            urlencoding::encode(&self.total_weight.to_string()),
        )
    }

    /// Link to `base` carrying this target, e.g. "/?n=15&p=15&k=15&weight=100"
    pub fn href(&self, base: &str) -> String {
        format!("{}?{}", base, self.to_query())
    }

    /// Parse a query string; missing or unparsable values keep their defaults
    pub fn parse(query: &str) -> Self {
        let mut n = DEFAULT_NUTRIENT_PCT;
        let mut p = DEFAULT_NUTRIENT_PCT;
        let mut k = DEFAULT_NUTRIENT_PCT;
        let mut weight = DEFAULT_TOTAL_WEIGHT;

        for pair in query.trim_start_matches('?').split('&') {
            let Some((key, raw)) = pair.split_once('=') else {
                continue;
            };
            let Some(value) = parse_number(raw) else {
                tracing::debug!("Ignoring share link parameter {}={:?}", key, raw);
                continue;
            };
            match key {
                "n" => n = value,
                "p" => p = value,
                "k" => k = value,
                "weight" => weight = value,
                _ => {}
            }
        }

        Self {
            target: TargetProfile { n, p, k, filler: complement_filler(n, p, k) },
            total_weight: weight,
        }
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    let decoded = urlencoding::decode(raw).ok()?;
    decoded
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}
