//! Vision Backend Client
//!
//! The backend segments fertilizer granules in a photo and returns relative
//! mass scores per category. Contract:
//!
//! Request (multipart): `file` image bytes, `threshold` saturation cut-off
//! 0-255, optional `points` JSON array of four `{x, y}` fractions ordered
//! top-left, top-right, bottom-right, bottom-left.
//!
//! Response (JSON): `image_b64`, `raw_cropped_b64`, `areas {N, P, K, Filler}`,
//! and on a first load `histogram` (256 counts) plus `auto_threshold`.
//!
//! Any non-2xx status is a plain failure; the body is not inspected. There is
//! no retry.

use base64::Engine;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::evaluator::MassScoreSet;
use crate::session::{AnalysisSnapshot, CropQuad, AnalysisTicket, ANALYSIS_FAILED_MESSAGE};

/// Vision backend errors
#[derive(Error, Debug)]
pub enum VisionError {
    /// Connection, timeout or body transfer failure
    #[error("Vision backend request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Backend answered with a non-success status
    #[error("Vision backend returned status {status}")]
    Status { status: u16 },

    /// Request rejected before sending
    #[error("Invalid analysis request: {reason}")]
    InvalidRequest { reason: String },

    /// Image payload is not valid base64
    #[error("Failed to decode {field}: {message}")]
    Decode { field: &'static str, message: String },
}

impl VisionError {
    /// Generic message for application display
    pub fn user_message(&self) -> String {
        match self {
            VisionError::InvalidRequest { reason } => reason.clone(),
            _ => ANALYSIS_FAILED_MESSAGE.to_string(),
        }
    }
}

/// One analysis call
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub image: Vec<u8>,
    pub file_name: String,
    pub content_type: String,
    pub threshold: u8,
    pub crop: Option<CropQuad>,
}

impl AnalysisRequest {
    pub fn new(image: Vec<u8>, threshold: u8) -> Self {
        Self {
            image,
            file_name: "image.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            threshold,
            crop: None,
        }
    }

    pub fn with_file(mut self, file_name: &str, content_type: &str) -> Self {
        self.file_name = file_name.to_string();
        self.content_type = content_type.to_string();
        self
    }

    pub fn with_crop(mut self, crop: Option<CropQuad>) -> Self {
        self.crop = crop;
        self
    }

    /// Request parameters from a session ticket
    pub fn from_ticket(image: Vec<u8>, ticket: &AnalysisTicket) -> Self {
        Self::new(image, ticket.threshold).with_crop(ticket.crop)
    }

    pub fn validate(&self) -> Result<(), VisionError> {
        if self.image.is_empty() {
            return Err(VisionError::InvalidRequest { reason: "Image is empty".to_string() });
        }
        if let Some(crop) = &self.crop {
            if let Some(point) = crop.iter().find(|p| !p.is_normalized()) {
                return Err(VisionError::InvalidRequest {
                    reason: format!("Crop point ({}, {}) is outside the image", point.x, point.y),
                });
            }
        }
        Ok(())
    }

    fn into_form(self) -> Result<Form, VisionError> {
        let file = Part::bytes(self.image)
            .file_name(self.file_name)
            .mime_str(&self.content_type)?;

        let mut form = Form::new()
            .part("file", file)
            .text("threshold", self.threshold.to_string());

        if let Some(crop) = self.crop {
            let points = serde_json::to_string(&crop).map_err(|e| VisionError::InvalidRequest {
                reason: format!("Failed to encode crop points: {}", e),
            })?;
            form = form.text("points", points);
        }

        Ok(form)
    }
}

/// Mass scores as named on the wire
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AreaScores {
    #[serde(rename = "N", default)]
    pub n: f64,
    #[serde(rename = "P", default)]
    pub p: f64,
    #[serde(rename = "K", default)]
    pub k: f64,
    #[serde(rename = "Filler", default)]
    pub filler: f64,
}

impl From<AreaScores> for MassScoreSet {
    fn from(areas: AreaScores) -> Self {
        MassScoreSet::new(areas.n, areas.p, areas.k, areas.filler)
    }
}

/// Backend response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub image_b64: String,
    #[serde(default)]
    pub raw_cropped_b64: String,
    pub areas: AreaScores,
    #[serde(default)]
    pub histogram: Option<Vec<u32>>,
    #[serde(default)]
    pub auto_threshold: Option<u8>,
}

impl AnalysisResponse {
    pub fn scores(&self) -> MassScoreSet {
        self.areas.into()
    }

    /// Annotated JPEG bytes
    pub fn processed_image(&self) -> Result<Vec<u8>, VisionError> {
        decode_image("image_b64", &self.image_b64)
    }

    /// Cropped source JPEG bytes
    pub fn raw_cropped_image(&self) -> Result<Vec<u8>, VisionError> {
        decode_image("raw_cropped_b64", &self.raw_cropped_b64)
    }

    pub fn into_snapshot(self) -> AnalysisSnapshot {
        AnalysisSnapshot {
            scores: self.areas.into(),
            processed_image_b64: self.image_b64,
            raw_cropped_b64: self.raw_cropped_b64,
            histogram: self.histogram,
            auto_threshold: self.auto_threshold,
        }
    }
}

fn decode_image(field: &'static str, encoded: &str) -> Result<Vec<u8>, VisionError> {
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| VisionError::Decode { field, message: e.to_string() })
}

/// HTTP client for the analysis endpoint
#[derive(Debug, Clone)]
pub struct VisionClient {
    client: Client,
    endpoint: String,
}

impl VisionClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, VisionError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one analysis request
    pub async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisResponse, VisionError> {
        request.validate()?;

        let threshold = request.threshold;
        let cropped = request.crop.is_some();
        let form = request.into_form()?;

        tracing::debug!(
            "Analysis request to {} (threshold {}, cropped: {})",
            self.endpoint, threshold, cropped
        );

        let response = self.client.post(&self.endpoint).multipart(form).send().await?;

        if !response.status().is_success() {
            tracing::warn!("Vision backend returned {}", response.status());
            return Err(VisionError::Status { status: response.status().as_u16() });
        }

        let body: AnalysisResponse = response.json().await?;
        Ok(body)
    }
}
