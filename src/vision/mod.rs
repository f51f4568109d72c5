//! Vision backend integration
//!
//! - `client`: multipart analysis request and JSON response of the image backend
//! - `debounce`: coalesces bursts of analysis triggers (threshold slider drags)

pub mod client;
pub mod debounce;

pub use client::{AnalysisRequest, AnalysisResponse, AreaScores, VisionClient, VisionError};
pub use debounce::Debouncer;
