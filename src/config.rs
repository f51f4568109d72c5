//! Configuration
//!
//! Numeric tolerances shared by the solver and the evaluator, loadable from a
//! JSON file, plus the environment-driven server configuration.
//!
//! Defaults reproduce the calculator's fixed thresholds:
//! - nitrogen overshoot: residual N may dip to -0.01 before DAP is said to oversupply
//! - concentration overshoot: filler may dip to -0.1% before the blend is over 100%
//! - evaluation band: a measured share within ±2.0 points of target is on target

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Solver and evaluator tolerances (percentage points)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerances {
    /// Allowed negative residual nitrogen after the DAP credit
    pub nitrogen_overshoot: f64,

    /// Allowed negative filler share
    pub concentration_overshoot: f64,

    /// Half-width of the in-tolerance band around each target
    pub evaluation_band: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            nitrogen_overshoot: 0.01,
            concentration_overshoot: 0.1,
            evaluation_band: 2.0,
        }
    }
}

impl Tolerances {
    /// Load tolerances from a JSON file; missing keys keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read tolerances file: {:?}", path))?;

        let tolerances: Tolerances = serde_json::from_str(&contents)
            .with_context(|| "Failed to parse tolerances JSON")?;

        tolerances.validate()?;
        Ok(tolerances)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("nitrogen_overshoot", self.nitrogen_overshoot),
            ("concentration_overshoot", self.concentration_overshoot),
            ("evaluation_band", self.evaluation_band),
        ] {
            if !value.is_finite() || value < 0.0 {
                anyhow::bail!("Tolerance '{}' must be a non-negative number, got {}", name, value);
            }
        }
        Ok(())
    }
}

/// Server configuration from environment variables
#[cfg(feature = "api")]
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Vision backend analysis endpoint
    pub vision_url: String,
    pub vision_timeout: std::time::Duration,
    /// Quiet period before a burst of analysis triggers is sent
    pub debounce: std::time::Duration,
    pub tolerances: Tolerances,
}

#[cfg(feature = "api")]
impl ServerConfig {
    pub const DEFAULT_PORT: u16 = 3000;
    pub const DEFAULT_VISION_URL: &'static str = "http://localhost:8000/analyze_interactive";
    pub const DEFAULT_VISION_TIMEOUT_SECS: u64 = 30;
    pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

    /// Read PORT, VISION_URL, VISION_TIMEOUT_SECS, DEBOUNCE_MS and TOLERANCES_PATH
    pub fn from_env() -> Result<Self> {
        let port = env_parse("PORT")?.unwrap_or(Self::DEFAULT_PORT);

        let vision_url = std::env::var("VISION_URL")
            .unwrap_or_else(|_| Self::DEFAULT_VISION_URL.to_string());

        let timeout_secs = env_parse("VISION_TIMEOUT_SECS")?.unwrap_or(Self::DEFAULT_VISION_TIMEOUT_SECS);
        let debounce_ms = env_parse("DEBOUNCE_MS")?.unwrap_or(Self::DEFAULT_DEBOUNCE_MS);

        let tolerances = match std::env::var("TOLERANCES_PATH") {
            Ok(path) => Tolerances::load(Path::new(&path))?,
            Err(_) => Tolerances::default(),
        };

        Ok(Self {
            port,
            vision_url,
            vision_timeout: std::time::Duration::from_secs(timeout_secs),
            debounce: std::time::Duration::from_millis(debounce_ms),
            tolerances,
        })
    }
}

#[cfg(feature = "api")]
impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: Self::DEFAULT_PORT,
            vision_url: Self::DEFAULT_VISION_URL.to_string(),
            vision_timeout: std::time::Duration::from_secs(Self::DEFAULT_VISION_TIMEOUT_SECS),
            debounce: std::time::Duration::from_millis(Self::DEFAULT_DEBOUNCE_MS),
            tolerances: Tolerances::default(),
        }
    }
}

#[cfg(feature = "api")]
fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        Err(_) => Ok(None),
    }
}
