//! Runtime configuration
//!
//! Config is resolved in three layers:
//! 1. Built-in defaults
//! 2. Optional TOML file (explicit path, `SIFT_CONFIG`, or
//!    `~/.local/share/sift/config.toml`)
//! 3. `SIFT_*` environment overrides
//!
//! ```toml
//! [categorization]
//! confidence_threshold = 0.7
//!
//! [rate_limits]
//! window_secs = 60
//! export = 5
//!
//! [scorer]
//! backend = "http"
//! endpoint = "http://localhost:8088"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::rate_limit::OperationClass;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SiftConfig {
    pub pipeline: PipelineConfig,
    pub categorization: CategorizationConfig,
    pub improvement: ImprovementConfig,
    pub rate_limits: RateLimitConfig,
    pub jobs: JobConfig,
    pub scorer: ScorerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Largest accepted upload
    pub max_upload_bytes: usize,
    /// Absolute amount above which a row gets a LargeAmount warning
    pub large_amount_threshold: i64,
    /// Cap on itemized errors/warnings kept in job status
    pub max_error_preview: usize,
    /// Lines longer than this are flagged by the scanner
    pub max_line_length: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 10 * 1024 * 1024,
            large_amount_threshold: 10_000,
            max_error_preview: 20,
            max_line_length: 4096,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CategorizationConfig {
    /// Minimum confidence for auto-assigning the top suggestion
    pub confidence_threshold: f64,
}

impl Default for CategorizationConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.6,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImprovementConfig {
    /// Corrections that must agree before a rule is created (N)
    pub min_agreement: usize,
    /// Weight change per reinforcing or contradicting vote
    pub weight_step: f64,
    pub default_min_confidence: f64,
    pub default_max_transactions: i64,
}

impl Default for ImprovementConfig {
    fn default() -> Self {
        Self {
            min_agreement: 3,
            weight_step: 0.05,
            default_min_confidence: 0.5,
            default_max_transactions: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub export: u32,
    pub auto_improvement: u32,
    pub feedback: u32,
    pub bulk: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            export: 5,
            auto_improvement: 2,
            feedback: 60,
            bulk: 10,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs.max(1))
    }

    pub fn limit_for(&self, class: OperationClass) -> u32 {
        match class {
            OperationClass::Export => self.export,
            OperationClass::AutoImprovement => self.auto_improvement,
            OperationClass::Feedback => self.feedback,
            OperationClass::Bulk => self.bulk,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// How long export artifacts stay downloadable
    pub artifact_ttl_secs: u64,
    /// Maximum items in one bulk feedback request
    pub max_bulk_feedback: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            artifact_ttl_secs: 3600,
            max_bulk_feedback: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// keyword, http, mock, or none
    pub backend: String,
    /// Base URL for the http backend
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            backend: "keyword".to_string(),
            endpoint: None,
            timeout_secs: 10,
        }
    }
}

/// Default config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("sift").join("config.toml"))
}

impl SiftConfig {
    /// Load config from an explicit path, `SIFT_CONFIG`, or the default location,
    /// then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let candidate = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("SIFT_CONFIG").ok().map(PathBuf::from))
            .or_else(default_config_path);

        let mut config = match candidate {
            Some(ref p) if p.exists() => {
                debug!(path = %p.display(), "Loading config file");
                let content = fs::read_to_string(p)
                    .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;
                Self::from_toml(&content)?
            }
            Some(ref p) if path.is_some() => {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            _ => Self::default(),
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse config from TOML content
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config TOML: {}", e)))
    }

    /// Apply `SIFT_*` environment overrides
    pub fn apply_env(&mut self) {
        if let Some(v) = env_parse::<f64>("SIFT_CONFIDENCE_THRESHOLD") {
            self.categorization.confidence_threshold = v;
        }
        if let Some(v) = env_parse::<usize>("SIFT_MIN_AGREEMENT") {
            self.improvement.min_agreement = v;
        }
        if let Some(v) = env_parse::<u64>("SIFT_RATE_WINDOW_SECS") {
            self.rate_limits.window_secs = v;
        }
        if let Some(v) = env_parse::<usize>("SIFT_MAX_UPLOAD_BYTES") {
            self.pipeline.max_upload_bytes = v;
        }
        if let Ok(v) = std::env::var("SIFT_SCORER") {
            if !v.is_empty() {
                self.scorer.backend = v;
            }
        }
        if let Ok(v) = std::env::var("SIFT_SCORER_ENDPOINT") {
            if !v.is_empty() {
                self.scorer.endpoint = Some(v);
            }
        }
    }

    /// Reject values the pipeline cannot work with
    pub fn validate(&self) -> Result<()> {
        let threshold = self.categorization.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::Config(format!(
                "confidence_threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        if self.improvement.min_agreement == 0 {
            return Err(Error::Config("min_agreement must be at least 1".into()));
        }
        if self.pipeline.max_upload_bytes == 0 {
            return Err(Error::Config("max_upload_bytes must be positive".into()));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SiftConfig::default();
        assert_eq!(config.categorization.confidence_threshold, 0.6);
        assert_eq!(config.improvement.min_agreement, 3);
        assert_eq!(config.rate_limits.window_secs, 60);
        assert_eq!(config.scorer.backend, "keyword");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SiftConfig::from_toml(
            r#"
            [categorization]
            confidence_threshold = 0.8

            [rate_limits]
            export = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.categorization.confidence_threshold, 0.8);
        assert_eq!(config.rate_limits.export, 2);
        assert_eq!(config.rate_limits.feedback, 60);
        assert_eq!(config.pipeline.max_error_preview, 20);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(SiftConfig::from_toml("[pipeline\nmax_upload_bytes = ").is_err());
    }

    #[test]
    fn test_validate_rejects_threshold_out_of_range() {
        let mut config = SiftConfig::default();
        config.categorization.confidence_threshold = 1.5;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sift.toml");
        std::fs::write(&path, "[improvement]\nmin_agreement = 5\n").unwrap();

        let config = SiftConfig::load(Some(&path)).unwrap();
        assert_eq!(config.improvement.min_agreement, 5);
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let result = SiftConfig::load(Some(Path::new("/nonexistent/sift.toml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
