//! Error types for Sift

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::models::ThreatLevel;

/// Retry metadata carried by a rate-limit rejection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitInfo {
    /// Requests allowed per window for this operation class
    pub limit: u32,
    /// Seconds until the current window resets (always >= 1)
    pub retry_after: u64,
    /// When the current window ends
    pub reset_time: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Structural problem with an uploaded file. Terminal for the import.
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        problems: Vec<String>,
    },

    /// Content scan found a critical threat. Terminal for the import.
    #[error("Security check failed ({threat_level}): {message}")]
    Security {
        threat_level: ThreatLevel,
        message: String,
    },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded: retry after {}s", .0.retry_after)]
    RateLimited(RateLimitInfo),

    /// Model scorer produced a confidence outside [0, 1]. Logged, never returned
    /// from the engine.
    #[error("Scorer anomaly from {scorer}: confidence {value} outside [0, 1]")]
    ScorerAnomaly { scorer: String, value: f64 },

    #[error("Scorer error: {0}")]
    Scorer(String),

    #[error("Job was cancelled")]
    Cancelled,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Shorthand for a validation failure with a single problem
    pub fn validation(message: impl Into<String>) -> Self {
        let message = message.into();
        Error::Validation {
            problems: vec![message.clone()],
            message,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
