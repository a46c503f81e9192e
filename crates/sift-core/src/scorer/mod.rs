//! Pluggable model scorer abstraction
//!
//! The categorization engine treats the model as a black box that, given a
//! transaction, returns category candidates with a confidence. Scorers may
//! return confidences outside [0, 1]; clamping is the engine's job.
//!
//! # Architecture
//!
//! - `ModelScorer` trait: the interface every backend implements
//! - `ScorerClient` enum: concrete wrapper providing Clone + compile-time dispatch
//! - Backends: `KeywordScorer` (built-in, learns from recalibration),
//!   `HttpScorer` (remote JSON endpoint), `MockScorer` (fixed predictions)
//!
//! # Configuration
//!
//! `[scorer] backend = "keyword" | "http" | "mock" | "none"`, or the
//! `SIFT_SCORER` / `SIFT_SCORER_ENDPOINT` environment variables.

mod http;
mod keyword;
mod mock;

pub use http::HttpScorer;
pub use keyword::KeywordScorer;
pub use mock::MockScorer;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::ScorerConfig;
use crate::error::{Error, Result};
use crate::models::Transaction;

/// What a scorer sees of a transaction
#[derive(Debug, Clone, Serialize)]
pub struct ScoringInput<'a> {
    pub description: &'a str,
    pub vendor: Option<&'a str>,
    pub amount: Decimal,
    pub is_income: bool,
}

impl<'a> From<&'a Transaction> for ScoringInput<'a> {
    fn from(tx: &'a Transaction) -> Self {
        Self {
            description: &tx.description,
            vendor: tx.vendor.as_deref(),
            amount: tx.amount,
            is_income: tx.is_income,
        }
    }
}

/// A raw model prediction, before clamping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPrediction {
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// A labelled example derived from user feedback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecalibrationExample {
    pub description: String,
    pub vendor: Option<String>,
    pub category: String,
    pub subcategory: Option<String>,
}

/// Feedback-derived training signal sent after an improvement run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecalibrationSignal {
    pub improvement_run_id: Option<i64>,
    pub examples: Vec<RecalibrationExample>,
}

/// Interface for model scorers
///
/// Backends should be Send + Sync to allow use across async tasks.
#[async_trait]
pub trait ModelScorer: Send + Sync {
    /// Predict categories for a transaction
    async fn score(&self, input: &ScoringInput<'_>) -> Result<Vec<ModelPrediction>>;

    /// Feed labelled examples back to the model; returns how many were accepted
    async fn recalibrate(&self, signal: &RecalibrationSignal) -> Result<usize>;

    /// Check if the backend is available
    async fn health_check(&self) -> bool;

    /// Backend name (for logs and health output)
    fn name(&self) -> &str;
}

/// Concrete scorer client enum
#[derive(Clone)]
pub enum ScorerClient {
    Keyword(KeywordScorer),
    Http(HttpScorer),
    Mock(MockScorer),
}

impl ScorerClient {
    /// Build a scorer from config
    ///
    /// Returns `Ok(None)` for `backend = "none"` (rules-only categorization).
    pub fn from_config(config: &ScorerConfig) -> Result<Option<Self>> {
        match config.backend.to_lowercase().as_str() {
            "keyword" | "" => Ok(Some(ScorerClient::Keyword(KeywordScorer::new()))),
            "http" => {
                let endpoint = config.endpoint.as_deref().ok_or_else(|| {
                    Error::Config("scorer backend 'http' requires an endpoint".into())
                })?;
                Ok(Some(ScorerClient::Http(HttpScorer::new(
                    endpoint,
                    std::time::Duration::from_secs(config.timeout_secs.max(1)),
                )?)))
            }
            "mock" => Ok(Some(ScorerClient::Mock(MockScorer::new()))),
            "none" | "off" => Ok(None),
            other => Err(Error::Config(format!("Unknown scorer backend: {}", other))),
        }
    }

    /// Built-in keyword scorer
    pub fn keyword() -> Self {
        ScorerClient::Keyword(KeywordScorer::new())
    }

    /// Mock scorer with fixed predictions (for testing)
    pub fn mock(predictions: Vec<ModelPrediction>) -> Self {
        ScorerClient::Mock(MockScorer::with_predictions(predictions))
    }
}

#[async_trait]
impl ModelScorer for ScorerClient {
    async fn score(&self, input: &ScoringInput<'_>) -> Result<Vec<ModelPrediction>> {
        match self {
            ScorerClient::Keyword(s) => s.score(input).await,
            ScorerClient::Http(s) => s.score(input).await,
            ScorerClient::Mock(s) => s.score(input).await,
        }
    }

    async fn recalibrate(&self, signal: &RecalibrationSignal) -> Result<usize> {
        match self {
            ScorerClient::Keyword(s) => s.recalibrate(signal).await,
            ScorerClient::Http(s) => s.recalibrate(signal).await,
            ScorerClient::Mock(s) => s.recalibrate(signal).await,
        }
    }

    async fn health_check(&self) -> bool {
        match self {
            ScorerClient::Keyword(s) => s.health_check().await,
            ScorerClient::Http(s) => s.health_check().await,
            ScorerClient::Mock(s) => s.health_check().await,
        }
    }

    fn name(&self) -> &str {
        match self {
            ScorerClient::Keyword(s) => s.name(),
            ScorerClient::Http(s) => s.name(),
            ScorerClient::Mock(s) => s.name(),
        }
    }
}
