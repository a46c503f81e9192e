//! Sift Core Library
//!
//! Import and categorization pipeline for financial transaction files:
//! - File validation, threat scanning and row parsing
//! - Batch persistence with atomic create/delete
//! - Hybrid rule + model categorization
//! - Feedback collection and rule auto-improvement
//! - Asynchronous jobs with progress, cancellation and artifacts
//! - Per-caller rate limiting

pub mod categorize;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod improve;
pub mod jobs;
pub mod models;
pub mod parse;
pub mod pipeline;
pub mod rate_limit;
pub mod scan;
pub mod scorer;
pub mod validate;

pub use categorize::{CategorizationEngine, CategorizationResult, CategoryDecision, RuleMatcher};
pub use config::SiftConfig;
pub use db::Database;
pub use error::{Error, RateLimitInfo, Result};
pub use export::{ExportFormat, ExportRequest, Exporter};
pub use improve::{AutoImprover, ImprovementRequest, ImprovementSummary};
pub use jobs::{Artifact, JobManager, JobOutcome, JobReporter};
pub use pipeline::{ImportPipeline, ImportUpload};
pub use rate_limit::{OperationClass, RateLimiter};
pub use scorer::{ModelScorer, ScorerClient};
