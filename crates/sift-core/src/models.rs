//! Domain models for Sift

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Category assigned to transactions that have no confident suggestion
pub const UNCATEGORIZED: &str = "Uncategorized";

/// A persisted transaction owned by exactly one import batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub batch_id: i64,
    pub date: NaiveDate,
    /// Signed amount; negative is an expense
    pub amount: Decimal,
    pub description: String,
    pub vendor: Option<String>,
    pub category: String,
    pub subcategory: Option<String>,
    pub is_income: bool,
    pub is_categorized: bool,
    /// Confidence of the applied (or best rejected) suggestion, 0-1
    pub confidence_score: f64,
    pub import_hash: String,
    /// JSON of the original CSV row
    pub raw_data: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A parsed row waiting to be persisted
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    /// 1-based data row number in the source file (header excluded)
    pub row_number: usize,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub description: String,
    pub vendor: Option<String>,
    /// Category supplied by the file itself, if any
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub is_income: bool,
    pub import_hash: String,
    pub raw_data: String,
}

/// One successful file import and the transactions it owns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportBatch {
    pub batch_id: i64,
    pub filename: String,
    pub import_date: DateTime<Utc>,
    pub transaction_count: i64,
    /// Signed sum of owned transaction amounts
    pub total_amount: Decimal,
    /// Job that created this batch, if it came through the job manager
    pub job_id: Option<String>,
}

/// Filters for listing transactions
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionFilter {
    pub batch_id: Option<i64>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub category: Option<String>,
    pub is_categorized: Option<bool>,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// ============================================================================
// Categorization
// ============================================================================

/// Where a category suggestion came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionSource {
    Rule,
    Model,
}

impl SuggestionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rule => "rule",
            Self::Model => "model",
        }
    }
}

/// A ranked category candidate for a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySuggestion {
    pub category: String,
    pub subcategory: Option<String>,
    /// Always within [0, 1]
    pub confidence: f64,
    pub source: SuggestionSource,
    pub reasoning: String,
}

/// Pattern matching type for rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    /// Case-insensitive substring match (supports | for OR)
    Contains,
    /// Regular expression match
    Regex,
    /// Exact string match (case-insensitive)
    Exact,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::Regex => "regex",
            Self::Exact => "exact",
        }
    }
}

impl std::str::FromStr for PatternType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "contains" => Ok(Self::Contains),
            "regex" => Ok(Self::Regex),
            "exact" => Ok(Self::Exact),
            _ => Err(format!("Unknown pattern type: {}", s)),
        }
    }
}

/// Which transaction field a rule pattern is tested against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchField {
    Description,
    Vendor,
    /// Vendor if present, then description
    Any,
}

impl MatchField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Description => "description",
            Self::Vendor => "vendor",
            Self::Any => "any",
        }
    }
}

impl std::str::FromStr for MatchField {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "description" => Ok(Self::Description),
            "vendor" => Ok(Self::Vendor),
            "any" => Ok(Self::Any),
            _ => Err(format!("Unknown match field: {}", s)),
        }
    }
}

/// Who created a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleCreator {
    #[serde(rename = "manual")]
    Manual,
    #[serde(rename = "auto-improvement")]
    AutoImprovement,
}

impl RuleCreator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::AutoImprovement => "auto-improvement",
        }
    }
}

impl std::str::FromStr for RuleCreator {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "auto-improvement" | "auto_improvement" => Ok(Self::AutoImprovement),
            _ => Err(format!("Unknown rule creator: {}", s)),
        }
    }
}

/// A deterministic pattern-to-category mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub pattern: String,
    pub pattern_type: PatternType,
    pub match_field: MatchField,
    pub category: String,
    pub subcategory: Option<String>,
    /// Confidence given to suggestions from this rule, 0-1
    pub confidence_weight: f64,
    pub created_by: RuleCreator,
    /// Incremented on every update
    pub version: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRule {
    pub pattern: String,
    pub pattern_type: PatternType,
    pub match_field: MatchField,
    pub category: String,
    pub subcategory: Option<String>,
    pub confidence_weight: f64,
    pub created_by: RuleCreator,
}

/// A versioned change to a rule
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleUpdate {
    pub category: Option<String>,
    /// `Some(None)` clears the subcategory
    pub subcategory: Option<Option<String>>,
    pub confidence_weight: Option<f64>,
    pub active: Option<bool>,
    pub reason: String,
    /// Feedback records that triggered the change
    pub feedback_ids: Vec<i64>,
    pub improvement_run_id: Option<i64>,
}

/// Audit trail entry for one rule version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleRevision {
    pub id: i64,
    pub rule_id: i64,
    pub version: i64,
    pub category: String,
    pub subcategory: Option<String>,
    pub confidence_weight: f64,
    pub active: bool,
    pub reason: String,
    pub feedback_ids: Vec<i64>,
    pub improvement_run_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Feedback
// ============================================================================

/// User verdict on a transaction's category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    Correct,
    Incorrect,
    SuggestAlternative,
}

impl FeedbackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Correct => "correct",
            Self::Incorrect => "incorrect",
            Self::SuggestAlternative => "suggest_alternative",
        }
    }
}

impl std::str::FromStr for FeedbackType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "correct" => Ok(Self::Correct),
            "incorrect" => Ok(Self::Incorrect),
            "suggest_alternative" | "alternative" => Ok(Self::SuggestAlternative),
            _ => Err(format!("Unknown feedback type: {}", s)),
        }
    }
}

/// Feedback as submitted by a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFeedback {
    pub transaction_id: i64,
    pub feedback_type: FeedbackType,
    pub suggested_category: Option<String>,
    pub suggested_subcategory: Option<String>,
    pub comment: Option<String>,
}

/// An immutable feedback record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub id: i64,
    pub transaction_id: i64,
    pub feedback_type: FeedbackType,
    pub suggested_category: Option<String>,
    pub suggested_subcategory: Option<String>,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    // Snapshot of the transaction when the feedback was given
    pub batch_id: Option<i64>,
    pub description: String,
    pub vendor: Option<String>,
    pub original_category: String,
    pub original_subcategory: Option<String>,
}

impl Feedback {
    /// The category this feedback asserts, if it names one
    pub fn target_category(&self) -> Option<&str> {
        match self.feedback_type {
            FeedbackType::Correct => Some(self.original_category.as_str()),
            FeedbackType::Incorrect | FeedbackType::SuggestAlternative => self
                .suggested_category
                .as_deref()
                .filter(|c| !c.trim().is_empty()),
        }
    }
}

/// Feedback counts by type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackStats {
    pub total: i64,
    pub correct: i64,
    pub incorrect: i64,
    pub suggest_alternative: i64,
    /// Feedback not yet consumed by an improvement run
    pub pending: i64,
}

// ============================================================================
// Import
// ============================================================================

/// Threat classification produced by the content scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of per-row parse failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowErrorType {
    /// A field was present but could not be converted (amount, date)
    ValueError,
    /// A required field was empty
    MissingValue,
    /// The record itself was malformed
    CsvError,
}

impl RowErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValueError => "ValueError",
            Self::MissingValue => "MissingValue",
            Self::CsvError => "CsvError",
        }
    }
}

/// A row that could not be turned into a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    pub row_number: usize,
    pub error_type: RowErrorType,
    pub message: String,
    pub raw_data: String,
}

/// Kind of advisory anomaly on a parsed row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowWarningType {
    LargeAmount,
    FutureDate,
    DuplicateRow,
}

/// A row that parsed but looks unusual
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowWarning {
    pub row_number: usize,
    pub warning_type: RowWarningType,
    pub message: String,
}

/// Import pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStage {
    Initialization,
    Validation,
    Scanning,
    Parsing,
    Database,
    Categorization,
    Completed,
}

impl ImportStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialization => "initialization",
            Self::Validation => "validation",
            Self::Scanning => "scanning",
            Self::Parsing => "parsing",
            Self::Database => "database",
            Self::Categorization => "categorization",
            Self::Completed => "completed",
        }
    }

    /// Progress range (start, end) this stage reports within
    pub fn progress_band(&self) -> (u8, u8) {
        match self {
            Self::Initialization => (0, 5),
            Self::Validation => (5, 10),
            Self::Scanning => (10, 20),
            Self::Parsing => (20, 55),
            Self::Database => (55, 65),
            Self::Categorization => (65, 99),
            Self::Completed => (100, 100),
        }
    }
}

// ============================================================================
// Jobs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Import,
    Export,
    AutoImprovement,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Export => "export",
            Self::AutoImprovement => "auto_improvement",
        }
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "import" => Ok(Self::Import),
            "export" => Ok(Self::Export),
            "auto_improvement" => Ok(Self::AutoImprovement),
            _ => Err(format!("Unknown job kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Status snapshot of an asynchronous job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    /// 0-100, never decreases
    pub progress: u8,
    pub stage: String,
    pub message: String,
    /// Stage-specific details, merged across stages
    pub details: serde_json::Value,
    /// Capped preview of itemized errors
    pub errors: Vec<serde_json::Value>,
    /// Capped preview of itemized warnings
    pub warnings: Vec<serde_json::Value>,
    /// Identifier of the job's product (batch id, run id, artifact name)
    pub result_ref: Option<String>,
    pub caller: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: String,
    pub caller: String,
    pub action: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<i64>,
    pub details: Option<String>,
}
