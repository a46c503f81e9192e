//! Hybrid rule + model categorization
//!
//! Rule hits and model predictions are gathered independently, merged on
//! `(category, subcategory)` and ranked. The top suggestion is applied only
//! when it clears the confidence threshold.
//!
//! # Ranking
//!
//! 1. Higher confidence first
//! 2. On equal confidence, `rule` before `model`
//! 3. Then by category name
//!
//! When a rule and a model suggest the same pair with the same confidence the
//! rule's suggestion is kept.

pub mod pattern;
pub mod rules;

use std::cmp::Ordering;

use serde::Serialize;
use tracing::{debug, warn};

pub use rules::{pattern_matches, RuleMatcher};

use crate::config::SiftConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{CategorySuggestion, SuggestionSource, Transaction, UNCATEGORIZED};
use crate::scorer::{ModelScorer, ScorerClient, ScoringInput};

/// Clamp a confidence into [0, 1]; NaN becomes 0
///
/// Returns the clamped value and whether it had to change.
pub fn clamp_confidence(value: f64) -> (f64, bool) {
    if value.is_nan() || value < 0.0 {
        (0.0, true)
    } else if value > 1.0 {
        (1.0, true)
    } else {
        (value, false)
    }
}

fn merge_key(s: &CategorySuggestion) -> (String, Option<String>) {
    (
        s.category.trim().to_lowercase(),
        s.subcategory
            .as_deref()
            .map(|sub| sub.trim().to_lowercase())
            .filter(|sub| !sub.is_empty()),
    )
}

fn source_rank(source: SuggestionSource) -> u8 {
    match source {
        SuggestionSource::Rule => 0,
        SuggestionSource::Model => 1,
    }
}

/// Union rule and model suggestions, de-duplicate and rank them
pub fn merge_suggestions(
    rule_suggestions: Vec<CategorySuggestion>,
    model_suggestions: Vec<CategorySuggestion>,
) -> Vec<CategorySuggestion> {
    let mut merged: Vec<CategorySuggestion> = Vec::new();

    // Rules go first so that a later model suggestion only replaces one on
    // strictly higher confidence
    for suggestion in rule_suggestions.into_iter().chain(model_suggestions) {
        let key = merge_key(&suggestion);
        match merged.iter_mut().find(|existing| merge_key(existing) == key) {
            Some(existing) => {
                if suggestion.confidence > existing.confidence {
                    *existing = suggestion;
                }
            }
            None => merged.push(suggestion),
        }
    }

    merged.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
            .then_with(|| source_rank(a.source).cmp(&source_rank(b.source)))
            .then_with(|| a.category.cmp(&b.category))
    });

    merged
}

/// Everything the engine found for one transaction
#[derive(Debug, Clone, Default, Serialize)]
pub struct CategorizationResult {
    /// Merged, ranked suggestions
    pub suggestions: Vec<CategorySuggestion>,
    /// Raw rule hits
    pub rule_matches: Vec<CategorySuggestion>,
    /// Model predictions after clamping
    pub ml_predictions: Vec<CategorySuggestion>,
    /// Model confidences that had to be clamped
    pub anomalies: usize,
    /// Set when the scorer failed and the result is rules-only
    pub scorer_error: Option<String>,
}

impl CategorizationResult {
    pub fn best(&self) -> Option<&CategorySuggestion> {
        self.suggestions.first()
    }
}

/// What to write back to a transaction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryDecision {
    pub category: String,
    pub subcategory: Option<String>,
    pub confidence: f64,
    pub is_categorized: bool,
    pub source: Option<SuggestionSource>,
}

#[derive(Clone)]
pub struct CategorizationEngine {
    scorer: Option<ScorerClient>,
    threshold: f64,
}

impl CategorizationEngine {
    pub fn new(scorer: Option<ScorerClient>, threshold: f64) -> Self {
        Self {
            scorer,
            threshold: clamp_confidence(threshold).0,
        }
    }

    /// Build the engine and its scorer from config
    pub fn from_config(config: &SiftConfig) -> Result<Self> {
        Ok(Self::new(
            ScorerClient::from_config(&config.scorer)?,
            config.categorization.confidence_threshold,
        ))
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn scorer(&self) -> Option<&ScorerClient> {
        self.scorer.as_ref()
    }

    async fn model_suggestions(&self, tx: &Transaction) -> Result<(Vec<CategorySuggestion>, usize)> {
        let Some(scorer) = &self.scorer else {
            return Ok((Vec::new(), 0));
        };

        let predictions = scorer.score(&ScoringInput::from(tx)).await?;
        let mut anomalies = 0;
        let suggestions = predictions
            .into_iter()
            .filter(|p| !p.category.trim().is_empty())
            .map(|p| {
                let (confidence, clamped) = clamp_confidence(p.confidence);
                if clamped {
                    anomalies += 1;
                    let anomaly = Error::ScorerAnomaly {
                        scorer: scorer.name().to_string(),
                        value: p.confidence,
                    };
                    warn!(transaction_id = tx.id, "{}", anomaly);
                }
                CategorySuggestion {
                    category: p.category.trim().to_string(),
                    subcategory: p.subcategory.filter(|s| !s.trim().is_empty()),
                    confidence,
                    source: SuggestionSource::Model,
                    reasoning: p
                        .reasoning
                        .unwrap_or_else(|| format!("Predicted by {} scorer", scorer.name())),
                }
            })
            .collect();

        Ok((suggestions, anomalies))
    }

    /// Gather, merge and rank suggestions for a transaction
    ///
    /// A failing scorer degrades to rules-only; the failure is recorded in
    /// `scorer_error` and logged.
    pub async fn suggest(
        &self,
        matcher: &RuleMatcher,
        tx: &Transaction,
        include_rules: bool,
        include_ml: bool,
    ) -> CategorizationResult {
        let rule_matches = if include_rules {
            matcher.suggestions(&tx.description, tx.vendor.as_deref())
        } else {
            Vec::new()
        };

        let (ml_predictions, anomalies, scorer_error) = if include_ml {
            match self.model_suggestions(tx).await {
                Ok((predictions, anomalies)) => (predictions, anomalies, None),
                Err(e) => {
                    warn!(transaction_id = tx.id, error = %e, "Scorer failed, using rules only");
                    (Vec::new(), 0, Some(e.to_string()))
                }
            }
        } else {
            (Vec::new(), 0, None)
        };

        let suggestions = merge_suggestions(rule_matches.clone(), ml_predictions.clone());

        CategorizationResult {
            suggestions,
            rule_matches,
            ml_predictions,
            anomalies,
            scorer_error,
        }
    }

    /// Apply the threshold to a result
    ///
    /// Below the threshold the transaction keeps a category supplied by the
    /// source file (or `Uncategorized`) and records the best confidence seen.
    pub fn decide(&self, result: &CategorizationResult, current_category: &str) -> CategoryDecision {
        match result.best() {
            Some(best) if best.confidence >= self.threshold => CategoryDecision {
                category: best.category.clone(),
                subcategory: best.subcategory.clone(),
                confidence: best.confidence,
                is_categorized: true,
                source: Some(best.source),
            },
            best => CategoryDecision {
                category: if current_category.trim().is_empty() {
                    UNCATEGORIZED.to_string()
                } else {
                    current_category.to_string()
                },
                subcategory: None,
                confidence: best.map(|b| b.confidence).unwrap_or(0.0),
                is_categorized: false,
                source: None,
            },
        }
    }

    /// Write a decision back to its transaction
    ///
    /// Below the threshold the file-supplied subcategory is kept. Returns
    /// `false` if the transaction no longer exists.
    pub fn apply(&self, db: &Database, tx: &Transaction, decision: &CategoryDecision) -> Result<bool> {
        let subcategory = if decision.is_categorized {
            decision.subcategory.as_deref()
        } else {
            tx.subcategory.as_deref()
        };

        let applied = db.apply_categorization(
            tx.id,
            &decision.category,
            subcategory,
            decision.confidence,
            decision.is_categorized,
        )?;

        debug!(
            transaction_id = tx.id,
            category = %decision.category,
            confidence = decision.confidence,
            categorized = decision.is_categorized,
            "Categorized transaction"
        );
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MatchField, NewRule, NewTransaction, PatternType, RuleCreator};
    use crate::scorer::ModelPrediction;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    async fn categorize(
        engine: &CategorizationEngine,
        db: &Database,
        matcher: &RuleMatcher,
        tx: &Transaction,
    ) -> (CategoryDecision, bool) {
        let result = engine.suggest(matcher, tx, true, true).await;
        let decision = engine.decide(&result, &tx.category);
        let applied = engine.apply(db, tx, &decision).unwrap();
        (decision, applied)
    }

    fn suggestion(category: &str, confidence: f64, source: SuggestionSource) -> CategorySuggestion {
        CategorySuggestion {
            category: category.to_string(),
            subcategory: None,
            confidence,
            source,
            reasoning: String::new(),
        }
    }

    fn prediction(category: &str, confidence: f64) -> ModelPrediction {
        ModelPrediction {
            category: category.to_string(),
            subcategory: None,
            confidence,
            reasoning: None,
        }
    }

    fn seed_transaction(db: &Database, description: &str) -> Transaction {
        let new = NewTransaction {
            row_number: 1,
            date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            amount: Decimal::new(-2500, 2),
            description: description.to_string(),
            vendor: None,
            category: None,
            subcategory: None,
            is_income: false,
            import_hash: "h".to_string(),
            raw_data: "{}".to_string(),
        };
        let (_, ids) = db
            .create_batch_with_transactions("test.csv", None, &[new])
            .unwrap();
        db.get_transaction(ids[0]).unwrap().unwrap()
    }

    fn seed_rule(db: &Database, pattern: &str, category: &str, weight: f64) {
        db.create_rule(&NewRule {
            pattern: pattern.to_string(),
            pattern_type: PatternType::Contains,
            match_field: MatchField::Any,
            category: category.to_string(),
            subcategory: None,
            confidence_weight: weight,
            created_by: RuleCreator::Manual,
        })
        .unwrap();
    }

    #[test]
    fn test_clamp_confidence() {
        assert_eq!(clamp_confidence(0.5), (0.5, false));
        assert_eq!(clamp_confidence(1.7), (1.0, true));
        assert_eq!(clamp_confidence(-0.2), (0.0, true));
        assert_eq!(clamp_confidence(f64::NAN), (0.0, true));
        assert_eq!(clamp_confidence(1.0), (1.0, false));
    }

    #[test]
    fn test_merge_rule_wins_tie() {
        let merged = merge_suggestions(
            vec![suggestion("Dining", 0.8, SuggestionSource::Rule)],
            vec![suggestion("dining", 0.8, SuggestionSource::Model)],
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].source, SuggestionSource::Rule);
    }

    #[test]
    fn test_merge_keeps_higher_confidence() {
        let merged = merge_suggestions(
            vec![suggestion("Dining", 0.7, SuggestionSource::Rule)],
            vec![suggestion("Dining", 0.9, SuggestionSource::Model)],
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].source, SuggestionSource::Model);
        assert_eq!(merged[0].confidence, 0.9);
    }

    #[test]
    fn test_merge_ordering() {
        let merged = merge_suggestions(
            vec![
                suggestion("Travel", 0.5, SuggestionSource::Rule),
                suggestion("Dining", 0.6, SuggestionSource::Rule),
            ],
            vec![
                suggestion("Shopping", 0.6, SuggestionSource::Model),
                suggestion("Groceries", 0.9, SuggestionSource::Model),
                suggestion("Auto", 0.6, SuggestionSource::Model),
            ],
        );
        let order: Vec<&str> = merged.iter().map(|s| s.category.as_str()).collect();
        assert_eq!(order, vec!["Groceries", "Dining", "Auto", "Shopping", "Travel"]);
    }

    #[test]
    fn test_subcategory_distinguishes() {
        let mut a = suggestion("Dining", 0.7, SuggestionSource::Rule);
        a.subcategory = Some("Coffee".into());
        let b = suggestion("Dining", 0.6, SuggestionSource::Model);
        assert_eq!(merge_suggestions(vec![a], vec![b]).len(), 2);
    }

    #[tokio::test]
    async fn test_out_of_range_model_confidence_is_clamped() {
        let db = Database::in_memory().unwrap();
        let tx = seed_transaction(&db, "MYSTERY SHOP");
        let engine = CategorizationEngine::new(
            Some(ScorerClient::mock(vec![
                prediction("Shopping", 1.4),
                prediction("Other", f64::NAN),
            ])),
            0.6,
        );

        let result = engine
            .suggest(&RuleMatcher::default(), &tx, true, true)
            .await;
        assert_eq!(result.anomalies, 2);
        assert!(result
            .suggestions
            .iter()
            .all(|s| (0.0..=1.0).contains(&s.confidence)));
        assert_eq!(result.best().unwrap().confidence, 1.0);
    }

    #[tokio::test]
    async fn test_failing_scorer_degrades_to_rules() {
        let db = Database::in_memory().unwrap();
        seed_rule(&db, "AWS", "Software & Technology", 0.9);
        let tx = seed_transaction(&db, "AWS EMEA");

        let engine = CategorizationEngine::new(
            Some(ScorerClient::Mock(crate::scorer::MockScorer::failing())),
            0.6,
        );
        let matcher = RuleMatcher::load(&db).unwrap();
        let result = engine.suggest(&matcher, &tx, true, true).await;

        assert!(result.scorer_error.is_some());
        assert_eq!(result.suggestions.len(), 1);
        assert_eq!(result.suggestions[0].category, "Software & Technology");
    }

    #[tokio::test]
    async fn test_include_flags() {
        let db = Database::in_memory().unwrap();
        seed_rule(&db, "AWS", "Software & Technology", 0.9);
        let tx = seed_transaction(&db, "AWS");
        let engine =
            CategorizationEngine::new(Some(ScorerClient::mock(vec![prediction("Cloud", 0.7)])), 0.6);
        let matcher = RuleMatcher::load(&db).unwrap();

        let rules_only = engine.suggest(&matcher, &tx, true, false).await;
        assert!(rules_only.ml_predictions.is_empty());
        assert_eq!(rules_only.rule_matches.len(), 1);

        let model_only = engine.suggest(&matcher, &tx, false, true).await;
        assert!(model_only.rule_matches.is_empty());
        assert_eq!(model_only.suggestions[0].category, "Cloud");
    }

    #[tokio::test]
    async fn test_threshold_applied() {
        let db = Database::in_memory().unwrap();
        let tx = seed_transaction(&db, "CORNER STORE");
        let matcher = RuleMatcher::default();

        let low = CategorizationEngine::new(Some(ScorerClient::mock(vec![prediction("Shopping", 0.4)])), 0.6);
        let (decision, applied) = categorize(&low, &db, &matcher, &tx).await;
        assert!(applied);
        assert!(!decision.is_categorized);
        assert_eq!(decision.category, UNCATEGORIZED);
        assert_eq!(decision.confidence, 0.4);

        let stored = db.get_transaction(tx.id).unwrap().unwrap();
        assert!(!stored.is_categorized);
        assert_eq!(stored.confidence_score, 0.4);

        let high = CategorizationEngine::new(Some(ScorerClient::mock(vec![prediction("Shopping", 0.6)])), 0.6);
        let (decision, applied) = categorize(&high, &db, &matcher, &tx).await;
        assert!(applied);
        assert!(decision.is_categorized);
        assert_eq!(decision.source, Some(SuggestionSource::Model));

        let stored = db.get_transaction(tx.id).unwrap().unwrap();
        assert_eq!(stored.category, "Shopping");
        assert!(stored.is_categorized);
    }

    #[tokio::test]
    async fn test_deleted_transaction_is_skipped() {
        let db = Database::in_memory().unwrap();
        let tx = seed_transaction(&db, "GONE");
        db.delete_batch(tx.batch_id).unwrap();

        let engine = CategorizationEngine::new(None, 0.6);
        let (_, applied) = categorize(&engine, &db, &RuleMatcher::default(), &tx).await;
        assert!(!applied);
    }
}
