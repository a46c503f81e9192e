//! Built-in keyword scorer
//!
//! A small local model: a static merchant keyword table plus pattern
//! associations learned from recalibration examples. Longer keyword matches
//! score higher, so "UBER EATS" beats "UBER".

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::debug;

use super::{ModelPrediction, ModelScorer, RecalibrationSignal, ScoringInput};
use crate::categorize::pattern::derive_pattern;
use crate::error::Result;

/// (category, subcategory, keywords)
const KEYWORD_TABLE: &[(&str, Option<&str>, &[&str])] = &[
    (
        "Groceries",
        None,
        &["WHOLE FOODS", "WHOLEFDS", "TRADER JOE", "SAFEWAY", "KROGER", "ALDI", "GROCERY"],
    ),
    (
        "Dining",
        Some("Delivery"),
        &["UBER EATS", "DOORDASH", "GRUBHUB"],
    ),
    (
        "Dining",
        None,
        &["STARBUCKS", "COFFEE", "RESTAURANT", "CAFE", "MCDONALD", "CHIPOTLE"],
    ),
    (
        "Transportation",
        None,
        &["UBER", "LYFT", "SHELL", "CHEVRON", "EXXON", "PARKING", "TRANSIT"],
    ),
    (
        "Subscriptions",
        Some("Streaming"),
        &["NETFLIX", "SPOTIFY", "HULU", "DISNEY PLUS", "HBO MAX"],
    ),
    (
        "Shopping",
        None,
        &["AMAZON", "AMZN", "TARGET", "WALMART", "COSTCO", "EBAY"],
    ),
    (
        "Utilities",
        None,
        &["ELECTRIC", "WATER DEPT", "COMCAST", "VERIZON", "AT&T", "PG&E"],
    ),
    (
        "Software & Technology",
        None,
        &["GITHUB", "GOOGLE CLOUD", "DIGITALOCEAN", "ADOBE", "JETBRAINS"],
    ),
    ("Housing", None, &["RENT", "MORTGAGE", "HOA"]),
    (
        "Healthcare",
        None,
        &["PHARMACY", "CVS", "WALGREENS", "DENTAL", "CLINIC"],
    ),
];

/// Keywords that only suggest a category for incoming money
const INCOME_KEYWORDS: &[&str] = &["PAYROLL", "DIRECT DEP", "SALARY", "INTEREST PAID"];

/// Learned votes: pattern -> ((category, subcategory) -> count)
type Learned = HashMap<String, HashMap<(String, Option<String>), u32>>;

#[derive(Clone, Default)]
pub struct KeywordScorer {
    learned: Arc<RwLock<Learned>>,
}

fn keyword_confidence(keyword: &str) -> f64 {
    0.55 + (keyword.len().min(12) as f64) * 0.025
}

impl KeywordScorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct learned patterns
    pub fn learned_patterns(&self) -> usize {
        self.learned.read().map(|l| l.len()).unwrap_or(0)
    }

    fn learned_predictions(&self, input: &ScoringInput<'_>) -> Vec<ModelPrediction> {
        let Some(pattern) = derive_pattern(input.description, input.vendor) else {
            return Vec::new();
        };
        let Ok(learned) = self.learned.read() else {
            return Vec::new();
        };
        let Some(votes) = learned.get(&pattern) else {
            return Vec::new();
        };

        let total: u32 = votes.values().sum();
        votes
            .iter()
            .map(|((category, subcategory), count)| {
                let share = *count as f64 / total.max(1) as f64;
                ModelPrediction {
                    category: category.clone(),
                    subcategory: subcategory.clone(),
                    confidence: (share * (0.5 + 0.1 * *count as f64)).min(0.95),
                    reasoning: Some(format!(
                        "Learned from {} labelled example(s) for '{}'",
                        count, pattern
                    )),
                }
            })
            .collect()
    }
}

#[async_trait]
impl ModelScorer for KeywordScorer {
    async fn score(&self, input: &ScoringInput<'_>) -> Result<Vec<ModelPrediction>> {
        let text = match input.vendor {
            Some(vendor) => format!("{} {}", vendor, input.description).to_uppercase(),
            None => input.description.to_uppercase(),
        };

        let mut best: HashMap<(&str, Option<&str>), (f64, &str)> = HashMap::new();
        for &(category, subcategory, keywords) in KEYWORD_TABLE {
            for &keyword in keywords.iter().filter(|k| text.contains(**k)) {
                let confidence = keyword_confidence(keyword);
                let entry = best
                    .entry((category, subcategory))
                    .or_insert((confidence, keyword));
                if confidence > entry.0 {
                    *entry = (confidence, keyword);
                }
            }
        }

        if input.is_income {
            if let Some(&keyword) = INCOME_KEYWORDS.iter().find(|k| text.contains(**k)) {
                best.insert(("Income", None), (keyword_confidence(keyword), keyword));
            }
        }

        let mut predictions: Vec<ModelPrediction> = best
            .into_iter()
            .map(|((category, subcategory), (confidence, keyword))| ModelPrediction {
                category: category.to_string(),
                subcategory: subcategory.map(str::to_string),
                confidence,
                reasoning: Some(format!("Keyword '{}' found", keyword)),
            })
            .collect();

        predictions.extend(self.learned_predictions(input));
        predictions.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.category.cmp(&b.category))
        });

        Ok(predictions)
    }

    async fn recalibrate(&self, signal: &RecalibrationSignal) -> Result<usize> {
        let Ok(mut learned) = self.learned.write() else {
            return Ok(0);
        };

        let mut accepted = 0;
        for example in &signal.examples {
            let Some(pattern) = derive_pattern(&example.description, example.vendor.as_deref())
            else {
                continue;
            };
            *learned
                .entry(pattern)
                .or_default()
                .entry((example.category.clone(), example.subcategory.clone()))
                .or_insert(0) += 1;
            accepted += 1;
        }

        debug!(
            accepted,
            patterns = learned.len(),
            "Keyword scorer recalibrated"
        );
        Ok(accepted)
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::RecalibrationExample;
    use rust_decimal::Decimal;

    fn input<'a>(description: &'a str, vendor: Option<&'a str>) -> ScoringInput<'a> {
        ScoringInput {
            description,
            vendor,
            amount: Decimal::new(-1000, 2),
            is_income: false,
        }
    }

    #[tokio::test]
    async fn test_keyword_match() {
        let scorer = KeywordScorer::new();
        let predictions = scorer.score(&input("NETFLIX.COM 866-579", None)).await.unwrap();
        assert_eq!(predictions[0].category, "Subscriptions");
        assert_eq!(predictions[0].subcategory.as_deref(), Some("Streaming"));
        assert!(predictions[0].confidence > 0.0 && predictions[0].confidence <= 1.0);
    }

    #[tokio::test]
    async fn test_longer_keyword_wins() {
        let scorer = KeywordScorer::new();
        let predictions = scorer.score(&input("UBER EATS 1234", None)).await.unwrap();
        assert_eq!(predictions[0].category, "Dining");
        assert!(predictions.iter().any(|p| p.category == "Transportation"));
    }

    #[tokio::test]
    async fn test_no_match() {
        let scorer = KeywordScorer::new();
        let predictions = scorer.score(&input("ZZZ UNKNOWN", None)).await.unwrap();
        assert!(predictions.is_empty());
    }

    #[tokio::test]
    async fn test_income_keywords_need_income() {
        let scorer = KeywordScorer::new();
        let mut payroll = input("ACME PAYROLL", None);
        assert!(scorer.score(&payroll).await.unwrap().is_empty());

        payroll.is_income = true;
        let predictions = scorer.score(&payroll).await.unwrap();
        assert_eq!(predictions[0].category, "Income");
    }

    #[tokio::test]
    async fn test_recalibration_learns_pattern() {
        let scorer = KeywordScorer::new();
        let example = RecalibrationExample {
            description: "AWS".into(),
            vendor: None,
            category: "Software & Technology".into(),
            subcategory: None,
        };
        let signal = RecalibrationSignal {
            improvement_run_id: Some(1),
            examples: vec![example.clone(), example.clone(), example],
        };

        assert_eq!(scorer.recalibrate(&signal).await.unwrap(), 3);
        assert_eq!(scorer.learned_patterns(), 1);

        let predictions = scorer.score(&input("AWS", None)).await.unwrap();
        assert_eq!(predictions[0].category, "Software & Technology");
        assert!((predictions[0].confidence - 0.8).abs() < 1e-9);
    }
}
