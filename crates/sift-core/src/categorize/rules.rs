//! Deterministic rule matching
//!
//! Rules are compiled once per run (regexes included) and then evaluated
//! against every transaction without touching the database again.

use regex::{Regex, RegexBuilder};
use tracing::warn;

use super::pattern::normalize_text;
use crate::db::Database;
use crate::error::Result;
use crate::models::{CategorySuggestion, MatchField, PatternType, Rule, SuggestionSource};

enum Matcher {
    /// Normalized alternatives (pattern split on `|`)
    Contains(Vec<String>),
    Regex(Regex),
    Exact(String),
}

impl Matcher {
    fn compile(pattern: &str, pattern_type: PatternType) -> Result<Self> {
        Ok(match pattern_type {
            PatternType::Contains => Matcher::Contains(
                pattern
                    .split('|')
                    .map(normalize_text)
                    .filter(|p| !p.is_empty())
                    .collect(),
            ),
            PatternType::Regex => {
                Matcher::Regex(RegexBuilder::new(pattern).case_insensitive(true).build()?)
            }
            PatternType::Exact => Matcher::Exact(pattern.trim().to_uppercase()),
        })
    }

    fn is_match(&self, text: &str) -> bool {
        match self {
            Matcher::Contains(alternatives) => {
                let text = normalize_text(text);
                alternatives.iter().any(|p| text.contains(p.as_str()))
            }
            Matcher::Regex(re) => re.is_match(text),
            Matcher::Exact(expected) => text.trim().to_uppercase() == *expected,
        }
    }
}

/// A rule ready for evaluation
pub struct CompiledRule {
    pub rule: Rule,
    matcher: Matcher,
}

impl CompiledRule {
    pub fn compile(rule: Rule) -> Result<Self> {
        let matcher = Matcher::compile(&rule.pattern, rule.pattern_type)?;
        Ok(Self { rule, matcher })
    }

    /// Which field matched, if any
    pub fn match_field(&self, description: &str, vendor: Option<&str>) -> Option<MatchField> {
        let vendor = vendor.filter(|v| !v.trim().is_empty());
        match self.rule.match_field {
            MatchField::Description => self
                .matcher
                .is_match(description)
                .then_some(MatchField::Description),
            MatchField::Vendor => vendor
                .filter(|v| self.matcher.is_match(v))
                .map(|_| MatchField::Vendor),
            MatchField::Any => {
                if vendor.is_some_and(|v| self.matcher.is_match(v)) {
                    Some(MatchField::Vendor)
                } else if self.matcher.is_match(description) {
                    Some(MatchField::Description)
                } else {
                    None
                }
            }
        }
    }
}

/// Check a single pattern against text (used by rule previews)
pub fn pattern_matches(text: &str, pattern: &str, pattern_type: PatternType) -> Result<bool> {
    Ok(Matcher::compile(pattern, pattern_type)?.is_match(text))
}

/// The active rule set, compiled
#[derive(Default)]
pub struct RuleMatcher {
    rules: Vec<CompiledRule>,
}

impl RuleMatcher {
    /// Compile active rules; rules that fail to compile are skipped with a warning
    pub fn new(rules: Vec<Rule>) -> Self {
        let compiled = rules
            .into_iter()
            .filter(|r| r.active)
            .filter_map(|rule| {
                let id = rule.id;
                match CompiledRule::compile(rule) {
                    Ok(c) => Some(c),
                    Err(e) => {
                        warn!(rule_id = id, error = %e, "Skipping rule that does not compile");
                        None
                    }
                }
            })
            .collect();
        Self { rules: compiled }
    }

    /// Load and compile the active rule set
    pub fn load(db: &Database) -> Result<Self> {
        Ok(Self::new(db.list_rules(true)?))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules matching a transaction, in rule-set order
    pub fn matching(&self, description: &str, vendor: Option<&str>) -> Vec<(&Rule, MatchField)> {
        self.rules
            .iter()
            .filter_map(|c| c.match_field(description, vendor).map(|f| (&c.rule, f)))
            .collect()
    }

    /// Suggestions from every matching rule
    pub fn suggestions(&self, description: &str, vendor: Option<&str>) -> Vec<CategorySuggestion> {
        self.matching(description, vendor)
            .into_iter()
            .map(|(rule, field)| CategorySuggestion {
                category: rule.category.clone(),
                subcategory: rule.subcategory.clone(),
                confidence: rule.confidence_weight.clamp(0.0, 1.0),
                source: SuggestionSource::Rule,
                reasoning: format!(
                    "Rule #{} v{} ({} '{}') matched {}",
                    rule.id,
                    rule.version,
                    rule.pattern_type.as_str(),
                    rule.pattern,
                    field.as_str()
                ),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RuleCreator;
    use chrono::Utc;

    fn rule(id: i64, pattern: &str, pattern_type: PatternType, field: MatchField) -> Rule {
        Rule {
            id,
            pattern: pattern.to_string(),
            pattern_type,
            match_field: field,
            category: format!("Cat{}", id),
            subcategory: None,
            confidence_weight: 0.8,
            created_by: RuleCreator::Manual,
            version: 1,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_pattern_matches() {
        assert!(pattern_matches("SHELL OIL", "SHELL", PatternType::Contains).unwrap());
        assert!(pattern_matches("shell oil", "SHELL", PatternType::Contains).unwrap());
        assert!(pattern_matches("CHEVRON", "SHELL|CHEVRON|EXXON", PatternType::Contains).unwrap());
        assert!(!pattern_matches("GROCERY STORE", "SHELL|CHEVRON", PatternType::Contains).unwrap());
        assert!(pattern_matches("blue   bottle #7", "BLUE BOTTLE", PatternType::Contains).unwrap());
        assert!(pattern_matches("Uber Trip 123", r"^UBER\s+TRIP", PatternType::Regex).unwrap());
        assert!(pattern_matches(" netflix ", "NETFLIX", PatternType::Exact).unwrap());
        assert!(!pattern_matches("NETFLIX.COM", "NETFLIX", PatternType::Exact).unwrap());
        assert!(pattern_matches("x", "(", PatternType::Regex).is_err());
    }

    #[test]
    fn test_match_fields() {
        let matcher = RuleMatcher::new(vec![
            rule(1, "AMAZON", PatternType::Contains, MatchField::Vendor),
            rule(2, "AMZN", PatternType::Contains, MatchField::Description),
            rule(3, "AMAZON", PatternType::Contains, MatchField::Any),
        ]);

        let hits = matcher.matching("AMZN MKTP", Some("Amazon"));
        let ids: Vec<(i64, MatchField)> = hits.iter().map(|(r, f)| (r.id, *f)).collect();
        assert_eq!(
            ids,
            vec![
                (1, MatchField::Vendor),
                (2, MatchField::Description),
                (3, MatchField::Vendor),
            ]
        );

        // Vendor-only rules never match a transaction without a vendor
        let hits = matcher.matching("AMAZON PRIME", None);
        let ids: Vec<i64> = hits.iter().map(|(r, _)| r.id).collect();
        assert_eq!(ids, vec![3]);
    }

    #[test]
    fn test_inactive_and_broken_rules_skipped() {
        let mut inactive = rule(1, "AWS", PatternType::Contains, MatchField::Any);
        inactive.active = false;
        let broken = rule(2, "(", PatternType::Regex, MatchField::Any);
        let ok = rule(3, "AWS", PatternType::Contains, MatchField::Any);

        let matcher = RuleMatcher::new(vec![inactive, broken, ok]);
        assert_eq!(matcher.len(), 1);

        let suggestions = matcher.suggestions("AWS", None);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].category, "Cat3");
        assert_eq!(suggestions[0].source, SuggestionSource::Rule);
        assert_eq!(suggestions[0].confidence, 0.8);
    }
}
