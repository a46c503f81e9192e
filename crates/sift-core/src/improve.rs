//! Auto-improvement from user feedback
//!
//! Mines unconsumed feedback for repeated corrections of the same merchant
//! pattern and turns them into rule changes:
//!
//! - agreeing corrections create a rule or reinforce the existing one
//! - rules for the same pattern with a different category are weakened
//! - `correct` feedback reinforces the rule that produced the category, and
//!   `incorrect` feedback weakens it
//!
//! Rule changes and consumption marks for a run commit together, so running
//! twice over the same feedback never creates a rule twice. Groups without
//! enough agreement stay unconsumed until more feedback arrives.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::categorize::pattern::derive_pattern;
use crate::categorize::{CategorizationEngine, RuleMatcher};
use crate::config::ImprovementConfig;
use crate::db::{
    find_active_by_pattern, insert_improvement_run, insert_rule, load_rule, mark_consumed,
    update_rule_on, Database, ImprovementRunRecord,
};
use crate::error::{Error, Result};
use crate::jobs::{JobOutcome, JobReporter};
use crate::models::{
    Feedback, FeedbackType, MatchField, NewRule, PatternType, RuleCreator, RuleUpdate,
    TransactionFilter, UNCATEGORIZED,
};
use crate::scorer::{ModelScorer, RecalibrationExample, RecalibrationSignal};

const MAX_WEIGHT: f64 = 0.99;
const MIN_WEIGHT: f64 = 0.05;

/// Parameters of one improvement run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImprovementRequest {
    pub batch_id: Option<i64>,
    /// Minimum candidate confidence for creating or reinforcing a rule
    pub min_confidence_threshold: f64,
    /// Cap on distinct transactions whose feedback is mined (and on reprocessing)
    pub max_transactions: i64,
}

impl ImprovementRequest {
    pub fn from_config(config: &ImprovementConfig, batch_id: Option<i64>) -> Self {
        Self {
            batch_id,
            min_confidence_threshold: config.default_min_confidence,
            max_transactions: config.default_max_transactions,
        }
    }

    /// Reject out-of-range parameters before any work starts
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if !(0.0..=1.0).contains(&self.min_confidence_threshold) {
            problems.push(format!(
                "min_confidence_threshold must be within [0, 1], got {}",
                self.min_confidence_threshold
            ));
        }
        if self.max_transactions <= 0 {
            problems.push("max_transactions must be positive".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation {
                message: problems.join("; "),
                problems,
            })
        }
    }
}

/// Counters reported by an improvement run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImprovementSummary {
    pub run_id: i64,
    pub rules_created: usize,
    pub rules_updated: usize,
    pub ml_model_improvements: usize,
    pub transactions_reprocessed: usize,
    /// Reprocessed transactions that now clear the threshold
    pub transactions_recategorized: usize,
    pub improvement_score: f64,
    pub processing_time_ms: u64,
    pub feedback_consumed: usize,
    /// Feedback left for a later run (not enough agreement yet)
    pub feedback_deferred: usize,
}

/// Corrections for one pattern
struct PatternGroup<'a> {
    pattern: String,
    items: Vec<&'a Feedback>,
}

/// The winning category of a pattern group
#[derive(Debug, Clone, PartialEq)]
struct Verdict {
    category: String,
    subcategory: Option<String>,
    votes: usize,
    total: usize,
}

impl Verdict {
    /// `agreement_ratio * votes / (votes + 1)`
    fn confidence(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let ratio = self.votes as f64 / self.total as f64;
        ratio * self.votes as f64 / (self.votes as f64 + 1.0)
    }

    fn matches(&self, category: &str, subcategory: Option<&str>) -> bool {
        self.category.eq_ignore_ascii_case(category)
            && match (self.subcategory.as_deref(), subcategory) {
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                (None, None) => true,
                _ => false,
            }
    }
}

fn correction_target(feedback: &Feedback) -> Option<(&str, Option<&str>)> {
    match feedback.feedback_type {
        FeedbackType::Correct => None,
        _ => feedback
            .target_category()
            .map(|c| (c.trim(), feedback.suggested_subcategory.as_deref())),
    }
}

/// Majority category of a group; ties go to the alphabetically first category
fn tally(group: &PatternGroup<'_>) -> Option<Verdict> {
    let mut votes: BTreeMap<(String, Option<String>), (String, Option<String>, usize)> =
        BTreeMap::new();
    for feedback in &group.items {
        let Some((category, subcategory)) = correction_target(feedback) else {
            continue;
        };
        let key = (
            category.to_lowercase(),
            subcategory.map(|s| s.trim().to_lowercase()),
        );
        votes
            .entry(key)
            .or_insert_with(|| (category.to_string(), subcategory.map(str::to_string), 0))
            .2 += 1;
    }

    let total = votes.values().map(|v| v.2).sum();
    votes
        .into_values()
        .fold(None::<(String, Option<String>, usize)>, |best, v| match best {
            Some(b) if b.2 >= v.2 => Some(b),
            _ => Some(v),
        })
        .map(|(category, subcategory, votes)| Verdict {
            category,
            subcategory,
            votes,
            total,
        })
}

fn feedback_pattern(feedback: &Feedback) -> Option<String> {
    derive_pattern(&feedback.description, feedback.vendor.as_deref())
}

/// Net weight change for a rule from `correct`/`incorrect` feedback
#[derive(Default)]
struct RuleVotes {
    net: i64,
    feedback_ids: Vec<i64>,
}

#[derive(Default)]
struct Applied {
    run_id: i64,
    rules_created: usize,
    rules_updated: usize,
    consumed: Vec<i64>,
    deferred: Vec<i64>,
}

pub struct AutoImprover {
    db: Database,
    engine: CategorizationEngine,
    config: ImprovementConfig,
}

impl AutoImprover {
    pub fn new(db: Database, engine: CategorizationEngine, config: ImprovementConfig) -> Self {
        Self { db, engine, config }
    }

    /// Run as a job body
    pub async fn run_job(
        &self,
        reporter: &JobReporter,
        request: ImprovementRequest,
    ) -> Result<JobOutcome> {
        let summary = self.run(reporter, &request).await?;
        Ok(JobOutcome {
            message: format!(
                "{} rules created, {} updated, {} transactions reprocessed",
                summary.rules_created, summary.rules_updated, summary.transactions_reprocessed
            ),
            result_ref: Some(summary.run_id.to_string()),
            details: json!({ "improvement": summary }),
            artifact: None,
        })
    }

    /// Mine unconsumed feedback and update the rule set
    pub async fn run(
        &self,
        reporter: &JobReporter,
        request: &ImprovementRequest,
    ) -> Result<ImprovementSummary> {
        request.validate()?;
        let started = Instant::now();
        let job_id = reporter.job_id();

        reporter.stage("loading", 5, "Loading unconsumed feedback");
        let feedback = self.load_scope(request)?;
        reporter.check_cancelled()?;
        info!(job_id = %job_id, feedback = feedback.len(), batch_id = ?request.batch_id, "Improvement run started");

        // Group corrections by pattern
        reporter.stage("analyzing", 20, format!("Analyzing {} feedback items", feedback.len()));
        let mut groups: BTreeMap<String, PatternGroup<'_>> = BTreeMap::new();
        let mut confirmations: Vec<&Feedback> = Vec::new();
        let mut non_actionable: Vec<i64> = Vec::new();
        for item in &feedback {
            match (feedback_pattern(item), correction_target(item)) {
                (Some(pattern), Some(_)) => {
                    groups
                        .entry(pattern.clone())
                        .or_insert_with(|| PatternGroup {
                            pattern,
                            items: Vec::new(),
                        })
                        .items
                        .push(item);
                }
                (Some(_), None) => confirmations.push(item),
                (None, _) => non_actionable.push(item.id),
            }
        }
        reporter.check_cancelled()?;

        // Rule mutations and consumption in one transaction
        reporter.stage("applying", 40, format!("Evaluating {} patterns", groups.len()));
        let matcher = RuleMatcher::load(&self.db)?;
        let applied = reporter
            .commit(|| {
                self.apply(
                    &job_id,
                    request,
                    &groups,
                    &confirmations,
                    &non_actionable,
                    &matcher,
                )
            })
            .await?;
        let run_id = applied.run_id;

        let consumed_ids: HashSet<i64> = applied.consumed.iter().copied().collect();
        let consumed: Vec<&Feedback> = feedback
            .iter()
            .filter(|f| consumed_ids.contains(&f.id))
            .collect();

        // Recalibration
        reporter.stage("recalibrating", 60, "Sending recalibration examples");
        let ml_model_improvements = self.recalibrate(run_id, &consumed).await;
        reporter.check_cancelled()?;

        // Reprocess
        let (reprocessed, recategorized) = self.reprocess(reporter, request, &consumed).await?;

        let improvement_score = self.coverage(&consumed)?;
        let processing_time_ms = started.elapsed().as_millis() as u64;

        let summary = ImprovementSummary {
            run_id,
            rules_created: applied.rules_created,
            rules_updated: applied.rules_updated,
            ml_model_improvements,
            transactions_reprocessed: reprocessed,
            transactions_recategorized: recategorized,
            improvement_score,
            processing_time_ms,
            feedback_consumed: applied.consumed.len(),
            feedback_deferred: applied.deferred.len(),
        };

        // A run interrupted after `apply` keeps completed_at NULL
        let record = ImprovementRunRecord {
            id: run_id,
            batch_id: request.batch_id,
            job_id: Some(job_id),
            started_at: chrono::Utc::now(),
            completed_at: None,
            rules_created: summary.rules_created as i64,
            rules_updated: summary.rules_updated as i64,
            ml_model_improvements: summary.ml_model_improvements as i64,
            transactions_reprocessed: summary.transactions_reprocessed as i64,
            improvement_score: summary.improvement_score,
            processing_time_ms: summary.processing_time_ms as i64,
        };
        reporter
            .commit(|| self.db.finish_improvement_run(&record))
            .await?;

        info!(
            run_id,
            rules_created = summary.rules_created,
            rules_updated = summary.rules_updated,
            reprocessed = summary.transactions_reprocessed,
            score = summary.improvement_score,
            "Improvement run finished"
        );
        Ok(summary)
    }

    /// Unconsumed feedback covering at most `max_transactions` transactions
    fn load_scope(&self, request: &ImprovementRequest) -> Result<Vec<Feedback>> {
        let cap = request.max_transactions.max(0) as usize;
        let mut seen: HashSet<i64> = HashSet::new();
        Ok(self
            .db
            .list_unconsumed_feedback(request.batch_id)?
            .into_iter()
            .filter(|f| {
                if seen.contains(&f.transaction_id) {
                    return true;
                }
                if seen.len() >= cap {
                    return false;
                }
                seen.insert(f.transaction_id);
                true
            })
            .collect())
    }

    fn apply(
        &self,
        job_id: &str,
        request: &ImprovementRequest,
        groups: &BTreeMap<String, PatternGroup<'_>>,
        confirmations: &[&Feedback],
        non_actionable: &[i64],
        matcher: &RuleMatcher,
    ) -> Result<Applied> {
        let step = self.config.weight_step;
        let min_agreement = self.config.min_agreement.max(1);

        let mut conn = self.db.conn()?;
        let tx = conn.transaction()?;
        let run_id = insert_improvement_run(&tx, request.batch_id, Some(job_id))?;
        let mut applied = Applied {
            run_id,
            consumed: non_actionable.to_vec(),
            ..Default::default()
        };
        let mut touched: HashSet<i64> = HashSet::new();

        for group in groups.values() {
            let ids: Vec<i64> = group.items.iter().map(|f| f.id).collect();
            let Some(verdict) = tally(group) else {
                applied.consumed.extend(ids);
                continue;
            };
            let confidence = verdict.confidence();

            if verdict.votes < min_agreement || confidence < request.min_confidence_threshold {
                debug!(
                    pattern = %group.pattern,
                    votes = verdict.votes,
                    total = verdict.total,
                    confidence,
                    "Deferring pattern"
                );
                applied.deferred.extend(ids);
                continue;
            }

            let mut reinforced = false;
            for rule in find_active_by_pattern(&tx, &group.pattern)? {
                let delta = step * verdict.votes as f64;
                let (weight, reason) =
                    if verdict.matches(&rule.category, rule.subcategory.as_deref()) {
                        reinforced = true;
                        (
                            (rule.confidence_weight + delta).min(MAX_WEIGHT),
                            format!("Reinforced by {} agreeing corrections", verdict.votes),
                        )
                    } else {
                        (
                            (rule.confidence_weight - delta).max(MIN_WEIGHT),
                            format!(
                                "Contradicted by {} corrections to {}",
                                verdict.votes, verdict.category
                            ),
                        )
                    };
                update_rule_on(
                    &tx,
                    rule.id,
                    &RuleUpdate {
                        confidence_weight: Some(weight),
                        reason,
                        feedback_ids: ids.clone(),
                        improvement_run_id: Some(run_id),
                        ..Default::default()
                    },
                )?;
                touched.insert(rule.id);
                applied.rules_updated += 1;
            }

            if !reinforced {
                let rule_id = insert_rule(
                    &tx,
                    &NewRule {
                        pattern: group.pattern.clone(),
                        pattern_type: PatternType::Contains,
                        match_field: MatchField::Any,
                        category: verdict.category.clone(),
                        subcategory: verdict.subcategory.clone(),
                        confidence_weight: confidence,
                        created_by: RuleCreator::AutoImprovement,
                    },
                    &format!("Created from {} agreeing corrections", verdict.votes),
                    &ids,
                    Some(run_id),
                )?;
                touched.insert(rule_id);
                applied.rules_created += 1;
                info!(
                    rule_id,
                    pattern = %group.pattern,
                    category = %verdict.category,
                    confidence,
                    "Rule created from feedback"
                );
            }

            applied.consumed.extend(ids);
        }

        // Verdicts on rules that produced the original category
        let mut rule_votes: HashMap<i64, RuleVotes> = HashMap::new();
        let incorrect = groups
            .values()
            .flat_map(|g| g.items.iter().copied())
            .filter(|f| f.feedback_type == FeedbackType::Incorrect);
        for feedback in confirmations.iter().copied().chain(incorrect) {
            let sign = if feedback.feedback_type == FeedbackType::Correct {
                1
            } else {
                -1
            };
            for (rule, _) in matcher.matching(&feedback.description, feedback.vendor.as_deref()) {
                if touched.contains(&rule.id)
                    || !rule.category.eq_ignore_ascii_case(&feedback.original_category)
                {
                    continue;
                }
                let votes = rule_votes.entry(rule.id).or_default();
                votes.net += sign;
                votes.feedback_ids.push(feedback.id);
            }
        }

        let mut voted: Vec<(i64, RuleVotes)> = rule_votes.into_iter().collect();
        voted.sort_by_key(|(id, _)| *id);
        for (rule_id, votes) in voted {
            if votes.net == 0 {
                continue;
            }
            let Some(rule) = load_rule(&tx, rule_id)? else {
                continue;
            };
            let weight =
                (rule.confidence_weight + step * votes.net as f64).clamp(MIN_WEIGHT, MAX_WEIGHT);
            let reason = if votes.net > 0 {
                format!("Confirmed by {} feedback", votes.net)
            } else {
                format!("Marked incorrect by {} feedback", -votes.net)
            };
            update_rule_on(
                &tx,
                rule_id,
                &RuleUpdate {
                    confidence_weight: Some(weight),
                    reason,
                    feedback_ids: votes.feedback_ids,
                    improvement_run_id: Some(run_id),
                    ..Default::default()
                },
            )?;
            applied.rules_updated += 1;
        }

        applied.consumed.extend(confirmations.iter().map(|f| f.id));
        mark_consumed(&tx, &applied.consumed, run_id)?;
        tx.commit()?;

        Ok(applied)
    }

    async fn recalibrate(&self, run_id: i64, consumed: &[&Feedback]) -> usize {
        let Some(scorer) = self.engine.scorer() else {
            return 0;
        };

        let examples: Vec<RecalibrationExample> = consumed
            .iter()
            .filter_map(|f| {
                let category = f.target_category()?;
                if category.eq_ignore_ascii_case(UNCATEGORIZED) {
                    return None;
                }
                let subcategory = match f.feedback_type {
                    FeedbackType::Correct => f.original_subcategory.clone(),
                    _ => f.suggested_subcategory.clone(),
                };
                Some(RecalibrationExample {
                    description: f.description.clone(),
                    vendor: f.vendor.clone(),
                    category: category.to_string(),
                    subcategory,
                })
            })
            .collect();
        if examples.is_empty() {
            return 0;
        }

        let signal = RecalibrationSignal {
            improvement_run_id: Some(run_id),
            examples,
        };
        match scorer.recalibrate(&signal).await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(run_id, scorer = scorer.name(), error = %e, "Recalibration failed");
                0
            }
        }
    }

    /// Re-run categorization over uncategorized transactions in scope
    async fn reprocess(
        &self,
        reporter: &JobReporter,
        request: &ImprovementRequest,
        consumed: &[&Feedback],
    ) -> Result<(usize, usize)> {
        let cap = request.max_transactions.max(0) as usize;
        let candidates = match request.batch_id {
            Some(batch_id) => self.db.list_transactions(&TransactionFilter {
                batch_id: Some(batch_id),
                is_categorized: Some(false),
                limit: Some(request.max_transactions),
                ..Default::default()
            })?,
            None => {
                let mut ids: Vec<i64> = consumed.iter().map(|f| f.transaction_id).collect();
                ids.sort_unstable();
                ids.dedup();
                self.db
                    .get_transactions_by_ids(&ids)?
                    .into_iter()
                    .filter(|t| !t.is_categorized)
                    .take(cap)
                    .collect()
            }
        };

        reporter.stage(
            "reprocessing",
            70,
            format!("Reprocessing {} transactions", candidates.len()),
        );
        let matcher = RuleMatcher::load(&self.db)?;
        let mut reprocessed = 0;
        let mut recategorized = 0;

        for (i, tx) in candidates.iter().enumerate() {
            reporter.check_cancelled()?;
            let result = self.engine.suggest(&matcher, tx, true, true).await;
            let decision = self.engine.decide(&result, &tx.category);
            let applied = reporter
                .commit(|| self.engine.apply(&self.db, tx, &decision))
                .await?;
            if applied {
                reprocessed += 1;
                if decision.is_categorized {
                    recategorized += 1;
                }
            }
            let progress = 70 + ((i + 1) * 25 / candidates.len().max(1)) as u8;
            reporter.progress(
                progress,
                format!("Reprocessed {} of {} transactions", i + 1, candidates.len()),
            );
        }

        Ok((reprocessed, recategorized))
    }

    /// Fraction of consumed corrections whose transaction is now matched by
    /// an active rule for the corrected category
    fn coverage(&self, consumed: &[&Feedback]) -> Result<f64> {
        let matcher = RuleMatcher::load(&self.db)?;
        let mut total = 0usize;
        let mut covered = 0usize;

        for feedback in consumed {
            if feedback_pattern(feedback).is_none() {
                continue;
            }
            let Some((category, _)) = correction_target(feedback) else {
                continue;
            };
            total += 1;
            if matcher
                .matching(&feedback.description, feedback.vendor.as_deref())
                .iter()
                .any(|(rule, _)| rule.category.eq_ignore_ascii_case(category))
            {
                covered += 1;
            }
        }

        Ok(if total == 0 {
            0.0
        } else {
            covered as f64 / total as f64
        })
    }
}
