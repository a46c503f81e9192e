//! Categorization rule operations
//!
//! Rules are never overwritten in place without a trace: every change bumps
//! `version` and appends a row to `rule_revisions`.

use chrono::Utc;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{MatchField, NewRule, PatternType, Rule, RuleCreator, RuleRevision, RuleUpdate};

const RULE_COLUMNS: &str = "id, pattern, pattern_type, match_field, category, subcategory, \
     confidence_weight, created_by, version, active, created_at, updated_at";

fn row_to_rule(row: &Row) -> rusqlite::Result<Rule> {
    let pattern_type: String = row.get(2)?;
    let match_field: String = row.get(3)?;
    let created_by: String = row.get(7)?;
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;

    Ok(Rule {
        id: row.get(0)?,
        pattern: row.get(1)?,
        pattern_type: pattern_type.parse().unwrap_or(PatternType::Contains),
        match_field: match_field.parse().unwrap_or(MatchField::Any),
        category: row.get(4)?,
        subcategory: row.get(5)?,
        confidence_weight: row.get(6)?,
        created_by: created_by.parse().unwrap_or(RuleCreator::Manual),
        version: row.get(8)?,
        active: row.get(9)?,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

fn validate_new_rule(rule: &NewRule) -> Result<()> {
    if rule.pattern.trim().is_empty() {
        return Err(Error::validation("Rule pattern must not be empty"));
    }
    if rule.category.trim().is_empty() {
        return Err(Error::validation("Rule category must not be empty"));
    }
    if !(0.0..=1.0).contains(&rule.confidence_weight) {
        return Err(Error::validation(format!(
            "confidence_weight must be within [0, 1], got {}",
            rule.confidence_weight
        )));
    }
    if rule.pattern_type == PatternType::Regex {
        Regex::new(&rule.pattern)?;
    }
    Ok(())
}

/// Insert a rule and its first revision on an open connection or transaction
pub(crate) fn insert_rule(
    conn: &Connection,
    rule: &NewRule,
    reason: &str,
    feedback_ids: &[i64],
    improvement_run_id: Option<i64>,
) -> Result<i64> {
    validate_new_rule(rule)?;
    let now = Utc::now().to_rfc3339();

    conn.execute(
        r#"
        INSERT INTO rules (
            pattern, pattern_type, match_field, category, subcategory,
            confidence_weight, created_by, version, active, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, 1, 1, ?, ?)
        "#,
        params![
            rule.pattern.trim(),
            rule.pattern_type.as_str(),
            rule.match_field.as_str(),
            rule.category.trim(),
            rule.subcategory,
            rule.confidence_weight,
            rule.created_by.as_str(),
            now,
            now,
        ],
    )?;
    let rule_id = conn.last_insert_rowid();

    insert_revision(
        conn,
        rule_id,
        1,
        rule.category.trim(),
        rule.subcategory.as_deref(),
        rule.confidence_weight,
        true,
        reason,
        feedback_ids,
        improvement_run_id,
    )?;

    Ok(rule_id)
}

#[allow(clippy::too_many_arguments)]
fn insert_revision(
    conn: &Connection,
    rule_id: i64,
    version: i64,
    category: &str,
    subcategory: Option<&str>,
    weight: f64,
    active: bool,
    reason: &str,
    feedback_ids: &[i64],
    improvement_run_id: Option<i64>,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO rule_revisions (
            rule_id, version, category, subcategory, confidence_weight, active,
            reason, feedback_ids, improvement_run_id, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            rule_id,
            version,
            category,
            subcategory,
            weight,
            active,
            reason,
            serde_json::to_string(feedback_ids)?,
            improvement_run_id,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub(crate) fn load_rule(conn: &Connection, id: i64) -> Result<Option<Rule>> {
    let rule = conn
        .query_row(
            &format!("SELECT {} FROM rules WHERE id = ?", RULE_COLUMNS),
            params![id],
            row_to_rule,
        )
        .optional()?;
    Ok(rule)
}

/// Apply a versioned update on an open connection or transaction
pub(crate) fn update_rule_on(conn: &Connection, id: i64, update: &RuleUpdate) -> Result<Rule> {
    let current =
        load_rule(conn, id)?.ok_or_else(|| Error::NotFound(format!("Rule {} not found", id)))?;

    let category = update
        .category
        .clone()
        .unwrap_or_else(|| current.category.clone());
    if category.trim().is_empty() {
        return Err(Error::validation("Rule category must not be empty"));
    }
    let subcategory = match &update.subcategory {
        Some(sub) => sub.clone(),
        None => current.subcategory.clone(),
    };
    let weight = update
        .confidence_weight
        .unwrap_or(current.confidence_weight);
    if !(0.0..=1.0).contains(&weight) {
        return Err(Error::validation(format!(
            "confidence_weight must be within [0, 1], got {}",
            weight
        )));
    }
    let active = update.active.unwrap_or(current.active);
    let version = current.version + 1;

    conn.execute(
        r#"
        UPDATE rules
        SET category = ?, subcategory = ?, confidence_weight = ?, active = ?,
            version = ?, updated_at = ?
        WHERE id = ? AND version = ?
        "#,
        params![
            category,
            subcategory,
            weight,
            active,
            version,
            Utc::now().to_rfc3339(),
            id,
            current.version,
        ],
    )?;

    insert_revision(
        conn,
        id,
        version,
        &category,
        subcategory.as_deref(),
        weight,
        active,
        &update.reason,
        &update.feedback_ids,
        update.improvement_run_id,
    )?;

    load_rule(conn, id)?.ok_or_else(|| Error::NotFound(format!("Rule {} not found", id)))
}

/// Active rules whose pattern equals `pattern` (case-insensitive)
pub(crate) fn find_active_by_pattern(conn: &Connection, pattern: &str) -> Result<Vec<Rule>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM rules WHERE active = 1 AND pattern = ? COLLATE NOCASE ORDER BY id",
        RULE_COLUMNS
    ))?;
    let rules = stmt
        .query_map(params![pattern.trim()], row_to_rule)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rules)
}

impl Database {
    /// Create a rule (version 1)
    pub fn create_rule(&self, rule: &NewRule) -> Result<Rule> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let id = insert_rule(&tx, rule, "created", &[], None)?;
        let created =
            load_rule(&tx, id)?.ok_or_else(|| Error::NotFound(format!("Rule {} not found", id)))?;
        tx.commit()?;
        Ok(created)
    }

    /// Get a rule by id
    pub fn get_rule(&self, id: i64) -> Result<Option<Rule>> {
        let conn = self.conn()?;
        load_rule(&conn, id)
    }

    /// List rules, highest confidence first
    pub fn list_rules(&self, active_only: bool) -> Result<Vec<Rule>> {
        let conn = self.conn()?;
        let sql = if active_only {
            format!(
                "SELECT {} FROM rules WHERE active = 1 ORDER BY confidence_weight DESC, id ASC",
                RULE_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM rules ORDER BY confidence_weight DESC, id ASC",
                RULE_COLUMNS
            )
        };
        let mut stmt = conn.prepare(&sql)?;
        let rules = stmt
            .query_map([], row_to_rule)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rules)
    }

    /// Active rules with exactly this pattern
    pub fn find_rules_by_pattern(&self, pattern: &str) -> Result<Vec<Rule>> {
        let conn = self.conn()?;
        find_active_by_pattern(&conn, pattern)
    }

    /// Apply a versioned update to a rule
    pub fn update_rule(&self, id: i64, update: &RuleUpdate) -> Result<Rule> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let rule = update_rule_on(&tx, id, update)?;
        tx.commit()?;
        Ok(rule)
    }

    /// Deactivate a rule (rules are never hard-deleted)
    pub fn deactivate_rule(&self, id: i64, reason: &str) -> Result<Rule> {
        self.update_rule(
            id,
            &RuleUpdate {
                active: Some(false),
                reason: reason.to_string(),
                ..Default::default()
            },
        )
    }

    /// Revision history for a rule, oldest first
    pub fn list_rule_revisions(&self, rule_id: i64) -> Result<Vec<RuleRevision>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, rule_id, version, category, subcategory, confidence_weight, active,
                   reason, feedback_ids, improvement_run_id, created_at
            FROM rule_revisions
            WHERE rule_id = ?
            ORDER BY version ASC
            "#,
        )?;

        let revisions = stmt
            .query_map(params![rule_id], |row| {
                let feedback_ids: String = row.get(8)?;
                let created_at: String = row.get(10)?;
                Ok(RuleRevision {
                    id: row.get(0)?,
                    rule_id: row.get(1)?,
                    version: row.get(2)?,
                    category: row.get(3)?,
                    subcategory: row.get(4)?,
                    confidence_weight: row.get(5)?,
                    active: row.get(6)?,
                    reason: row.get(7)?,
                    feedback_ids: serde_json::from_str(&feedback_ids).unwrap_or_default(),
                    improvement_run_id: row.get(9)?,
                    created_at: parse_datetime(&created_at),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(revisions)
    }
}
