//! User feedback operations and improvement-run bookkeeping

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::transactions::{row_to_transaction, TRANSACTION_COLUMNS};
use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Feedback, FeedbackStats, FeedbackType, NewFeedback};

const FEEDBACK_COLUMNS: &str = "id, transaction_id, feedback_type, suggested_category, \
     suggested_subcategory, comment, created_at, batch_id, description, vendor, \
     original_category, original_subcategory";

fn row_to_feedback(row: &Row) -> rusqlite::Result<Feedback> {
    let feedback_type: String = row.get(2)?;
    let created_at: String = row.get(6)?;
    Ok(Feedback {
        id: row.get(0)?,
        transaction_id: row.get(1)?,
        feedback_type: feedback_type.parse().unwrap_or(FeedbackType::Correct),
        suggested_category: row.get(3)?,
        suggested_subcategory: row.get(4)?,
        comment: row.get(5)?,
        created_at: parse_datetime(&created_at),
        batch_id: row.get(7)?,
        description: row.get(8)?,
        vendor: row.get(9)?,
        original_category: row.get(10)?,
        original_subcategory: row.get(11)?,
    })
}

/// A recorded auto-improvement run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImprovementRunRecord {
    pub id: i64,
    pub batch_id: Option<i64>,
    pub job_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub rules_created: i64,
    pub rules_updated: i64,
    pub ml_model_improvements: i64,
    pub transactions_reprocessed: i64,
    pub improvement_score: f64,
    pub processing_time_ms: i64,
}

impl NewFeedback {
    /// Check the fields that do not need the database
    pub fn validate(&self) -> Result<()> {
        let has_category = self
            .suggested_category
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty());

        if self.feedback_type == FeedbackType::SuggestAlternative && !has_category {
            return Err(Error::validation(
                "suggest_alternative feedback requires a non-empty suggested_category",
            ));
        }
        if self.suggested_subcategory.is_some() && !has_category {
            return Err(Error::validation(
                "suggested_subcategory requires a suggested_category",
            ));
        }
        Ok(())
    }
}

/// Insert one feedback row and apply it to its transaction
fn insert_feedback(conn: &Connection, feedback: &NewFeedback) -> Result<i64> {
    feedback.validate()?;

    let tx = conn
        .query_row(
            &format!("SELECT {} FROM transactions WHERE id = ?", TRANSACTION_COLUMNS),
            params![feedback.transaction_id],
            row_to_transaction,
        )
        .optional()?
        .ok_or_else(|| {
            Error::NotFound(format!("Transaction {} not found", feedback.transaction_id))
        })?;

    let suggested_category = feedback
        .suggested_category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());

    conn.execute(
        r#"
        INSERT INTO feedback (
            transaction_id, feedback_type, suggested_category, suggested_subcategory, comment,
            batch_id, description, vendor, original_category, original_subcategory, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            feedback.transaction_id,
            feedback.feedback_type.as_str(),
            suggested_category,
            feedback.suggested_subcategory,
            feedback.comment,
            tx.batch_id,
            tx.description,
            tx.vendor,
            tx.category,
            tx.subcategory,
            Utc::now().to_rfc3339(),
        ],
    )?;
    let id = conn.last_insert_rowid();

    // The user's verdict becomes the transaction's category
    match (feedback.feedback_type, suggested_category) {
        (FeedbackType::Correct, _) => {
            conn.execute(
                "UPDATE transactions SET is_categorized = 1, confidence_score = 1.0 WHERE id = ?",
                params![tx.id],
            )?;
        }
        (_, Some(category)) => {
            conn.execute(
                r#"
                UPDATE transactions
                SET category = ?, subcategory = ?, is_categorized = 1, confidence_score = 1.0
                WHERE id = ?
                "#,
                params![category, feedback.suggested_subcategory, tx.id],
            )?;
        }
        (_, None) => {
            conn.execute(
                "UPDATE transactions SET is_categorized = 0 WHERE id = ?",
                params![tx.id],
            )?;
        }
    }

    Ok(id)
}

fn load_feedback(conn: &Connection, id: i64) -> Result<Feedback> {
    conn.query_row(
        &format!("SELECT {} FROM feedback WHERE id = ?", FEEDBACK_COLUMNS),
        params![id],
        row_to_feedback,
    )
    .optional()?
    .ok_or_else(|| Error::NotFound(format!("Feedback {} not found", id)))
}

/// Mark feedback as consumed by an improvement run
pub(crate) fn mark_consumed(conn: &Connection, feedback_ids: &[i64], run_id: i64) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO improvement_consumed (feedback_id, run_id, consumed_at) VALUES (?, ?, ?)",
    )?;
    let now = Utc::now().to_rfc3339();
    for id in feedback_ids {
        stmt.execute(params![id, run_id, now])?;
    }
    Ok(())
}

/// Open an improvement run record inside the caller's transaction
pub(crate) fn insert_improvement_run(
    conn: &Connection,
    batch_id: Option<i64>,
    job_id: Option<&str>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO improvement_runs (batch_id, job_id, started_at) VALUES (?, ?, ?)",
        params![batch_id, job_id, Utc::now().to_rfc3339()],
    )?;
    Ok(conn.last_insert_rowid())
}

impl Database {
    /// Record feedback for a transaction
    pub fn create_feedback(&self, feedback: &NewFeedback) -> Result<Feedback> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let id = insert_feedback(&tx, feedback)?;
        let created = load_feedback(&tx, id)?;
        tx.commit()?;
        Ok(created)
    }

    /// Record several feedback items; all of them are stored or none are
    pub fn create_feedback_bulk(&self, items: &[NewFeedback]) -> Result<Vec<Feedback>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut created = Vec::with_capacity(items.len());
        for item in items {
            let id = insert_feedback(&tx, item)?;
            created.push(load_feedback(&tx, id)?);
        }
        tx.commit()?;
        Ok(created)
    }

    /// Get a feedback record by id
    pub fn get_feedback(&self, id: i64) -> Result<Feedback> {
        let conn = self.conn()?;
        load_feedback(&conn, id)
    }

    /// Feedback for one transaction, oldest first
    pub fn list_feedback_for_transaction(&self, transaction_id: i64) -> Result<Vec<Feedback>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM feedback WHERE transaction_id = ? ORDER BY id ASC",
            FEEDBACK_COLUMNS
        ))?;
        let feedback = stmt
            .query_map(params![transaction_id], row_to_feedback)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(feedback)
    }

    /// Feedback not yet consumed by any improvement run, oldest first
    pub fn list_unconsumed_feedback(&self, batch_id: Option<i64>) -> Result<Vec<Feedback>> {
        let conn = self.conn()?;
        let mut sql = format!(
            "SELECT {} FROM feedback f WHERE NOT EXISTS \
             (SELECT 1 FROM improvement_consumed c WHERE c.feedback_id = f.id)",
            FEEDBACK_COLUMNS
        );
        if batch_id.is_some() {
            sql.push_str(" AND batch_id = ?");
        }
        sql.push_str(" ORDER BY id ASC");

        let mut stmt = conn.prepare(&sql)?;
        let rows = match batch_id {
            Some(id) => stmt.query_map(params![id], row_to_feedback)?,
            None => stmt.query_map([], row_to_feedback)?,
        };
        let feedback = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(feedback)
    }

    /// Feedback counts by type
    pub fn get_feedback_stats(&self) -> Result<FeedbackStats> {
        let conn = self.conn()?;
        let mut stats = FeedbackStats::default();

        let mut stmt =
            conn.prepare("SELECT feedback_type, COUNT(*) FROM feedback GROUP BY feedback_type")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (kind, count) = row?;
            match kind.parse::<FeedbackType>() {
                Ok(FeedbackType::Correct) => stats.correct = count,
                Ok(FeedbackType::Incorrect) => stats.incorrect = count,
                Ok(FeedbackType::SuggestAlternative) => stats.suggest_alternative = count,
                Err(_) => {}
            }
            stats.total += count;
        }

        stats.pending = conn.query_row(
            "SELECT COUNT(*) FROM feedback f WHERE NOT EXISTS \
             (SELECT 1 FROM improvement_consumed c WHERE c.feedback_id = f.id)",
            [],
            |row| row.get(0),
        )?;

        Ok(stats)
    }

    /// Open an improvement run record
    pub fn start_improvement_run(&self, batch_id: Option<i64>, job_id: Option<&str>) -> Result<i64> {
        let conn = self.conn()?;
        insert_improvement_run(&conn, batch_id, job_id)
    }

    /// List improvement runs, newest first
    pub fn list_improvement_runs(&self, limit: i64) -> Result<Vec<ImprovementRunRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, batch_id, job_id, started_at, completed_at, rules_created, rules_updated,
                   ml_model_improvements, transactions_reprocessed, improvement_score,
                   processing_time_ms
            FROM improvement_runs
            ORDER BY id DESC
            LIMIT ?
            "#,
        )?;
        let runs = stmt
            .query_map(params![limit], |row| {
                let started_at: String = row.get(3)?;
                let completed_at: Option<String> = row.get(4)?;
                Ok(ImprovementRunRecord {
                    id: row.get(0)?,
                    batch_id: row.get(1)?,
                    job_id: row.get(2)?,
                    started_at: parse_datetime(&started_at),
                    completed_at: completed_at.map(|s| parse_datetime(&s)),
                    rules_created: row.get(5)?,
                    rules_updated: row.get(6)?,
                    ml_model_improvements: row.get(7)?,
                    transactions_reprocessed: row.get(8)?,
                    improvement_score: row.get(9)?,
                    processing_time_ms: row.get(10)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    /// Store final counters for an improvement run
    pub fn finish_improvement_run(&self, run: &ImprovementRunRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            UPDATE improvement_runs SET
                completed_at = ?, rules_created = ?, rules_updated = ?,
                ml_model_improvements = ?, transactions_reprocessed = ?,
                improvement_score = ?, processing_time_ms = ?
            WHERE id = ?
            "#,
            params![
                Utc::now().to_rfc3339(),
                run.rules_created,
                run.rules_updated,
                run.ml_model_improvements,
                run.transactions_reprocessed,
                run.improvement_score,
                run.processing_time_ms,
                run.id,
            ],
        )?;
        Ok(())
    }
}
