//! Persisted job snapshots

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::{Job, JobKind, JobStatus};

const JOB_COLUMNS: &str = "id, kind, status, progress, stage, message, details, errors, warnings, \
     result_ref, caller, created_at, updated_at";

fn row_to_job(row: &Row) -> rusqlite::Result<Job> {
    let kind: String = row.get(1)?;
    let status: String = row.get(2)?;
    let progress: i64 = row.get(3)?;
    let details: String = row.get(6)?;
    let errors: String = row.get(7)?;
    let warnings: String = row.get(8)?;
    let created_at: String = row.get(11)?;
    let updated_at: String = row.get(12)?;

    Ok(Job {
        job_id: row.get(0)?,
        kind: kind.parse().unwrap_or(JobKind::Import),
        status: status.parse().unwrap_or(JobStatus::Failed),
        progress: progress.clamp(0, 100) as u8,
        stage: row.get(4)?,
        message: row.get(5)?,
        details: serde_json::from_str(&details).unwrap_or_else(|_| serde_json::json!({})),
        errors: serde_json::from_str(&errors).unwrap_or_default(),
        warnings: serde_json::from_str(&warnings).unwrap_or_default(),
        result_ref: row.get(9)?,
        caller: row.get(10)?,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

impl Database {
    /// Insert or replace a job snapshot
    pub fn save_job(&self, job: &Job) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO jobs (
                id, kind, status, progress, stage, message, details, errors, warnings,
                result_ref, caller, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                progress = excluded.progress,
                stage = excluded.stage,
                message = excluded.message,
                details = excluded.details,
                errors = excluded.errors,
                warnings = excluded.warnings,
                result_ref = excluded.result_ref,
                updated_at = excluded.updated_at
            "#,
            params![
                job.job_id,
                job.kind.as_str(),
                job.status.as_str(),
                job.progress as i64,
                job.stage,
                job.message,
                job.details.to_string(),
                serde_json::to_string(&job.errors)?,
                serde_json::to_string(&job.warnings)?,
                job.result_ref,
                job.caller,
                job.created_at.to_rfc3339(),
                job.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Get a persisted job snapshot
    pub fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let conn = self.conn()?;
        let job = conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS),
                params![job_id],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    /// List persisted jobs, newest first
    pub fn list_jobs(&self, limit: i64) -> Result<Vec<Job>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs ORDER BY created_at DESC LIMIT ?",
            JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map(params![limit], row_to_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Mark jobs left running by a previous process as failed
    ///
    /// Call once at startup, before any new job is spawned.
    pub fn recover_stuck_jobs(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count = conn.execute(
            r#"
            UPDATE jobs
            SET status = 'failed', message = 'Interrupted by server restart', updated_at = ?
            WHERE status IN ('pending', 'processing')
            "#,
            params![Utc::now().to_rfc3339()],
        )?;
        Ok(count)
    }
}
