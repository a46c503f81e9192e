//! Job polling and cancellation handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{get_caller, AppError, AppState, MAX_PAGE_LIMIT};
use sift_core::models::{Job, JobKind, JobStatus};

/// Returned by every endpoint that starts a job
#[derive(Debug, Serialize)]
pub struct JobHandle {
    pub job_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
}

impl From<Job> for JobHandle {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.job_id,
            kind: job.kind,
            status: job.status,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    #[serde(default = "default_jobs_limit")]
    pub limit: i64,
}

fn default_jobs_limit() -> i64 {
    50
}

/// GET /api/jobs - Recent jobs, newest first
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<JobsQuery>,
) -> Result<Json<Vec<Job>>, AppError> {
    let limit = params.limit.clamp(1, MAX_PAGE_LIMIT);
    Ok(Json(state.jobs.list(limit)?))
}

/// GET /api/jobs/:id - Job status with stage details
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, AppError> {
    Ok(Json(state.jobs.get_status(&id)?))
}

/// DELETE /api/jobs/:id - Cancel a pending or processing job
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Job>, AppError> {
    let caller = get_caller(&headers);
    let job = state.jobs.cancel(&id).await?;

    state.db.log_audit(
        &caller,
        "cancel_job",
        Some(job.kind.as_str()),
        None,
        Some(&format!("job_id={}", id)),
    )?;

    Ok(Json(job))
}
