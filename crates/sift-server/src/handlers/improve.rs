//! Auto-improvement handlers

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use tracing::info;

use super::jobs::JobHandle;
use crate::{get_caller, AppError, AppState, MAX_PAGE_LIMIT};
use sift_core::db::ImprovementRunRecord;
use sift_core::models::JobKind;
use sift_core::{AutoImprover, ImprovementRequest, OperationClass};

/// Request body for an improvement run; omitted fields use config defaults
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AutoImproveRequest {
    pub batch_id: Option<i64>,
    pub min_confidence_threshold: Option<f64>,
    pub max_transactions: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    #[serde(default = "default_runs_limit")]
    pub limit: i64,
}

fn default_runs_limit() -> i64 {
    20
}

/// POST /api/auto-improve - Start an auto-improvement job
pub async fn start_auto_improve(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<AutoImproveRequest>>,
) -> Result<Json<JobHandle>, AppError> {
    let caller = get_caller(&headers);
    let body = body.map(|Json(b)| b).unwrap_or_default();

    let mut request = ImprovementRequest::from_config(&state.config.improvement, body.batch_id);
    if let Some(min) = body.min_confidence_threshold {
        request.min_confidence_threshold = min;
    }
    if let Some(max) = body.max_transactions {
        request.max_transactions = max;
    }
    request.validate()?;

    state.limiter.check(OperationClass::AutoImprovement, &caller)?;

    let improver = AutoImprover::new(
        state.db.clone(),
        state.engine.clone(),
        state.config.improvement.clone(),
    );
    let details = serde_json::to_string(&request)?;
    let job = state
        .jobs
        .spawn(JobKind::AutoImprovement, &caller, move |reporter| async move {
            improver.run_job(&reporter, request).await
        });

    info!(job_id = %job.job_id, "Auto-improvement job started");
    state.db.log_audit(
        &caller,
        "auto_improve",
        Some("job"),
        None,
        Some(&format!("job_id={}, request={}", job.job_id, details)),
    )?;

    Ok(Json(job.into()))
}

/// GET /api/auto-improve/runs - Recorded improvement runs
pub async fn list_improvement_runs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RunsQuery>,
) -> Result<Json<Vec<ImprovementRunRecord>>, AppError> {
    let limit = params.limit.clamp(1, MAX_PAGE_LIMIT);
    Ok(Json(state.db.list_improvement_runs(limit)?))
}
