//! Export job handlers

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, Response, StatusCode},
    Json,
};
use tracing::info;

use super::jobs::JobHandle;
use crate::{get_caller, AppError, AppState};
use sift_core::models::{Job, JobKind};
use sift_core::{ExportRequest, Exporter, OperationClass};

/// POST /api/export - Start an export job
pub async fn start_export(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ExportRequest>,
) -> Result<Json<JobHandle>, AppError> {
    let caller = get_caller(&headers);

    // Bad requests are rejected before they cost quota
    request.validate()?;
    state.limiter.check(OperationClass::Export, &caller)?;

    let exporter = Exporter::new(state.db.clone());
    let format = request.format;
    let job = state
        .jobs
        .spawn(JobKind::Export, &caller, move |reporter| async move {
            exporter.run(&reporter, &request).await
        });

    info!(job_id = %job.job_id, format = format.as_str(), "Export job started");
    state.db.log_audit(
        &caller,
        "export",
        Some("job"),
        None,
        Some(&format!("job_id={}, format={}", job.job_id, format.as_str())),
    )?;

    Ok(Json(job.into()))
}

/// GET /api/export/:id/download - Download a finished export
pub async fn download_export(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response<Body>, AppError> {
    let job = state.jobs.get_status(&id)?;
    if job.kind != JobKind::Export {
        return Err(AppError::not_found(&format!("Export {} not found", id)));
    }

    let artifact = state.jobs.artifact(&id)?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, artifact.content_type.as_str())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", artifact.filename),
        )
        .body(Body::from(artifact.data))
        .map_err(|e| AppError::internal(&e.to_string()))
}

/// DELETE /api/export/:id - Cancel an export job
pub async fn cancel_export(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Job>, AppError> {
    let caller = get_caller(&headers);
    let job = state.jobs.get_status(&id)?;
    if job.kind != JobKind::Export {
        return Err(AppError::not_found(&format!("Export {} not found", id)));
    }

    let job = state.jobs.cancel(&id).await?;
    state.db.log_audit(
        &caller,
        "cancel_job",
        Some("export"),
        None,
        Some(&format!("job_id={}", id)),
    )?;

    Ok(Json(job))
}
