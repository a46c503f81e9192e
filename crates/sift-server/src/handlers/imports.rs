//! File import handlers
//!
//! Both upload forms hand the file to the import pipeline as a background job
//! and return immediately with the job handle.

use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    http::HeaderMap,
    Json,
};
use base64::Engine;
use serde::Deserialize;
use tracing::info;

use super::jobs::JobHandle;
use crate::{get_caller, AppError, AppState};
use sift_core::models::JobKind;
use sift_core::{ImportPipeline, ImportUpload};

/// Request body for base64 JSON imports
#[derive(Debug, Deserialize)]
pub struct ImportJsonRequest {
    pub filename: String,
    /// File contents, standard base64
    pub csv_data: String,
}

/// POST /api/import - Import a transaction file
///
/// Expects a multipart form with a `file` field.
pub async fn import_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<JobHandle>, AppError> {
    let max = state.config.pipeline.max_upload_bytes;
    let mut upload: Option<ImportUpload> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(&format!("Failed to read form field: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or("upload.csv").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|_| AppError::bad_request("Failed to read file data"))?;

        if bytes.len() > max {
            return Err(AppError::bad_request(&format!(
                "File too large. Maximum size is {} bytes",
                max
            )));
        }
        upload = Some(ImportUpload::new(filename, bytes.to_vec()));
    }

    let upload = upload.ok_or_else(|| AppError::bad_request("Missing file field"))?;
    start_import(&state, &headers, upload)
}

/// POST /api/import/json - Import a base64-encoded file
pub async fn import_json(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ImportJsonRequest>,
) -> Result<Json<JobHandle>, AppError> {
    let content = base64::engine::general_purpose::STANDARD
        .decode(body.csv_data.trim())
        .map_err(|e| AppError::bad_request(&format!("csv_data is not valid base64: {}", e)))?;

    if content.len() > state.config.pipeline.max_upload_bytes {
        return Err(AppError::bad_request(&format!(
            "File too large. Maximum size is {} bytes",
            state.config.pipeline.max_upload_bytes
        )));
    }

    start_import(&state, &headers, ImportUpload::new(body.filename, content))
}

/// Spawn the import job and record it
fn start_import(
    state: &AppState,
    headers: &HeaderMap,
    upload: ImportUpload,
) -> Result<Json<JobHandle>, AppError> {
    let caller = get_caller(headers);
    let filename = upload.filename.clone();
    let size = upload.content.len();

    let pipeline = ImportPipeline::new(
        state.db.clone(),
        state.engine.clone(),
        state.config.pipeline.clone(),
    );
    let job = state
        .jobs
        .spawn(JobKind::Import, &caller, move |reporter| async move {
            pipeline.run(&reporter, upload).await
        });

    info!(job_id = %job.job_id, %filename, size, "Import job started");
    state.db.log_audit(
        &caller,
        "import",
        Some("job"),
        None,
        Some(&format!("job_id={}, filename={}, bytes={}", job.job_id, filename, size)),
    )?;

    Ok(Json(job.into()))
}
