//! Import batch handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::Serialize;

use crate::{get_caller, AppError, AppState, MessageResponse};
use sift_core::models::{ImportBatch, Transaction, TransactionFilter};

/// A batch with its transactions
#[derive(Debug, Serialize)]
pub struct BatchDetail {
    #[serde(flatten)]
    pub batch: ImportBatch,
    pub transactions: Vec<Transaction>,
}

/// GET /api/batches - List batches, newest first
pub async fn list_batches(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ImportBatch>>, AppError> {
    Ok(Json(state.db.list_batches()?))
}

/// GET /api/batches/:id - Batch plus its transactions
pub async fn get_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<BatchDetail>, AppError> {
    let batch = state
        .db
        .get_batch(id)?
        .ok_or_else(|| AppError::not_found(&format!("Batch {} not found", id)))?;

    let transactions = state.db.list_transactions(&TransactionFilter {
        batch_id: Some(id),
        ..Default::default()
    })?;

    Ok(Json(BatchDetail {
        batch,
        transactions,
    }))
}

/// DELETE /api/batches/:id - Delete a batch and its transactions
pub async fn delete_batch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, AppError> {
    let caller = get_caller(&headers);
    let removed = state.db.delete_batch(id)?;

    state.db.log_audit(
        &caller,
        "delete_batch",
        Some("batch"),
        Some(id),
        Some(&format!("transactions_removed={}", removed)),
    )?;

    Ok(Json(MessageResponse {
        message: format!("Deleted batch {} and {} transactions", id, removed),
    }))
}
