//! User feedback handlers
//!
//! Feedback is append-only. Each item also applies the user's verdict to the
//! transaction immediately; auto-improvement mines it later.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;

use crate::{get_caller, AppError, AppState};
use sift_core::models::{Feedback, FeedbackStats, FeedbackType, NewFeedback};
use sift_core::OperationClass;

/// Request body for feedback on one transaction
#[derive(Debug, Deserialize)]
pub struct CreateFeedbackRequest {
    pub feedback_type: FeedbackType,
    pub suggested_category: Option<String>,
    pub suggested_subcategory: Option<String>,
    pub comment: Option<String>,
}

/// Request body for bulk feedback
#[derive(Debug, Deserialize)]
pub struct BulkFeedbackRequest {
    pub items: Vec<NewFeedback>,
}

/// POST /api/transactions/:id/feedback - Record feedback
pub async fn create_feedback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<CreateFeedbackRequest>,
) -> Result<Json<Feedback>, AppError> {
    let caller = get_caller(&headers);
    let new = NewFeedback {
        transaction_id: id,
        feedback_type: body.feedback_type,
        suggested_category: body.suggested_category,
        suggested_subcategory: body.suggested_subcategory,
        comment: body.comment,
    };
    new.validate()?;
    state.limiter.check(OperationClass::Feedback, &caller)?;

    let feedback = state.db.create_feedback(&new)?;

    state.db.log_audit(
        &caller,
        "feedback",
        Some("transaction"),
        Some(id),
        Some(&format!(
            "feedback_id={}, type={}",
            feedback.id,
            feedback.feedback_type.as_str()
        )),
    )?;

    Ok(Json(feedback))
}

/// GET /api/transactions/:id/feedback - Feedback history for a transaction
pub async fn list_transaction_feedback(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Feedback>>, AppError> {
    state.db.require_transaction(id)?;
    Ok(Json(state.db.list_feedback_for_transaction(id)?))
}

/// POST /api/feedback/bulk - Record many feedback items atomically
pub async fn create_feedback_bulk(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<BulkFeedbackRequest>,
) -> Result<Json<Vec<Feedback>>, AppError> {
    let caller = get_caller(&headers);

    let max = state.config.jobs.max_bulk_feedback;
    if body.items.is_empty() {
        return Err(AppError::bad_request("items must not be empty"));
    }
    if body.items.len() > max {
        return Err(AppError::bad_request(&format!(
            "Too many items: {} (maximum {})",
            body.items.len(),
            max
        )));
    }
    for item in &body.items {
        item.validate()?;
    }
    state.limiter.check(OperationClass::Bulk, &caller)?;

    let created = state.db.create_feedback_bulk(&body.items)?;

    state.db.log_audit(
        &caller,
        "bulk_feedback",
        Some("feedback"),
        None,
        Some(&format!("count={}", created.len())),
    )?;

    Ok(Json(created))
}

/// GET /api/feedback/stats - Feedback counts by type
pub async fn feedback_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<FeedbackStats>, AppError> {
    Ok(Json(state.db.get_feedback_stats()?))
}
