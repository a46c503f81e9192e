//! Transaction handlers: listing, manual categorization and suggestions

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{get_caller, AppError, AppState, MAX_PAGE_LIMIT};
use sift_core::models::{CategorySuggestion, Transaction, TransactionFilter};
use sift_core::RuleMatcher;

/// GET /api/transactions - List transactions matching filters
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Query(mut filter): Query<TransactionFilter>,
) -> Result<Json<Vec<Transaction>>, AppError> {
    filter.limit = Some(filter.limit.unwrap_or(100).clamp(1, MAX_PAGE_LIMIT));
    filter.offset = filter.offset.map(|o| o.max(0));
    Ok(Json(state.db.list_transactions(&filter)?))
}

/// GET /api/transactions/:id - Get a single transaction
pub async fn get_transaction(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Transaction>, AppError> {
    Ok(Json(state.db.require_transaction(id)?))
}

/// Request body for manual categorization
#[derive(Debug, Deserialize)]
pub struct SetCategoryRequest {
    pub category: String,
    pub subcategory: Option<String>,
}

/// PUT /api/transactions/:id/category - Apply a category manually
pub async fn set_category(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<SetCategoryRequest>,
) -> Result<Json<Transaction>, AppError> {
    let caller = get_caller(&headers);
    let category = body.category.trim();
    if category.is_empty() {
        return Err(AppError::bad_request("category must not be empty"));
    }
    let subcategory = body
        .subcategory
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    if !state
        .db
        .apply_categorization(id, category, subcategory, 1.0, true)?
    {
        return Err(AppError::not_found(&format!("Transaction {} not found", id)));
    }

    state.db.log_audit(
        &caller,
        "set_category",
        Some("transaction"),
        Some(id),
        Some(&format!("category={}", category)),
    )?;

    Ok(Json(state.db.require_transaction(id)?))
}

/// Query parameters for suggestions
#[derive(Debug, Deserialize)]
pub struct SuggestionsQuery {
    #[serde(default = "default_true")]
    pub include_ml: bool,
    #[serde(default = "default_true")]
    pub include_rules: bool,
}

fn default_true() -> bool {
    true
}

/// Ranked category suggestions for one transaction
#[derive(Debug, Serialize)]
pub struct SuggestionsResponse {
    pub transaction_id: i64,
    pub suggestions: Vec<CategorySuggestion>,
    pub rule_matches: Vec<CategorySuggestion>,
    pub ml_predictions: Vec<CategorySuggestion>,
    pub current_category: String,
    pub confidence_threshold: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scorer_error: Option<String>,
}

/// GET /api/transactions/:id/suggestions - Category suggestions without applying them
pub async fn get_suggestions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(params): Query<SuggestionsQuery>,
) -> Result<Json<SuggestionsResponse>, AppError> {
    let tx = state.db.require_transaction(id)?;
    let matcher = RuleMatcher::load(&state.db)?;

    let result = state
        .engine
        .suggest(&matcher, &tx, params.include_rules, params.include_ml)
        .await;

    Ok(Json(SuggestionsResponse {
        transaction_id: tx.id,
        suggestions: result.suggestions,
        rule_matches: result.rule_matches,
        ml_predictions: result.ml_predictions,
        current_category: tx.category,
        confidence_threshold: state.engine.threshold(),
        scorer_error: result.scorer_error,
    }))
}
