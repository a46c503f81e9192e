//! Categorization rule handlers
//!
//! Rules are versioned: every update appends a revision, and deletion only
//! deactivates.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;

use crate::{get_caller, AppError, AppState};
use sift_core::models::{MatchField, NewRule, PatternType, Rule, RuleCreator, RuleRevision, RuleUpdate};

#[derive(Debug, Deserialize)]
pub struct RulesQuery {
    #[serde(default)]
    pub active_only: bool,
}

/// Request body for creating a rule
#[derive(Debug, Deserialize)]
pub struct CreateRuleRequest {
    pub pattern: String,
    #[serde(default = "default_pattern_type")]
    pub pattern_type: PatternType,
    #[serde(default = "default_match_field")]
    pub match_field: MatchField,
    pub category: String,
    pub subcategory: Option<String>,
    #[serde(default = "default_weight")]
    pub confidence_weight: f64,
}

fn default_pattern_type() -> PatternType {
    PatternType::Contains
}

fn default_match_field() -> MatchField {
    MatchField::Any
}

fn default_weight() -> f64 {
    0.8
}

/// Request body for updating a rule
#[derive(Debug, Deserialize)]
pub struct UpdateRuleRequest {
    pub category: Option<String>,
    /// Send `null` to clear
    #[serde(default, deserialize_with = "double_option")]
    pub subcategory: Option<Option<String>>,
    pub confidence_weight: Option<f64>,
    pub active: Option<bool>,
    pub reason: Option<String>,
}

/// Distinguish an absent field from an explicit `null`
fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// GET /api/rules - List rules
pub async fn list_rules(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RulesQuery>,
) -> Result<Json<Vec<Rule>>, AppError> {
    Ok(Json(state.db.list_rules(params.active_only)?))
}

/// POST /api/rules - Create a manual rule
pub async fn create_rule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateRuleRequest>,
) -> Result<Json<Rule>, AppError> {
    let caller = get_caller(&headers);

    let rule = state.db.create_rule(&NewRule {
        pattern: body.pattern.trim().to_string(),
        pattern_type: body.pattern_type,
        match_field: body.match_field,
        category: body.category.trim().to_string(),
        subcategory: body.subcategory.filter(|s| !s.trim().is_empty()),
        confidence_weight: body.confidence_weight,
        created_by: RuleCreator::Manual,
    })?;

    state.db.log_audit(
        &caller,
        "create_rule",
        Some("rule"),
        Some(rule.id),
        Some(&format!("pattern={}, category={}", rule.pattern, rule.category)),
    )?;

    Ok(Json(rule))
}

/// GET /api/rules/:id - Get a rule
pub async fn get_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Rule>, AppError> {
    let rule = state
        .db
        .get_rule(id)?
        .ok_or_else(|| AppError::not_found(&format!("Rule {} not found", id)))?;
    Ok(Json(rule))
}

/// PATCH /api/rules/:id - Versioned update
pub async fn update_rule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<UpdateRuleRequest>,
) -> Result<Json<Rule>, AppError> {
    let caller = get_caller(&headers);

    let update = RuleUpdate {
        category: body.category,
        subcategory: body.subcategory,
        confidence_weight: body.confidence_weight,
        active: body.active,
        reason: body
            .reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| format!("Updated by {}", caller)),
        ..Default::default()
    };
    let rule = state.db.update_rule(id, &update)?;

    state.db.log_audit(
        &caller,
        "update_rule",
        Some("rule"),
        Some(id),
        Some(&format!("version={}", rule.version)),
    )?;

    Ok(Json(rule))
}

/// DELETE /api/rules/:id - Deactivate a rule
pub async fn deactivate_rule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Rule>, AppError> {
    let caller = get_caller(&headers);
    let rule = state
        .db
        .deactivate_rule(id, &format!("Deactivated by {}", caller))?;

    state.db.log_audit(
        &caller,
        "deactivate_rule",
        Some("rule"),
        Some(id),
        Some(&format!("version={}", rule.version)),
    )?;

    Ok(Json(rule))
}

/// GET /api/rules/:id/history - Every revision of a rule
pub async fn rule_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<RuleRevision>>, AppError> {
    if state.db.get_rule(id)?.is_none() {
        return Err(AppError::not_found(&format!("Rule {} not found", id)));
    }
    Ok(Json(state.db.list_rule_revisions(id)?))
}
