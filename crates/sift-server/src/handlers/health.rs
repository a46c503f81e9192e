//! Liveness and scorer health

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;
use sift_core::ModelScorer;

#[derive(Debug, Serialize)]
pub struct ScorerHealth {
    pub name: String,
    pub healthy: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: bool,
    /// Absent when categorization is rules-only
    pub scorer: Option<ScorerHealth>,
}

/// GET /api/health - Liveness plus scorer health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let database = state.db.conn().is_ok();
    let scorer = match state.engine.scorer() {
        Some(s) => Some(ScorerHealth {
            name: s.name().to_string(),
            healthy: s.health_check().await,
        }),
        None => None,
    };

    Json(HealthResponse {
        status: if database { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        database,
        scorer,
    })
}
