//! Sift Web Server
//!
//! Axum-based REST API for the Sift import and categorization pipeline.
//!
//! - Multipart and base64 JSON uploads that run as background import jobs
//! - Job polling, cancellation and export artifact download
//! - Per-caller rate limiting on job creation and feedback
//! - Audit logging for every mutating call
//! - Sanitized error responses

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use sift_core::{
    CategorizationEngine, Database, Error as CoreError, JobManager, RateLimitInfo, RateLimiter,
    SiftConfig,
};

mod handlers;
mod scheduler;

pub use scheduler::start_artifact_pruner;

/// Maximum pagination limit
pub const MAX_PAGE_LIMIT: i64 = 1000;

/// Header naming the caller for rate limiting and audit
const CALLER_HEADER: &str = "x-sift-caller";

/// Caller used when no identity header is sent
const DEFAULT_CALLER: &str = "local";

/// Server configuration
#[derive(Clone, Default)]
pub struct ServerConfig {
    /// Allowed CORS origins (empty = same-origin only)
    pub allowed_origins: Vec<String>,
}

/// Shared application state
pub struct AppState {
    pub db: Database,
    pub config: SiftConfig,
    pub engine: CategorizationEngine,
    pub jobs: Arc<JobManager>,
    pub limiter: RateLimiter,
}

impl AppState {
    /// Build state with the scorer named in config
    pub fn new(db: Database, config: SiftConfig) -> sift_core::Result<Self> {
        let engine = CategorizationEngine::from_config(&config)?;
        Ok(Self::with_engine(db, config, engine))
    }

    /// Build state around an existing engine (for testing)
    pub fn with_engine(db: Database, config: SiftConfig, engine: CategorizationEngine) -> Self {
        let jobs = Arc::new(JobManager::new(
            db.clone(),
            Duration::from_secs(config.jobs.artifact_ttl_secs),
            config.pipeline.max_error_preview,
        ));
        let limiter = RateLimiter::new(config.rate_limits.clone());
        Self {
            db,
            config,
            engine,
            jobs,
            limiter,
        }
    }
}

/// Caller identity from request headers
pub fn get_caller(headers: &HeaderMap) -> String {
    headers
        .get(CALLER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_CALLER)
        .to_string()
}

/// Message-only response
#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Create the application router
pub fn create_router(state: AppState, config: ServerConfig) -> Router {
    let upload_limit = state.config.pipeline.max_upload_bytes;
    let state = Arc::new(state);

    // Base64 inflates uploads by a third, plus room for multipart framing
    let body_limit = upload_limit + upload_limit / 2 + 64 * 1024;

    let api_routes = Router::new()
        .route("/health", get(handlers::health))
        // Import
        .route("/import", post(handlers::import_file))
        .route("/import/json", post(handlers::import_json))
        // Jobs
        .route("/jobs", get(handlers::list_jobs))
        .route("/jobs/:id", get(handlers::get_job).delete(handlers::cancel_job))
        // Batches
        .route("/batches", get(handlers::list_batches))
        .route(
            "/batches/:id",
            get(handlers::get_batch).delete(handlers::delete_batch),
        )
        // Transactions
        .route("/transactions", get(handlers::list_transactions))
        .route("/transactions/:id", get(handlers::get_transaction))
        .route("/transactions/:id/category", put(handlers::set_category))
        .route(
            "/transactions/:id/suggestions",
            get(handlers::get_suggestions),
        )
        // Feedback
        .route(
            "/transactions/:id/feedback",
            get(handlers::list_transaction_feedback).post(handlers::create_feedback),
        )
        .route("/feedback/bulk", post(handlers::create_feedback_bulk))
        .route("/feedback/stats", get(handlers::feedback_stats))
        // Rules
        .route("/rules", get(handlers::list_rules).post(handlers::create_rule))
        .route(
            "/rules/:id",
            get(handlers::get_rule)
                .patch(handlers::update_rule)
                .delete(handlers::deactivate_rule),
        )
        .route("/rules/:id/history", get(handlers::rule_history))
        // Auto-improvement
        .route("/auto-improve", post(handlers::start_auto_improve))
        .route("/auto-improve/runs", get(handlers::list_improvement_runs))
        // Export
        .route("/export", post(handlers::start_export))
        .route("/export/:id", delete(handlers::cancel_export))
        .route("/export/:id/download", get(handlers::download_export))
        // Audit log
        .route("/audit", get(handlers::list_audit_log));

    // Build CORS layer
    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let cors = if config.allowed_origins.is_empty() {
        CorsLayer::new()
            .allow_methods(methods)
            .allow_headers([header::CONTENT_TYPE])
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers([header::CONTENT_TYPE])
    };

    Router::new()
        .nest("/api", api_routes)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Security headers
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
}

/// Start the server
pub async fn serve(
    db: Database,
    sift_config: SiftConfig,
    host: &str,
    port: u16,
    config: ServerConfig,
) -> anyhow::Result<()> {
    // Jobs from a previous process cannot resume
    match db.recover_stuck_jobs() {
        Ok(count) if count > 0 => {
            warn!("Recovered {} interrupted job(s) from previous server session", count);
        }
        Ok(_) => {}
        Err(e) => {
            warn!("Failed to recover interrupted jobs: {}", e);
        }
    }

    let state = AppState::new(db, sift_config)?;
    match state.engine.scorer() {
        Some(scorer) => {
            use sift_core::ModelScorer;
            if scorer.health_check().await {
                info!("Scorer ready: {}", scorer.name());
            } else {
                warn!("Scorer {} is not responding; imports will use rules only", scorer.name());
            }
        }
        None => info!("No scorer configured; categorization uses rules only"),
    }

    start_artifact_pruner(
        Arc::clone(&state.jobs),
        Duration::from_secs(state.config.jobs.artifact_ttl_secs.clamp(60, 3600)),
    );

    let app = create_router(state, config);
    let addr = format!("{}:{}", host, port);

    info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Error Handling
// ============================================================================

/// Application error type with proper HTTP status codes
pub struct AppError {
    status: StatusCode,
    message: String,
    problems: Vec<String>,
    rate_limit: Option<RateLimitInfo>,
    internal: Option<anyhow::Error>,
}

impl AppError {
    fn with_status(status: StatusCode, msg: &str) -> Self {
        Self {
            status,
            message: msg.to_string(),
            problems: Vec::new(),
            rate_limit: None,
            internal: None,
        }
    }

    pub fn bad_request(msg: &str) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, msg)
    }

    pub fn not_found(msg: &str) -> Self {
        Self::with_status(StatusCode::NOT_FOUND, msg)
    }

    pub fn conflict(msg: &str) -> Self {
        Self::with_status(StatusCode::CONFLICT, msg)
    }

    pub fn internal(msg: &str) -> Self {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the full internal error if present
        if let Some(err) = &self.internal {
            error!(error = %err, "Internal error");
        }

        if let Some(info) = self.rate_limit {
            let body = Json(serde_json::json!({
                "limit": info.limit,
                "retry_after": info.retry_after,
                "reset_time": info.reset_time,
                "message": self.message,
            }));
            return (
                self.status,
                [(header::RETRY_AFTER, info.retry_after.to_string())],
                body,
            )
                .into_response();
        }

        let body = if self.problems.is_empty() {
            serde_json::json!({ "error": self.message })
        } else {
            serde_json::json!({ "error": self.message, "problems": self.problems })
        };

        (self.status, Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let err = err.into();

        let mapped = match err.downcast_ref::<CoreError>() {
            Some(CoreError::Validation { message, problems }) => {
                let mut e = AppError::bad_request(message);
                e.problems = problems.clone();
                Some(e)
            }
            Some(e @ CoreError::InvalidData(_)) => Some(AppError::bad_request(&e.to_string())),
            Some(CoreError::NotFound(msg)) => Some(AppError::not_found(msg)),
            Some(CoreError::Conflict(msg)) => Some(AppError::conflict(msg)),
            Some(e @ CoreError::Security { .. }) => Some(AppError::with_status(
                StatusCode::UNPROCESSABLE_ENTITY,
                &e.to_string(),
            )),
            Some(CoreError::RateLimited(info)) => {
                let mut out = AppError::with_status(
                    StatusCode::TOO_MANY_REQUESTS,
                    &format!("Rate limit exceeded, retry after {}s", info.retry_after),
                );
                out.rate_limit = Some(info.clone());
                Some(out)
            }
            _ => None,
        };

        mapped.unwrap_or_else(|| Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            // Return generic message to client
            message: "An internal error occurred".to_string(),
            problems: Vec::new(),
            rate_limit: None,
            // Keep full error for logging
            internal: Some(err),
        })
    }
}
