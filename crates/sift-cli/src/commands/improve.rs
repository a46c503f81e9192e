//! Auto-improvement command implementation

use anyhow::Result;
use sift_core::models::{JobKind, JobStatus};
use sift_core::{AutoImprover, CategorizationEngine, Database, ImprovementRequest, SiftConfig};

use super::run_job;

pub async fn cmd_improve(
    db: &Database,
    config: &SiftConfig,
    batch_id: Option<i64>,
    min_confidence: Option<f64>,
    max_transactions: Option<i64>,
) -> Result<()> {
    let mut request = ImprovementRequest::from_config(&config.improvement, batch_id);
    if let Some(v) = min_confidence {
        request.min_confidence_threshold = v;
    }
    if let Some(v) = max_transactions {
        request.max_transactions = v;
    }
    request.validate()?;

    println!("🧠 Learning from feedback...");

    let engine = CategorizationEngine::from_config(config)?;
    let improver = AutoImprover::new(db.clone(), engine, config.improvement.clone());
    let (job, _) = run_job(db, config, JobKind::AutoImprovement, move |reporter| async move {
        improver.run_job(&reporter, request).await
    })
    .await?;

    if job.status != JobStatus::Completed {
        anyhow::bail!("Improvement {}: {}", job.status.as_str(), job.message);
    }

    let summary = &job.details["improvement"];
    println!("✅ Improvement run {} complete", summary["run_id"]);
    println!("   Rules created: {}", summary["rules_created"]);
    println!("   Rules updated: {}", summary["rules_updated"]);
    println!(
        "   Transactions reprocessed: {}",
        summary["transactions_reprocessed"]
    );
    println!("   Feedback consumed: {}", summary["feedback_consumed"]);
    let deferred = summary["feedback_deferred"].as_u64().unwrap_or(0);
    if deferred > 0 {
        println!("   Feedback deferred (not enough agreement): {}", deferred);
    }

    Ok(())
}
