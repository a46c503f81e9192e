//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `load_config` - Load the pipeline configuration
//! - `run_job` - Run a job body to completion through a job manager
//! - `cmd_init` - Initialize the database
//! - `cmd_jobs` - List recent jobs

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sift_core::models::{Job, JobKind, JobStatus};
use sift_core::{Database, JobManager, JobOutcome, JobReporter, SiftConfig};

use super::truncate;

/// Caller recorded on jobs started from the command line
pub const CLI_CALLER: &str = "cli";

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .context("Database path must be valid UTF-8")?;
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

/// Load config from --config, SIFT_CONFIG or the default location
pub fn load_config(path: Option<&Path>) -> Result<SiftConfig> {
    SiftConfig::load(path).context("Failed to load configuration")
}

/// Run a job body through a job manager and wait for it to finish
///
/// The job is persisted like any server-side job, so `sift jobs` shows it.
/// Returns the final snapshot and, for exports, the artifact bytes.
pub async fn run_job<F, Fut>(
    db: &Database,
    config: &SiftConfig,
    kind: JobKind,
    body: F,
) -> Result<(Job, Option<Vec<u8>>)>
where
    F: FnOnce(JobReporter) -> Fut + Send + 'static,
    Fut: Future<Output = sift_core::Result<JobOutcome>> + Send + 'static,
{
    let jobs = Arc::new(JobManager::new(
        db.clone(),
        Duration::from_secs(config.jobs.artifact_ttl_secs),
        config.pipeline.max_error_preview,
    ));
    let job = jobs.spawn(kind, CLI_CALLER, body);
    tracing::debug!(job_id = %job.job_id, kind = kind.as_str(), "Waiting for job");
    let done = jobs.wait(&job.job_id).await?;

    let artifact = match (kind, done.status) {
        (JobKind::Export, JobStatus::Completed) => Some(jobs.artifact(&done.job_id)?.data),
        _ => None,
    };
    Ok((done, artifact))
}

pub fn cmd_init(db_path: &Path, no_encrypt: bool) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    let db = open_db(db_path, no_encrypt)?;
    let rules = db.list_rules(true)?;
    println!("   Active rules: {}", rules.len());

    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: ENABLED");
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Import transactions: sift import --file statement.csv");
    println!("  2. Start the API: sift serve");

    Ok(())
}

pub fn cmd_jobs(db: &Database, limit: i64) -> Result<()> {
    let jobs = db.list_jobs(limit)?;

    if jobs.is_empty() {
        println!("No jobs recorded yet.");
        return Ok(());
    }

    println!();
    println!("🧾 Recent Jobs");
    println!("   ─────────────────────────────────────────────────────────────");

    for job in jobs {
        println!(
            "   {} │ {:<16} │ {:<9} │ {:>3}% │ {}",
            job.created_at.format("%Y-%m-%d %H:%M"),
            job.kind.as_str(),
            job.status.as_str(),
            job.progress,
            truncate(&job.message, 40)
        );
    }

    Ok(())
}
