//! Import pipeline
//!
//! Runs an uploaded file through
//! `initialization -> validation -> scanning -> parsing -> database -> categorization`
//! and reports each stage through a [`JobReporter`]. Nothing is written to the
//! database before the `database` stage, which commits the batch and all of its
//! rows in one transaction. A failure or cancellation after that point leaves
//! the batch intact.

use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, warn};

use crate::categorize::{CategorizationEngine, RuleMatcher};
use crate::config::PipelineConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::jobs::{JobOutcome, JobReporter};
use crate::models::ImportStage;
use crate::parse::{parse_rows, ParseOptions};
use crate::scan::scan_content;
use crate::validate::validate_file;

/// A file submitted for import
#[derive(Debug, Clone)]
pub struct ImportUpload {
    pub filename: String,
    pub content: Vec<u8>,
}

impl ImportUpload {
    pub fn new(filename: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content,
        }
    }
}

/// Map `done` of `total` onto a stage's progress band
fn band_progress(stage: ImportStage, done: usize, total: usize) -> u8 {
    let (start, end) = stage.progress_band();
    if total == 0 {
        return end;
    }
    let span = (end - start) as usize;
    start + ((done.min(total) * span) / total) as u8
}

fn enter(reporter: &JobReporter, stage: ImportStage, message: impl Into<String>) {
    reporter.stage(stage.as_str(), stage.progress_band().0, message);
}

fn rate(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[derive(Clone)]
pub struct ImportPipeline {
    db: Database,
    engine: CategorizationEngine,
    config: PipelineConfig,
}

impl ImportPipeline {
    pub fn new(db: Database, engine: CategorizationEngine, config: PipelineConfig) -> Self {
        Self { db, engine, config }
    }

    /// Run every stage for one upload
    ///
    /// Returns the completion summary; the batch id is the outcome's `result_ref`.
    pub async fn run(&self, reporter: &JobReporter, upload: ImportUpload) -> Result<JobOutcome> {
        let job_id = reporter.job_id();

        enter(
            reporter,
            ImportStage::Initialization,
            format!("Starting import of {}", upload.filename),
        );
        reporter.details(json!({
            "initialization": {
                "filename": upload.filename,
                "size_bytes": upload.content.len(),
            }
        }));
        reporter.check_cancelled()?;

        // Validation
        enter(reporter, ImportStage::Validation, "Validating file structure");
        let file = match validate_file(&upload.content, self.config.max_upload_bytes) {
            Ok(file) => file,
            Err(e) => {
                if let Error::Validation { problems, .. } = &e {
                    reporter.details(json!({
                        "validation": { "valid": false, "problems": problems }
                    }));
                    reporter.previews(problems, &[] as &[String]);
                }
                return Err(e);
            }
        };
        reporter.details(json!({
            "validation": {
                "valid": true,
                "headers": file.headers,
                "row_count": file.row_count,
                "size_bytes": file.size_bytes,
            }
        }));
        reporter.check_cancelled()?;

        // Scanning
        enter(reporter, ImportStage::Scanning, "Scanning content for threats");
        let report = scan_content(file.content.as_bytes(), self.config.max_line_length);
        reporter.details(json!({
            "scanning": {
                "threat_level": report.threat_level,
                "total_findings": report.total_findings,
                "findings": report.findings,
                "content_hash": report.content_hash,
            }
        }));
        if report.total_findings > 0 {
            warn!(
                job_id = %job_id,
                threat_level = %report.threat_level,
                findings = report.total_findings,
                "Content scan found issues"
            );
        }
        report.ensure_safe()?;
        reporter.check_cancelled()?;

        // Parsing
        enter(
            reporter,
            ImportStage::Parsing,
            format!("Parsing {} rows", file.row_count),
        );
        let options = ParseOptions {
            large_amount_threshold: Decimal::from(self.config.large_amount_threshold),
            ..Default::default()
        };
        let parsed = parse_rows(&file, &options, |done, total| {
            reporter.check_cancelled()?;
            reporter.progress(
                band_progress(ImportStage::Parsing, done, total),
                format!("Parsed {} of {} rows", done, total),
            );
            Ok(())
        })?;

        reporter.details(json!({
            "parsing": {
                "total_rows": parsed.total_rows,
                "successful_parsing": parsed.successful(),
                "failed_parsing": parsed.failed(),
                "success_rate": parsed.success_rate(),
                "warning_count": parsed.warnings.len(),
            }
        }));
        reporter.previews(&parsed.errors, &parsed.warnings);

        if parsed.successful() == 0 {
            return Err(Error::InvalidData(format!(
                "No rows could be parsed ({} failed)",
                parsed.failed()
            )));
        }
        reporter.check_cancelled()?;

        // Database
        enter(
            reporter,
            ImportStage::Database,
            format!("Saving {} transactions", parsed.successful()),
        );
        let committed = reporter
            .commit(|| {
                self.db.create_batch_with_transactions(
                    &upload.filename,
                    Some(job_id.as_str()),
                    &parsed.transactions,
                )
            })
            .await;
        let (batch, ids) = match committed {
            Ok(ok) => ok,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                reporter.details(json!({
                    "database": { "processed_count": 0, "database_errors": parsed.successful() }
                }));
                return Err(Error::Persistence(format!("Failed to save batch: {}", e)));
            }
        };
        info!(
            job_id = %job_id,
            batch_id = batch.batch_id,
            transactions = ids.len(),
            total = %batch.total_amount,
            "Batch committed"
        );
        reporter.details(json!({
            "database": {
                "batch_id": batch.batch_id,
                "processed_count": ids.len(),
                "database_errors": 0,
            }
        }));

        // Categorization
        enter(
            reporter,
            ImportStage::Categorization,
            format!("Categorizing {} transactions", ids.len()),
        );
        let matcher = RuleMatcher::load(&self.db)?;
        let mut categorized = 0usize;
        let mut failed = 0usize;
        let mut anomalies = 0usize;
        let mut scorer_errors = 0usize;

        for (i, id) in ids.iter().enumerate() {
            reporter.check_cancelled()?;

            let Some(tx) = self.db.get_transaction(*id)? else {
                continue;
            };
            let result = self.engine.suggest(&matcher, &tx, true, true).await;
            anomalies += result.anomalies;
            if result.scorer_error.is_some() {
                scorer_errors += 1;
            }
            let decision = self.engine.decide(&result, &tx.category);

            match reporter
                .commit(|| self.engine.apply(&self.db, &tx, &decision))
                .await
            {
                Ok(true) if decision.is_categorized => categorized += 1,
                Ok(_) => {}
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    failed += 1;
                    warn!(job_id = %job_id, transaction_id = tx.id, error = %e, "Categorization failed");
                }
            }

            reporter.progress(
                band_progress(ImportStage::Categorization, i + 1, ids.len()),
                format!("Categorized {} of {} transactions", i + 1, ids.len()),
            );
        }

        reporter.details(json!({
            "categorization": {
                "rules_loaded": matcher.len(),
                "categorized_count": categorized,
                "uncategorized_count": ids.len() - categorized - failed,
                "failed_count": failed,
                "categorization_rate": rate(categorized, ids.len()),
                "scorer_anomalies": anomalies,
                "scorer_errors": scorer_errors,
            }
        }));

        let overall = rate(categorized, parsed.total_rows);
        let message = format!(
            "Imported {} of {} rows, {} categorized",
            ids.len(),
            parsed.total_rows,
            categorized
        );
        info!(job_id = %job_id, batch_id = batch.batch_id, %message, "Import finished");

        Ok(JobOutcome {
            message,
            result_ref: Some(batch.batch_id.to_string()),
            details: json!({
                "summary": {
                    "batch_id": batch.batch_id,
                    "total_rows": parsed.total_rows,
                    "total_transactions": ids.len(),
                    "successfully_categorized": categorized,
                    "overall_success_rate": overall,
                }
            }),
            artifact: None,
        })
    }
}
