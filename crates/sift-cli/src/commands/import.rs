//! Import and export command implementations

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sift_core::{
    export::{ExportFilters, ExportOptions},
    models::{Job, JobKind, JobStatus},
    CategorizationEngine, Database, ExportFormat, ExportRequest, Exporter, ImportPipeline,
    ImportUpload, SiftConfig,
};

use super::run_job;

pub async fn cmd_import(db: &Database, config: &SiftConfig, file: &Path) -> Result<()> {
    let content =
        fs::read(file).with_context(|| format!("Failed to open file: {}", file.display()))?;
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload.csv")
        .to_string();

    println!("📥 Importing {}...", file.display());

    let engine = CategorizationEngine::from_config(config)?;
    let pipeline = ImportPipeline::new(db.clone(), engine, config.pipeline.clone());
    let upload = ImportUpload::new(filename, content);

    let (job, _) = run_job(db, config, JobKind::Import, move |reporter| async move {
        pipeline.run(&reporter, upload).await
    })
    .await?;

    print_import_report(&job);

    if job.status != JobStatus::Completed {
        anyhow::bail!("Import {}: {}", job.status.as_str(), job.message);
    }
    Ok(())
}

fn print_import_report(job: &Job) {
    let details = &job.details;

    if let Some(scan) = details.get("scanning") {
        let findings = scan["total_findings"].as_u64().unwrap_or(0);
        if findings > 0 {
            println!(
                "   🛡️  Scanner: {} finding(s), threat level {}",
                findings, scan["threat_level"]
            );
        }
    }

    if let Some(parsing) = details.get("parsing") {
        println!(
            "   Parsed: {} of {} rows",
            parsing["successful_parsing"], parsing["total_rows"]
        );
        let failed = parsing["failed_parsing"].as_u64().unwrap_or(0);
        if failed > 0 {
            println!("   Skipped (invalid rows): {}", failed);
        }
    }

    for error in &job.errors {
        match error.get("row_number") {
            Some(row) => println!(
                "   ⚠️  Row {}: {}",
                row,
                error["message"].as_str().unwrap_or_default()
            ),
            None => println!("   ⚠️  {}", error.as_str().unwrap_or_default()),
        }
    }

    if job.status != JobStatus::Completed {
        println!("❌ Import failed: {}", job.message);
        return;
    }

    if let Some(summary) = details.get("summary") {
        println!("✅ Import complete!");
        println!("   Batch: {}", summary["batch_id"]);
        println!("   Transactions: {}", summary["total_transactions"]);
        println!(
            "   Categorized: {}",
            summary["successfully_categorized"]
        );
    }
    if let Some(cat) = details.get("categorization") {
        let uncategorized = cat["uncategorized_count"].as_u64().unwrap_or(0);
        if uncategorized > 0 {
            println!("   Waiting for a category: {}", uncategorized);
        }
    }
}

fn parse_date(value: Option<&str>, flag: &str) -> Result<Option<NaiveDate>> {
    value
        .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .transpose()
        .with_context(|| format!("Invalid --{} date format (use YYYY-MM-DD)", flag))
}

/// Export selection as given on the command line
pub struct ExportArgs {
    pub output: Option<PathBuf>,
    pub format: String,
    pub batch: Option<i64>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub category: Option<String>,
    pub columns: Option<String>,
}

impl ExportArgs {
    fn request(&self) -> Result<ExportRequest> {
        let format: ExportFormat = self
            .format
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;
        let columns = self
            .columns
            .as_deref()
            .map(|c| {
                c.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(ExportRequest {
            format,
            filters: ExportFilters {
                batch_id: self.batch,
                from: parse_date(self.from.as_deref(), "from")?,
                to: parse_date(self.to.as_deref(), "to")?,
                category: self.category.clone(),
                ..Default::default()
            },
            columns,
            options: ExportOptions {
                include_header: true,
                filename: self
                    .output
                    .as_ref()
                    .and_then(|p| p.file_stem())
                    .and_then(|s| s.to_str())
                    .map(String::from),
            },
        })
    }
}

pub async fn cmd_export(db: &Database, config: &SiftConfig, args: ExportArgs) -> Result<PathBuf> {
    let request = args.request()?;
    request.validate()?;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(request.filename()));

    println!("📤 Exporting transactions to {}...", output.display());

    let exporter = Exporter::new(db.clone());
    let (job, artifact) = run_job(db, config, JobKind::Export, move |reporter| async move {
        exporter.run(&reporter, &request).await
    })
    .await?;

    let data = match artifact {
        Some(data) => data,
        None => anyhow::bail!("Export {}: {}", job.status.as_str(), job.message),
    };
    fs::write(&output, &data)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("✅ {}", job.message);
    println!("   Wrote {} bytes", data.len());

    Ok(output)
}
