//! Transaction export
//!
//! Exports run as jobs: rows are written one at a time (progress and
//! cancellation are checked per row) and the finished file is attached to the
//! job as a downloadable artifact.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::jobs::{ArtifactPayload, JobOutcome, JobReporter};
use crate::models::{Transaction, TransactionFilter};

/// Columns an export may select, in default order
pub const EXPORT_COLUMNS: &[&str] = &[
    "id",
    "date",
    "amount",
    "description",
    "vendor",
    "category",
    "subcategory",
    "is_income",
    "is_categorized",
    "confidence_score",
    "batch_id",
];

/// Rows written between cooperative yields
const YIELD_EVERY: usize = 256;

/// Export format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Csv => "text/csv; charset=utf-8",
            Self::Json => "application/json",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown export format: {}", s)),
        }
    }
}

/// Which transactions to export
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportFilters {
    pub batch_id: Option<i64>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub category: Option<String>,
    pub is_categorized: Option<bool>,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
}

impl From<&ExportFilters> for TransactionFilter {
    fn from(f: &ExportFilters) -> Self {
        TransactionFilter {
            batch_id: f.batch_id,
            from: f.from,
            to: f.to,
            category: f.category.clone(),
            is_categorized: f.is_categorized,
            min_amount: f.min_amount,
            max_amount: f.max_amount,
            limit: None,
            offset: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    pub include_header: bool,
    /// Download filename; generated when absent
    pub filename: Option<String>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_header: true,
            filename: None,
        }
    }
}

/// An export job request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportRequest {
    pub format: ExportFormat,
    pub filters: ExportFilters,
    /// Subset of [`EXPORT_COLUMNS`]; empty means all
    pub columns: Vec<String>,
    pub options: ExportOptions,
}

impl ExportRequest {
    /// Resolve the selected columns, rejecting unknown names and bad filters
    pub fn validate(&self) -> Result<Vec<&'static str>> {
        let mut problems = Vec::new();
        let mut columns = Vec::new();

        if self.columns.is_empty() {
            columns.extend_from_slice(EXPORT_COLUMNS);
        }
        for name in &self.columns {
            let wanted = name.trim().to_lowercase();
            match EXPORT_COLUMNS.iter().find(|c| **c == wanted) {
                Some(c) if !columns.contains(c) => columns.push(*c),
                Some(_) => {}
                None => problems.push(format!("Unknown export column: {}", name)),
            }
        }

        if let (Some(from), Some(to)) = (self.filters.from, self.filters.to) {
            if from > to {
                problems.push(format!("Date range is empty: {} is after {}", from, to));
            }
        }
        if let (Some(min), Some(max)) = (self.filters.min_amount, self.filters.max_amount) {
            if min > max {
                problems.push(format!("Amount range is empty: {} is above {}", min, max));
            }
        }

        if problems.is_empty() {
            Ok(columns)
        } else {
            Err(Error::Validation {
                message: problems.join("; "),
                problems,
            })
        }
    }

    /// Filename for the artifact, restricted to safe characters
    pub fn filename(&self) -> String {
        let extension = self.format.as_str();
        let requested: String = self
            .options
            .filename
            .as_deref()
            .unwrap_or_default()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            .collect();
        let stem = requested.trim_matches('.');

        if stem.is_empty() {
            format!(
                "transactions_{}.{}",
                Utc::now().format("%Y%m%d_%H%M%S"),
                extension
            )
        } else if stem.to_lowercase().ends_with(&format!(".{}", extension)) {
            stem.to_string()
        } else {
            format!("{}.{}", stem, extension)
        }
    }
}

fn cell(tx: &Transaction, column: &str) -> Value {
    match column {
        "id" => json!(tx.id),
        "date" => json!(tx.date.to_string()),
        "amount" => json!(tx.amount.to_string()),
        "description" => json!(tx.description),
        "vendor" => json!(tx.vendor),
        "category" => json!(tx.category),
        "subcategory" => json!(tx.subcategory),
        "is_income" => json!(tx.is_income),
        "is_categorized" => json!(tx.is_categorized),
        "confidence_score" => json!(tx.confidence_score),
        "batch_id" => json!(tx.batch_id),
        _ => Value::Null,
    }
}

fn csv_field(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub struct Exporter {
    db: Database,
}

impl Exporter {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Run an export as a job body; the file becomes the job's artifact
    pub async fn run(&self, reporter: &JobReporter, request: &ExportRequest) -> Result<JobOutcome> {
        let columns = request.validate()?;
        let filename = request.filename();

        reporter.stage("querying", 5, "Selecting transactions");
        let transactions = self
            .db
            .list_transactions(&TransactionFilter::from(&request.filters))?;
        let total = transactions.len();
        reporter.check_cancelled()?;

        reporter.stage(
            "writing",
            10,
            format!("Writing {} rows as {}", total, request.format.as_str()),
        );

        let mut csv_writer = csv::WriterBuilder::new().from_writer(Vec::new());
        let mut json_rows: Vec<Value> = Vec::new();
        if request.format == ExportFormat::Csv && request.options.include_header {
            csv_writer.write_record(&columns)?;
        }

        for (i, tx) in transactions.iter().enumerate() {
            reporter.check_cancelled()?;
            match request.format {
                ExportFormat::Csv => {
                    let record: Vec<String> =
                        columns.iter().map(|c| csv_field(&cell(tx, c))).collect();
                    csv_writer.write_record(&record)?;
                }
                ExportFormat::Json => {
                    let row: Map<String, Value> = columns
                        .iter()
                        .map(|c| (c.to_string(), cell(tx, c)))
                        .collect();
                    json_rows.push(Value::Object(row));
                }
            }

            let progress = 10 + ((i + 1) * 85 / total.max(1)) as u8;
            reporter.progress(progress, format!("Wrote {} of {} rows", i + 1, total));
            if (i + 1) % YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }
        }

        let data = match request.format {
            ExportFormat::Csv => csv_writer
                .into_inner()
                .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?,
            ExportFormat::Json => serde_json::to_vec_pretty(&json_rows)?,
        };
        reporter.check_cancelled()?;

        info!(
            job_id = %reporter.job_id(),
            rows = total,
            bytes = data.len(),
            format = request.format.as_str(),
            "Export written"
        );

        Ok(JobOutcome {
            message: format!("Exported {} transactions", total),
            result_ref: Some(filename.clone()),
            details: json!({
                "export": {
                    "format": request.format,
                    "columns": columns,
                    "row_count": total,
                    "size_bytes": data.len(),
                    "filename": filename,
                }
            }),
            artifact: Some(ArtifactPayload {
                filename,
                content_type: request.format.content_type().to_string(),
                data,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobKind, NewTransaction};

    fn seed(db: &Database) -> i64 {
        let rows = [("COFFEE, BEANS", "-4.50"), ("PAYROLL", "2500.00"), ("RENT", "-1200")];
        let txs: Vec<NewTransaction> = rows
            .iter()
            .enumerate()
            .map(|(i, (description, amount))| NewTransaction {
                row_number: i + 1,
                date: NaiveDate::from_ymd_opt(2024, 5, 1 + i as u32).unwrap(),
                amount: amount.parse().unwrap(),
                description: description.to_string(),
                vendor: None,
                category: None,
                subcategory: None,
                is_income: amount.parse::<Decimal>().unwrap() > Decimal::ZERO,
                import_hash: format!("h{}", i),
                raw_data: "{}".into(),
            })
            .collect();
        db.create_batch_with_transactions("seed.csv", None, &txs)
            .unwrap()
            .0
            .batch_id
    }

    #[test]
    fn test_unknown_columns_rejected() {
        let request = ExportRequest {
            columns: vec!["date".into(), "password".into(), "ssn".into()],
            ..Default::default()
        };
        match request.validate() {
            Err(Error::Validation { problems, .. }) => assert_eq!(problems.len(), 2),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_default_columns_and_dedup() {
        assert_eq!(ExportRequest::default().validate().unwrap(), EXPORT_COLUMNS);

        let request = ExportRequest {
            columns: vec!["Amount".into(), "date".into(), "amount".into()],
            ..Default::default()
        };
        assert_eq!(request.validate().unwrap(), vec!["amount", "date"]);
    }

    #[test]
    fn test_filename_sanitized() {
        let mut request = ExportRequest::default();
        request.options.filename = Some("../../etc/passwd".into());
        assert_eq!(request.filename(), "etcpasswd.csv");

        request.format = ExportFormat::Json;
        request.options.filename = Some("march.JSON".into());
        assert_eq!(request.filename(), "march.JSON");

        request.options.filename = None;
        assert!(request.filename().starts_with("transactions_"));
    }

    #[tokio::test]
    async fn test_csv_export() {
        let db = Database::in_memory().unwrap();
        let batch_id = seed(&db);
        let request = ExportRequest {
            columns: vec!["date".into(), "description".into(), "amount".into()],
            filters: ExportFilters {
                batch_id: Some(batch_id),
                ..Default::default()
            },
            ..Default::default()
        };

        let reporter = JobReporter::detached(JobKind::Export, "test");
        let outcome = Exporter::new(db).run(&reporter, &request).await.unwrap();
        let artifact = outcome.artifact.unwrap();
        let text = String::from_utf8(artifact.data).unwrap();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "date,description,amount");
        assert_eq!(lines[1], "2024-05-01,\"COFFEE, BEANS\",-4.50");
        assert_eq!(lines.len(), 4);
        assert_eq!(outcome.details["export"]["row_count"], 3);
    }

    #[tokio::test]
    async fn test_json_export_with_filters() {
        let db = Database::in_memory().unwrap();
        seed(&db);
        let request = ExportRequest {
            format: ExportFormat::Json,
            columns: vec!["description".into(), "amount".into(), "is_income".into()],
            filters: ExportFilters {
                min_amount: Some(Decimal::ZERO),
                ..Default::default()
            },
            ..Default::default()
        };

        let reporter = JobReporter::detached(JobKind::Export, "test");
        let outcome = Exporter::new(db).run(&reporter, &request).await.unwrap();
        let rows: Vec<Value> = serde_json::from_slice(&outcome.artifact.unwrap().data).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["description"], "PAYROLL");
        assert_eq!(rows[0]["amount"], "2500.00");
        assert_eq!(rows[0]["is_income"], true);
    }

    #[tokio::test]
    async fn test_header_can_be_omitted() {
        let db = Database::in_memory().unwrap();
        seed(&db);
        let mut request = ExportRequest {
            columns: vec!["id".into()],
            ..Default::default()
        };
        request.options.include_header = false;

        let reporter = JobReporter::detached(JobKind::Export, "test");
        let outcome = Exporter::new(db).run(&reporter, &request).await.unwrap();
        let text = String::from_utf8(outcome.artifact.unwrap().data).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().all(|l| l.parse::<i64>().is_ok()));
    }
}
