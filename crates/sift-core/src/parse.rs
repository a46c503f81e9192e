//! Row-by-row conversion of validated files into transaction candidates
//!
//! A bad row never aborts the file: it becomes a [`RowError`] and parsing
//! moves on. Rows that parse but look unusual carry a [`RowWarning`].

use std::collections::HashMap;

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::Result;
use crate::models::{
    NewTransaction, RowError, RowErrorType, RowWarning, RowWarningType, UNCATEGORIZED,
};
use crate::validate::{AmountColumns, ColumnLayout, ValidatedFile};

/// Knobs for the row parser
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Rows whose absolute amount exceeds this get a `LargeAmount` warning
    pub large_amount_threshold: Decimal,
    /// Dates after this get a `FutureDate` warning
    pub today: NaiveDate,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            large_amount_threshold: Decimal::from(10_000),
            today: chrono::Local::now().date_naive(),
        }
    }
}

/// Everything the parser produced for one file
#[derive(Debug, Clone, Default)]
pub struct ParseOutcome {
    pub transactions: Vec<NewTransaction>,
    pub errors: Vec<RowError>,
    pub warnings: Vec<RowWarning>,
    /// Data rows seen (header and blank lines excluded)
    pub total_rows: usize,
}

impl ParseOutcome {
    pub fn successful(&self) -> usize {
        self.transactions.len()
    }

    pub fn failed(&self) -> usize {
        self.errors.len()
    }

    /// Fraction of rows that parsed, 0 when there were no rows
    pub fn success_rate(&self) -> f64 {
        if self.total_rows == 0 {
            0.0
        } else {
            self.successful() as f64 / self.total_rows as f64
        }
    }
}

/// Convert a CSV record to a JSON object using headers as keys
fn record_to_json(headers: &StringRecord, record: &StringRecord) -> String {
    let mut map = serde_json::Map::new();
    for (i, header) in headers.iter().enumerate() {
        if let Some(value) = record.get(i) {
            map.insert(header.to_string(), Value::String(value.to_string()));
        }
    }
    json!(map).to_string()
}

/// Stable fingerprint of a parsed row
fn compute_import_hash(
    date: &NaiveDate,
    description: &str,
    amount: &Decimal,
    row_number: usize,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(date.to_string().as_bytes());
    hasher.update(description.as_bytes());
    hasher.update(amount.normalize().to_string().as_bytes());
    hasher.update(row_number.to_be_bytes());
    hex::encode(hasher.finalize())
}

/// Parse a date in any of the formats banks commonly export
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();

    let formats = [
        "%Y-%m-%d", // 2024-01-15
        "%m/%d/%Y", // 01/15/2024
        "%m/%d/%y", // 01/15/24
        "%m-%d-%Y", // 01-15-2024
        "%d/%m/%Y", // 15/01/2024 (European)
        "%Y/%m/%d", // 2024/01/15
    ];

    formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// Parse an amount string, handling currency symbols, thousands separators
/// and accounting-style parentheses
pub fn parse_amount(s: &str) -> Option<Decimal> {
    let cleaned: String = s
        .trim()
        .replace(['$', ',', ' '], "")
        .replace('(', "-")
        .replace(')', "");

    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<Decimal>().ok()
}

fn parse_income_flag(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "yes" | "y" | "1" | "income" | "credit" | "deposit" => Some(true),
        "false" | "no" | "n" | "0" | "expense" | "debit" | "withdrawal" => Some(false),
        _ => None,
    }
}

fn field<'a>(record: &'a StringRecord, idx: Option<usize>) -> Option<&'a str> {
    idx.and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Either a row's transaction or the reason it was rejected
type RowResult = std::result::Result<NewTransaction, (RowErrorType, String)>;

fn parse_record(
    layout: &ColumnLayout,
    headers: &StringRecord,
    record: &StringRecord,
    row_number: usize,
) -> RowResult {
    if record.len() < headers.len() {
        return Err((
            RowErrorType::CsvError,
            format!(
                "Expected {} fields, found {}",
                headers.len(),
                record.len()
            ),
        ));
    }

    let date_raw = field(record, Some(layout.date))
        .ok_or((RowErrorType::MissingValue, "Missing date".to_string()))?;
    let date = parse_date(date_raw).ok_or((
        RowErrorType::ValueError,
        format!("Unable to parse date: '{}'", date_raw),
    ))?;

    let description = field(record, Some(layout.description))
        .ok_or((
            RowErrorType::MissingValue,
            "Missing description".to_string(),
        ))?
        .to_string();

    let amount = match layout.amount {
        AmountColumns::Single(idx) => {
            let raw = field(record, Some(idx))
                .ok_or((RowErrorType::MissingValue, "Missing amount".to_string()))?;
            parse_amount(raw).ok_or((
                RowErrorType::ValueError,
                format!("Unable to parse amount: '{}'", raw),
            ))?
        }
        AmountColumns::DebitCredit { debit, credit } => {
            match (field(record, Some(debit)), field(record, Some(credit))) {
                (None, None) => {
                    return Err((
                        RowErrorType::MissingValue,
                        "Missing amount (both debit and credit are empty)".to_string(),
                    ))
                }
                (Some(raw), _) => -parse_amount(raw)
                    .ok_or((
                        RowErrorType::ValueError,
                        format!("Unable to parse debit: '{}'", raw),
                    ))?
                    .abs(),
                (None, Some(raw)) => parse_amount(raw)
                    .ok_or((
                        RowErrorType::ValueError,
                        format!("Unable to parse credit: '{}'", raw),
                    ))?
                    .abs(),
            }
        }
    };

    let is_income = field(record, layout.income_flag)
        .and_then(parse_income_flag)
        .unwrap_or(amount > Decimal::ZERO);

    let category = field(record, layout.category)
        .filter(|c| !c.eq_ignore_ascii_case(UNCATEGORIZED))
        .map(str::to_string);

    Ok(NewTransaction {
        row_number,
        import_hash: compute_import_hash(&date, &description, &amount, row_number),
        raw_data: record_to_json(headers, record),
        date,
        amount,
        description,
        vendor: field(record, layout.vendor).map(str::to_string),
        subcategory: category
            .as_ref()
            .and_then(|_| field(record, layout.subcategory))
            .map(str::to_string),
        category,
        is_income,
    })
}

/// Parse every data row of a validated file
///
/// `on_row(done, total)` is called after each row; returning an error (for
/// example `Error::Cancelled`) stops parsing and propagates the error.
pub fn parse_rows<F>(
    file: &ValidatedFile,
    options: &ParseOptions,
    mut on_row: F,
) -> Result<ParseOutcome>
where
    F: FnMut(usize, usize) -> Result<()>,
{
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file.content.as_bytes());

    let headers = reader.headers()?.clone();
    let mut outcome = ParseOutcome::default();
    let mut seen: HashMap<(NaiveDate, String, Decimal), usize> = HashMap::new();

    for result in reader.records() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                outcome.total_rows += 1;
                outcome.errors.push(RowError {
                    row_number: outcome.total_rows,
                    error_type: RowErrorType::CsvError,
                    message: e.to_string(),
                    raw_data: String::new(),
                });
                on_row(outcome.total_rows, file.row_count)?;
                continue;
            }
        };

        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }

        outcome.total_rows += 1;
        let row_number = outcome.total_rows;

        match parse_record(&file.layout, &headers, &record, row_number) {
            Ok(tx) => {
                if tx.amount.abs() > options.large_amount_threshold {
                    outcome.warnings.push(RowWarning {
                        row_number,
                        warning_type: RowWarningType::LargeAmount,
                        message: format!(
                            "Amount {} exceeds {}",
                            tx.amount, options.large_amount_threshold
                        ),
                    });
                }
                if tx.date > options.today {
                    outcome.warnings.push(RowWarning {
                        row_number,
                        warning_type: RowWarningType::FutureDate,
                        message: format!("Date {} is in the future", tx.date),
                    });
                }

                let key = (tx.date, tx.description.to_lowercase(), tx.amount.normalize());
                if let Some(first) = seen.get(&key) {
                    outcome.warnings.push(RowWarning {
                        row_number,
                        warning_type: RowWarningType::DuplicateRow,
                        message: format!("Same date, description and amount as row {}", first),
                    });
                } else {
                    seen.insert(key, row_number);
                }

                outcome.transactions.push(tx);
            }
            Err((error_type, message)) => {
                debug!(row_number, error_type = error_type.as_str(), %message, "Row rejected");
                outcome.errors.push(RowError {
                    row_number,
                    error_type,
                    message,
                    raw_data: record.iter().collect::<Vec<_>>().join(","),
                });
            }
        }

        on_row(row_number, file.row_count)?;
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::validate::validate_file;

    fn options() -> ParseOptions {
        ParseOptions {
            large_amount_threshold: Decimal::from(10_000),
            today: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
        }
    }

    fn parse(data: &str) -> ParseOutcome {
        let file = validate_file(data.as_bytes(), 1 << 20).unwrap();
        parse_rows(&file, &options(), |_, _| Ok(())).unwrap()
    }

    #[test]
    fn test_parse_date() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(parse_date("01/15/2024"), Some(expected));
        assert_eq!(parse_date("2024-01-15"), Some(expected));
        assert_eq!(parse_date("01/15/24"), Some(expected));
        assert_eq!(parse_date(" 2024/01/15 "), Some(expected));
        assert_eq!(parse_date("yesterday"), None);
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("-4.50"), Some(Decimal::new(-450, 2)));
        assert_eq!(parse_amount("$1,234.56"), Some(Decimal::new(123456, 2)));
        assert_eq!(parse_amount("(20.00)"), Some(Decimal::new(-2000, 2)));
        assert_eq!(parse_amount("abc"), None);
        assert_eq!(parse_amount(""), None);
    }

    #[test]
    fn test_ten_rows_with_bad_amount_in_row_four() {
        let mut data = String::from("Date,Description,Amount\n");
        for i in 1..=10 {
            if i == 4 {
                data.push_str("2024-01-04,BAD ROW,abc\n");
            } else {
                data.push_str(&format!("2024-01-{:02},VENDOR {},-{}.00\n", i, i, i));
            }
        }

        let outcome = parse(&data);
        assert_eq!(outcome.total_rows, 10);
        assert_eq!(outcome.successful(), 9);
        assert_eq!(outcome.failed(), 1);
        assert_eq!(outcome.errors[0].row_number, 4);
        assert_eq!(outcome.errors[0].error_type, RowErrorType::ValueError);
        assert!(outcome.errors[0].raw_data.contains("abc"));
        assert!((outcome.success_rate() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_missing_values_and_short_rows() {
        let outcome = parse(
            "Date,Description,Amount\n\
             ,NO DATE,-1.00\n\
             2024-01-02,,-1.00\n\
             2024-01-03,SHORT\n\
             2024-13-45,BAD DATE,-1.00\n",
        );
        let types: Vec<RowErrorType> = outcome.errors.iter().map(|e| e.error_type).collect();
        assert_eq!(
            types,
            vec![
                RowErrorType::MissingValue,
                RowErrorType::MissingValue,
                RowErrorType::CsvError,
                RowErrorType::ValueError,
            ]
        );
        assert_eq!(outcome.successful(), 0);
    }

    #[test]
    fn test_debit_credit_columns() {
        let outcome = parse(
            "Posted Date,Memo,Debit,Credit\n\
             01/15/2024,COFFEE,4.50,\n\
             01/16/2024,PAYROLL,,1500.00\n",
        );
        assert_eq!(outcome.transactions[0].amount, Decimal::new(-450, 2));
        assert!(!outcome.transactions[0].is_income);
        assert_eq!(outcome.transactions[1].amount, Decimal::new(150000, 2));
        assert!(outcome.transactions[1].is_income);
    }

    #[test]
    fn test_optional_columns() {
        let outcome = parse(
            "Date,Description,Amount,Vendor,Category,Subcategory,Type\n\
             2024-01-15,AMZN MKTP,-20.00,Amazon,Shopping,Online,expense\n\
             2024-01-16,REFUND,15.00,,Uncategorized,,expense\n",
        );
        let first = &outcome.transactions[0];
        assert_eq!(first.vendor.as_deref(), Some("Amazon"));
        assert_eq!(first.category.as_deref(), Some("Shopping"));
        assert_eq!(first.subcategory.as_deref(), Some("Online"));

        let second = &outcome.transactions[1];
        assert_eq!(second.vendor, None);
        assert_eq!(second.category, None);
        // Explicit flag wins over the sign of the amount
        assert!(!second.is_income);
    }

    #[test]
    fn test_warnings() {
        let outcome = parse(
            "Date,Description,Amount\n\
             2024-01-15,CAR,-25000.00\n\
             2030-01-01,FUTURE,-1.00\n\
             2024-01-15,COFFEE,-4.50\n\
             2024-01-15,coffee,-4.5\n",
        );
        let kinds: Vec<(usize, RowWarningType)> = outcome
            .warnings
            .iter()
            .map(|w| (w.row_number, w.warning_type))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (1, RowWarningType::LargeAmount),
                (2, RowWarningType::FutureDate),
                (4, RowWarningType::DuplicateRow),
            ]
        );
        // Duplicates are still imported
        assert_eq!(outcome.successful(), 4);
    }

    #[test]
    fn test_import_hash_distinguishes_rows() {
        let outcome = parse(
            "Date,Description,Amount\n\
             2024-01-15,COFFEE,-4.50\n\
             2024-01-15,COFFEE,-4.50\n",
        );
        assert_eq!(outcome.transactions[0].import_hash.len(), 64);
        assert_ne!(
            outcome.transactions[0].import_hash,
            outcome.transactions[1].import_hash
        );
    }

    #[test]
    fn test_raw_data_is_json() {
        let outcome = parse("Date,Description,Amount\n2024-01-15,COFFEE,-4.50\n");
        let raw: Value = serde_json::from_str(&outcome.transactions[0].raw_data).unwrap();
        assert_eq!(raw["Description"], "COFFEE");
    }

    #[test]
    fn test_callback_can_cancel() {
        let file = validate_file(
            b"Date,Description,Amount\n2024-01-15,A,-1\n2024-01-16,B,-2\n2024-01-17,C,-3\n",
            1 << 20,
        )
        .unwrap();

        let mut calls = 0;
        let result = parse_rows(&file, &options(), |done, total| {
            calls += 1;
            assert_eq!(total, 3);
            if done == 2 {
                Err(Error::Cancelled)
            } else {
                Ok(())
            }
        });

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(calls, 2);
    }
}
