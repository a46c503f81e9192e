//! Structural validation of uploaded transaction files
//!
//! Runs before anything is parsed. A file that fails here is rejected as a
//! whole with every problem listed; no rows are converted or stored.

use csv::{ReaderBuilder, StringRecord};
use serde::Serialize;

use crate::error::{Error, Result};

const DATE_ALIASES: &[&str] = &[
    "date",
    "transaction date",
    "trans date",
    "posted date",
    "post date",
    "posting date",
];
const AMOUNT_ALIASES: &[&str] = &["amount", "transaction amount", "amt"];
const DEBIT_ALIASES: &[&str] = &["debit", "withdrawal", "withdrawals"];
const CREDIT_ALIASES: &[&str] = &["credit", "deposit", "deposits"];
const DESCRIPTION_ALIASES: &[&str] = &["description", "memo", "details", "name", "narrative"];
const VENDOR_ALIASES: &[&str] = &["vendor", "merchant", "payee", "merchant name"];
const CATEGORY_ALIASES: &[&str] = &["category"];
const SUBCATEGORY_ALIASES: &[&str] = &["subcategory", "sub category", "sub_category"];
const INCOME_ALIASES: &[&str] = &["is_income", "income", "type", "transaction type"];

/// Where the amount comes from in a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AmountColumns {
    /// One signed amount column
    Single(usize),
    /// Separate debit (expense) and credit (income) columns
    DebitCredit { debit: usize, credit: usize },
}

/// Column positions resolved from a header row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnLayout {
    pub date: usize,
    pub amount: AmountColumns,
    pub description: usize,
    pub vendor: Option<usize>,
    pub category: Option<usize>,
    pub subcategory: Option<usize>,
    pub income_flag: Option<usize>,
}

/// A file that passed structural validation
#[derive(Debug, Clone)]
pub struct ValidatedFile {
    /// UTF-8 content with any byte-order mark removed
    pub content: String,
    pub headers: Vec<String>,
    pub layout: ColumnLayout,
    pub size_bytes: usize,
    /// Number of data records (header excluded)
    pub row_count: usize,
}

fn normalize_header(h: &str) -> String {
    h.trim().trim_matches('"').trim().to_lowercase()
}

fn find_column(headers: &[String], aliases: &[&str]) -> Option<usize> {
    aliases
        .iter()
        .find_map(|alias| headers.iter().position(|h| h == alias))
}

/// Resolve column positions, or list what is missing
pub fn detect_layout(headers: &StringRecord) -> std::result::Result<ColumnLayout, Vec<String>> {
    let normalized: Vec<String> = headers.iter().map(normalize_header).collect();
    let mut problems = Vec::new();

    let date = find_column(&normalized, DATE_ALIASES);
    if date.is_none() {
        problems.push("Missing required column: date".to_string());
    }

    let amount = match find_column(&normalized, AMOUNT_ALIASES) {
        Some(idx) => Some(AmountColumns::Single(idx)),
        None => match (
            find_column(&normalized, DEBIT_ALIASES),
            find_column(&normalized, CREDIT_ALIASES),
        ) {
            (Some(debit), Some(credit)) => Some(AmountColumns::DebitCredit { debit, credit }),
            _ => None,
        },
    };
    if amount.is_none() {
        problems.push("Missing required column: amount (or debit and credit)".to_string());
    }

    let description = find_column(&normalized, DESCRIPTION_ALIASES);
    if description.is_none() {
        problems.push("Missing required column: description".to_string());
    }

    let mut seen = std::collections::HashSet::new();
    for h in &normalized {
        if h.is_empty() {
            continue;
        }
        if !seen.insert(h.as_str()) {
            problems.push(format!("Duplicate column: {}", h));
        }
    }

    match (date, amount, description) {
        (Some(date), Some(amount), Some(description)) if problems.is_empty() => Ok(ColumnLayout {
            date,
            amount,
            description,
            vendor: find_column(&normalized, VENDOR_ALIASES),
            category: find_column(&normalized, CATEGORY_ALIASES),
            subcategory: find_column(&normalized, SUBCATEGORY_ALIASES),
            income_flag: find_column(&normalized, INCOME_ALIASES),
        }),
        _ => Err(problems),
    }
}

/// Check that an upload is a non-empty, size-limited, UTF-8 CSV with the
/// required columns
pub fn validate_file(bytes: &[u8], max_bytes: usize) -> Result<ValidatedFile> {
    if bytes.is_empty() || bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(Error::validation("File is empty"));
    }

    if bytes.len() > max_bytes {
        return Err(Error::validation(format!(
            "File too large: {} bytes (maximum {} bytes)",
            bytes.len(),
            max_bytes
        )));
    }

    let text = std::str::from_utf8(bytes).map_err(|e| {
        Error::validation(format!(
            "File is not valid UTF-8 text (invalid byte at offset {})",
            e.valid_up_to()
        ))
    })?;
    let content = text.strip_prefix('\u{feff}').unwrap_or(text).to_string();

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| Error::validation(format!("Unreadable header row: {}", e)))?
        .clone();

    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(Error::validation("Missing header row"));
    }

    let layout = detect_layout(&headers).map_err(|problems| Error::Validation {
        message: format!("File structure is invalid: {}", problems.join("; ")),
        problems,
    })?;

    let row_count = reader
        .records()
        .filter(|r| match r {
            Ok(rec) => rec.iter().any(|f| !f.trim().is_empty()),
            Err(_) => true,
        })
        .count();

    if row_count == 0 {
        return Err(Error::validation("File contains no data rows"));
    }

    Ok(ValidatedFile {
        size_bytes: bytes.len(),
        headers: headers.iter().map(|h| h.trim().to_string()).collect(),
        content,
        layout,
        row_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 1024 * 1024;

    #[test]
    fn test_valid_file() {
        let data = b"Date,Description,Amount\n2024-01-15,COFFEE,-4.50\n";
        let file = validate_file(data, MAX).unwrap();
        assert_eq!(file.row_count, 1);
        assert_eq!(file.layout.date, 0);
        assert_eq!(file.layout.description, 1);
        assert_eq!(file.layout.amount, AmountColumns::Single(2));
        assert_eq!(file.layout.vendor, None);
    }

    #[test]
    fn test_aliases_and_optional_columns() {
        let data = b"Transaction Date,Memo,Merchant,Debit,Credit,Category\n01/15/2024,x,y,4.50,,Food\n";
        let file = validate_file(data, MAX).unwrap();
        assert_eq!(file.layout.date, 0);
        assert_eq!(file.layout.description, 1);
        assert_eq!(file.layout.vendor, Some(2));
        assert_eq!(
            file.layout.amount,
            AmountColumns::DebitCredit {
                debit: 3,
                credit: 4
            }
        );
        assert_eq!(file.layout.category, Some(5));
    }

    #[test]
    fn test_bom_is_stripped() {
        let data = "\u{feff}Date,Description,Amount\n2024-01-15,COFFEE,-4.50\n";
        let file = validate_file(data.as_bytes(), MAX).unwrap();
        assert!(file.content.starts_with("Date"));
        assert_eq!(file.layout.date, 0);
    }

    #[test]
    fn test_empty_file() {
        let err = validate_file(b"", MAX).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        let err = validate_file(b"  \n ", MAX).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_header_only() {
        let err = validate_file(b"Date,Description,Amount\n", MAX).unwrap_err();
        match err {
            Error::Validation { message, .. } => assert!(message.contains("no data rows")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_too_large() {
        let data = b"Date,Description,Amount\n2024-01-15,COFFEE,-4.50\n";
        let err = validate_file(data, 10).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_missing_columns_are_all_listed() {
        let err = validate_file(b"Foo,Bar\n1,2\n", MAX).unwrap_err();
        match err {
            Error::Validation { problems, .. } => {
                assert_eq!(problems.len(), 3);
                assert!(problems.iter().any(|p| p.contains("date")));
                assert!(problems.iter().any(|p| p.contains("amount")));
                assert!(problems.iter().any(|p| p.contains("description")));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_debit_without_credit_is_missing_amount() {
        let err = validate_file(b"Date,Description,Debit\n2024-01-01,x,1\n", MAX).unwrap_err();
        match err {
            Error::Validation { problems, .. } => {
                assert_eq!(problems.len(), 1);
                assert!(problems[0].contains("amount"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_utf8() {
        let data = [b'D', b'a', 0xff, 0xfe, b'\n'];
        let err = validate_file(&data, MAX).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }
}
