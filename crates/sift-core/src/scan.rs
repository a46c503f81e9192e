//! Content threat scanning for uploaded files
//!
//! Looks for payloads that are dangerous when the file (or an export built
//! from it) is later opened in a spreadsheet or browser. Only `critical`
//! findings stop an import; lower levels are recorded and the import proceeds.

use std::sync::OnceLock;

use csv::ReaderBuilder;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::ThreatLevel;

/// Findings kept in a report; the total is still counted past this
const MAX_FINDINGS: usize = 100;

/// One suspicious item in a file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanFinding {
    pub level: ThreatLevel,
    /// 1-based line (for byte/line checks) or record number (for cell checks)
    pub location: usize,
    pub kind: String,
    pub detail: String,
}

/// Result of scanning a file
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub threat_level: ThreatLevel,
    pub findings: Vec<ScanFinding>,
    pub total_findings: usize,
    /// SHA-256 of the scanned content
    pub content_hash: String,
}

impl ScanReport {
    /// Fail with a security error if the report is critical
    pub fn ensure_safe(&self) -> Result<()> {
        if self.threat_level < ThreatLevel::Critical {
            return Ok(());
        }
        let first = self
            .findings
            .iter()
            .find(|f| f.level == ThreatLevel::Critical)
            .map(|f| format!("{} at {}: {}", f.kind, f.location, f.detail))
            .unwrap_or_default();
        Err(Error::Security {
            threat_level: self.threat_level,
            message: format!(
                "File rejected: {} finding(s), first critical: {}",
                self.total_findings, first
            ),
        })
    }

    fn record(&mut self, finding: ScanFinding) {
        if finding.level > self.threat_level {
            self.threat_level = finding.level;
        }
        self.total_findings += 1;
        if self.findings.len() < MAX_FINDINGS {
            self.findings.push(finding);
        }
    }
}

fn dde_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)[=+\-@]\s*(cmd|msexcel|powershell|mshta|rundll32|regsvr32)\s*\|")
            .expect("dde regex")
    })
}

fn script_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)<\s*script|javascript\s*:|<\s*iframe|\bon(error|load)\s*=")
            .expect("script regex")
    })
}

fn external_formula_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^[=+\-@]\s*(hyperlink|webservice|importxml|importdata|importhtml|importfeed|filterxml)\s*\(",
        )
        .expect("external formula regex")
    })
}

/// Executable headers that are never valid transaction data
const EXECUTABLE_MAGIC: &[(&[u8], &str)] = &[
    (b"MZ", "Windows executable"),
    (b"\x7fELF", "ELF executable"),
    (b"#!", "script interpreter line"),
];

/// A cell that a spreadsheet would evaluate as a formula
///
/// A leading `-` or `+` followed by a digit or decimal point is an ordinary
/// signed number and is not flagged.
fn is_formula_cell(cell: &str) -> bool {
    let mut chars = cell.trim_start().chars();
    match chars.next() {
        Some('=') | Some('@') => true,
        Some('+') | Some('-') => match chars.next() {
            Some(c) => !(c.is_ascii_digit() || c == '.' || c == '$' || c.is_whitespace()),
            None => false,
        },
        _ => false,
    }
}

fn scan_cell(report: &mut ScanReport, record_no: usize, cell: &str) {
    let trimmed = cell.trim_start();
    if dde_re().is_match(trimmed) {
        report.record(ScanFinding {
            level: ThreatLevel::Critical,
            location: record_no,
            kind: "dde_payload".into(),
            detail: preview(trimmed),
        });
    } else if external_formula_re().is_match(trimmed) {
        report.record(ScanFinding {
            level: ThreatLevel::High,
            location: record_no,
            kind: "external_formula".into(),
            detail: preview(trimmed),
        });
    } else if is_formula_cell(trimmed) {
        report.record(ScanFinding {
            level: ThreatLevel::Medium,
            location: record_no,
            kind: "formula_cell".into(),
            detail: preview(trimmed),
        });
    }

    if script_re().is_match(cell) {
        report.record(ScanFinding {
            level: ThreatLevel::High,
            location: record_no,
            kind: "script_injection".into(),
            detail: preview(cell),
        });
    }
}

fn preview(s: &str) -> String {
    let mut out: String = s.chars().take(60).collect();
    if s.chars().count() > 60 {
        out.push_str("...");
    }
    out
}

/// Scan file content for threats
pub fn scan_content(content: &[u8], max_line_length: usize) -> ScanReport {
    let mut report = ScanReport {
        threat_level: ThreatLevel::Low,
        findings: Vec::new(),
        total_findings: 0,
        content_hash: hex::encode(Sha256::digest(content)),
    };

    for (magic, name) in EXECUTABLE_MAGIC {
        if content.starts_with(magic) {
            report.record(ScanFinding {
                level: ThreatLevel::Critical,
                location: 1,
                kind: "executable_content".into(),
                detail: format!("File starts with {} header", name),
            });
        }
    }

    for (idx, line) in content.split(|b| *b == b'\n').enumerate() {
        if line.contains(&0) {
            report.record(ScanFinding {
                level: ThreatLevel::Critical,
                location: idx + 1,
                kind: "binary_content".into(),
                detail: "NUL byte in text content".into(),
            });
        }
        if line.len() > max_line_length {
            report.record(ScanFinding {
                level: ThreatLevel::Medium,
                location: idx + 1,
                kind: "long_line".into(),
                detail: format!("{} bytes (limit {})", line.len(), max_line_length),
            });
        }
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content);

    for (idx, record) in reader.records().enumerate() {
        // Malformed records are reported by the parser, not here
        let Ok(record) = record else { continue };
        for cell in record.iter() {
            scan_cell(&mut report, idx + 1, cell);
        }
    }

    debug!(
        threat_level = %report.threat_level,
        findings = report.total_findings,
        "Content scan complete"
    );

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 4096;

    #[test]
    fn test_clean_file_is_low() {
        let data = b"Date,Description,Amount\n2024-01-15,COFFEE SHOP,-4.50\n2024-01-16,PAYROLL,+1200.00\n";
        let report = scan_content(data, LIMIT);
        assert_eq!(report.threat_level, ThreatLevel::Low);
        assert!(report.findings.is_empty());
        assert_eq!(report.content_hash.len(), 64);
        assert!(report.ensure_safe().is_ok());
    }

    #[test]
    fn test_negative_amounts_are_not_formulas() {
        assert!(!is_formula_cell("-4.50"));
        assert!(!is_formula_cell("-.50"));
        assert!(!is_formula_cell("+12"));
        assert!(!is_formula_cell("- 3"));
        assert!(!is_formula_cell("-"));
        assert!(is_formula_cell("=1+1"));
        assert!(is_formula_cell("@SUM(A1)"));
        assert!(is_formula_cell("-A1"));
        assert!(is_formula_cell("+cmd"));
    }

    #[test]
    fn test_dde_payload_is_critical() {
        let data = b"Date,Description,Amount\n2024-01-15,=cmd|' /C calc'!A0,-4.50\n";
        let report = scan_content(data, LIMIT);
        assert_eq!(report.threat_level, ThreatLevel::Critical);
        assert_eq!(report.findings[0].kind, "dde_payload");
        assert_eq!(report.findings[0].location, 2);

        match report.ensure_safe() {
            Err(Error::Security { threat_level, .. }) => {
                assert_eq!(threat_level, ThreatLevel::Critical)
            }
            other => panic!("expected security error, got {:?}", other),
        }
    }

    #[test]
    fn test_msexcel_dde_is_critical() {
        let data = b"Date,Description,Amount\n2024-01-15,=MSEXCEL|'\\..\\calc.exe'!'',-4.50\n";
        assert_eq!(scan_content(data, LIMIT).threat_level, ThreatLevel::Critical);
    }

    #[test]
    fn test_nul_byte_is_critical() {
        let data = b"Date,Description,Amount\n2024-01-15,COF\0FEE,-4.50\n";
        let report = scan_content(data, LIMIT);
        assert_eq!(report.threat_level, ThreatLevel::Critical);
        assert!(report.findings.iter().any(|f| f.kind == "binary_content"));
    }

    #[test]
    fn test_executable_magic_is_critical() {
        let report = scan_content(b"MZ\x90\x00rest", LIMIT);
        assert_eq!(report.threat_level, ThreatLevel::Critical);
        assert!(report.findings.iter().any(|f| f.kind == "executable_content"));
    }

    #[test]
    fn test_script_and_external_formula_are_high() {
        let data = b"Date,Description,Amount\n2024-01-15,<script>alert(1)</script>,-4.50\n2024-01-16,\"=HYPERLINK(\"\"http://x\"\")\",-1\n";
        let report = scan_content(data, LIMIT);
        assert_eq!(report.threat_level, ThreatLevel::High);
        assert!(report.findings.iter().any(|f| f.kind == "script_injection"));
        assert!(report.findings.iter().any(|f| f.kind == "external_formula"));
        assert!(report.ensure_safe().is_ok());
    }

    #[test]
    fn test_plain_formula_and_long_line_are_medium() {
        let long = "x".repeat(50);
        let data = format!("Date,Description,Amount\n2024-01-15,=1+1,-4.50\n2024-01-16,{},-1\n", long);
        let report = scan_content(data.as_bytes(), 40);
        assert_eq!(report.threat_level, ThreatLevel::Medium);
        assert!(report.findings.iter().any(|f| f.kind == "formula_cell"));
        assert!(report.findings.iter().any(|f| f.kind == "long_line"));
    }

    #[test]
    fn test_findings_are_capped() {
        let mut data = String::from("Date,Description,Amount\n");
        for _ in 0..(MAX_FINDINGS + 20) {
            data.push_str("2024-01-15,=1,-1\n");
        }
        let report = scan_content(data.as_bytes(), LIMIT);
        assert_eq!(report.findings.len(), MAX_FINDINGS);
        assert_eq!(report.total_findings, MAX_FINDINGS + 20);
    }
}
