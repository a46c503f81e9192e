//! CLI command tests
//!
//! This module contains all tests for the CLI commands.

use std::io::Write;

use clap::Parser;
use sift_core::models::{RuleCreator, TransactionFilter};
use sift_core::{Database, SiftConfig};
use tempfile::{NamedTempFile, TempDir};

use crate::cli::{BatchesAction, Cli, Commands, RulesAction};
use crate::commands::{self, truncate, AddRuleArgs, ExportArgs};

/// Config with the model scorer switched off so results depend on rules only
fn rules_only_config() -> SiftConfig {
    let mut config = SiftConfig::default();
    config.scorer.backend = "none".to_string();
    config
}

fn statement_file(content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .prefix("statement")
        .suffix(".csv")
        .tempfile()
        .unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

const STATEMENT: &str = "Date,Description,Amount\n\
2024-03-01,GITHUB SPONSORS,-20.00\n\
2024-03-02,GITHUB COPILOT,-10.00\n\
2024-03-03,SALARY,2500.00\n";

fn add_rule(db: &Database, pattern: &str, category: &str) -> i64 {
    commands::cmd_rules_add(
        db,
        AddRuleArgs {
            pattern,
            category,
            subcategory: None,
            pattern_type: "contains",
            field: "any",
            weight: 0.9,
        },
    )
    .unwrap()
}

// ========== Utility Tests ==========

#[test]
fn test_truncate() {
    assert_eq!(truncate("short", 10), "short");
    assert_eq!(truncate("exactly10!", 10), "exactly10!");
    assert_eq!(truncate("this is a long description", 10), "this is...");
    // Multi-byte characters are never split
    assert_eq!(truncate("café café café", 8), "café ...");
}

#[test]
fn test_open_db_unencrypted() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sift.db");

    let db = commands::open_db(&path, true).unwrap();
    db.list_batches().unwrap();
    assert!(path.exists());

    commands::cmd_init(&path, true).unwrap();
}

#[test]
fn test_load_config_missing_explicit_path() {
    let dir = TempDir::new().unwrap();
    let result = commands::load_config(Some(&dir.path().join("missing.toml")));
    assert!(result.is_err());
}

// ========== Argument Parsing Tests ==========

#[test]
fn test_parse_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from(["sift", "batches", "delete", "7", "--yes", "--no-encrypt"])
        .unwrap();
    assert!(cli.no_encrypt);
    match cli.command {
        Commands::Batches {
            action: Some(BatchesAction::Delete { id, yes }),
        } => {
            assert_eq!(id, 7);
            assert!(yes);
        }
        _ => panic!("expected batches delete"),
    }
}

#[test]
fn test_parse_rules_add_defaults() {
    let cli =
        Cli::try_parse_from(["sift", "rules", "add", "NETFLIX", "--category", "Entertainment"])
            .unwrap();
    match cli.command {
        Commands::Rules {
            action:
                Some(RulesAction::Add {
                    pattern,
                    pattern_type,
                    field,
                    weight,
                    ..
                }),
        } => {
            assert_eq!(pattern, "NETFLIX");
            assert_eq!(pattern_type, "contains");
            assert_eq!(field, "any");
            assert!((weight - 0.8).abs() < f64::EPSILON);
        }
        _ => panic!("expected rules add"),
    }
}

#[test]
fn test_parse_serve_origins() {
    let cli = Cli::try_parse_from([
        "sift",
        "serve",
        "--allow-origin",
        "http://localhost:5173",
        "--allow-origin",
        "http://127.0.0.1:5173",
    ])
    .unwrap();
    match cli.command {
        Commands::Serve {
            port,
            allowed_origins,
            ..
        } => {
            assert_eq!(port, 3000);
            assert_eq!(allowed_origins.len(), 2);
        }
        _ => panic!("expected serve"),
    }
}

// ========== Rules Command Tests ==========

#[test]
fn test_cmd_rules_lifecycle() {
    let db = Database::in_memory().unwrap();
    let id = add_rule(&db, "GITHUB", "Software & Technology");

    commands::cmd_rules_update(&db, id, None, Some(0.95), "raise weight").unwrap();
    commands::cmd_rules_deactivate(&db, id, "no longer needed").unwrap();

    let rule = db.get_rule(id).unwrap().unwrap();
    assert!(!rule.active);
    assert_eq!(rule.version, 3);
    assert_eq!(rule.created_by, RuleCreator::Manual);
    assert_eq!(db.list_rule_revisions(id).unwrap().len(), 3);

    commands::cmd_rules_list(&db, true).unwrap();
    commands::cmd_rules_history(&db, id).unwrap();

    let actions: Vec<String> = db
        .list_audit_log(10)
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert!(actions.contains(&"create_rule".to_string()));
    assert!(actions.contains(&"deactivate_rule".to_string()));
}

#[test]
fn test_cmd_rules_add_rejects_unknown_pattern_type() {
    let db = Database::in_memory().unwrap();
    let result = commands::cmd_rules_add(
        &db,
        AddRuleArgs {
            pattern: "X",
            category: "Y",
            subcategory: None,
            pattern_type: "glob",
            field: "any",
            weight: 0.5,
        },
    );
    assert!(result.is_err());
    assert!(db.list_rules(false).unwrap().is_empty());
}

#[test]
fn test_cmd_rules_update_requires_a_change() {
    let db = Database::in_memory().unwrap();
    let id = add_rule(&db, "GITHUB", "Software & Technology");
    assert!(commands::cmd_rules_update(&db, id, None, None, "noop").is_err());
    assert_eq!(db.get_rule(id).unwrap().unwrap().version, 1);
}

#[test]
fn test_cmd_rules_test_and_missing_rule() {
    let db = Database::in_memory().unwrap();
    add_rule(&db, "GITHUB", "Software & Technology");
    commands::cmd_rules_test(&db, "GITHUB SPONSORS").unwrap();
    commands::cmd_rules_test(&db, "GROCERY").unwrap();
    assert!(commands::cmd_rules_history(&db, 999).is_err());
}

// ========== Import, Batch and Export Tests ==========

#[tokio::test]
async fn test_cmd_import_then_delete_batch() {
    let db = Database::in_memory().unwrap();
    let config = rules_only_config();
    add_rule(&db, "GITHUB", "Software & Technology");

    let file = statement_file(STATEMENT);
    commands::cmd_import(&db, &config, file.path()).await.unwrap();

    let batches = db.list_batches().unwrap();
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert_eq!(batch.transaction_count, 3);

    let software = db
        .list_transactions(&TransactionFilter {
            category: Some("Software & Technology".into()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(software.len(), 2);
    assert!(software.iter().all(|t| t.is_categorized));

    // The import job is visible afterwards
    let jobs = db.list_jobs(10).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].caller, commands::CLI_CALLER);

    commands::cmd_batches_list(&db).unwrap();
    commands::cmd_batches_show(&db, batch.batch_id).unwrap();

    // Without --yes nothing is deleted
    commands::cmd_batches_delete(&db, batch.batch_id, false).unwrap();
    assert_eq!(db.count_transactions(None).unwrap(), 3);

    commands::cmd_batches_delete(&db, batch.batch_id, true).unwrap();
    assert_eq!(db.count_transactions(None).unwrap(), 0);
    assert!(commands::cmd_batches_delete(&db, batch.batch_id, true).is_err());
}

#[tokio::test]
async fn test_cmd_import_rejects_invalid_file() {
    let db = Database::in_memory().unwrap();
    let file = statement_file("Title,Body\nhello,world\n");

    let result = commands::cmd_import(&db, &rules_only_config(), file.path()).await;
    assert!(result.is_err());
    assert!(db.list_batches().unwrap().is_empty());
}

#[tokio::test]
async fn test_cmd_import_missing_file() {
    let db = Database::in_memory().unwrap();
    let dir = TempDir::new().unwrap();
    let result =
        commands::cmd_import(&db, &rules_only_config(), &dir.path().join("nope.csv")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_cmd_export_writes_file() {
    let db = Database::in_memory().unwrap();
    let config = rules_only_config();
    let file = statement_file(STATEMENT);
    commands::cmd_import(&db, &config, file.path()).await.unwrap();

    let dir = TempDir::new().unwrap();
    let output = dir.path().join("march.csv");
    let written = commands::cmd_export(
        &db,
        &config,
        ExportArgs {
            output: Some(output.clone()),
            format: "csv".into(),
            batch: None,
            from: Some("2024-03-02".into()),
            to: None,
            category: None,
            columns: Some("date, description,amount".into()),
        },
    )
    .await
    .unwrap();
    assert_eq!(written, output);

    let text = std::fs::read_to_string(&output).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "date,description,amount");
    assert_eq!(lines.len(), 3);
    assert!(lines.contains(&"2024-03-02,GITHUB COPILOT,-10.00"));
}

#[tokio::test]
async fn test_cmd_export_rejects_bad_arguments() {
    let db = Database::in_memory().unwrap();
    let config = rules_only_config();
    let dir = TempDir::new().unwrap();

    let args = |format: &str, from: Option<&str>, columns: Option<&str>| ExportArgs {
        output: Some(dir.path().join("out")),
        format: format.into(),
        batch: None,
        from: from.map(String::from),
        to: None,
        category: None,
        columns: columns.map(String::from),
    };

    assert!(commands::cmd_export(&db, &config, args("xml", None, None))
        .await
        .is_err());
    assert!(commands::cmd_export(&db, &config, args("csv", Some("03/01/2024"), None))
        .await
        .is_err());
    assert!(commands::cmd_export(&db, &config, args("csv", None, Some("date,iban")))
        .await
        .is_err());
    assert!(!dir.path().join("out").exists());
    assert!(db.list_jobs(10).unwrap().is_empty());
}

// ========== Feedback and Improvement Tests ==========

#[tokio::test]
async fn test_feedback_then_improve_creates_rule() {
    let db = Database::in_memory().unwrap();
    let config = rules_only_config();
    let file = statement_file(
        "Date,Description,Amount\n\
         2024-04-01,GITHUB SPONSORS,-5.00\n\
         2024-04-08,GITHUB SPONSORS,-5.00\n\
         2024-04-15,GITHUB SPONSORS,-5.00\n\
         2024-04-20,CORNER BAKERY,-7.50\n",
    );
    commands::cmd_import(&db, &config, file.path()).await.unwrap();

    let github: Vec<_> = db
        .list_transactions(&TransactionFilter::default())
        .unwrap()
        .into_iter()
        .filter(|t| t.description.starts_with("GITHUB"))
        .collect();
    assert_eq!(github.len(), 3);

    for tx in &github {
        commands::cmd_feedback(
            &db,
            tx.id,
            "incorrect",
            Some("Software & Technology".into()),
            None,
        )
        .unwrap();
    }
    assert_eq!(db.get_feedback_stats().unwrap().pending, 3);

    commands::cmd_improve(&db, &config, None, None, None)
        .await
        .unwrap();

    let rules = db.find_rules_by_pattern("github sponsors").unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].category, "Software & Technology");
    assert_eq!(rules[0].created_by, RuleCreator::AutoImprovement);
    assert_eq!(db.get_feedback_stats().unwrap().pending, 0);
}

#[test]
fn test_cmd_feedback_rejects_unknown_type() {
    let db = Database::in_memory().unwrap();
    assert!(commands::cmd_feedback(&db, 1, "maybe", None, None).is_err());
}

#[tokio::test]
async fn test_cmd_improve_validates_parameters() {
    let db = Database::in_memory().unwrap();
    let config = rules_only_config();

    assert!(commands::cmd_improve(&db, &config, None, Some(1.5), None)
        .await
        .is_err());
    assert!(commands::cmd_improve(&db, &config, None, None, Some(0))
        .await
        .is_err());
    assert!(db.list_improvement_runs(10).unwrap().is_empty());

    // A run with no feedback still completes and is recorded
    commands::cmd_improve(&db, &config, None, None, None)
        .await
        .unwrap();
    assert_eq!(db.list_improvement_runs(10).unwrap().len(), 1);
}

#[test]
fn test_cmd_jobs_empty() {
    let db = Database::in_memory().unwrap();
    commands::cmd_jobs(&db, 10).unwrap();
}
