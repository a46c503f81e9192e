//! Database tests

use super::*;
use crate::models::*;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn new_tx(row: usize, description: &str, amount: &str) -> NewTransaction {
        NewTransaction {
            row_number: row,
            date: NaiveDate::from_ymd_opt(2024, 1, row as u32).unwrap(),
            amount: amount.parse().unwrap(),
            description: description.to_string(),
            vendor: None,
            category: None,
            subcategory: None,
            is_income: !amount.starts_with('-'),
            import_hash: format!("hash-{}-{}", description, row),
            raw_data: "{}".to_string(),
        }
    }

    fn seed_batch(db: &Database, filename: &str, rows: &[(&str, &str)]) -> (ImportBatch, Vec<i64>) {
        let txs: Vec<NewTransaction> = rows
            .iter()
            .enumerate()
            .map(|(i, (d, a))| new_tx(i + 1, d, a))
            .collect();
        db.create_batch_with_transactions(filename, None, &txs).unwrap()
    }

    fn new_rule(pattern: &str, category: &str) -> NewRule {
        NewRule {
            pattern: pattern.to_string(),
            pattern_type: PatternType::Contains,
            match_field: MatchField::Any,
            category: category.to_string(),
            subcategory: None,
            confidence_weight: 0.8,
            created_by: RuleCreator::Manual,
        }
    }

    #[test]
    fn test_in_memory_db() {
        let db = Database::in_memory().unwrap();
        assert!(db.list_batches().unwrap().is_empty());
        assert!(db.list_rules(false).unwrap().is_empty());
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let db = Database::in_memory().unwrap();
        seed_batch(&db, "a.csv", &[("X", "-1")]);

        // Reopening the same file reruns every CREATE ... IF NOT EXISTS
        let reopened = Database::new_unencrypted(db.path()).unwrap();
        assert_eq!(reopened.list_batches().unwrap().len(), 1);
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();
        let enabled: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[test]
    fn test_batch_totals_exact() {
        let db = Database::in_memory().unwrap();
        let (batch, ids) = seed_batch(
            &db,
            "bank.csv",
            &[("A", "-0.10"), ("B", "-0.20"), ("C", "1000.30")],
        );

        assert_eq!(ids.len(), 3);
        assert_eq!(batch.transaction_count, 3);
        assert_eq!(batch.total_amount, "1000.00".parse().unwrap());
        db.verify_batch_totals(batch.batch_id).unwrap();

        let stored = db.get_batch(batch.batch_id).unwrap().unwrap();
        assert_eq!(stored.total_amount, batch.total_amount);
        assert_eq!(stored.filename, "bank.csv");
    }

    #[test]
    fn test_batch_total_overflow_is_rejected() {
        let db = Database::in_memory().unwrap();
        let max = "79228162514264337593543950335";
        let txs = vec![new_tx(1, "BIG", max), new_tx(2, "BIGGER", max)];

        let result = db.create_batch_with_transactions("huge.csv", None, &txs);
        assert!(matches!(result, Err(Error::InvalidData(_))));
        assert!(db.list_batches().unwrap().is_empty());
    }

    #[test]
    fn test_verify_overflowing_rows_is_an_error() {
        let db = Database::in_memory().unwrap();
        let (batch, _) = seed_batch(&db, "bank.csv", &[("A", "1"), ("B", "1")]);

        db.conn()
            .unwrap()
            .execute(
                "UPDATE transactions SET amount = '79228162514264337593543950335' WHERE batch_id = ?",
                [batch.batch_id],
            )
            .unwrap();
        assert!(matches!(
            db.verify_batch_totals(batch.batch_id),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn test_verify_detects_divergence() {
        let db = Database::in_memory().unwrap();
        let (batch, _) = seed_batch(&db, "bank.csv", &[("A", "-5"), ("B", "-6")]);

        db.conn()
            .unwrap()
            .execute(
                "UPDATE import_batches SET total_amount = '0' WHERE id = ?",
                [batch.batch_id],
            )
            .unwrap();
        assert!(matches!(
            db.verify_batch_totals(batch.batch_id),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn test_list_batches_newest_first() {
        let db = Database::in_memory().unwrap();
        let (first, _) = seed_batch(&db, "first.csv", &[("A", "-1")]);
        let (second, _) = seed_batch(&db, "second.csv", &[("B", "-1")]);

        let batches = db.list_batches().unwrap();
        let ids: Vec<i64> = batches.iter().map(|b| b.batch_id).collect();
        assert_eq!(ids, vec![second.batch_id, first.batch_id]);
    }

    #[test]
    fn test_delete_batch_removes_only_its_transactions() {
        let db = Database::in_memory().unwrap();
        let (keep, _) = seed_batch(&db, "keep.csv", &[("A", "-1"), ("B", "-2")]);
        let (doomed, _) = seed_batch(&db, "doomed.csv", &[("C", "-3"), ("D", "-4"), ("E", "-5")]);

        assert_eq!(db.delete_batch(doomed.batch_id).unwrap(), 3);
        assert!(db.get_batch(doomed.batch_id).unwrap().is_none());
        assert_eq!(db.count_transactions(Some(doomed.batch_id)).unwrap(), 0);
        assert_eq!(db.count_transactions(Some(keep.batch_id)).unwrap(), 2);
        db.verify_batch_totals(keep.batch_id).unwrap();

        // Second delete is NotFound and changes nothing
        assert!(matches!(
            db.delete_batch(doomed.batch_id),
            Err(Error::NotFound(_))
        ));
        assert_eq!(db.count_transactions(None).unwrap(), 2);
    }

    #[test]
    fn test_transaction_filters() {
        let db = Database::in_memory().unwrap();
        let (batch, ids) = seed_batch(
            &db,
            "f.csv",
            &[("A", "-10"), ("B", "-20"), ("C", "30"), ("D", "-40")],
        );
        db.apply_categorization(ids[0], "Dining", None, 0.9, true)
            .unwrap();

        let all = db
            .list_transactions(&TransactionFilter {
                batch_id: Some(batch.batch_id),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(all.len(), 4);

        let dining = db
            .list_transactions(&TransactionFilter {
                category: Some("dining".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(dining.len(), 1);
        assert_eq!(dining[0].description, "A");

        let uncategorized = db
            .list_transactions(&TransactionFilter {
                is_categorized: Some(false),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(uncategorized.len(), 3);

        let mid = db
            .list_transactions(&TransactionFilter {
                min_amount: Some("-25".parse().unwrap()),
                max_amount: Some("0".parse().unwrap()),
                ..Default::default()
            })
            .unwrap();
        let names: Vec<&str> = mid.iter().map(|t| t.description.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);

        let dated = db
            .list_transactions(&TransactionFilter {
                from: NaiveDate::from_ymd_opt(2024, 1, 2),
                to: NaiveDate::from_ymd_opt(2024, 1, 3),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(dated.len(), 2);

        let paged = db
            .list_transactions(&TransactionFilter {
                limit: Some(2),
                offset: Some(1),
                ..Default::default()
            })
            .unwrap();
        let names: Vec<&str> = paged.iter().map(|t| t.description.as_str()).collect();
        assert_eq!(names, vec!["B", "C"]);
    }

    #[test]
    fn test_apply_categorization_on_missing_transaction() {
        let db = Database::in_memory().unwrap();
        assert!(!db
            .apply_categorization(999, "Dining", None, 0.9, true)
            .unwrap());
        assert!(matches!(
            db.require_transaction(999),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_rule_versioning() {
        let db = Database::in_memory().unwrap();
        let rule = db.create_rule(&new_rule("SHELL", "Transportation")).unwrap();
        assert_eq!(rule.version, 1);
        assert!(rule.active);

        let updated = db
            .update_rule(
                rule.id,
                &RuleUpdate {
                    category: Some("Gas".into()),
                    confidence_weight: Some(0.9),
                    reason: "manual edit".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.category, "Gas");

        let deactivated = db.deactivate_rule(rule.id, "no longer needed").unwrap();
        assert_eq!(deactivated.version, 3);
        assert!(!deactivated.active);

        let history = db.list_rule_revisions(rule.id).unwrap();
        let versions: Vec<i64> = history.iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(history[0].category, "Transportation");
        assert_eq!(history[1].reason, "manual edit");

        // Inactive rules are kept but excluded from the active set
        assert!(db.list_rules(true).unwrap().is_empty());
        assert_eq!(db.list_rules(false).unwrap().len(), 1);
        assert!(db.find_rules_by_pattern("shell").unwrap().is_empty());
    }

    #[test]
    fn test_rule_validation() {
        let db = Database::in_memory().unwrap();

        let mut bad_regex = new_rule("(", "X");
        bad_regex.pattern_type = PatternType::Regex;
        assert!(db.create_rule(&bad_regex).is_err());

        let mut bad_weight = new_rule("X", "X");
        bad_weight.confidence_weight = 1.5;
        assert!(matches!(
            db.create_rule(&bad_weight),
            Err(Error::Validation { .. })
        ));

        assert!(matches!(
            db.update_rule(42, &RuleUpdate::default()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_feedback_applies_category_and_snapshots() {
        let db = Database::in_memory().unwrap();
        let (batch, ids) = seed_batch(&db, "f.csv", &[("AWS", "-20")]);

        let fb = db
            .create_feedback(&NewFeedback {
                transaction_id: ids[0],
                feedback_type: FeedbackType::Incorrect,
                suggested_category: Some("Software & Technology".into()),
                suggested_subcategory: None,
                comment: Some("cloud bill".into()),
            })
            .unwrap();
        assert_eq!(fb.original_category, UNCATEGORIZED);
        assert_eq!(fb.batch_id, Some(batch.batch_id));
        assert_eq!(fb.target_category(), Some("Software & Technology"));

        let tx = db.get_transaction(ids[0]).unwrap().unwrap();
        assert_eq!(tx.category, "Software & Technology");
        assert!(tx.is_categorized);
        assert_eq!(tx.confidence_score, 1.0);

        // Feedback survives the batch
        db.delete_batch(batch.batch_id).unwrap();
        let kept = db.get_feedback(fb.id).unwrap();
        assert_eq!(kept.description, "AWS");
        assert_eq!(db.list_unconsumed_feedback(Some(batch.batch_id)).unwrap().len(), 1);
    }

    #[test]
    fn test_correct_feedback_confirms() {
        let db = Database::in_memory().unwrap();
        let (_, ids) = seed_batch(&db, "f.csv", &[("NETFLIX", "-15")]);
        db.apply_categorization(ids[0], "Subscriptions", None, 0.7, true)
            .unwrap();

        db.create_feedback(&NewFeedback {
            transaction_id: ids[0],
            feedback_type: FeedbackType::Correct,
            suggested_category: None,
            suggested_subcategory: None,
            comment: None,
        })
        .unwrap();

        let tx = db.get_transaction(ids[0]).unwrap().unwrap();
        assert_eq!(tx.category, "Subscriptions");
        assert_eq!(tx.confidence_score, 1.0);
    }

    #[test]
    fn test_feedback_validation() {
        let db = Database::in_memory().unwrap();
        let (_, ids) = seed_batch(&db, "f.csv", &[("X", "-1")]);

        let missing_category = NewFeedback {
            transaction_id: ids[0],
            feedback_type: FeedbackType::SuggestAlternative,
            suggested_category: Some("  ".into()),
            suggested_subcategory: None,
            comment: None,
        };
        assert!(matches!(
            db.create_feedback(&missing_category),
            Err(Error::Validation { .. })
        ));

        let unknown_tx = NewFeedback {
            transaction_id: 999,
            feedback_type: FeedbackType::Correct,
            suggested_category: None,
            suggested_subcategory: None,
            comment: None,
        };
        assert!(matches!(
            db.create_feedback(&unknown_tx),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_bulk_feedback_is_atomic() {
        let db = Database::in_memory().unwrap();
        let (_, ids) = seed_batch(&db, "f.csv", &[("A", "-1"), ("B", "-2")]);

        let good = NewFeedback {
            transaction_id: ids[0],
            feedback_type: FeedbackType::Incorrect,
            suggested_category: Some("Dining".into()),
            suggested_subcategory: None,
            comment: None,
        };
        let bad = NewFeedback {
            transaction_id: 12345,
            ..good.clone()
        };

        assert!(db.create_feedback_bulk(&[good.clone(), bad]).is_err());
        assert_eq!(db.get_feedback_stats().unwrap().total, 0);
        assert_eq!(
            db.get_transaction(ids[0]).unwrap().unwrap().category,
            UNCATEGORIZED
        );

        let second = NewFeedback {
            transaction_id: ids[1],
            ..good.clone()
        };
        let created = db.create_feedback_bulk(&[good, second]).unwrap();
        assert_eq!(created.len(), 2);

        let stats = db.get_feedback_stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.incorrect, 2);
        assert_eq!(stats.pending, 2);
    }

    #[test]
    fn test_improvement_run_bookkeeping() {
        let db = Database::in_memory().unwrap();
        let (_, ids) = seed_batch(&db, "f.csv", &[("A", "-1")]);
        let fb = db
            .create_feedback(&NewFeedback {
                transaction_id: ids[0],
                feedback_type: FeedbackType::Incorrect,
                suggested_category: Some("Dining".into()),
                suggested_subcategory: None,
                comment: None,
            })
            .unwrap();

        let run_id = db.start_improvement_run(None, Some("job-1")).unwrap();
        {
            let conn = db.conn().unwrap();
            mark_consumed(&conn, &[fb.id, fb.id], run_id).unwrap();
        }
        assert!(db.list_unconsumed_feedback(None).unwrap().is_empty());

        db.finish_improvement_run(&ImprovementRunRecord {
            id: run_id,
            batch_id: None,
            job_id: Some("job-1".into()),
            started_at: chrono::Utc::now(),
            completed_at: None,
            rules_created: 1,
            rules_updated: 2,
            ml_model_improvements: 3,
            transactions_reprocessed: 4,
            improvement_score: 0.5,
            processing_time_ms: 12,
        })
        .unwrap();

        let runs = db.list_improvement_runs(10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].rules_updated, 2);
        assert!(runs[0].completed_at.is_some());
    }

    #[test]
    fn test_job_snapshots_and_recovery() {
        let db = Database::in_memory().unwrap();
        let now = chrono::Utc::now();
        let mut job = Job {
            job_id: "job-42".into(),
            kind: JobKind::Import,
            status: JobStatus::Processing,
            progress: 30,
            stage: "parsing".into(),
            message: "Parsing".into(),
            details: json!({"parsing": {"successful_parsing": 3}}),
            errors: vec![json!({"row_number": 4})],
            warnings: Vec::new(),
            result_ref: None,
            caller: "local".into(),
            created_at: now,
            updated_at: now,
        };
        db.save_job(&job).unwrap();

        job.progress = 40;
        db.save_job(&job).unwrap();
        let stored = db.get_job("job-42").unwrap().unwrap();
        assert_eq!(stored.progress, 40);
        assert_eq!(stored.details["parsing"]["successful_parsing"], 3);
        assert_eq!(stored.errors.len(), 1);

        assert_eq!(db.recover_stuck_jobs().unwrap(), 1);
        let recovered = db.get_job("job-42").unwrap().unwrap();
        assert_eq!(recovered.status, JobStatus::Failed);
        assert_eq!(db.recover_stuck_jobs().unwrap(), 0);

        assert!(db.get_job("missing").unwrap().is_none());
        assert_eq!(db.list_jobs(10).unwrap().len(), 1);
    }

    #[test]
    fn test_audit_log() {
        let db = Database::in_memory().unwrap();
        db.log_audit("alice", "delete_batch", Some("batch"), Some(7), None)
            .unwrap();
        db.log_audit("bob", "export", None, None, Some("{\"format\":\"csv\"}"))
            .unwrap();

        let entries = db.list_audit_log(10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].caller, "bob");
        assert_eq!(entries[1].entity_id, Some(7));
    }
}
