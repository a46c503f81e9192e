//! Transaction and feedback command implementations

use anyhow::Result;
use rust_decimal::Decimal;
use sift_core::models::{FeedbackType, NewFeedback, TransactionFilter};
use sift_core::Database;

use super::truncate;

pub fn cmd_transactions_list(db: &Database, filter: &TransactionFilter) -> Result<()> {
    let transactions = db.list_transactions(filter)?;

    if transactions.is_empty() {
        println!("No transactions found. Import some with:");
        println!("  sift import --file statement.csv");
        return Ok(());
    }

    println!();
    println!("📝 Transactions");
    println!("   ─────────────────────────────────────────────────────────────");

    for tx in transactions {
        let amount_str = if tx.amount < Decimal::ZERO {
            format!("\x1b[31m${:.2}\x1b[0m", tx.amount.abs()) // Red for expenses
        } else {
            format!("\x1b[32m+${:.2}\x1b[0m", tx.amount) // Green for income
        };
        let category = if tx.is_categorized {
            tx.category.clone()
        } else {
            format!("({})", tx.category)
        };

        println!(
            "   [{}] {} │ {:>10} │ {:<30} │ {} {:.0}%",
            tx.id,
            tx.date,
            amount_str,
            truncate(&tx.description, 30),
            truncate(&category, 24),
            tx.confidence_score * 100.0
        );
    }

    Ok(())
}

pub fn cmd_feedback(
    db: &Database,
    transaction_id: i64,
    feedback_type: &str,
    category: Option<String>,
    comment: Option<String>,
) -> Result<()> {
    let feedback_type: FeedbackType = feedback_type
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let feedback = db.create_feedback(&NewFeedback {
        transaction_id,
        feedback_type,
        suggested_category: category,
        suggested_subcategory: None,
        comment,
    })?;
    db.log_audit(
        super::CLI_CALLER,
        "feedback",
        Some("transaction"),
        Some(transaction_id),
        Some(&format!("type={}, feedback_id={}", feedback_type.as_str(), feedback.id)),
    )?;

    println!(
        "✅ Recorded {} feedback #{} on transaction {}",
        feedback_type.as_str(),
        feedback.id,
        transaction_id
    );
    let stats = db.get_feedback_stats()?;
    println!(
        "   {} feedback item(s) waiting for the next 'sift improve'",
        stats.pending
    );

    Ok(())
}
