//! Batch command implementations

use anyhow::Result;
use sift_core::Database;

use super::{truncate, CLI_CALLER};

pub fn cmd_batches_list(db: &Database) -> Result<()> {
    let batches = db.list_batches()?;

    if batches.is_empty() {
        println!("No batches yet. Import one with:");
        println!("  sift import --file statement.csv");
        return Ok(());
    }

    println!();
    println!("📦 Import Batches");
    println!("   ─────────────────────────────────────────────────────────────");

    for batch in batches {
        println!(
            "   [{}] {} │ {:>5} txns │ {:>12} │ {}",
            batch.batch_id,
            batch.import_date.format("%Y-%m-%d %H:%M"),
            batch.transaction_count,
            batch.total_amount,
            truncate(&batch.filename, 40)
        );
    }

    Ok(())
}

pub fn cmd_batches_show(db: &Database, id: i64) -> Result<()> {
    let batch = db
        .get_batch(id)?
        .ok_or_else(|| anyhow::anyhow!("Batch {} not found", id))?;

    println!();
    println!("📦 Batch {}", batch.batch_id);
    println!("   File: {}", batch.filename);
    println!("   Imported: {}", batch.import_date.format("%Y-%m-%d %H:%M:%S"));
    println!("   Transactions: {}", batch.transaction_count);
    println!("   Total amount: {}", batch.total_amount);
    if let Some(job_id) = &batch.job_id {
        println!("   Job: {}", job_id);
    }

    match db.verify_batch_totals(id) {
        Ok(()) => println!("   ✅ Totals match stored transactions"),
        Err(e) => {
            tracing::warn!(batch_id = id, error = %e, "Batch totals diverge");
            println!("   ⚠️  {}", e);
        }
    }

    Ok(())
}

pub fn cmd_batches_delete(db: &Database, id: i64, yes: bool) -> Result<()> {
    let batch = db
        .get_batch(id)?
        .ok_or_else(|| anyhow::anyhow!("Batch {} not found", id))?;

    if !yes {
        println!(
            "This will permanently delete batch {} ({}) and its {} transactions.",
            batch.batch_id, batch.filename, batch.transaction_count
        );
        println!("Re-run with --yes to confirm.");
        return Ok(());
    }

    let deleted = db.delete_batch(id)?;
    db.log_audit(
        CLI_CALLER,
        "delete_batch",
        Some("batch"),
        Some(id),
        Some(&format!("transactions_deleted={}", deleted)),
    )?;

    println!("🗑️  Deleted batch {} ({} transactions)", id, deleted);
    Ok(())
}
