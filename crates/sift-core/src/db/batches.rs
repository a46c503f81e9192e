//! Import batch operations
//!
//! A batch and its transactions are written in one SQLite transaction and
//! deleted in one `BEGIN IMMEDIATE` transaction, so no reader ever sees a
//! batch whose stored count/total disagree with its rows.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use rust_decimal::Decimal;
use tracing::info;

use super::{parse_datetime, parse_decimal, Database};
use crate::error::{Error, Result};
use crate::models::{ImportBatch, NewTransaction, UNCATEGORIZED};

/// Sum amounts, failing instead of overflowing the decimal range
fn checked_total(amounts: impl IntoIterator<Item = Decimal>) -> Result<Decimal> {
    amounts.into_iter().try_fold(Decimal::ZERO, |acc, amount| {
        acc.checked_add(amount)
            .ok_or_else(|| Error::InvalidData("Batch total exceeds the decimal range".to_string()))
    })
}

const BATCH_COLUMNS: &str = "id, filename, import_date, transaction_count, total_amount, job_id";

fn row_to_batch(row: &Row) -> rusqlite::Result<ImportBatch> {
    let import_date: String = row.get(2)?;
    let total: String = row.get(4)?;
    Ok(ImportBatch {
        batch_id: row.get(0)?,
        filename: row.get(1)?,
        import_date: parse_datetime(&import_date),
        transaction_count: row.get(3)?,
        total_amount: parse_decimal(&total)?,
        job_id: row.get(5)?,
    })
}

impl Database {
    /// Persist a batch record and all of its transactions atomically
    ///
    /// Returns the batch and the ids of the inserted transactions in input order.
    /// Either everything commits or nothing does.
    pub fn create_batch_with_transactions(
        &self,
        filename: &str,
        job_id: Option<&str>,
        transactions: &[NewTransaction],
    ) -> Result<(ImportBatch, Vec<i64>)> {
        let total = checked_total(transactions.iter().map(|t| t.amount))?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let import_date = Utc::now();

        tx.execute(
            r#"
            INSERT INTO import_batches (filename, import_date, transaction_count, total_amount, job_id)
            VALUES (?, ?, ?, ?, ?)
            "#,
            params![
                filename,
                import_date.to_rfc3339(),
                transactions.len() as i64,
                total.to_string(),
                job_id,
            ],
        )?;
        let batch_id = tx.last_insert_rowid();

        let mut ids = Vec::with_capacity(transactions.len());
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO transactions (
                    batch_id, date, amount, description, vendor, category, subcategory,
                    is_income, is_categorized, confidence_score, import_hash, raw_data
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?)
                "#,
            )?;

            for t in transactions {
                stmt.execute(params![
                    batch_id,
                    t.date.to_string(),
                    t.amount.to_string(),
                    t.description,
                    t.vendor,
                    t.category.as_deref().unwrap_or(UNCATEGORIZED),
                    t.subcategory,
                    t.is_income,
                    t.import_hash,
                    t.raw_data,
                ])?;
                ids.push(tx.last_insert_rowid());
            }
        }

        tx.commit()?;

        info!(
            batch_id,
            count = ids.len(),
            total = %total,
            "Persisted import batch"
        );

        Ok((
            ImportBatch {
                batch_id,
                filename: filename.to_string(),
                import_date,
                transaction_count: ids.len() as i64,
                total_amount: total,
                job_id: job_id.map(str::to_string),
            },
            ids,
        ))
    }

    /// List batches, newest first
    pub fn list_batches(&self) -> Result<Vec<ImportBatch>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM import_batches ORDER BY import_date DESC, id DESC",
            BATCH_COLUMNS
        ))?;

        let batches = stmt
            .query_map([], row_to_batch)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(batches)
    }

    /// Get a batch by id
    pub fn get_batch(&self, batch_id: i64) -> Result<Option<ImportBatch>> {
        let conn = self.conn()?;
        let batch = conn
            .query_row(
                &format!("SELECT {} FROM import_batches WHERE id = ?", BATCH_COLUMNS),
                params![batch_id],
                row_to_batch,
            )
            .optional()?;
        Ok(batch)
    }

    /// Delete a batch and every transaction it owns
    ///
    /// Takes the database write lock up front so a concurrent categorization or
    /// export cannot interleave with the delete. Deleting a batch that does not
    /// exist returns `NotFound` and changes nothing.
    pub fn delete_batch(&self, batch_id: i64) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists: bool = tx
            .query_row(
                "SELECT 1 FROM import_batches WHERE id = ?",
                params![batch_id],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);

        if !exists {
            return Err(Error::NotFound(format!("Batch {} not found", batch_id)));
        }

        let removed = tx.execute(
            "DELETE FROM transactions WHERE batch_id = ?",
            params![batch_id],
        )?;
        tx.execute("DELETE FROM import_batches WHERE id = ?", params![batch_id])?;
        tx.commit()?;

        info!(batch_id, removed, "Deleted import batch");
        Ok(removed)
    }

    /// Recompute a batch's count and total from its rows and compare with the
    /// stored aggregate
    pub fn verify_batch_totals(&self, batch_id: i64) -> Result<()> {
        let batch = self
            .get_batch(batch_id)?
            .ok_or_else(|| Error::NotFound(format!("Batch {} not found", batch_id)))?;

        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT amount FROM transactions WHERE batch_id = ?")?;
        let amounts = stmt
            .query_map(params![batch_id], |row| {
                let s: String = row.get(0)?;
                parse_decimal(&s)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let count = amounts.len() as i64;
        let total = checked_total(amounts)?;

        if count != batch.transaction_count || total != batch.total_amount {
            return Err(Error::InvalidData(format!(
                "Batch {} aggregate mismatch: stored ({}, {}), actual ({}, {})",
                batch_id, batch.transaction_count, batch.total_amount, count, total
            )));
        }

        Ok(())
    }
}
