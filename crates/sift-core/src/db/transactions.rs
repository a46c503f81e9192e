//! Transaction queries and category updates

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, Row};

use super::{parse_datetime, parse_decimal, Database};
use crate::error::{Error, Result};
use crate::models::{Transaction, TransactionFilter};

pub(crate) const TRANSACTION_COLUMNS: &str = "id, batch_id, date, amount, description, vendor, \
     category, subcategory, is_income, is_categorized, confidence_score, import_hash, raw_data, \
     created_at";

pub(crate) fn row_to_transaction(row: &Row) -> rusqlite::Result<Transaction> {
    let date_str: String = row.get(2)?;
    let amount_str: String = row.get(3)?;
    let created_at: String = row.get(13)?;

    let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Transaction {
        id: row.get(0)?,
        batch_id: row.get(1)?,
        date,
        amount: parse_decimal(&amount_str)?,
        description: row.get(4)?,
        vendor: row.get(5)?,
        category: row.get(6)?,
        subcategory: row.get(7)?,
        is_income: row.get(8)?,
        is_categorized: row.get(9)?,
        confidence_score: row.get(10)?,
        import_hash: row.get(11)?,
        raw_data: row.get(12)?,
        created_at: parse_datetime(&created_at),
    })
}

impl Database {
    /// Get a single transaction
    pub fn get_transaction(&self, id: i64) -> Result<Option<Transaction>> {
        let conn = self.conn()?;
        let tx = conn
            .query_row(
                &format!("SELECT {} FROM transactions WHERE id = ?", TRANSACTION_COLUMNS),
                params![id],
                row_to_transaction,
            )
            .optional()?;
        Ok(tx)
    }

    /// Get a transaction or fail with `NotFound`
    pub fn require_transaction(&self, id: i64) -> Result<Transaction> {
        self.get_transaction(id)?
            .ok_or_else(|| Error::NotFound(format!("Transaction {} not found", id)))
    }

    /// List transactions matching a filter, ordered by date then id
    ///
    /// Amount bounds are applied after loading because amounts are stored as
    /// decimal text; `limit`/`offset` are applied after the amount filter.
    pub fn list_transactions(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;

        let mut sql = format!("SELECT {} FROM transactions WHERE 1=1", TRANSACTION_COLUMNS);
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(batch_id) = filter.batch_id {
            sql.push_str(" AND batch_id = ?");
            params_vec.push(Box::new(batch_id));
        }
        if let Some(from) = filter.from {
            sql.push_str(" AND date >= ?");
            params_vec.push(Box::new(from.to_string()));
        }
        if let Some(to) = filter.to {
            sql.push_str(" AND date <= ?");
            params_vec.push(Box::new(to.to_string()));
        }
        if let Some(ref category) = filter.category {
            sql.push_str(" AND category = ? COLLATE NOCASE");
            params_vec.push(Box::new(category.clone()));
        }
        if let Some(categorized) = filter.is_categorized {
            sql.push_str(" AND is_categorized = ?");
            params_vec.push(Box::new(categorized));
        }
        sql.push_str(" ORDER BY date ASC, id ASC");

        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_refs.as_slice(), row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter.limit.map(|l| l.max(0) as usize).unwrap_or(usize::MAX);

        Ok(rows
            .into_iter()
            .filter(|t| filter.min_amount.map_or(true, |min| t.amount >= min))
            .filter(|t| filter.max_amount.map_or(true, |max| t.amount <= max))
            .skip(offset)
            .take(limit)
            .collect())
    }

    /// Get transactions by id, skipping ids that no longer exist
    pub fn get_transactions_by_ids(&self, ids: &[i64]) -> Result<Vec<Transaction>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(tx) = self.get_transaction(*id)? {
                out.push(tx);
            }
        }
        Ok(out)
    }

    /// Record the outcome of categorizing a transaction
    ///
    /// Returns false when the transaction no longer exists (its batch was deleted).
    pub fn apply_categorization(
        &self,
        id: i64,
        category: &str,
        subcategory: Option<&str>,
        confidence: f64,
        is_categorized: bool,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            r#"
            UPDATE transactions
            SET category = ?, subcategory = ?, confidence_score = ?, is_categorized = ?
            WHERE id = ?
            "#,
            params![category, subcategory, confidence, is_categorized, id],
        )?;
        Ok(changed > 0)
    }

    /// Record a confidence score without touching the category
    pub fn set_confidence(&self, id: i64, confidence: f64) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE transactions SET confidence_score = ? WHERE id = ?",
            params![confidence, id],
        )?;
        Ok(changed > 0)
    }

    /// Mark the current category as user-confirmed
    pub fn confirm_category(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE transactions SET is_categorized = 1, confidence_score = 1.0 WHERE id = ?",
            params![id],
        )?;
        Ok(changed > 0)
    }

    /// Count transactions, optionally within one batch
    pub fn count_transactions(&self, batch_id: Option<i64>) -> Result<i64> {
        let conn = self.conn()?;
        let count = match batch_id {
            Some(id) => conn.query_row(
                "SELECT COUNT(*) FROM transactions WHERE batch_id = ?",
                params![id],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?,
        };
        Ok(count)
    }
}
