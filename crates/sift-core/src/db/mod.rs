//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `batches` - Import batches and atomic batch persistence/deletion
//! - `transactions` - Transaction queries and category updates
//! - `rules` - Categorization rules and their revision history
//! - `feedback` - Append-only user feedback and improvement bookkeeping
//! - `jobs` - Persisted job snapshots
//! - `audit` - Audit log

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rust_decimal::Decimal;
use tracing::info;

use crate::error::{Error, Result};

mod audit;
mod batches;
mod feedback;
mod jobs;
mod rules;
mod transactions;

pub use feedback::ImprovementRunRecord;

pub(crate) use feedback::{insert_improvement_run, mark_consumed};
pub(crate) use rules::{find_active_by_pattern, insert_rule, load_rule, update_rule_on};

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Environment variable for database encryption key
pub const DB_KEY_ENV: &str = "SIFT_DB_KEY";

/// Derive an encryption key from a passphrase using Argon2
///
/// Uses a fixed application salt so the same passphrase always produces the same key,
/// regardless of database path.
fn derive_key(passphrase: &str) -> Result<String> {
    use argon2::{password_hash::SaltString, Argon2, PasswordHasher};

    // Changing this invalidates every existing encrypted database
    const APP_SALT: &[u8; 16] = b"sift-salt-v1-fix";

    let salt = SaltString::encode_b64(APP_SALT)
        .map_err(|e| Error::Encryption(format!("Failed to create salt: {}", e)))?;

    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| Error::Encryption(format!("Failed to derive key: {}", e)))?;

    let hash_str = hash
        .hash
        .ok_or_else(|| Error::Encryption("No hash output".to_string()))?;
    Ok(hex::encode(hash_str.as_bytes()))
}

/// Parse a SQLite datetime string into a DateTime<Utc>
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    // SQLite CURRENT_TIMESTAMP is "YYYY-MM-DD HH:MM:SS"; chrono writes RFC 3339
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|dt| dt.and_utc())
        })
        .unwrap_or_else(|_| Utc::now())
}

/// Parse a decimal stored as TEXT
pub(crate) fn parse_decimal(s: &str) -> rusqlite::Result<Decimal> {
    s.parse::<Decimal>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    db_path: String,
}

impl Database {
    /// Create a new database connection pool with encryption
    ///
    /// Requires `SIFT_DB_KEY` to be set. Use `new_unencrypted()` for
    /// development/testing without encryption.
    pub fn new(path: &str) -> Result<Self> {
        match std::env::var(DB_KEY_ENV).ok() {
            Some(key) => Self::new_with_key(path, Some(&key)),
            None => Err(Error::Encryption(format!(
                "Database encryption required. Set {} environment variable with your passphrase, \
                or use --no-encrypt for unencrypted databases (not recommended for production).",
                DB_KEY_ENV
            ))),
        }
    }

    /// Create a new unencrypted database connection pool
    pub fn new_unencrypted(path: &str) -> Result<Self> {
        Self::new_with_key(path, None)
    }

    /// Create a new database with an explicit encryption key
    pub fn new_with_key(path: &str, passphrase: Option<&str>) -> Result<Self> {
        let key_pragma = match passphrase {
            Some(pass) => Some(format!("PRAGMA key = 'x\"{}\"';", derive_key(pass)?)),
            None => None,
        };

        // Connection-scoped pragmas must be set on every pooled connection
        let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
            if let Some(ref pragma) = key_pragma {
                conn.execute_batch(pragma)?;
            }
            conn.execute_batch(
                "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000; PRAGMA temp_store = MEMORY;",
            )?;
            Ok(())
        });

        let pool = Pool::builder().max_size(10).build(manager)?;

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create a throwaway database (for testing)
    ///
    /// Uses a temporary file rather than `:memory:` because each pooled
    /// connection to `:memory:` would see its own empty database.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "sift_test_{}_{}.db",
            std::process::id(),
            id
        ));
        let path = path.to_string_lossy().to_string();

        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(format!("{}-wal", path));
        let _ = std::fs::remove_file(format!("{}-shm", path));

        Self::new_unencrypted(&path)
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- WAL mode: readers see a consistent snapshot while a writer holds the lock
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = 2000;

            -- Import batches (one per successful file import)
            CREATE TABLE IF NOT EXISTS import_batches (
                id INTEGER PRIMARY KEY,
                filename TEXT NOT NULL,
                import_date DATETIME NOT NULL,
                transaction_count INTEGER NOT NULL,
                total_amount TEXT NOT NULL,              -- decimal as canonical text
                job_id TEXT                              -- job that created the batch
            );

            CREATE INDEX IF NOT EXISTS idx_import_batches_date ON import_batches(import_date);

            -- Transactions (exclusively owned by a batch)
            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY,
                batch_id INTEGER NOT NULL REFERENCES import_batches(id) ON DELETE CASCADE,
                date DATE NOT NULL,
                amount TEXT NOT NULL,                    -- decimal as canonical text
                description TEXT NOT NULL,
                vendor TEXT,
                category TEXT NOT NULL DEFAULT 'Uncategorized',
                subcategory TEXT,
                is_income BOOLEAN NOT NULL DEFAULT 0,
                is_categorized BOOLEAN NOT NULL DEFAULT 0,
                confidence_score REAL NOT NULL DEFAULT 0,
                import_hash TEXT NOT NULL,
                raw_data TEXT,                           -- JSON of original CSV row
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_batch ON transactions(batch_id);
            CREATE INDEX IF NOT EXISTS idx_transactions_date ON transactions(date);
            CREATE INDEX IF NOT EXISTS idx_transactions_category ON transactions(category);

            -- Categorization rules
            CREATE TABLE IF NOT EXISTS rules (
                id INTEGER PRIMARY KEY,
                pattern TEXT NOT NULL,
                pattern_type TEXT NOT NULL DEFAULT 'contains',  -- contains, regex, exact
                match_field TEXT NOT NULL DEFAULT 'any',        -- description, vendor, any
                category TEXT NOT NULL,
                subcategory TEXT,
                confidence_weight REAL NOT NULL,
                created_by TEXT NOT NULL,                       -- manual, auto-improvement
                version INTEGER NOT NULL DEFAULT 1,
                active BOOLEAN NOT NULL DEFAULT 1,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_rules_pattern ON rules(pattern);
            CREATE INDEX IF NOT EXISTS idx_rules_active ON rules(active);

            -- Rule revisions (audit trail, one row per version)
            CREATE TABLE IF NOT EXISTS rule_revisions (
                id INTEGER PRIMARY KEY,
                rule_id INTEGER NOT NULL REFERENCES rules(id),
                version INTEGER NOT NULL,
                category TEXT NOT NULL,
                subcategory TEXT,
                confidence_weight REAL NOT NULL,
                active BOOLEAN NOT NULL,
                reason TEXT NOT NULL,
                feedback_ids TEXT NOT NULL DEFAULT '[]',  -- JSON array of triggering feedback
                improvement_run_id INTEGER,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(rule_id, version)
            );

            -- User feedback (append-only; snapshots survive batch deletion)
            CREATE TABLE IF NOT EXISTS feedback (
                id INTEGER PRIMARY KEY,
                transaction_id INTEGER NOT NULL,
                feedback_type TEXT NOT NULL,             -- correct, incorrect, suggest_alternative
                suggested_category TEXT,
                suggested_subcategory TEXT,
                comment TEXT,
                batch_id INTEGER,
                description TEXT NOT NULL,
                vendor TEXT,
                original_category TEXT NOT NULL,
                original_subcategory TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_feedback_transaction ON feedback(transaction_id);
            CREATE INDEX IF NOT EXISTS idx_feedback_batch ON feedback(batch_id);

            -- Auto-improvement runs
            CREATE TABLE IF NOT EXISTS improvement_runs (
                id INTEGER PRIMARY KEY,
                batch_id INTEGER,
                job_id TEXT,
                started_at DATETIME NOT NULL,
                completed_at DATETIME,
                rules_created INTEGER NOT NULL DEFAULT 0,
                rules_updated INTEGER NOT NULL DEFAULT 0,
                ml_model_improvements INTEGER NOT NULL DEFAULT 0,
                transactions_reprocessed INTEGER NOT NULL DEFAULT 0,
                improvement_score REAL NOT NULL DEFAULT 0,
                processing_time_ms INTEGER NOT NULL DEFAULT 0
            );

            -- Feedback already consumed by an improvement run (never re-applied)
            CREATE TABLE IF NOT EXISTS improvement_consumed (
                feedback_id INTEGER PRIMARY KEY REFERENCES feedback(id),
                run_id INTEGER NOT NULL REFERENCES improvement_runs(id),
                consumed_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            -- Job snapshots (live progress is in memory; this survives restarts)
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                stage TEXT NOT NULL,
                message TEXT NOT NULL DEFAULT '',
                details TEXT NOT NULL DEFAULT '{}',
                errors TEXT NOT NULL DEFAULT '[]',
                warnings TEXT NOT NULL DEFAULT '[]',
                result_ref TEXT,
                caller TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs(created_at);

            -- Audit log (tracks all mutating API calls)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
                caller TEXT NOT NULL,
                action TEXT NOT NULL,
                entity_type TEXT,
                entity_id INTEGER,
                details TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_audit_log_timestamp ON audit_log(timestamp);
            CREATE INDEX IF NOT EXISTS idx_audit_log_action ON audit_log(action);
            "#,
        )?;

        info!(path = %self.db_path, "Database migrations complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests;
