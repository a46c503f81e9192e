//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Sift - Import, categorize and learn from transaction files
#[derive(Parser)]
#[command(name = "sift")]
#[command(about = "Transaction import and categorization pipeline", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "sift.db", global = true)]
    pub db: PathBuf,

    /// Config file (defaults to SIFT_CONFIG, then the platform data directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set SIFT_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database
    Init,

    /// Import a CSV statement as a new batch
    Import {
        /// CSV file to import
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Manage import batches (list, show, delete)
    Batches {
        #[command(subcommand)]
        action: Option<BatchesAction>,
    },

    /// List imported transactions
    Transactions {
        /// Only transactions from this batch
        #[arg(short, long)]
        batch: Option<i64>,

        /// Only transactions in this category
        #[arg(short, long)]
        category: Option<String>,

        /// Only transactions still waiting for a category
        #[arg(long)]
        uncategorized: bool,

        /// Number of transactions to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Manage categorization rules (list, add, update, deactivate, history)
    Rules {
        #[command(subcommand)]
        action: Option<RulesAction>,
    },

    /// Record feedback on a transaction's category
    Feedback {
        /// Transaction ID
        transaction_id: i64,

        /// Feedback type: correct, incorrect, suggest_alternative
        #[arg(short = 't', long = "type", default_value = "incorrect")]
        feedback_type: String,

        /// Category the transaction should have
        #[arg(short, long)]
        category: Option<String>,

        /// Optional comment
        #[arg(long)]
        comment: Option<String>,
    },

    /// Learn new rules from accumulated feedback
    Improve {
        /// Only mine feedback on this batch
        #[arg(short, long)]
        batch: Option<i64>,

        /// Minimum agreement ratio for a new rule (0-1)
        #[arg(long)]
        min_confidence: Option<f64>,

        /// Cap on transactions examined
        #[arg(long)]
        max_transactions: Option<i64>,
    },

    /// Export transactions to CSV or JSON
    Export {
        /// Output file (defaults to the generated filename)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Export format: csv, json
        #[arg(short, long, default_value = "csv")]
        format: String,

        /// Only transactions from this batch
        #[arg(short, long)]
        batch: Option<i64>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,

        /// Only transactions in this category
        #[arg(short, long)]
        category: Option<String>,

        /// Comma-separated columns (default: all)
        #[arg(long)]
        columns: Option<String>,
    },

    /// Show recent jobs
    Jobs {
        /// Number of jobs to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Start the web server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Allowed CORS origin (repeatable)
        #[arg(long = "allow-origin")]
        allowed_origins: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum BatchesAction {
    /// List all batches, newest first
    List,
    /// Show one batch and its totals
    Show {
        /// Batch ID
        id: i64,
    },
    /// Delete a batch and all of its transactions
    Delete {
        /// Batch ID
        id: i64,

        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum RulesAction {
    /// List rules
    List {
        /// Include deactivated rules
        #[arg(long)]
        all: bool,
    },
    /// Add a new rule
    Add {
        /// Pattern to match
        pattern: String,

        /// Category to assign
        #[arg(short, long)]
        category: String,

        /// Optional subcategory
        #[arg(long)]
        subcategory: Option<String>,

        /// Pattern type: contains, regex, exact
        #[arg(short = 't', long, default_value = "contains")]
        pattern_type: String,

        /// Field to match: description, vendor, any
        #[arg(long, default_value = "any")]
        field: String,

        /// Confidence weight (0-1)
        #[arg(short, long, default_value = "0.8")]
        weight: f64,
    },
    /// Change a rule's category or weight (creates a new version)
    Update {
        /// Rule ID
        id: i64,

        /// New category
        #[arg(short, long)]
        category: Option<String>,

        /// New confidence weight (0-1)
        #[arg(short, long)]
        weight: Option<f64>,

        /// Reason recorded in the rule history
        #[arg(short, long, default_value = "manual update")]
        reason: String,
    },
    /// Deactivate a rule (rules are never deleted)
    Deactivate {
        /// Rule ID
        id: i64,

        /// Reason recorded in the rule history
        #[arg(short, long, default_value = "manual deactivation")]
        reason: String,
    },
    /// Show a rule's version history
    History {
        /// Rule ID
        id: i64,
    },
    /// Test which rules match a description
    Test {
        /// Description to test
        description: String,
    },
}
