//! Sift CLI - Transaction import and categorization pipeline
//!
//! Usage:
//!   sift init                  Initialize database
//!   sift import --file CSV     Validate, scan, parse and categorize a statement
//!   sift improve               Learn rules from feedback
//!   sift export -o out.csv     Export transactions
//!   sift serve --port 3000     Start the REST API

mod cli;
mod commands;

#[cfg(test)]
mod tests;

use anyhow::Result;
use clap::Parser;
use sift_core::models::TransactionFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    match cli.command {
        Commands::Init => commands::cmd_init(&cli.db, cli.no_encrypt),
        Commands::Import { file } => {
            let config = commands::load_config(cli.config.as_deref())?;
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_import(&db, &config, &file).await
        }
        Commands::Batches { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                None | Some(BatchesAction::List) => commands::cmd_batches_list(&db),
                Some(BatchesAction::Show { id }) => commands::cmd_batches_show(&db, id),
                Some(BatchesAction::Delete { id, yes }) => {
                    commands::cmd_batches_delete(&db, id, yes)
                }
            }
        }
        Commands::Transactions {
            batch,
            category,
            uncategorized,
            limit,
        } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let filter = TransactionFilter {
                batch_id: batch,
                category,
                is_categorized: uncategorized.then_some(false),
                limit: Some(limit),
                ..Default::default()
            };
            commands::cmd_transactions_list(&db, &filter)
        }
        Commands::Rules { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                None => commands::cmd_rules_list(&db, false),
                Some(RulesAction::List { all }) => commands::cmd_rules_list(&db, all),
                Some(RulesAction::Add {
                    pattern,
                    category,
                    subcategory,
                    pattern_type,
                    field,
                    weight,
                }) => commands::cmd_rules_add(
                    &db,
                    commands::AddRuleArgs {
                        pattern: &pattern,
                        category: &category,
                        subcategory: subcategory.as_deref(),
                        pattern_type: &pattern_type,
                        field: &field,
                        weight,
                    },
                )
                .map(|_| ()),
                Some(RulesAction::Update {
                    id,
                    category,
                    weight,
                    reason,
                }) => commands::cmd_rules_update(&db, id, category, weight, &reason),
                Some(RulesAction::Deactivate { id, reason }) => {
                    commands::cmd_rules_deactivate(&db, id, &reason)
                }
                Some(RulesAction::History { id }) => commands::cmd_rules_history(&db, id),
                Some(RulesAction::Test { description }) => {
                    commands::cmd_rules_test(&db, &description)
                }
            }
        }
        Commands::Feedback {
            transaction_id,
            feedback_type,
            category,
            comment,
        } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_feedback(&db, transaction_id, &feedback_type, category, comment)
        }
        Commands::Improve {
            batch,
            min_confidence,
            max_transactions,
        } => {
            let config = commands::load_config(cli.config.as_deref())?;
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_improve(&db, &config, batch, min_confidence, max_transactions).await
        }
        Commands::Export {
            output,
            format,
            batch,
            from,
            to,
            category,
            columns,
        } => {
            let config = commands::load_config(cli.config.as_deref())?;
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            let args = commands::ExportArgs {
                output,
                format,
                batch,
                from,
                to,
                category,
                columns,
            };
            commands::cmd_export(&db, &config, args).await.map(|_| ())
        }
        Commands::Jobs { limit } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_jobs(&db, limit)
        }
        Commands::Serve {
            port,
            host,
            allowed_origins,
        } => {
            commands::cmd_serve(
                &cli.db,
                cli.config.as_deref(),
                &host,
                port,
                cli.no_encrypt,
                allowed_origins,
            )
            .await
        }
    }
}
