//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Shared utilities (open_db, load_config, run_job) plus init and jobs
//! - `batches` - Batch commands (list, show, delete)
//! - `import` - CSV import and transaction export
//! - `improve` - Auto-improvement from feedback
//! - `rules` - Rule management commands
//! - `serve` - Web server command
//! - `transactions` - Transaction listing and feedback

pub mod batches;
pub mod core;
pub mod import;
pub mod improve;
pub mod rules;
pub mod serve;
pub mod transactions;

// Re-export command functions for main.rs
pub use batches::*;
pub use core::*;
pub use import::*;
pub use improve::*;
pub use rules::*;
pub use serve::*;
pub use transactions::*;

/// Truncate a string to a maximum length, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
