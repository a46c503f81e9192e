//! HTTP request handlers organized by domain
//!
//! Each submodule contains handlers for a specific API area.

pub mod audit;
pub mod batches;
pub mod export;
pub mod feedback;
pub mod health;
pub mod imports;
pub mod improve;
pub mod jobs;
pub mod rules;
pub mod transactions;

// Re-export all handlers for use in router
pub use audit::*;
pub use batches::*;
pub use export::*;
pub use feedback::*;
pub use health::*;
pub use imports::*;
pub use improve::*;
pub use jobs::*;
pub use rules::*;
pub use transactions::*;
