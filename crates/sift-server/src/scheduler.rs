//! Background housekeeping for the job manager
//!
//! Expired export artifacts and long-finished jobs are dropped from memory on
//! a fixed interval. Persisted job snapshots are untouched.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, info};

use sift_core::JobManager;

/// Start the artifact pruner as a background task
///
/// This function spawns a tokio task that runs for the life of the server.
pub fn start_artifact_pruner(jobs: Arc<JobManager>, every: Duration) {
    info!("Starting artifact pruner: every {}s", every.as_secs());

    tokio::spawn(async move {
        let mut ticker = interval(every);

        // The first tick fires immediately and there is nothing to prune yet
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = jobs.prune();
            if removed > 0 {
                info!(removed, "Pruned expired artifacts and finished jobs");
            } else {
                debug!("Artifact pruner found nothing to remove");
            }
        }
    });
}
