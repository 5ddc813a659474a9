//! Periodic reaper passes.
//!
//! The core only defines a single pass; this is the driver the binary uses
//! when asked to keep reaping.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::sync::watch;

use crate::reaper::ContainerReaper;

/// Counters kept across passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackgroundStats {
    /// Passes that completed
    pub passes: u64,
    /// Passes aborted by a structural failure
    pub aborted: u64,
    /// Containers released across all passes
    pub released: u64,
    /// Releases that failed across all passes
    pub release_failures: u64,
}

/// Run reaper passes every `interval` until `shutdown` flips to `true`.
///
/// A failed pass is logged and the next one runs on schedule. A pass in
/// flight when shutdown is requested is allowed to finish.
pub async fn background_reaper_task(
    reaper: Arc<ContainerReaper>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> BackgroundStats {
    let mut stats = BackgroundStats::default();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        match reaper.run().await {
            Ok(report) => {
                stats.passes += 1;
                stats.released += report.released().len() as u64;
                stats.release_failures += report.failed().len() as u64;
                if !report.released().is_empty() || !report.failed().is_empty() {
                    info!(
                        "Reaper pass: released {} containers, {} failed, {} retained",
                        report.released().len(),
                        report.failed().len(),
                        report.retained().len()
                    );
                }
            }
            Err(e) => {
                stats.aborted += 1;
                warn!("Reaper pass aborted: {}", e);
            }
        }

        if *shutdown.borrow() {
            break;
        }
    }

    info!("Background reaper stopped after {} passes", stats.passes + stats.aborted);
    stats
}
