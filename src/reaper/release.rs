//! The release side effect.
//!
//! Releasing a container is two steps in a fixed order: instruct the worker,
//! then persist the expiry in the registry. If the worker has no live
//! container the registry is left untouched. If the registry write fails the
//! worker-side TTL stays applied; there is no way to undo it through the
//! worker interface.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};

use crate::domain::{ContainerOutcome, Decision, Disposition, Verdict};
use crate::error::{ReaprError, Result};
use crate::reaper::traits::{ContainerRegistry, WorkerContainer, WorkerDirectory};

/// Drives the two-step release against the worker pool and the registry.
#[derive(Clone)]
pub struct Releaser {
    workers: Arc<dyn WorkerDirectory>,
    registry: Arc<dyn ContainerRegistry>,
    ttl: Duration,
}

impl std::fmt::Debug for Releaser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Releaser").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

impl Releaser {
    pub fn new(workers: Arc<dyn WorkerDirectory>, registry: Arc<dyn ContainerRegistry>, ttl: Duration) -> Self {
        Self { workers, registry, ttl }
    }

    /// Release a single container.
    pub async fn release(&self, handle: &str) -> Result<()> {
        let container = self.lookup_worker_container(handle).await?;

        if let Err(e) = container.release(self.ttl).await {
            tracing::error!(handle = %handle, error = %e, "error-releasing-worker-container");
            return Err(e);
        }

        if let Err(e) = self.registry.update_expires_at_on_container(handle, self.ttl).await {
            tracing::error!(handle = %handle, error = %e, "error-updating-db-container-ttl");
            return Err(e);
        }

        tracing::debug!(handle = %handle, ttl_secs = self.ttl.as_secs(), "released-container");
        Ok(())
    }

    async fn lookup_worker_container(&self, handle: &str) -> Result<Arc<dyn WorkerContainer>> {
        match self.workers.lookup_container(handle).await {
            Ok(Some(container)) => Ok(container),
            Ok(None) => {
                tracing::error!(handle = %handle, "worker-container-not-found");
                Err(ReaprError::WorkerContainerNotFound(handle.to_string()))
            }
            Err(e) => {
                tracing::error!(handle = %handle, error = %e, "error-finding-worker-container");
                Err(e)
            }
        }
    }

    /// Apply a batch of verdicts.
    ///
    /// Releases run with at most `concurrency` in flight. Each container's
    /// two steps stay sequential within its own future, and one failure never
    /// stops its siblings.
    pub async fn apply(&self, verdicts: Vec<Verdict>, concurrency: usize) -> Vec<ContainerOutcome> {
        let mut outcomes = Vec::with_capacity(verdicts.len());
        let mut releases = Vec::new();

        for verdict in verdicts {
            match verdict.decision {
                Decision::Retain => outcomes.push(ContainerOutcome {
                    handle: verdict.container.handle,
                    disposition: Disposition::Retained,
                }),
                Decision::Release(reason) => releases.push((verdict.container.handle, reason)),
            }
        }

        let released: Vec<ContainerOutcome> = stream::iter(releases)
            .map(|(handle, reason)| async move {
                let disposition = match self.release(&handle).await {
                    Ok(()) => Disposition::Released(reason),
                    Err(e) => Disposition::Failed {
                        reason,
                        error: e.to_string(),
                    },
                };
                ContainerOutcome { handle, disposition }
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        outcomes.extend(released);
        outcomes
    }
}
