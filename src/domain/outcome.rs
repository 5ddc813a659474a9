//! Reaper decision and outcome types.
//!
//! A pass first produces a `Verdict` per container (pure decision), then
//! turns every release verdict into a `Disposition` once the release side
//! effect has run.

use super::container::{BuildId, SavedContainer};

/// Why a container is being released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReleaseReason {
    /// Produced by a build that already succeeded
    SuccessfulBuild,
    /// No originating build could be found
    Orphaned,
    /// Pipeline could not be found or failed to load
    PipelineMissing,
    /// Pipeline exists but has no config, or the config failed to load
    ConfigMissing,
    /// Job no longer appears in the pipeline's current config
    JobRemoved,
    /// Build could not be resolved to a job
    UnresolvedBuild,
    /// The job has a successful build newer than every failed one
    SucceededSince { succeeded: BuildId },
    /// A later failed build of the same job exists
    SupersededByFailure { latest_failed: BuildId },
}

impl ReleaseReason {
    /// Short label used in logs and CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseReason::SuccessfulBuild => "successful-build",
            ReleaseReason::Orphaned => "orphaned",
            ReleaseReason::PipelineMissing => "pipeline-missing",
            ReleaseReason::ConfigMissing => "config-missing",
            ReleaseReason::JobRemoved => "job-removed",
            ReleaseReason::UnresolvedBuild => "unresolved-build",
            ReleaseReason::SucceededSince { .. } => "succeeded-since",
            ReleaseReason::SupersededByFailure { .. } => "superseded-by-failure",
        }
    }

    /// Check if this release was forced by missing or stale provenance.
    pub fn is_provenance_failure(&self) -> bool {
        matches!(
            self,
            ReleaseReason::PipelineMissing
                | ReleaseReason::ConfigMissing
                | ReleaseReason::JobRemoved
                | ReleaseReason::UnresolvedBuild
        )
    }
}

impl std::fmt::Display for ReleaseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReleaseReason::SucceededSince { succeeded } => write!(f, "{} (build {})", self.as_str(), succeeded),
            ReleaseReason::SupersededByFailure { latest_failed } => {
                write!(f, "{} (build {})", self.as_str(), latest_failed)
            }
            _ => write!(f, "{}", self.as_str()),
        }
    }
}

/// Pure decision for a single container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Release(ReleaseReason),
    Retain,
}

impl Decision {
    pub fn is_release(&self) -> bool {
        matches!(self, Decision::Release(_))
    }
}

/// A container paired with the decision made about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub container: SavedContainer,
    pub decision: Decision,
}

impl Verdict {
    pub fn release(container: SavedContainer, reason: ReleaseReason) -> Self {
        Self {
            container,
            decision: Decision::Release(reason),
        }
    }

    pub fn retain(container: SavedContainer) -> Self {
        Self {
            container,
            decision: Decision::Retain,
        }
    }

    pub fn handle(&self) -> &str {
        &self.container.handle
    }
}

/// What actually happened to a container during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Worker and registry both carry the finite TTL
    Released(ReleaseReason),
    /// Kept with infinite TTL for the next retry
    Retained,
    /// Selected for release but the release did not complete
    Failed { reason: ReleaseReason, error: String },
}

/// Outcome for one container in a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerOutcome {
    pub handle: String,
    pub disposition: Disposition,
}

/// Candidate sets fetched by a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Orphan,
    SuccessfulBuild,
    UnsuccessfulBuild,
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Bucket::Orphan => "orphan",
            Bucket::SuccessfulBuild => "successful-build",
            Bucket::UnsuccessfulBuild => "unsuccessful-build",
        };
        write!(f, "{}", s)
    }
}

/// Result of a completed reaper pass.
#[derive(Debug, Clone, Default)]
pub struct ReapReport {
    /// One entry per container considered
    pub outcomes: Vec<ContainerOutcome>,

    /// Best-effort buckets whose query failed and were not disposed of
    pub skipped_buckets: Vec<Bucket>,
}

impl ReapReport {
    /// Handles released this pass.
    pub fn released(&self) -> Vec<&str> {
        self.handles_where(|d| matches!(d, Disposition::Released(_)))
    }

    /// Handles kept with infinite TTL.
    pub fn retained(&self) -> Vec<&str> {
        self.handles_where(|d| matches!(d, Disposition::Retained))
    }

    /// Handles whose release failed.
    pub fn failed(&self) -> Vec<&str> {
        self.handles_where(|d| matches!(d, Disposition::Failed { .. }))
    }

    /// Look up the outcome for a handle.
    pub fn outcome(&self, handle: &str) -> Option<&Disposition> {
        self.outcomes.iter().find(|o| o.handle == handle).map(|o| &o.disposition)
    }

    /// Total containers considered.
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: ReapReport) {
        self.outcomes.extend(other.outcomes);
        self.skipped_buckets.extend(other.skipped_buckets);
    }

    fn handles_where(&self, pred: impl Fn(&Disposition) -> bool) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| pred(&o.disposition))
            .map(|o| o.handle.as_str())
            .collect()
    }
}

/// Side-effect-free result of planning a pass.
#[derive(Debug, Clone, Default)]
pub struct ReapPlan {
    pub verdicts: Vec<Verdict>,
    pub skipped_buckets: Vec<Bucket>,
}

impl ReapPlan {
    /// Verdicts selecting release.
    pub fn releases(&self) -> impl Iterator<Item = &Verdict> {
        self.verdicts.iter().filter(|v| v.decision.is_release())
    }

    /// Verdicts selecting retention.
    pub fn retains(&self) -> impl Iterator<Item = &Verdict> {
        self.verdicts.iter().filter(|v| !v.decision.is_release())
    }

    /// Look up the decision for a handle.
    pub fn decision(&self, handle: &str) -> Option<&Decision> {
        self.verdicts.iter().find(|v| v.handle() == handle).map(|v| &v.decision)
    }
}
