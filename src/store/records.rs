//! Row types for the SQLite store.

use serde::{Deserialize, Serialize};

use crate::domain::{BuildId, OutcomeClass, PipelineId};

/// Lifecycle status of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    /// Scheduled, not yet running
    Pending,
    /// Running on a worker
    Started,
    /// Finished successfully
    Succeeded,
    /// A step failed
    Failed,
    /// The build could not run to completion
    Errored,
    /// Stopped by a user
    Aborted,
}

impl BuildStatus {
    pub const ALL: [BuildStatus; 6] = [
        BuildStatus::Pending,
        BuildStatus::Started,
        BuildStatus::Succeeded,
        BuildStatus::Failed,
        BuildStatus::Errored,
        BuildStatus::Aborted,
    ];

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Started => "started",
            BuildStatus::Succeeded => "succeeded",
            BuildStatus::Failed => "failed",
            BuildStatus::Errored => "errored",
            BuildStatus::Aborted => "aborted",
        }
    }

    /// Parse from the stored string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BuildStatus::Pending),
            "started" => Some(BuildStatus::Started),
            "succeeded" => Some(BuildStatus::Succeeded),
            "failed" => Some(BuildStatus::Failed),
            "errored" => Some(BuildStatus::Errored),
            "aborted" => Some(BuildStatus::Aborted),
            _ => None,
        }
    }

    /// Check if the build has finished.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BuildStatus::Pending | BuildStatus::Started)
    }

    /// Outcome class of containers from a build in this status.
    ///
    /// `None` while the build is still running: its containers are in no
    /// candidate set.
    pub fn outcome_class(&self) -> Option<OutcomeClass> {
        match self {
            BuildStatus::Pending | BuildStatus::Started => None,
            BuildStatus::Succeeded => Some(OutcomeClass::SuccessfulBuild),
            BuildStatus::Failed | BuildStatus::Errored | BuildStatus::Aborted => Some(OutcomeClass::UnsuccessfulBuild),
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A container to be recorded in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewContainer {
    pub handle: String,
    pub build_id: Option<BuildId>,
    pub pipeline_id: PipelineId,
    pub job_name: String,
}

impl NewContainer {
    /// Container created by a build step.
    pub fn for_build(
        handle: impl Into<String>,
        build_id: BuildId,
        pipeline_id: PipelineId,
        job_name: impl Into<String>,
    ) -> Self {
        Self {
            handle: handle.into(),
            build_id: Some(build_id),
            pipeline_id,
            job_name: job_name.into(),
        }
    }
}
