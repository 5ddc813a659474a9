//! Container records as the registry reports them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Build identifier (registry row id; later builds have larger ids)
pub type BuildId = i64;

/// Job identifier within the registry
pub type JobId = i64;

/// Pipeline identifier within the registry
pub type PipelineId = i64;

/// Expiry policy of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "class")]
pub enum TtlClass {
    /// Held open until explicitly overridden
    Infinite,
    /// Eligible for deletion by the registry once `expires_at` passes
    Finite { expires_at: DateTime<Utc> },
}

impl TtlClass {
    /// Check if this container is still held open indefinitely.
    pub fn is_infinite(&self) -> bool {
        matches!(self, TtlClass::Infinite)
    }
}

/// Which kind of build, if any, produced a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeClass {
    /// No resolvable originating build
    Orphan,
    /// Produced by a build that succeeded
    SuccessfulBuild,
    /// Produced by a build that failed, errored or was aborted
    UnsuccessfulBuild,
}

impl OutcomeClass {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeClass::Orphan => "orphan",
            OutcomeClass::SuccessfulBuild => "successful-build",
            OutcomeClass::UnsuccessfulBuild => "unsuccessful-build",
        }
    }
}

impl std::fmt::Display for OutcomeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A container record held by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedContainer {
    /// Correlates the registry record to the live worker resource
    pub handle: String,

    /// Build that created it (absent for orphans)
    pub build_id: Option<BuildId>,

    /// Name of the job the build belonged to, as configured at build time
    pub job_name: String,

    /// Pipeline the job belongs to
    pub pipeline_id: PipelineId,

    /// Current expiry policy
    pub ttl: TtlClass,

    /// Outcome of the originating build
    pub outcome: OutcomeClass,
}

impl SavedContainer {
    /// Create an infinite-TTL container record.
    pub fn new(
        handle: impl Into<String>,
        build_id: Option<BuildId>,
        job_name: impl Into<String>,
        pipeline_id: PipelineId,
        outcome: OutcomeClass,
    ) -> Self {
        Self {
            handle: handle.into(),
            build_id,
            job_name: job_name.into(),
            pipeline_id,
            ttl: TtlClass::Infinite,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_container_is_infinite() {
        let c = SavedContainer::new("h1", Some(10), "unit", 1, OutcomeClass::UnsuccessfulBuild);
        assert!(c.ttl.is_infinite());
        assert_eq!(c.build_id, Some(10));
        assert_eq!(c.job_name, "unit");
    }

    #[test]
    fn test_finite_ttl_is_not_infinite() {
        let ttl = TtlClass::Finite { expires_at: Utc::now() };
        assert!(!ttl.is_infinite());
    }

    #[test]
    fn test_outcome_class_display() {
        assert_eq!(OutcomeClass::Orphan.to_string(), "orphan");
        assert_eq!(OutcomeClass::SuccessfulBuild.to_string(), "successful-build");
        assert_eq!(OutcomeClass::UnsuccessfulBuild.to_string(), "unsuccessful-build");
    }
}
