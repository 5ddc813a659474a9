//! Collaborator interfaces consumed by the reaper.
//!
//! Every call is an I/O boundary: async and fallible. "Not found" is modelled
//! as `Ok(None)`, never as an error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{BuildId, ConfigVersion, JobId, PipelineConfig, PipelineId, SavedContainer};
use crate::error::Result;

/// Maps a build to the job that produced it.
#[async_trait]
pub trait BuildJobResolver: Send + Sync {
    /// `Ok(None)` when the build is gone or was never tied to a job.
    async fn find_job_id_for_build(&self, build_id: BuildId) -> Result<Option<JobId>>;
}

/// Persisted container records and their expiry policy.
#[async_trait]
pub trait ContainerRegistry: Send + Sync {
    /// Infinite-TTL containers with no resolvable originating build.
    async fn find_orphan_containers_with_infinite_ttl(&self) -> Result<Vec<SavedContainer>>;

    /// Infinite-TTL containers from builds that succeeded.
    async fn find_containers_from_successful_builds_with_infinite_ttl(&self) -> Result<Vec<SavedContainer>>;

    /// Infinite-TTL containers from builds that failed, errored or were aborted.
    async fn find_containers_from_unsuccessful_builds_with_infinite_ttl(&self) -> Result<Vec<SavedContainer>>;

    /// Move a container to a finite expiry of `ttl` from now.
    async fn update_expires_at_on_container(&self, handle: &str, ttl: Duration) -> Result<()>;
}

/// A live container on some worker host.
#[async_trait]
pub trait WorkerContainer: Send + Sync {
    fn handle(&self) -> &str;

    /// Stop holding the container open and let it expire after `ttl`.
    async fn release(&self, ttl: Duration) -> Result<()>;
}

/// Finds live containers across the worker pool.
#[async_trait]
pub trait WorkerDirectory: Send + Sync {
    async fn lookup_container(&self, handle: &str) -> Result<Option<Arc<dyn WorkerContainer>>>;
}

/// Pipeline-scoped access to the configuration store.
#[async_trait]
pub trait PipelineDb: Send + Sync {
    fn pipeline_id(&self) -> PipelineId;

    /// Current config and its version, `Ok(None)` if never configured.
    async fn config(&self) -> Result<Option<(PipelineConfig, ConfigVersion)>>;
}

/// Resolves pipelines by identity.
#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn pipeline_by_id(&self, pipeline_id: PipelineId) -> Result<Option<Arc<dyn PipelineDb>>>;
}
