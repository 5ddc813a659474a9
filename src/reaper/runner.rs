//! The reaper pass.
//!
//! A pass works through the candidate buckets in order:
//! 1. Successful-build containers (and orphans, when enabled) are released
//!    unconditionally; successful builds also feed the per-job aggregate.
//! 2. Unsuccessful-build containers are checked against the live pipeline
//!    config and resolved to their job.
//! 3. Each job's group is decided against the aggregate from step 1.
//!
//! Only a failure to fetch the unsuccessful bucket aborts the pass.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{
    Bucket, BuildId, JobId, PipelineConfig, PipelineId, ReapPlan, ReapReport, ReleaseReason, SavedContainer, Verdict,
};
use crate::error::Result;
use crate::reaper::decision::{self, ResolvedContainer};
use crate::reaper::release::Releaser;
use crate::reaper::traits::{BuildJobResolver, ContainerRegistry, PipelineStore, WorkerDirectory};

/// Configuration for a reaper.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Finite TTL applied to released containers
    pub container_ttl: Duration,
    /// Maximum releases in flight at once
    pub max_concurrent_releases: usize,
    /// Also dispose of orphan containers each pass
    pub reap_orphans: bool,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            container_ttl: Duration::from_secs(5 * 60),
            max_concurrent_releases: 8,
            reap_orphans: false,
        }
    }
}

impl ReaperConfig {
    /// Set the TTL applied on release.
    pub fn with_container_ttl(mut self, ttl: Duration) -> Self {
        self.container_ttl = ttl;
        self
    }

    /// Set the release fan-out bound.
    pub fn with_max_concurrent_releases(mut self, n: usize) -> Self {
        self.max_concurrent_releases = n;
        self
    }

    /// Enable or disable orphan disposal.
    pub fn with_reap_orphans(mut self, enabled: bool) -> Self {
        self.reap_orphans = enabled;
        self
    }
}

/// Verdicts for the unconditionally released buckets plus the aggregate
/// they produced.
struct UnconditionalPhase {
    verdicts: Vec<Verdict>,
    successful: HashMap<JobId, BuildId>,
    skipped: Vec<Bucket>,
}

/// Reclaims infinite-TTL containers that no longer serve a caching purpose.
pub struct ContainerReaper {
    config: ReaperConfig,
    registry: Arc<dyn ContainerRegistry>,
    resolver: Arc<dyn BuildJobResolver>,
    pipelines: Arc<dyn PipelineStore>,
    releaser: Releaser,
}

impl std::fmt::Debug for ContainerReaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerReaper")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ContainerReaper {
    pub fn new(
        registry: Arc<dyn ContainerRegistry>,
        resolver: Arc<dyn BuildJobResolver>,
        workers: Arc<dyn WorkerDirectory>,
        pipelines: Arc<dyn PipelineStore>,
        config: ReaperConfig,
    ) -> Self {
        let releaser = Releaser::new(workers, registry.clone(), config.container_ttl);
        Self {
            config,
            registry,
            resolver,
            pipelines,
            releaser,
        }
    }

    pub fn config(&self) -> &ReaperConfig {
        &self.config
    }

    /// Run one pass, releasing everything selected.
    ///
    /// Returns `Err` only if the unsuccessful-build candidates cannot be
    /// fetched. Releases from the first bucket have already been applied by
    /// then.
    pub async fn run(&self) -> Result<ReapReport> {
        tracing::info!(reap_orphans = self.config.reap_orphans, "running-container-reaper");

        let first = self.plan_unconditional().await;
        let mut report = ReapReport {
            outcomes: self
                .releaser
                .apply(first.verdicts, self.config.max_concurrent_releases)
                .await,
            skipped_buckets: first.skipped,
        };

        let failed = self.fetch_unsuccessful().await?;
        let verdicts = self.plan_unsuccessful(failed, &first.successful).await;
        report.merge(ReapReport {
            outcomes: self.releaser.apply(verdicts, self.config.max_concurrent_releases).await,
            skipped_buckets: Vec::new(),
        });

        tracing::info!(
            released = report.released().len(),
            retained = report.retained().len(),
            failed = report.failed().len(),
            "container-reaper-pass-complete"
        );
        Ok(report)
    }

    /// Decide a full pass without releasing anything.
    pub async fn plan(&self) -> Result<ReapPlan> {
        let first = self.plan_unconditional().await;
        let failed = self.fetch_unsuccessful().await?;

        let mut verdicts = first.verdicts;
        verdicts.extend(self.plan_unsuccessful(failed, &first.successful).await);

        Ok(ReapPlan {
            verdicts,
            skipped_buckets: first.skipped,
        })
    }

    async fn plan_unconditional(&self) -> UnconditionalPhase {
        let mut verdicts = Vec::new();
        let mut skipped = Vec::new();

        if self.config.reap_orphans {
            match self.registry.find_orphan_containers_with_infinite_ttl().await {
                Ok(orphans) => {
                    verdicts.extend(
                        orphans
                            .into_iter()
                            .map(|c| Verdict::release(c, ReleaseReason::Orphaned)),
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed-to-find-orphan-containers");
                    skipped.push(Bucket::Orphan);
                }
            }
        }

        let successful = match self
            .registry
            .find_containers_from_successful_builds_with_infinite_ttl()
            .await
        {
            Ok(containers) => {
                let (released, aggregate) = self.plan_successful(containers).await;
                verdicts.extend(released);
                aggregate
            }
            Err(e) => {
                tracing::error!(error = %e, "failed-to-find-successful-containers");
                skipped.push(Bucket::SuccessfulBuild);
                HashMap::new()
            }
        };

        UnconditionalPhase {
            verdicts,
            successful,
            skipped,
        }
    }

    /// Every successful container is released. Those whose build resolves to
    /// a job contribute to the aggregate; the rest are released all the same.
    async fn plan_successful(&self, containers: Vec<SavedContainer>) -> (Vec<Verdict>, HashMap<JobId, BuildId>) {
        let mut builds = Vec::new();
        let mut verdicts = Vec::with_capacity(containers.len());

        for container in containers {
            tracing::debug!(
                handle = %container.handle,
                pipeline_id = container.pipeline_id,
                "successful-container"
            );

            if let Some(build_id) = container.build_id {
                if let Some(job_id) = self.resolve_job(build_id).await {
                    builds.push((job_id, build_id));
                }
            }

            verdicts.push(Verdict::release(container, ReleaseReason::SuccessfulBuild));
        }

        (verdicts, decision::successful_aggregate(builds))
    }

    async fn fetch_unsuccessful(&self) -> Result<Vec<SavedContainer>> {
        self.registry
            .find_containers_from_unsuccessful_builds_with_infinite_ttl()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "failed-to-find-unsuccessful-containers"))
    }

    async fn plan_unsuccessful(
        &self,
        containers: Vec<SavedContainer>,
        successful: &HashMap<JobId, BuildId>,
    ) -> Vec<Verdict> {
        let mut configs = PassConfigs::default();
        let mut verdicts = Vec::new();
        let mut resolved = Vec::new();

        for container in containers {
            match self.classify_unsuccessful(container, &mut configs).await {
                Ok(r) => resolved.push(r),
                Err(stale) => verdicts.push(stale),
            }
        }

        verdicts.extend(decision::decide_all(decision::failed_groups(resolved), successful));
        verdicts
    }

    /// Resolve an unsuccessful container to its live job, or decide to
    /// release it when its provenance cannot be established.
    async fn classify_unsuccessful(
        &self,
        container: SavedContainer,
        configs: &mut PassConfigs,
    ) -> std::result::Result<ResolvedContainer, Verdict> {
        let config = match configs.get(self.pipelines.as_ref(), container.pipeline_id).await {
            Ok(config) => config,
            Err(reason) => {
                tracing::warn!(
                    handle = %container.handle,
                    pipeline_id = container.pipeline_id,
                    reason = %reason,
                    "releasing-container-without-pipeline-config"
                );
                return Err(Verdict::release(container, reason));
            }
        };

        if !config.has_job(&container.job_name) {
            tracing::info!(
                handle = %container.handle,
                job = %container.job_name,
                pipeline_id = container.pipeline_id,
                "job-removed-from-pipeline"
            );
            return Err(Verdict::release(container, ReleaseReason::JobRemoved));
        }

        let Some(build_id) = container.build_id else {
            tracing::warn!(handle = %container.handle, "unsuccessful-container-without-build");
            return Err(Verdict::release(container, ReleaseReason::UnresolvedBuild));
        };

        match self.resolve_job(build_id).await {
            Some(job_id) => Ok(ResolvedContainer {
                job_id,
                build_id,
                container,
            }),
            None => Err(Verdict::release(container, ReleaseReason::UnresolvedBuild)),
        }
    }

    /// `None` on a miss or an error; both are logged.
    async fn resolve_job(&self, build_id: BuildId) -> Option<JobId> {
        match self.resolver.find_job_id_for_build(build_id).await {
            Ok(Some(job_id)) => Some(job_id),
            Ok(None) => {
                tracing::warn!(build_id = build_id, found = false, "find-job-id-for-build");
                None
            }
            Err(e) => {
                tracing::error!(build_id = build_id, error = %e, "find-job-id-for-build");
                None
            }
        }
    }
}

/// Pipeline configs fetched during one pass.
///
/// Each pipeline is loaded at most once per pass so every container of a
/// pipeline is judged against the same config.
#[derive(Default)]
struct PassConfigs {
    loaded: HashMap<PipelineId, std::result::Result<Arc<PipelineConfig>, ReleaseReason>>,
}

impl PassConfigs {
    async fn get(
        &mut self,
        pipelines: &dyn PipelineStore,
        pipeline_id: PipelineId,
    ) -> std::result::Result<Arc<PipelineConfig>, ReleaseReason> {
        if let Some(loaded) = self.loaded.get(&pipeline_id) {
            return loaded.clone();
        }

        let loaded = Self::load(pipelines, pipeline_id).await;
        self.loaded.insert(pipeline_id, loaded.clone());
        loaded
    }

    async fn load(
        pipelines: &dyn PipelineStore,
        pipeline_id: PipelineId,
    ) -> std::result::Result<Arc<PipelineConfig>, ReleaseReason> {
        let pipeline = match pipelines.pipeline_by_id(pipeline_id).await {
            Ok(Some(pipeline)) => pipeline,
            Ok(None) => {
                tracing::warn!(pipeline_id = pipeline_id, "no-pipeline");
                return Err(ReleaseReason::PipelineMissing);
            }
            Err(e) => {
                tracing::error!(pipeline_id = pipeline_id, error = %e, "no-pipeline");
                return Err(ReleaseReason::PipelineMissing);
            }
        };

        match pipeline.config().await {
            Ok(Some((config, version))) => {
                tracing::debug!(pipeline_id = pipeline_id, version = %version, "loaded-pipeline-config");
                Ok(Arc::new(config))
            }
            Ok(None) => {
                tracing::warn!(pipeline_id = pipeline_id, "pipeline-config-not-found");
                Err(ReleaseReason::ConfigMissing)
            }
            Err(e) => {
                tracing::error!(pipeline_id = pipeline_id, error = %e, "failed-to-get-pipeline-config");
                Err(ReleaseReason::ConfigMissing)
            }
        }
    }
}
