//! End-to-end reaper passes against the SQLite store
//!
//! The store plays every collaborator: registry, resolver, pipeline config
//! store and the worker-reported container view.

use std::sync::Arc;
use std::time::Duration;

use reapr::domain::{ConfigVersion, Disposition, JobConfig, PipelineConfig, ReleaseReason, TtlClass};
use reapr::error::Result;
use reapr::store::{BuildStatus, NewContainer, SqliteStore};
use reapr::{ContainerReaper, ReaperConfig};
use tempfile::TempDir;

const TTL: Duration = Duration::from_secs(300);

struct Fleet {
    store: Arc<SqliteStore>,
    pipeline: i64,
    _temp_dir: TempDir,
}

impl Fleet {
    /// A pipeline "main" configured with jobs "unit" and "lint".
    fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let store = SqliteStore::open(&temp_dir.path().join("reapr.db"))?;
        let pipeline = store.create_pipeline("main")?;
        let config = PipelineConfig::default()
            .with_job(JobConfig::named("unit"))
            .with_job(JobConfig::named("lint"));
        store.save_config(pipeline, &config, ConfigVersion(0))?;

        Ok(Self {
            store: Arc::new(store),
            pipeline,
            _temp_dir: temp_dir,
        })
    }

    /// Finish a build of `job` and record one live container for it.
    fn build(&self, job: &str, status: BuildStatus, handle: &str) -> Result<i64> {
        let job_id = self.store.create_job(self.pipeline, job)?;
        let build = self.store.create_build(Some(job_id))?;
        self.store
            .create_container(&NewContainer::for_build(handle, build, self.pipeline, job))?;
        self.store.report_worker_container(handle, "worker-a")?;
        self.store.finish_build(build, status)?;
        Ok(build)
    }

    fn reaper(&self, config: ReaperConfig) -> ContainerReaper {
        self.reaper_with_ttl(config, TTL)
    }

    fn reaper_with_ttl(&self, config: ReaperConfig, ttl: Duration) -> ContainerReaper {
        ContainerReaper::new(
            self.store.clone(),
            self.store.clone(),
            self.store.clone(),
            self.store.clone(),
            config.with_container_ttl(ttl),
        )
    }

    fn is_infinite(&self, handle: &str) -> bool {
        matches!(self.store.container_ttl(handle).unwrap(), Some(TtlClass::Infinite))
    }
}

/// Integration test: job with two failures keeps only the latest
#[tokio::test]
async fn test_latest_failure_kept_for_retry() -> Result<()> {
    let fleet = Fleet::new()?;
    fleet.build("unit", BuildStatus::Failed, "h10")?;
    fleet.build("unit", BuildStatus::Failed, "h12")?;

    let report = fleet.reaper(ReaperConfig::default()).run().await?;

    assert_eq!(report.released(), vec!["h10"]);
    assert_eq!(report.retained(), vec!["h12"]);
    assert!(!fleet.is_infinite("h10"));
    assert!(fleet.is_infinite("h12"));
    assert_eq!(fleet.store.worker_container_ttl("h10")?, Some(TTL));
    assert_eq!(fleet.store.worker_container_ttl("h12")?, None);
    Ok(())
}

/// Integration test: a later success releases every failed container of the job
#[tokio::test]
async fn test_success_releases_failures() -> Result<()> {
    let fleet = Fleet::new()?;
    fleet.build("unit", BuildStatus::Failed, "h10")?;
    fleet.build("unit", BuildStatus::Errored, "h12")?;
    let succeeded = fleet.build("unit", BuildStatus::Succeeded, "h13")?;

    let report = fleet.reaper(ReaperConfig::default()).run().await?;

    assert_eq!(report.outcome("h13"), Some(&Disposition::Released(ReleaseReason::SuccessfulBuild)));
    assert_eq!(
        report.outcome("h12"),
        Some(&Disposition::Released(ReleaseReason::SucceededSince { succeeded }))
    );
    for handle in ["h10", "h12", "h13"] {
        assert!(!fleet.is_infinite(handle), "{} should be finite", handle);
    }
    Ok(())
}

/// Integration test: removing a job from the config releases its containers
#[tokio::test]
async fn test_removed_job_released() -> Result<()> {
    let fleet = Fleet::new()?;
    fleet.build("lint", BuildStatus::Failed, "hX")?;
    fleet.build("unit", BuildStatus::Failed, "hU")?;
    fleet.store.save_config(
        fleet.pipeline,
        &PipelineConfig::default().with_job(JobConfig::named("unit")),
        ConfigVersion(1),
    )?;

    let report = fleet.reaper(ReaperConfig::default()).run().await?;

    assert_eq!(report.outcome("hX"), Some(&Disposition::Released(ReleaseReason::JobRemoved)));
    assert_eq!(report.outcome("hU"), Some(&Disposition::Retained));
    Ok(())
}

/// Integration test: builds of one-off runs cannot be resolved to a job
#[tokio::test]
async fn test_unresolvable_build_released() -> Result<()> {
    let fleet = Fleet::new()?;
    let build = fleet.store.create_build(None)?;
    fleet
        .store
        .create_container(&NewContainer::for_build("hY", build, fleet.pipeline, "unit"))?;
    fleet.store.report_worker_container("hY", "worker-b")?;
    fleet.store.finish_build(build, BuildStatus::Failed)?;

    let report = fleet.reaper(ReaperConfig::default()).run().await?;

    assert_eq!(report.outcome("hY"), Some(&Disposition::Released(ReleaseReason::UnresolvedBuild)));
    Ok(())
}

/// Integration test: a container gone from its worker keeps its registry TTL
#[tokio::test]
async fn test_missing_worker_container_isolated() -> Result<()> {
    let fleet = Fleet::new()?;
    fleet.build("unit", BuildStatus::Failed, "h10")?;
    fleet.build("unit", BuildStatus::Failed, "h12")?;
    fleet.build("unit", BuildStatus::Succeeded, "h13")?;
    fleet.store.remove_worker_container("h12")?;

    let report = fleet.reaper(ReaperConfig::default()).run().await?;

    assert_eq!(report.failed(), vec!["h12"]);
    assert!(fleet.is_infinite("h12"));
    assert!(!fleet.is_infinite("h10"));
    assert!(!fleet.is_infinite("h13"));
    Ok(())
}

/// Integration test: running builds are never touched
#[tokio::test]
async fn test_running_build_not_a_candidate() -> Result<()> {
    let fleet = Fleet::new()?;
    fleet.build("unit", BuildStatus::Started, "running")?;

    let report = fleet.reaper(ReaperConfig::default().with_reap_orphans(true)).run().await?;

    assert_eq!(report.total(), 0);
    assert!(fleet.is_infinite("running"));
    Ok(())
}

/// Integration test: orphans are released only when enabled
#[tokio::test]
async fn test_orphans_released_when_enabled() -> Result<()> {
    let fleet = Fleet::new()?;
    let build = fleet.build("unit", BuildStatus::Failed, "hO")?;
    fleet.store.delete_build(build)?;

    let report = fleet.reaper(ReaperConfig::default()).run().await?;
    assert_eq!(report.total(), 0);
    assert!(fleet.is_infinite("hO"));

    let report = fleet.reaper(ReaperConfig::default().with_reap_orphans(true)).run().await?;
    assert_eq!(report.outcome("hO"), Some(&Disposition::Released(ReleaseReason::Orphaned)));
    assert!(!fleet.is_infinite("hO"));
    Ok(())
}

/// Integration test: a second pass with no changes releases nothing
#[tokio::test]
async fn test_repeated_pass_is_idempotent() -> Result<()> {
    let fleet = Fleet::new()?;
    fleet.build("unit", BuildStatus::Failed, "h10")?;
    fleet.build("unit", BuildStatus::Failed, "h12")?;
    fleet.build("lint", BuildStatus::Succeeded, "hS")?;
    let reaper = fleet.reaper(ReaperConfig::default());

    let first = reaper.run().await?;
    assert_eq!(first.released().len(), 2);

    let second = reaper.run().await?;
    assert!(second.released().is_empty());
    assert!(second.failed().is_empty());
    assert_eq!(second.retained(), vec!["h12"]);
    Ok(())
}

/// Integration test: released containers stay released after the config changes
#[tokio::test]
async fn test_release_is_monotonic() -> Result<()> {
    let fleet = Fleet::new()?;
    fleet.build("unit", BuildStatus::Failed, "h10")?;
    fleet.build("unit", BuildStatus::Failed, "h12")?;
    let reaper = fleet.reaper(ReaperConfig::default());

    reaper.run().await?;
    let released_at = fleet.store.container_ttl("h10")?;

    fleet.store.save_config(
        fleet.pipeline,
        &PipelineConfig::default().with_job(JobConfig::named("lint")),
        ConfigVersion(1),
    )?;
    reaper.run().await?;

    assert_eq!(fleet.store.container_ttl("h10")?, released_at);
    assert!(!fleet.is_infinite("h12"));
    Ok(())
}

/// Integration test: planning leaves the store untouched
#[tokio::test]
async fn test_plan_is_read_only() -> Result<()> {
    let fleet = Fleet::new()?;
    fleet.build("unit", BuildStatus::Failed, "h10")?;
    fleet.build("unit", BuildStatus::Failed, "h12")?;

    let plan = fleet.reaper(ReaperConfig::default()).plan().await?;

    assert_eq!(plan.releases().count(), 1);
    assert_eq!(plan.retains().count(), 1);
    assert!(fleet.is_infinite("h10"));
    assert_eq!(fleet.store.worker_container_ttl("h10")?, None);
    Ok(())
}

/// Integration test: a TTL past the representable expiry fails each release, not the pass
#[tokio::test]
async fn test_unrepresentable_expiry_fails_per_container() -> Result<()> {
    let fleet = Fleet::new()?;
    fleet.build("unit", BuildStatus::Succeeded, "hA")?;
    fleet.build("lint", BuildStatus::Succeeded, "hB")?;
    let ttl = Duration::from_secs(10_000_000_000_000);

    let report = fleet.reaper_with_ttl(ReaperConfig::default(), ttl).run().await?;

    let mut failed = report.failed();
    failed.sort();
    assert_eq!(failed, vec!["hA", "hB"]);
    assert!(fleet.is_infinite("hA"));
    assert!(fleet.is_infinite("hB"));
    // The worker already took the TTL; the registry row stays infinite.
    assert_eq!(fleet.store.worker_container_ttl("hA")?, Some(ttl));
    Ok(())
}
