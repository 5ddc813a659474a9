//! Storage layer for reapr.
//!
//! A single SQLite database backs every collaborator the reaper needs:
//! container registry, build-to-job resolver, pipeline config store and the
//! worker-reported container view.
//!
//! # Example
//!
//! ```ignore
//! use reapr::store::{SqliteStore, BuildStatus, NewContainer};
//! use reapr::domain::{ConfigVersion, JobConfig, PipelineConfig};
//!
//! let store = SqliteStore::open(Path::new("/var/lib/reapr/reapr.db"))?;
//! let pipeline = store.create_pipeline("main")?;
//! store.save_config(pipeline, &PipelineConfig::default().with_job(JobConfig::named("unit")), ConfigVersion(0))?;
//!
//! let job = store.create_job(pipeline, "unit")?;
//! let build = store.create_build(Some(job))?;
//! store.create_container(&NewContainer::for_build("handle-1", build, pipeline, "unit"))?;
//! store.finish_build(build, BuildStatus::Failed)?;
//! ```

mod records;
mod sqlite_store;

pub use records::{BuildStatus, NewContainer};
pub use sqlite_store::SqliteStore;
