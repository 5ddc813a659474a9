//! Container lifecycle reaper.
//!
//! Decides, for every container held open with an infinite TTL, whether it
//! can still be reused by a future build or should be released now:
//! - **decision**: pure retain/release rules over a pass's candidate sets
//! - **release**: the worker-then-registry release side effect
//! - **runner**: `ContainerReaper`, one pass over all buckets
//! - **background**: periodic driver for repeated passes
//! - **traits**: the collaborator interfaces the reaper consumes

pub mod background;
pub mod decision;
pub mod release;
pub mod runner;
pub mod traits;

pub use background::{BackgroundStats, background_reaper_task};
pub use decision::{ResolvedContainer, decide_all, decide_group, failed_groups, successful_aggregate};
pub use release::Releaser;
pub use runner::{ContainerReaper, ReaperConfig};
pub use traits::{BuildJobResolver, ContainerRegistry, PipelineDb, PipelineStore, WorkerContainer, WorkerDirectory};
