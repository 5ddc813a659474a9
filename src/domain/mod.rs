//! Domain types for reapr
//!
//! This module contains the core domain types:
//! - SavedContainer: a registry record with provenance and expiry policy
//! - PipelineConfig: the live job/resource definitions of a pipeline
//! - Verdict / Disposition: what a pass decided and what actually happened

pub mod container;
pub mod outcome;
pub mod pipeline;

pub use container::{BuildId, JobId, OutcomeClass, PipelineId, SavedContainer, TtlClass};
pub use outcome::{
    Bucket, ContainerOutcome, Decision, Disposition, ReapPlan, ReapReport, ReleaseReason, Verdict,
};
pub use pipeline::{
    ConfigVersion, GroupConfig, JobConfig, JobInputConfig, JobOutputConfig, PipelineConfig, ResourceConfig,
};
