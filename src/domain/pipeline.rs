//! Pipeline configuration as stored by the configuration store.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version token returned with a pipeline config.
///
/// Every successful save bumps it by one. A pipeline that was never
/// configured is at version 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConfigVersion(pub i64);

impl std::fmt::Display for ConfigVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Complete configuration of one pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub groups: Vec<GroupConfig>,
    pub resources: Vec<ResourceConfig>,
    pub jobs: Vec<JobConfig>,
}

impl PipelineConfig {
    /// Check whether a job with this name is currently configured.
    pub fn has_job(&self, name: &str) -> bool {
        self.job(name).is_some()
    }

    /// Look up a job by name.
    pub fn job(&self, name: &str) -> Option<&JobConfig> {
        self.jobs.iter().find(|job| job.name == name)
    }

    /// Add a job, replacing any job with the same name.
    pub fn with_job(mut self, job: JobConfig) -> Self {
        self.jobs.retain(|j| j.name != job.name);
        self.jobs.push(job);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    pub name: String,
    pub jobs: Vec<String>,
    pub resources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub source: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub name: String,
    pub public: bool,
    pub serial: bool,
    pub privileged: bool,
    pub task_config_path: Option<String>,
    pub inputs: Vec<JobInputConfig>,
    pub outputs: Vec<JobOutputConfig>,
}

impl JobConfig {
    /// Create a job config with just a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobInputConfig {
    pub name: String,
    pub resource: String,
    pub passed: Vec<String>,
    pub trigger: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOutputConfig {
    pub resource: String,
    pub perform_on: Vec<String>,
}
