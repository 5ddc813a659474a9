//! Error types for reapr
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in reapr
#[derive(Debug, Error)]
pub enum ReaprError {
    /// Container registry query or mutation failed
    #[error("Registry error: {0}")]
    Registry(String),

    /// Build-to-job resolution failed
    #[error("Resolver error: {0}")]
    Resolver(String),

    /// Worker directory lookup or instruction failed
    #[error("Worker error: {0}")]
    Worker(String),

    /// The worker no longer holds a live container for this handle
    #[error("worker-container-not-found: {0}")]
    WorkerContainerNotFound(String),

    /// Pipeline or pipeline configuration lookup failed
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Optimistic config save lost the race
    #[error("Config comparison failed for pipeline {pipeline_id}: expected version {expected}, found {actual}")]
    ConfigConflict { pipeline_id: i64, expected: i64, actual: i64 },

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type alias for reapr operations
pub type Result<T> = std::result::Result<T, ReaprError>;
