//! SQLite-backed registry, resolver, pipeline config store and worker view.
//!
//! One database holds the control plane's view of the fleet:
//! - **pipelines**: versioned pipeline configs (JSON)
//! - **jobs** / **builds**: build history, kept after a job leaves the config
//! - **containers**: container records and their expiry
//! - **worker_containers**: containers the workers report as live

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use crate::domain::{
    BuildId, ConfigVersion, JobId, OutcomeClass, PipelineConfig, PipelineId, SavedContainer, TtlClass,
};
use crate::error::{ReaprError, Result};
use crate::reaper::traits::{
    BuildJobResolver, ContainerRegistry, PipelineDb, PipelineStore, WorkerContainer, WorkerDirectory,
};
use crate::store::records::{BuildStatus, NewContainer};

const CONTAINER_COLUMNS: &str = "c.handle, c.build_id, c.job_name, c.pipeline_id";

/// Shared handle to the control-plane database.
///
/// rusqlite's `Connection` isn't `Sync`, so it lives behind a `Mutex`.
/// Every statement is short and the lock is never held across an await.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").field("path", &self.path).finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Connection::open(path)?;
        Self::init_schema(&db)?;

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        Self::init_schema(&db)?;

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            path: None,
        })
    }

    /// Path of the database file, `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn init_schema(db: &Connection) -> Result<()> {
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pipelines (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                config TEXT,
                version INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pipeline_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                UNIQUE (pipeline_id, name)
            );

            CREATE TABLE IF NOT EXISTS builds (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS containers (
                handle TEXT PRIMARY KEY,
                build_id INTEGER,
                pipeline_id INTEGER NOT NULL,
                job_name TEXT NOT NULL,
                expires_at TEXT,
                ttl_secs INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_containers_expires ON containers(expires_at);
            CREATE INDEX IF NOT EXISTS idx_containers_build ON containers(build_id);
            CREATE INDEX IF NOT EXISTS idx_builds_status ON builds(status);

            CREATE TABLE IF NOT EXISTS worker_containers (
                handle TEXT PRIMARY KEY,
                worker_name TEXT NOT NULL,
                ttl_secs INTEGER,
                reported_at TEXT NOT NULL
            );
            "#,
        )?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|e| ReaprError::Storage(e.to_string()))
    }

    /// Register a pipeline with no config (version 0).
    pub fn create_pipeline(&self, name: &str) -> Result<PipelineId> {
        let db = self.conn()?;
        db.execute("INSERT INTO pipelines (name) VALUES (?1)", [name])?;
        Ok(db.last_insert_rowid())
    }

    /// Save a pipeline config if nobody else saved one since `expected`.
    ///
    /// Returns the new version. Every configured job gets a row in `jobs`;
    /// jobs dropped from the config keep theirs so build history survives.
    pub fn save_config(
        &self,
        pipeline_id: PipelineId,
        config: &PipelineConfig,
        expected: ConfigVersion,
    ) -> Result<ConfigVersion> {
        let json = serde_json::to_string(config)?;
        let mut db = self.conn()?;
        let tx = db.transaction()?;

        let current: Option<i64> = tx
            .query_row("SELECT version FROM pipelines WHERE id = ?1", [pipeline_id], |row| row.get(0))
            .optional()?;

        let current = current.ok_or_else(|| ReaprError::Pipeline(format!("pipeline {} not found", pipeline_id)))?;
        if current != expected.0 {
            return Err(ReaprError::ConfigConflict {
                pipeline_id,
                expected: expected.0,
                actual: current,
            });
        }

        tx.execute(
            "UPDATE pipelines SET config = ?1, version = version + 1 WHERE id = ?2 AND version = ?3",
            params![json, pipeline_id, expected.0],
        )?;

        for job in &config.jobs {
            tx.execute(
                "INSERT OR IGNORE INTO jobs (pipeline_id, name) VALUES (?1, ?2)",
                params![pipeline_id, job.name],
            )?;
        }

        tx.commit()?;
        Ok(ConfigVersion(expected.0 + 1))
    }

    /// Load a pipeline's config directly.
    pub fn load_config(&self, pipeline_id: PipelineId) -> Result<Option<(PipelineConfig, ConfigVersion)>> {
        let db = self.conn()?;
        let row: Option<(Option<String>, i64)> = db
            .query_row(
                "SELECT config, version FROM pipelines WHERE id = ?1",
                [pipeline_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((Some(json), version)) => Ok(Some((serde_json::from_str(&json)?, ConfigVersion(version)))),
            _ => Ok(None),
        }
    }

    /// Look up a job id by pipeline and name.
    pub fn job_id(&self, pipeline_id: PipelineId, name: &str) -> Result<Option<JobId>> {
        let db = self.conn()?;
        Ok(db
            .query_row(
                "SELECT id FROM jobs WHERE pipeline_id = ?1 AND name = ?2",
                params![pipeline_id, name],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Register a job, returning the existing id if it is already known.
    pub fn create_job(&self, pipeline_id: PipelineId, name: &str) -> Result<JobId> {
        {
            let db = self.conn()?;
            db.execute(
                "INSERT OR IGNORE INTO jobs (pipeline_id, name) VALUES (?1, ?2)",
                params![pipeline_id, name],
            )?;
        }
        self.job_id(pipeline_id, name)?
            .ok_or_else(|| ReaprError::Storage(format!("job {} vanished after insert", name)))
    }

    /// Schedule a build. `None` for one-off builds that belong to no job.
    pub fn create_build(&self, job_id: Option<JobId>) -> Result<BuildId> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO builds (job_id, status, created_at) VALUES (?1, ?2, ?3)",
            params![job_id, BuildStatus::Pending.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Move a build to a new status. A finished build never changes again.
    pub fn finish_build(&self, build_id: BuildId, status: BuildStatus) -> Result<()> {
        match self.build_status(build_id)? {
            None => return Err(ReaprError::Storage(format!("build {} not found", build_id))),
            Some(current) if current.is_terminal() => {
                return Err(ReaprError::Storage(format!(
                    "build {} already finished as {}",
                    build_id, current
                )));
            }
            Some(_) => {}
        }

        let db = self.conn()?;
        db.execute(
            "UPDATE builds SET status = ?1 WHERE id = ?2",
            params![status.as_str(), build_id],
        )?;
        Ok(())
    }

    /// Status of a build.
    pub fn build_status(&self, build_id: BuildId) -> Result<Option<BuildStatus>> {
        let db = self.conn()?;
        let status: Option<String> = db
            .query_row("SELECT status FROM builds WHERE id = ?1", [build_id], |row| row.get(0))
            .optional()?;
        Ok(status.as_deref().and_then(BuildStatus::parse))
    }

    /// Drop a build from history. Its containers become orphans.
    pub fn delete_build(&self, build_id: BuildId) -> Result<()> {
        let db = self.conn()?;
        db.execute("DELETE FROM builds WHERE id = ?1", [build_id])?;
        Ok(())
    }

    /// Record a new container with an infinite TTL.
    pub fn create_container(&self, container: &NewContainer) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO containers (handle, build_id, pipeline_id, job_name) VALUES (?1, ?2, ?3, ?4)",
            params![
                container.handle,
                container.build_id,
                container.pipeline_id,
                container.job_name
            ],
        )?;
        Ok(())
    }

    /// Current expiry policy of a container.
    pub fn container_ttl(&self, handle: &str) -> Result<Option<TtlClass>> {
        let db = self.conn()?;
        let expires_at: Option<Option<String>> = db
            .query_row("SELECT expires_at FROM containers WHERE handle = ?1", [handle], |row| {
                row.get(0)
            })
            .optional()?;

        match expires_at {
            None => Ok(None),
            Some(None) => Ok(Some(TtlClass::Infinite)),
            Some(Some(ts)) => {
                let expires_at = DateTime::parse_from_rfc3339(&ts)
                    .map_err(|e| ReaprError::Storage(format!("bad expires_at for {}: {}", handle, e)))?
                    .with_timezone(&Utc);
                Ok(Some(TtlClass::Finite { expires_at }))
            }
        }
    }

    /// Record that a worker holds a live container.
    pub fn report_worker_container(&self, handle: &str, worker_name: &str) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "INSERT OR REPLACE INTO worker_containers (handle, worker_name, ttl_secs, reported_at) VALUES (?1, ?2, NULL, ?3)",
            params![handle, worker_name, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Forget a worker-side container, as when its worker goes away.
    pub fn remove_worker_container(&self, handle: &str) -> Result<()> {
        let db = self.conn()?;
        db.execute("DELETE FROM worker_containers WHERE handle = ?1", [handle])?;
        Ok(())
    }

    /// TTL the worker was last told to apply, if any.
    pub fn worker_container_ttl(&self, handle: &str) -> Result<Option<Duration>> {
        let db = self.conn()?;
        let ttl: Option<Option<i64>> = db
            .query_row(
                "SELECT ttl_secs FROM worker_containers WHERE handle = ?1",
                [handle],
                |row| row.get(0),
            )
            .optional()?;
        Ok(ttl.flatten().map(|secs| Duration::from_secs(secs.max(0) as u64)))
    }

    /// Infinite-TTL containers whose build status maps to `outcome`.
    fn containers_with_outcome(&self, outcome: OutcomeClass) -> Result<Vec<SavedContainer>> {
        let statuses: Vec<&str> = BuildStatus::ALL
            .iter()
            .filter(|s| s.outcome_class() == Some(outcome))
            .map(|s| s.as_str())
            .collect();
        let placeholders = (1..=statuses.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            "SELECT {} FROM containers c JOIN builds b ON b.id = c.build_id \
             WHERE c.expires_at IS NULL AND b.status IN ({}) ORDER BY c.build_id, c.handle",
            CONTAINER_COLUMNS, placeholders
        );
        self.query_containers(&sql, statuses, outcome)
    }

    fn query_containers<P>(&self, sql: &str, params: P, outcome: OutcomeClass) -> Result<Vec<SavedContainer>>
    where
        P: IntoIterator,
        P::Item: rusqlite::ToSql,
    {
        let db = self.conn()?;
        let mut stmt = db.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(params), |row| {
            Ok(SavedContainer {
                handle: row.get(0)?,
                build_id: row.get(1)?,
                job_name: row.get(2)?,
                pipeline_id: row.get(3)?,
                ttl: TtlClass::Infinite,
                outcome,
            })
        })?;

        let mut containers = Vec::new();
        for row in rows {
            containers.push(row?);
        }
        Ok(containers)
    }
}

/// Seconds as stored in the `ttl_secs` columns.
fn ttl_secs(ttl: Duration) -> Result<i64> {
    i64::try_from(ttl.as_secs()).map_err(|_| ReaprError::Registry(format!("ttl of {}s out of range", ttl.as_secs())))
}

#[async_trait]
impl ContainerRegistry for SqliteStore {
    async fn find_orphan_containers_with_infinite_ttl(&self) -> Result<Vec<SavedContainer>> {
        let sql = format!(
            "SELECT {} FROM containers c LEFT JOIN builds b ON b.id = c.build_id \
             WHERE c.expires_at IS NULL AND b.id IS NULL ORDER BY c.handle",
            CONTAINER_COLUMNS
        );
        self.query_containers(&sql, std::iter::empty::<&str>(), OutcomeClass::Orphan)
    }

    async fn find_containers_from_successful_builds_with_infinite_ttl(&self) -> Result<Vec<SavedContainer>> {
        self.containers_with_outcome(OutcomeClass::SuccessfulBuild)
    }

    async fn find_containers_from_unsuccessful_builds_with_infinite_ttl(&self) -> Result<Vec<SavedContainer>> {
        self.containers_with_outcome(OutcomeClass::UnsuccessfulBuild)
    }

    async fn update_expires_at_on_container(&self, handle: &str, ttl: Duration) -> Result<()> {
        let secs = ttl_secs(ttl)?;
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|delta| Utc::now().checked_add_signed(delta))
            .ok_or_else(|| ReaprError::Registry(format!("expiry {}s from now is out of range", ttl.as_secs())))?;

        let db = self.conn()?;
        let updated = db.execute(
            "UPDATE containers SET expires_at = ?1, ttl_secs = ?2 WHERE handle = ?3",
            params![expires_at.to_rfc3339(), secs, handle],
        )?;
        if updated == 0 {
            return Err(ReaprError::Registry(format!("container {} not found", handle)));
        }
        Ok(())
    }
}

#[async_trait]
impl BuildJobResolver for SqliteStore {
    async fn find_job_id_for_build(&self, build_id: BuildId) -> Result<Option<JobId>> {
        let db = self.conn()?;
        let job_id: Option<Option<JobId>> = db
            .query_row("SELECT job_id FROM builds WHERE id = ?1", [build_id], |row| row.get(0))
            .optional()?;
        Ok(job_id.flatten())
    }
}

/// Pipeline-scoped view over the store.
struct SqlitePipeline {
    id: PipelineId,
    store: SqliteStore,
}

#[async_trait]
impl PipelineDb for SqlitePipeline {
    fn pipeline_id(&self) -> PipelineId {
        self.id
    }

    async fn config(&self) -> Result<Option<(PipelineConfig, ConfigVersion)>> {
        self.store.load_config(self.id)
    }
}

#[async_trait]
impl PipelineStore for SqliteStore {
    async fn pipeline_by_id(&self, pipeline_id: PipelineId) -> Result<Option<Arc<dyn PipelineDb>>> {
        let exists = {
            let db = self.conn()?;
            db.query_row("SELECT id FROM pipelines WHERE id = ?1", [pipeline_id], |row| {
                row.get::<_, i64>(0)
            })
            .optional()?
            .is_some()
        };

        if !exists {
            return Ok(None);
        }

        Ok(Some(Arc::new(SqlitePipeline {
            id: pipeline_id,
            store: self.clone(),
        })))
    }
}

/// A container a worker reported as live.
struct ReportedContainer {
    handle: String,
    store: SqliteStore,
}

#[async_trait]
impl WorkerContainer for ReportedContainer {
    fn handle(&self) -> &str {
        &self.handle
    }

    async fn release(&self, ttl: Duration) -> Result<()> {
        let secs = ttl_secs(ttl).map_err(|e| ReaprError::Worker(e.to_string()))?;
        let db = self.store.conn()?;
        let updated = db.execute(
            "UPDATE worker_containers SET ttl_secs = ?1 WHERE handle = ?2",
            params![secs, self.handle],
        )?;
        if updated == 0 {
            return Err(ReaprError::Worker(format!("container {} disappeared from its worker", self.handle)));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkerDirectory for SqliteStore {
    async fn lookup_container(&self, handle: &str) -> Result<Option<Arc<dyn WorkerContainer>>> {
        let found = {
            let db = self.conn()?;
            db.query_row(
                "SELECT handle FROM worker_containers WHERE handle = ?1",
                [handle],
                |row| row.get::<_, String>(0),
            )
            .optional()?
        };

        Ok(found.map(|handle| {
            Arc::new(ReportedContainer {
                handle,
                store: self.clone(),
            }) as Arc<dyn WorkerContainer>
        }))
    }
}
