/*!
 * SQLite-backed checkpoint store.
 *
 * Keeps one row per job in a `checkpoints` table. Connection handling follows the usual
 * pattern: a shared `Connection` behind a mutex, with every operation run through
 * `spawn_blocking` so the async runtime is never blocked.
 */

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::{validate_job_id, CheckpointEnvelope, CheckpointRecord, CheckpointStore, FORMAT_VERSION};
use crate::errors::TranslationError;

/// Default database filename
pub const DEFAULT_DB_FILENAME: &str = "checkpoints.db";

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS checkpoints (
        job_id TEXT PRIMARY KEY,
        format_version INTEGER NOT NULL,
        checksum TEXT NOT NULL,
        payload TEXT NOT NULL,
        status TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
";

/// Checkpoint store keeping one row per job
#[derive(Debug, Clone)]
pub struct SqliteCheckpointStore {
    /// Path to the database file
    db_path: PathBuf,
    /// Thread-safe connection wrapped in Arc<Mutex>
    connection: Arc<Mutex<Connection>>,
}

/// Initialize the database schema
fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL)
        .context("Failed to create checkpoint tables")?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()
        .context("Failed to read schema version")?;

    match version {
        None => {
            info!("Initializing checkpoint schema v{}", SCHEMA_VERSION);
            conn.execute("INSERT INTO schema_version (version) VALUES (?1)", params![SCHEMA_VERSION])
                .context("Failed to set schema version")?;
        }
        Some(v) => debug!("Checkpoint schema is at v{}", v),
    }
    Ok(())
}

impl SqliteCheckpointStore {
    /// Open (or create) the database at `db_path`
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory: {:?}", parent))?;
        }

        info!("Opening checkpoint database at: {:?}", db_path);
        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open database: {:?}", db_path))?;
        initialize_schema(&conn)?;

        Ok(Self {
            db_path,
            connection: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing)
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to create in-memory database")?;
        initialize_schema(&conn)?;
        Ok(Self {
            db_path: PathBuf::from(":memory:"),
            connection: Arc::new(Mutex::new(conn)),
        })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Run a blocking operation on the connection
    async fn execute_async<F, T>(&self, f: F) -> Result<T, TranslationError>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.connection.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| anyhow::anyhow!("Failed to acquire database lock: {}", e))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| TranslationError::Checkpoint(format!("Database task failed: {}", e)))?
        .map_err(|e| TranslationError::Checkpoint(format!("{:#}", e)))
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn load(&self, job_id: &str) -> Result<Option<CheckpointRecord>, TranslationError> {
        validate_job_id(job_id)?;
        let id = job_id.to_string();
        let row = self
            .execute_async(move |conn| {
                conn.query_row(
                    "SELECT format_version, checksum, payload FROM checkpoints WHERE job_id = ?1",
                    params![id],
                    |row| Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
                )
                .optional()
                .context("Failed to read checkpoint row")
            })
            .await?;

        let Some((format_version, checksum, payload)) = row else {
            return Ok(None);
        };
        let record = serde_json::from_str(&payload).map_err(|e| TranslationError::CheckpointCorruption {
            job_id: job_id.to_string(),
            reason: format!("unreadable payload: {}", e),
        })?;
        let envelope = CheckpointEnvelope {
            format_version,
            checksum,
            record,
        };
        envelope.open(job_id).map(Some)
    }

    async fn save(&self, record: &CheckpointRecord) -> Result<(), TranslationError> {
        validate_job_id(&record.job_id)?;
        let envelope = CheckpointEnvelope::seal(record)?;
        let payload = serde_json::to_string(&envelope.record)
            .map_err(|e| TranslationError::Checkpoint(format!("Failed to serialize checkpoint: {}", e)))?;
        let job_id = record.job_id.clone();
        let status = record.status.as_str().to_string();
        let updated_at = record.updated_at.to_rfc3339();
        let checksum = envelope.checksum;

        self.execute_async(move |conn| {
            let tx = conn.transaction().context("Failed to begin transaction")?;
            tx.execute(
                "INSERT OR REPLACE INTO checkpoints (job_id, format_version, checksum, payload, status, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![job_id, FORMAT_VERSION, checksum, payload, status, updated_at],
            )
            .context("Failed to write checkpoint row")?;
            tx.commit().context("Failed to commit checkpoint")?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, job_id: &str) -> Result<bool, TranslationError> {
        validate_job_id(job_id)?;
        let id = job_id.to_string();
        self.execute_async(move |conn| {
            let deleted = conn
                .execute("DELETE FROM checkpoints WHERE job_id = ?1", params![id])
                .context("Failed to delete checkpoint")?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn list(&self) -> Result<Vec<String>, TranslationError> {
        self.execute_async(|conn| {
            let mut stmt = conn
                .prepare("SELECT job_id FROM checkpoints ORDER BY job_id")
                .context("Failed to prepare checkpoint listing")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .context("Failed to list checkpoints")?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to read checkpoint ids")?;
            Ok(ids)
        })
        .await
    }
}
