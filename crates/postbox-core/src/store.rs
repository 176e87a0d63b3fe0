//! Job state storage.
//!
//! Records every scheduled delivery and its state transitions in `SQLite`, so
//! callers can query the outcome of a job and an interrupted process can pick
//! up unfinished work. Credentials are never stored.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};

use crate::codec::MailDataHandle;
use crate::job::{JobId, JobState};
use crate::{Error, Result};

/// A stored job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    /// Job identifier.
    pub id: JobId,
    /// Persisted message the job delivers.
    pub mail_data: MailDataHandle,
    /// Current state.
    pub state: JobState,
    /// Whether the job ran in the expedited queue.
    pub expedited: bool,
    /// Failure reason of the last run.
    pub last_error: Option<String>,
    /// When the job was scheduled.
    pub created_at: DateTime<Utc>,
    /// Last state change.
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// A freshly scheduled, pending job.
    #[must_use]
    pub fn pending(id: JobId, mail_data: MailDataHandle, expedited: bool) -> Self {
        let now = Utc::now();
        Self {
            id,
            mail_data,
            state: JobState::Pending,
            expedited,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Repository for job records.
#[derive(Debug, Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    /// Create a new store with the given database path.
    ///
    /// Creates the database and tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS delivery_jobs (
                id TEXT PRIMARY KEY,
                mail_data TEXT NOT NULL,
                state TEXT NOT NULL,
                expedited INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_delivery_jobs_state ON delivery_jobs(state)
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a new job record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn insert(&self, record: &JobRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO delivery_jobs
                (id, mail_data, state, expedited, last_error, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(record.id.to_string())
        .bind(record.mail_data.to_string())
        .bind(record.state.as_str())
        .bind(record.expedited)
        .bind(&record.last_error)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Move a job to `state`, recording `error` as its last error.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn set_state(&self, id: JobId, state: JobState, error: Option<&str>) -> Result<()> {
        sqlx::query(
            r"
            UPDATE delivery_jobs
            SET state = ?, last_error = ?, updated_at = ?
            WHERE id = ?
            ",
        )
        .bind(state.as_str())
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record which queue a job was placed in.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn set_expedited(&self, id: JobId, expedited: bool) -> Result<()> {
        sqlx::query("UPDATE delivery_jobs SET expedited = ? WHERE id = ?")
            .bind(expedited)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Get a job by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails or the row is corrupt.
    pub async fn get(&self, id: JobId) -> Result<Option<JobRecord>> {
        let row = sqlx::query(
            r"
            SELECT id, mail_data, state, expedited, last_error, created_at, updated_at
            FROM delivery_jobs
            WHERE id = ?
            ",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    /// Jobs left pending or running, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails or a row is corrupt.
    pub async fn unfinished(&self) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, mail_data, state, expedited, last_error, created_at, updated_at
            FROM delivery_jobs
            WHERE state IN ('pending', 'running')
            ORDER BY created_at ASC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }
}

fn row_to_record(row: &SqliteRow) -> Result<JobRecord> {
    let corrupt = |column: &str| Error::CorruptRecord(column.to_string());

    let id: String = row.get("id");
    let state: String = row.get("state");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(JobRecord {
        id: id.parse().map_err(|_| corrupt("id"))?,
        mail_data: MailDataHandle::from(row.get::<String, _>("mail_data")),
        state: state.parse().map_err(|_| corrupt("state"))?,
        expedited: row.get("expedited"),
        last_error: row.get("last_error"),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|_| corrupt("created_at"))?
            .with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map_err(|_| corrupt("updated_at"))?
            .with_timezone(&Utc),
    })
}
