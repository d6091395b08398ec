//! Postgres-backed job store.
//!
//! The store traits are synchronous, so every call drives the async query on
//! the runtime handle the store was built with. Call them from plain threads,
//! never from inside that runtime's tasks.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Code | JobStoreError |
//! |------------|-----------------|---------------|
//! | Database (unique violation) | `23505` | `AlreadyExists` |
//! | Database (foreign key violation) | `23503` | `NotFound` |
//! | Database (other) | any | `Storage` |
//! | Decode / ColumnDecode | N/A | `InvalidRecord` |
//! | Other (pool closed, I/O) | N/A | `Storage` |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Row};
use tokio::runtime::Handle;
use tracing::{debug, instrument};
use uuid::Uuid;

use jobloom_core::{HistoryEntryId, JobId, JobTypeId};
use jobloom_jobs::{
    ActiveState, AttemptChange, Job, JobForProcessing, JobHistoryEntry, JobStatus, JobType,
    JobTypeMode, StatusChange,
};

use super::store::{JobHistoryRepository, JobRepository, JobStoreError, JobTypeRepository};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS job_types (
        id UUID PRIMARY KEY,
        name VARCHAR(255) NOT NULL UNIQUE,
        description TEXT,
        mode SMALLINT NOT NULL,
        locator VARCHAR(16000) NOT NULL,
        configuration JSONB NOT NULL DEFAULT '{}'::jsonb,
        max_retries INTEGER NOT NULL DEFAULT 5 CHECK (max_retries >= 0),
        retry_delay_secs INTEGER NOT NULL DEFAULT 10 CHECK (retry_delay_secs >= 0),
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id UUID PRIMARY KEY,
        job_type_id UUID NOT NULL REFERENCES job_types (id),
        payload JSONB NOT NULL,
        parameter JSONB NOT NULL,
        status SMALLINT NOT NULL DEFAULT 0,
        attempt INTEGER NOT NULL DEFAULT 0 CHECK (attempt >= 0),
        active_state SMALLINT NOT NULL DEFAULT 100,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS jobs_open_by_type_idx
        ON jobs (job_type_id, created_at, id)
        WHERE status = 0 AND active_state = 100
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS job_history (
        id UUID PRIMARY KEY,
        job_id UUID NOT NULL REFERENCES jobs (id) ON DELETE CASCADE,
        message TEXT NOT NULL,
        additional_data JSONB,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS job_history_job_idx ON job_history (job_id, created_at, id)
    "#,
    r#"
    CREATE OR REPLACE VIEW jobs_for_processing AS
        SELECT id AS job_id, job_type_id, attempt, created_at
        FROM jobs
        WHERE status = 0 AND active_state = 100
    "#,
];

const JOB_COLUMNS: &str =
    "id, job_type_id, payload, parameter, status, attempt, active_state, created_at, updated_at";

const JOB_TYPE_COLUMNS: &str = "id, name, description, mode, locator, configuration, max_retries, retry_delay_secs, created_at";

/// Postgres-backed job store.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
    handle: Handle,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool, handle: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            handle,
        }
    }

    /// Open a connection pool on `handle`'s runtime.
    pub fn connect(url: &str, max_connections: u32, handle: Handle) -> Result<Self, JobStoreError> {
        let pool = handle
            .block_on(
                PgPoolOptions::new()
                    .max_connections(max_connections)
                    .connect(url),
            )
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, handle))
    }

    /// Create tables, indexes and the `jobs_for_processing` view if missing.
    pub async fn migrate(&self) -> Result<(), JobStoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        debug!("job schema ensured");
        Ok(())
    }

    /// Blocking variant of [`Self::migrate`].
    pub fn migrate_blocking(&self) -> Result<(), JobStoreError> {
        self.handle.block_on(self.migrate())
    }

    pub async fn insert_job_async(&self, job: &Job) -> Result<(), JobStoreError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, job_type_id, payload, parameter, status, attempt, active_state, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.job_type_id.as_uuid())
        .bind(&job.payload)
        .bind(&job.parameter)
        .bind(job.status.code())
        .bind(to_i32("attempt", job.attempt)?)
        .bind(job.active_state.code())
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_job", e))?;
        Ok(())
    }

    pub async fn find_job_async(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_job", e))?;
        row.map(|r| decode_job(&r)).transpose()
    }

    pub async fn jobs_for_processing_async(
        &self,
        job_type_id: JobTypeId,
        limit: usize,
    ) -> Result<Vec<JobForProcessing>, JobStoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r#"
            SELECT job_id, job_type_id, attempt, created_at
            FROM jobs_for_processing
            WHERE job_type_id = $1
            ORDER BY created_at ASC, job_id ASC
            LIMIT $2
            "#,
        )
        .bind(job_type_id.as_uuid())
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("jobs_for_processing", e))?;

        rows.iter()
            .map(|row| {
                let candidate = CandidateRow::from_row(row).map_err(|e| invalid("jobs_for_processing", e))?;
                Ok(JobForProcessing {
                    job_id: JobId::from_uuid(candidate.job_id),
                    job_type_id: JobTypeId::from_uuid(candidate.job_type_id),
                    attempt: from_i32("attempt", candidate.attempt)?,
                    created_at: candidate.created_at,
                })
            })
            .collect()
    }

    /// Conditional `Open -> Processing` write; exactly one racing caller wins.
    #[instrument(skip(self), fields(job_id = %id), err)]
    pub async fn claim_job_async(
        &self,
        id: JobId,
        job_type_id: JobTypeId,
        max_retries: u32,
    ) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET status = $1, attempt = attempt + 1, updated_at = now()
            WHERE id = $2
              AND job_type_id = $3
              AND status = $4
              AND active_state = $5
              AND attempt < $6
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(JobStatus::Processing.code())
        .bind(id.as_uuid())
        .bind(job_type_id.as_uuid())
        .bind(JobStatus::Open.code())
        .bind(ActiveState::Active.code())
        .bind(to_i32("max_retries", max_retries)?)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_job", e))?;
        row.map(|r| decode_job(&r)).transpose()
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    pub async fn transition_job_async(
        &self,
        id: JobId,
        change: StatusChange,
    ) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET status = $1,
                attempt = CASE WHEN $2 THEN GREATEST(attempt - 1, 0) ELSE attempt END,
                updated_at = now()
            WHERE id = $3 AND status = $4
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(change.next.code())
        .bind(change.attempt == AttemptChange::Decrement)
        .bind(id.as_uuid())
        .bind(change.expected.code())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("transition_job", e))?;

        if let Some(row) = row {
            return decode_job(&row).map(Some);
        }
        match self.find_job_async(id).await? {
            Some(_) => Ok(None),
            None => Err(JobStoreError::NotFound(format!("job {id}"))),
        }
    }

    pub async fn insert_job_type_async(&self, job_type: &JobType) -> Result<(), JobStoreError> {
        sqlx::query(
            r#"
            INSERT INTO job_types (id, name, description, mode, locator, configuration, max_retries, retry_delay_secs, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(job_type.id.as_uuid())
        .bind(&job_type.name)
        .bind(&job_type.description)
        .bind(job_type.mode.code())
        .bind(&job_type.locator)
        .bind(&job_type.configuration)
        .bind(to_i32("max_retries", job_type.max_retries)?)
        .bind(to_i32("retry_delay_secs", job_type.retry_delay_secs)?)
        .bind(job_type.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_job_type", e))?;
        Ok(())
    }

    pub async fn find_job_type_async(&self, id: JobTypeId) -> Result<Option<JobType>, JobStoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_TYPE_COLUMNS} FROM job_types WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_job_type", e))?;
        row.map(|r| decode_job_type(&r)).transpose()
    }

    pub async fn find_job_type_by_name_async(&self, name: &str) -> Result<Option<JobType>, JobStoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_TYPE_COLUMNS} FROM job_types WHERE name = $1"))
            .bind(name)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_job_type_by_name", e))?;
        row.map(|r| decode_job_type(&r)).transpose()
    }

    pub async fn list_job_types_async(&self) -> Result<Vec<JobType>, JobStoreError> {
        let rows = sqlx::query(&format!("SELECT {JOB_TYPE_COLUMNS} FROM job_types ORDER BY name ASC"))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_job_types", e))?;
        rows.iter().map(decode_job_type).collect()
    }

    pub async fn append_history_async(&self, entry: &JobHistoryEntry) -> Result<(), JobStoreError> {
        sqlx::query(
            r#"
            INSERT INTO job_history (id, job_id, message, additional_data, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.job_id.as_uuid())
        .bind(&entry.message)
        .bind(&entry.additional_data)
        .bind(entry.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("append_history", e))?;
        Ok(())
    }

    pub async fn history_for_job_async(&self, job_id: JobId) -> Result<Vec<JobHistoryEntry>, JobStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, job_id, message, additional_data, created_at
            FROM job_history
            WHERE job_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(job_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("history_for_job", e))?;

        rows.iter()
            .map(|row| {
                let r = HistoryRow::from_row(row).map_err(|e| invalid("history_for_job", e))?;
                Ok(JobHistoryEntry {
                    id: HistoryEntryId::from_uuid(r.id),
                    job_id: JobId::from_uuid(r.job_id),
                    message: r.message,
                    additional_data: r.additional_data,
                    created_at: r.created_at,
                })
            })
            .collect()
    }
}

impl JobRepository for PostgresJobStore {
    fn insert_job(&self, job: &Job) -> Result<(), JobStoreError> {
        self.handle.block_on(self.insert_job_async(job))
    }

    fn find_job(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        self.handle.block_on(self.find_job_async(id))
    }

    fn jobs_for_processing(
        &self,
        job_type_id: JobTypeId,
        limit: usize,
    ) -> Result<Vec<JobForProcessing>, JobStoreError> {
        self.handle
            .block_on(self.jobs_for_processing_async(job_type_id, limit))
    }

    fn claim_job(
        &self,
        id: JobId,
        job_type_id: JobTypeId,
        max_retries: u32,
    ) -> Result<Option<Job>, JobStoreError> {
        self.handle
            .block_on(self.claim_job_async(id, job_type_id, max_retries))
    }

    fn transition_job(&self, id: JobId, change: StatusChange) -> Result<Option<Job>, JobStoreError> {
        self.handle.block_on(self.transition_job_async(id, change))
    }
}

impl JobTypeRepository for PostgresJobStore {
    fn insert_job_type(&self, job_type: &JobType) -> Result<(), JobStoreError> {
        self.handle.block_on(self.insert_job_type_async(job_type))
    }

    fn find_job_type(&self, id: JobTypeId) -> Result<Option<JobType>, JobStoreError> {
        self.handle.block_on(self.find_job_type_async(id))
    }

    fn find_job_type_by_name(&self, name: &str) -> Result<Option<JobType>, JobStoreError> {
        self.handle.block_on(self.find_job_type_by_name_async(name))
    }

    fn list_job_types(&self) -> Result<Vec<JobType>, JobStoreError> {
        self.handle.block_on(self.list_job_types_async())
    }
}

impl JobHistoryRepository for PostgresJobStore {
    fn append_history(&self, entry: &JobHistoryEntry) -> Result<(), JobStoreError> {
        self.handle.block_on(self.append_history_async(entry))
    }

    fn history_for_job(&self, job_id: JobId) -> Result<Vec<JobHistoryEntry>, JobStoreError> {
        self.handle.block_on(self.history_for_job_async(job_id))
    }
}

fn to_i32(field: &str, value: u32) -> Result<i32, JobStoreError> {
    i32::try_from(value)
        .map_err(|_| JobStoreError::InvalidRecord(format!("{field} {value} does not fit the column")))
}

fn from_i32(field: &str, value: i32) -> Result<u32, JobStoreError> {
    u32::try_from(value).map_err(|_| JobStoreError::InvalidRecord(format!("negative {field}: {value}")))
}

fn invalid(operation: &str, err: sqlx::Error) -> JobStoreError {
    JobStoreError::InvalidRecord(format!("failed to decode row in {operation}: {err}"))
}

fn decode_job(row: &PgRow) -> Result<Job, JobStoreError> {
    let r = JobRow::from_row(row).map_err(|e| invalid("job", e))?;
    Ok(Job {
        id: JobId::from_uuid(r.id),
        job_type_id: JobTypeId::from_uuid(r.job_type_id),
        payload: r.payload,
        parameter: r.parameter,
        status: JobStatus::from_code(r.status)
            .map_err(|e| JobStoreError::InvalidRecord(e.to_string()))?,
        attempt: from_i32("attempt", r.attempt)?,
        active_state: ActiveState::from_code(r.active_state).ok_or_else(|| {
            JobStoreError::InvalidRecord(format!("unknown active state code: {}", r.active_state))
        })?,
        created_at: r.created_at,
        updated_at: r.updated_at,
    })
}

fn decode_job_type(row: &PgRow) -> Result<JobType, JobStoreError> {
    let r = JobTypeRow::from_row(row).map_err(|e| invalid("job_type", e))?;
    Ok(JobType {
        id: JobTypeId::from_uuid(r.id),
        name: r.name,
        description: r.description,
        mode: JobTypeMode::from_code(r.mode)
            .ok_or_else(|| JobStoreError::InvalidRecord(format!("unknown job type mode: {}", r.mode)))?,
        locator: r.locator,
        configuration: r.configuration,
        max_retries: from_i32("max_retries", r.max_retries)?,
        retry_delay_secs: from_i32("retry_delay_secs", r.retry_delay_secs)?,
        created_at: r.created_at,
    })
}

/// Map SQLx errors to JobStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => JobStoreError::AlreadyExists(msg),
                Some("23503") => JobStoreError::NotFound(msg),
                _ => JobStoreError::Storage(msg),
            }
        }
        sqlx::Error::Decode(_) | sqlx::Error::ColumnDecode { .. } => {
            JobStoreError::InvalidRecord(format!("{operation}: {err}"))
        }
        sqlx::Error::PoolClosed => JobStoreError::Storage(format!("connection pool closed in {operation}")),
        _ => JobStoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}

// SQLx row types

#[derive(Debug)]
struct JobRow {
    id: Uuid,
    job_type_id: Uuid,
    payload: JsonValue,
    parameter: JsonValue,
    status: i16,
    attempt: i32,
    active_state: i16,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for JobRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            id: row.try_get("id")?,
            job_type_id: row.try_get("job_type_id")?,
            payload: row.try_get("payload")?,
            parameter: row.try_get("parameter")?,
            status: row.try_get("status")?,
            attempt: row.try_get("attempt")?,
            active_state: row.try_get("active_state")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug)]
struct JobTypeRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    mode: i16,
    locator: String,
    configuration: JsonValue,
    max_retries: i32,
    retry_delay_secs: i32,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for JobTypeRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobTypeRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            mode: row.try_get("mode")?,
            locator: row.try_get("locator")?,
            configuration: row.try_get("configuration")?,
            max_retries: row.try_get("max_retries")?,
            retry_delay_secs: row.try_get("retry_delay_secs")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug)]
struct CandidateRow {
    job_id: Uuid,
    job_type_id: Uuid,
    attempt: i32,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for CandidateRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(CandidateRow {
            job_id: row.try_get("job_id")?,
            job_type_id: row.try_get("job_type_id")?,
            attempt: row.try_get("attempt")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug)]
struct HistoryRow {
    id: Uuid,
    job_id: Uuid,
    message: String,
    additional_data: Option<JsonValue>,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for HistoryRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(HistoryRow {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            message: row.try_get("message")?,
            additional_data: row.try_get("additional_data")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
