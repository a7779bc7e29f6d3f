//! Sync job queue.
//!
//! `StartSync` enqueues a row here and returns immediately; the dispatcher
//! claims jobs atomically with `FOR UPDATE SKIP LOCKED` so multiple server
//! instances never double-run a job. Cancellation is cooperative: the row is
//! flipped to `cancelled` and the pipeline notices at its next checkpoint.

use chrono::{DateTime, NaiveDate, Utc};
use rocket_db_pools::sqlx::{self, PgPool};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "job_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Sync,
    Reprocess,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "sync_mode", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Auto,
    Incremental,
    Full,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// A claimed job handed to the dispatcher.
#[derive(Debug, Clone)]
pub struct SyncJob {
    pub id: i32,
    pub user_id: i32,
    pub kind: JobKind,
    pub mode: SyncMode,
    pub after_date: Option<NaiveDate>,
    pub before_date: Option<NaiveDate>,
    /// Kind-specific parameters (reprocess options).
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, JsonSchema)]
pub struct JobRecord {
    pub id: i32,
    pub user_id: i32,
    pub job_kind: JobKind,
    pub mode: SyncMode,
    pub after_date: Option<NaiveDate>,
    pub before_date: Option<NaiveDate>,
    pub payload: Value,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

pub struct JobQueue {
    pool: PgPool,
}

impl JobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue a job for a user.
    pub async fn enqueue(
        &self,
        user_id: i32,
        kind: JobKind,
        mode: SyncMode,
        after_date: Option<NaiveDate>,
        before_date: Option<NaiveDate>,
        payload: Value,
    ) -> Result<i32, sqlx::Error> {
        let (id,): (i32,) = sqlx::query_as(
            r#"INSERT INTO sync_jobs (user_id, job_kind, mode, after_date, before_date, payload)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING id"#,
        )
        .bind(user_id)
        .bind(kind)
        .bind(mode)
        .bind(after_date)
        .bind(before_date)
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Claim the next queued job atomically (SELECT FOR UPDATE SKIP LOCKED).
    pub async fn get_next_job(&self) -> Result<Option<SyncJob>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        type JobRow = (
            i32,
            i32,
            JobKind,
            SyncMode,
            Option<NaiveDate>,
            Option<NaiveDate>,
            Value,
        );
        let job: Option<JobRow> = sqlx::query_as(
            r#"SELECT id, user_id, job_kind, mode, after_date, before_date, payload
               FROM sync_jobs
               WHERE status = 'queued'
               ORDER BY created_at ASC
               LIMIT 1
               FOR UPDATE SKIP LOCKED"#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        if let Some((id, user_id, kind, mode, after_date, before_date, payload)) = job {
            sqlx::query(
                "UPDATE sync_jobs SET status = 'running', started_at = COALESCE(started_at, NOW()) WHERE id = $1",
            )
            .bind(id)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;

            Ok(Some(SyncJob {
                id,
                user_id,
                kind,
                mode,
                after_date,
                before_date,
                payload,
            }))
        } else {
            Ok(None)
        }
    }

    /// Mark job complete. A job already flipped to `cancelled` keeps that
    /// status even when the pipeline finishes its drain afterwards.
    pub async fn complete_job(&self, job_id: i32) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE sync_jobs SET status = 'succeeded', completed_at = NOW() \
             WHERE id = $1 AND status = 'running'",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark job failed.
    pub async fn fail_job(&self, job_id: i32, error: String) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE sync_jobs SET status = 'failed', completed_at = NOW(), error_message = $1 \
             WHERE id = $2 AND status IN ('queued', 'running')",
        )
        .bind(error)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Request cancellation of a user's queued or running jobs.
    pub async fn cancel_for_user(&self, user_id: i32) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE sync_jobs
               SET status = 'cancelled', completed_at = NOW(), error_message = 'Cancelled by user'
               WHERE user_id = $1 AND status IN ('queued', 'running')"#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Check whether a job was cancelled (polled by the pipeline).
    pub async fn is_job_cancelled(&self, job_id: i32) -> Result<bool, sqlx::Error> {
        let result: Option<(JobStatus,)> =
            sqlx::query_as("SELECT status FROM sync_jobs WHERE id = $1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(result
            .map(|(status,)| status == JobStatus::Cancelled)
            .unwrap_or(false))
    }

    pub async fn get_job(&self, job_id: i32) -> Result<Option<JobRecord>, sqlx::Error> {
        sqlx::query_as::<_, JobRecord>("SELECT * FROM sync_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
    }
}
