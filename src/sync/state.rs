//! Durable per-user sync state.
//!
//! Exactly one row per user (`UNIQUE(user_id)`), owned exclusively by the sync
//! coordinator. Status transitions: idle → syncing → {idle, error} → idle.

use chrono::Utc;
use rocket_db_pools::sqlx::{self, PgPool};

use crate::models::SyncStateRecord;

/// Live counters for one sync run. `skipped` splits into provider-id
/// duplicates (`skipped_existing`) and company/title duplicates
/// (`skipped_duplicate`) internally; the stored row carries the sum.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncCounts {
    pub processed: i32,
    pub total: i32,
    pub created: i32,
    pub skipped_existing: i32,
    pub skipped_duplicate: i32,
    pub errors: i32,
}

impl SyncCounts {
    pub fn skipped(&self) -> i32 {
        self.skipped_existing + self.skipped_duplicate
    }
}

pub async fn get(pool: &PgPool, user_id: i32) -> Result<Option<SyncStateRecord>, sqlx::Error> {
    sqlx::query_as::<_, SyncStateRecord>("SELECT * FROM sync_state WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

pub async fn last_history_cursor(
    pool: &PgPool,
    user_id: i32,
) -> Result<Option<String>, sqlx::Error> {
    Ok(get(pool, user_id).await?.and_then(|s| s.last_history_id))
}

/// Transition to `syncing`, clearing counters and any previous error.
pub async fn mark_syncing(pool: &PgPool, user_id: i32) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO sync_state (user_id, status, message, updated_at)
           VALUES ($1, 'syncing', 'Starting sync', NOW())
           ON CONFLICT (user_id) DO UPDATE SET
               status = 'syncing',
               error = NULL,
               processed = 0, total = 0, created = 0, skipped = 0, errors = 0,
               message = 'Starting sync',
               updated_at = NOW()"#,
    )
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Persist live counters mid-run.
pub async fn update_progress(
    pool: &PgPool,
    user_id: i32,
    counts: &SyncCounts,
    message: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE sync_state SET
               processed = $2, total = $3, created = $4, skipped = $5, errors = $6,
               message = $7, updated_at = NOW()
           WHERE user_id = $1"#,
    )
    .bind(user_id)
    .bind(counts.processed)
    .bind(counts.total)
    .bind(counts.created)
    .bind(counts.skipped())
    .bind(counts.errors)
    .bind(message)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record the provider history cursor after a successful run.
pub async fn set_history_cursor(
    pool: &PgPool,
    user_id: i32,
    cursor: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE sync_state SET last_history_id = $2, updated_at = NOW() WHERE user_id = $1",
    )
    .bind(user_id)
    .bind(cursor)
    .execute(pool)
    .await?;
    Ok(())
}

/// Successful termination: back to `idle` with final counters and timestamps.
pub async fn finish_idle(
    pool: &PgPool,
    user_id: i32,
    counts: &SyncCounts,
    full_sync: bool,
    message: &str,
) -> Result<(), sqlx::Error> {
    let now = Utc::now();
    sqlx::query(
        r#"UPDATE sync_state SET
               status = 'idle', error = NULL,
               processed = $2, total = $3, created = $4, skipped = $5, errors = $6,
               message = $7,
               last_synced_at = $8,
               last_full_sync_at = CASE WHEN $9 THEN $8 ELSE last_full_sync_at END,
               updated_at = NOW()
           WHERE user_id = $1"#,
    )
    .bind(user_id)
    .bind(counts.processed)
    .bind(counts.total)
    .bind(counts.created)
    .bind(counts.skipped())
    .bind(counts.errors)
    .bind(message)
    .bind(now)
    .bind(full_sync)
    .execute(pool)
    .await?;
    Ok(())
}

/// Failed termination; the next accepted start clears the error.
pub async fn finish_error(pool: &PgPool, user_id: i32, error: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE sync_state SET status = 'error', error = $2, updated_at = NOW()
           WHERE user_id = $1"#,
    )
    .bind(user_id)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}
