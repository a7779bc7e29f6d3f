//! Durable per-user reprocess state; same shape and transitions as SyncState.

use rocket_db_pools::sqlx::{self, PgPool};

use crate::models::ReprocessStateRecord;

#[derive(Debug, Default, Clone, Copy)]
pub struct ReprocessCounts {
    pub processed: i32,
    pub total: i32,
    pub updated: i32,
    pub skipped: i32,
    pub errors: i32,
}

pub async fn get(pool: &PgPool, user_id: i32) -> Result<Option<ReprocessStateRecord>, sqlx::Error> {
    sqlx::query_as::<_, ReprocessStateRecord>("SELECT * FROM reprocess_state WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

pub async fn mark_running(pool: &PgPool, user_id: i32, total: i32) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO reprocess_state (user_id, status, total, message, started_at, updated_at)
           VALUES ($1, 'syncing', $2, 'Reclassifying', NOW(), NOW())
           ON CONFLICT (user_id) DO UPDATE SET
               status = 'syncing', error = NULL,
               processed = 0, total = $2, updated_count = 0, skipped = 0, errors = 0,
               message = 'Reclassifying', started_at = NOW(), updated_at = NOW()"#,
    )
    .bind(user_id)
    .bind(total)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn update_progress(
    pool: &PgPool,
    user_id: i32,
    counts: &ReprocessCounts,
    message: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE reprocess_state SET
               processed = $2, total = $3, updated_count = $4, skipped = $5, errors = $6,
               message = $7, updated_at = NOW()
           WHERE user_id = $1"#,
    )
    .bind(user_id)
    .bind(counts.processed)
    .bind(counts.total)
    .bind(counts.updated)
    .bind(counts.skipped)
    .bind(counts.errors)
    .bind(message)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn finish_idle(
    pool: &PgPool,
    user_id: i32,
    counts: &ReprocessCounts,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE reprocess_state SET
               status = 'idle', error = NULL,
               processed = $2, total = $3, updated_count = $4, skipped = $5, errors = $6,
               message = 'Done', updated_at = NOW()
           WHERE user_id = $1"#,
    )
    .bind(user_id)
    .bind(counts.processed)
    .bind(counts.total)
    .bind(counts.updated)
    .bind(counts.skipped)
    .bind(counts.errors)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn finish_error(pool: &PgPool, user_id: i32, error: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE reprocess_state SET status = 'error', error = $2, updated_at = NOW()
           WHERE user_id = $1"#,
    )
    .bind(user_id)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}
