//! Per-message processing log: one row per ingested message, recording either
//! the classification that was applied or the error that stopped it.

use rocket_db_pools::sqlx::{self, PgConnection, PgPool};

use crate::models::Category;

pub async fn insert(
    conn: &mut PgConnection,
    user_id: Option<i32>,
    provider_message_id: &str,
    classification: Option<Category>,
    error: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO email_logs (user_id, provider_message_id, classification, error)
           VALUES ($1, $2, $3, $4)"#,
    )
    .bind(user_id)
    .bind(provider_message_id)
    .bind(classification)
    .bind(error)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn count_for_message(
    pool: &PgPool,
    user_id: i32,
    provider_message_id: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM email_logs WHERE user_id = $1 AND provider_message_id = $2",
    )
    .bind(user_id)
    .bind(provider_message_id)
    .fetch_one(pool)
    .await
}
