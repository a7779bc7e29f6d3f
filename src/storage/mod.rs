//! Database access helpers shared by the pipeline and the HTTP surface.
//!
//! The writer side of the ingestion loop passes `&mut PgConnection` handles so
//! inserts land inside whatever savepoint the caller holds; read paths take
//! the pool directly.

pub mod applications;
pub mod email_log;
pub mod users;

use rocket_db_pools::sqlx::PgPool;

/// Run database migrations. Idempotent; already-applied migrations are skipped.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    log::info!("running database migrations");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))?;

    log::info!("database migrations completed");
    Ok(())
}

/// Truncate to a maximum number of characters, for bounded columns.
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// True for Postgres transient contention: serialization failures, deadlocks,
/// and lock-not-available. The writer loop retries these at savepoint and
/// commit boundaries.
pub fn is_transient_contention(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err)
            if db_err
                .code()
                .map(|code| code == "40001" || code == "40P01" || code == "55P03")
                .unwrap_or(false)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("héllo", 2), "hé");
    }
}
