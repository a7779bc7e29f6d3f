//! User rows. Created on registration or first third-party sign-in; never
//! deleted by the pipeline.

use rocket_db_pools::sqlx::{self, PgPool};

use crate::models::User;

pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE lower(email) = lower($1)")
        .bind(email)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_id(pool: &PgPool, id: i32) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_google_sub(
    pool: &PgPool,
    google_sub: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE google_sub = $1")
        .bind(google_sub)
        .fetch_optional(pool)
        .await
}

pub async fn create(
    pool: &PgPool,
    email: &str,
    password_hash: Option<&str>,
    google_sub: Option<&str>,
) -> Result<User, sqlx::Error> {
    sqlx::query_as::<_, User>(
        r#"INSERT INTO users (email, password_hash, google_sub)
           VALUES (lower($1), $2, $3)
           RETURNING *"#,
    )
    .bind(email)
    .bind(password_hash)
    .bind(google_sub)
    .fetch_one(pool)
    .await
}
