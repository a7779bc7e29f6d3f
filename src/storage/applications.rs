//! Application rows: creation from classification output and read paths.

use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::{self, PgConnection, PgPool};

use crate::cache::CachedClassification;
use crate::models::{AppStatus, Application, Category, EmailMessage, Stage};
use crate::storage::truncate_chars;

const MAX_BODY_CHARS: usize = 10_000;
const MAX_SUBJECT_CHARS: usize = 500;
const MAX_FROM_CHARS: usize = 255;
const MAX_TITLE_CHARS: usize = 255;

/// Everything needed to insert one application row.
#[derive(Debug, Clone)]
pub struct NewApplication {
    pub user_id: i32,
    pub source_message_id: String,
    pub company_name: String,
    pub job_title: Option<String>,
    pub seniority: Option<String>,
    pub category: Category,
    pub confidence: f32,
    pub stage: Stage,
    pub status: AppStatus,
    pub requires_action: bool,
    pub action_items: Vec<String>,
    pub reasoning: Option<String>,
    pub needs_review: bool,
    pub model: Option<String>,
    pub email_subject: String,
    pub email_from: String,
    pub email_body: String,
    pub received_date: Option<DateTime<Utc>>,
    pub applied_at: Option<DateTime<Utc>>,
    pub interview_at: Option<DateTime<Utc>>,
    pub offer_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
}

impl NewApplication {
    /// Build a row from a decoded message plus its classification payload,
    /// deriving status and per-stage transition timestamps.
    pub fn from_classification(
        user_id: i32,
        message: &EmailMessage,
        payload: &CachedClassification,
        needs_review: bool,
    ) -> Self {
        let received = message.received;
        let stage = payload.stage;

        let interview_at = matches!(stage, Stage::Interview | Stage::Screening)
            .then_some(received)
            .flatten();
        let offer_at = (stage == Stage::Offer).then_some(received).flatten();
        let rejected_at = (stage == Stage::Rejected).then_some(received).flatten();

        Self {
            user_id,
            source_message_id: message.message_id.clone(),
            company_name: truncate_chars(&payload.company_name, MAX_TITLE_CHARS),
            job_title: payload
                .job_title
                .as_deref()
                .map(|t| truncate_chars(t, MAX_TITLE_CHARS)),
            seniority: payload.seniority.clone(),
            category: payload.category,
            confidence: payload.confidence,
            stage,
            status: AppStatus::from_stage(stage),
            requires_action: payload.requires_action,
            action_items: payload.action_items.clone(),
            reasoning: (!payload.reasoning.is_empty()).then(|| payload.reasoning.clone()),
            needs_review,
            model: payload.model.clone(),
            email_subject: truncate_chars(&message.subject, MAX_SUBJECT_CHARS),
            email_from: truncate_chars(&message.sender, MAX_FROM_CHARS),
            email_body: truncate_chars(&message.body, MAX_BODY_CHARS),
            received_date: received,
            applied_at: received,
            interview_at,
            offer_at,
            rejected_at,
        }
    }
}

/// Insert one application row. Runs on the caller's connection so a savepoint
/// can absorb unique-index races without aborting the outer transaction.
pub async fn insert(conn: &mut PgConnection, app: &NewApplication) -> Result<i32, sqlx::Error> {
    let (id,): (i32,) = sqlx::query_as(
        r#"INSERT INTO applications
           (user_id, source_message_id, company_name, job_title, seniority, category,
            confidence, stage, status, requires_action, action_items, reasoning,
            needs_review, model, email_subject, email_from, email_body, received_date,
            applied_at, interview_at, offer_at, rejected_at)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                   $13, $14, $15, $16, $17, $18, $19, $20, $21, $22)
           RETURNING id"#,
    )
    .bind(app.user_id)
    .bind(&app.source_message_id)
    .bind(&app.company_name)
    .bind(&app.job_title)
    .bind(&app.seniority)
    .bind(app.category)
    .bind(app.confidence)
    .bind(app.stage)
    .bind(app.status)
    .bind(app.requires_action)
    .bind(serde_json::json!(app.action_items))
    .bind(&app.reasoning)
    .bind(app.needs_review)
    .bind(&app.model)
    .bind(&app.email_subject)
    .bind(&app.email_from)
    .bind(&app.email_body)
    .bind(app.received_date)
    .bind(app.applied_at)
    .bind(app.interview_at)
    .bind(app.offer_at)
    .bind(app.rejected_at)
    .fetch_one(conn)
    .await?;

    Ok(id)
}

/// Duplicate-by-provider-id check for Phase 1.
pub async fn exists_by_message_id(
    pool: &PgPool,
    user_id: i32,
    source_message_id: &str,
) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM applications WHERE user_id = $1 AND source_message_id = $2",
    )
    .bind(user_id)
    .bind(source_message_id)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

pub async fn count_for_user(pool: &PgPool, user_id: i32) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM applications WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await
}

/// `(company_name, job_title)` pairs received on or after `since`, used to
/// seed the in-memory duplicate detector.
pub async fn recent_company_titles(
    pool: &PgPool,
    user_id: i32,
    since: DateTime<Utc>,
) -> Result<Vec<(String, Option<String>)>, sqlx::Error> {
    sqlx::query_as(
        r#"SELECT company_name, job_title FROM applications
           WHERE user_id = $1 AND received_date >= $2"#,
    )
    .bind(user_id)
    .bind(since)
    .fetch_all(pool)
    .await
}

pub async fn get(
    pool: &PgPool,
    user_id: i32,
    id: i32,
) -> Result<Option<Application>, sqlx::Error> {
    sqlx::query_as::<_, Application>(
        "SELECT * FROM applications WHERE user_id = $1 AND id = $2",
    )
    .bind(user_id)
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Paginated listing ordered by received date, newest first.
pub async fn list_for_user(
    pool: &PgPool,
    user_id: i32,
    page: i64,
    size: i64,
) -> Result<(Vec<Application>, i64), sqlx::Error> {
    let page = page.max(1);
    let size = size.clamp(1, 100);
    let offset = (page - 1) * size;

    let total: i64 = count_for_user(pool, user_id).await?;

    let rows = sqlx::query_as::<_, Application>(
        r#"SELECT * FROM applications
           WHERE user_id = $1
           ORDER BY received_date DESC NULLS LAST, id DESC
           LIMIT $2 OFFSET $3"#,
    )
    .bind(user_id)
    .bind(size)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok((rows, total))
}

pub async fn delete(pool: &PgPool, user_id: i32, id: i32) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM applications WHERE user_id = $1 AND id = $2")
        .bind(user_id)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Rows eligible for reclassification, oldest first.
pub async fn list_for_reprocess(
    pool: &PgPool,
    user_id: i32,
    only_needs_review: bool,
    limit: i64,
) -> Result<Vec<Application>, sqlx::Error> {
    sqlx::query_as::<_, Application>(
        r#"SELECT * FROM applications
           WHERE user_id = $1 AND ($2 = FALSE OR needs_review = TRUE)
           ORDER BY id ASC
           LIMIT $3"#,
    )
    .bind(user_id)
    .bind(only_needs_review)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Overwrite classification fields on an existing row during reprocessing.
pub async fn update_classification(
    pool: &PgPool,
    id: i32,
    payload: &CachedClassification,
    needs_review: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE applications SET
               company_name = $2, job_title = $3, seniority = $4, category = $5,
               confidence = $6, stage = $7, status = $8, requires_action = $9,
               action_items = $10, reasoning = $11, needs_review = $12, model = $13,
               updated_at = NOW()
           WHERE id = $1"#,
    )
    .bind(id)
    .bind(truncate_chars(&payload.company_name, MAX_TITLE_CHARS))
    .bind(
        payload
            .job_title
            .as_deref()
            .map(|t| truncate_chars(t, MAX_TITLE_CHARS)),
    )
    .bind(&payload.seniority)
    .bind(payload.category)
    .bind(payload.confidence)
    .bind(payload.stage)
    .bind(AppStatus::from_stage(payload.stage))
    .bind(payload.requires_action)
    .bind(serde_json::json!(payload.action_items))
    .bind((!payload.reasoning.is_empty()).then(|| payload.reasoning.clone()))
    .bind(needs_review)
    .bind(&payload.model)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(stage: Stage, category: Category) -> CachedClassification {
        CachedClassification {
            category,
            company_name: "Acme".into(),
            job_title: Some("Engineer".into()),
            seniority: None,
            confidence: 0.9,
            stage,
            requires_action: false,
            action_items: vec![],
            reasoning: "r".into(),
            model: Some("m".into()),
        }
    }

    fn message(body_len: usize) -> EmailMessage {
        EmailMessage {
            message_id: "m1".into(),
            subject: "s".repeat(600),
            sender: "f".repeat(300),
            body: "b".repeat(body_len),
            received: Some(Utc::now()),
        }
    }

    #[test]
    fn truncates_bounded_columns() {
        let app = NewApplication::from_classification(
            1,
            &message(20_000),
            &payload(Stage::Applied, Category::JobApplicationConfirmation),
            false,
        );
        assert_eq!(app.email_subject.chars().count(), 500);
        assert_eq!(app.email_from.chars().count(), 255);
        assert_eq!(app.email_body.chars().count(), 10_000);
    }

    #[test]
    fn transition_timestamps_follow_stage() {
        let msg = message(10);

        let rejected = NewApplication::from_classification(
            1,
            &msg,
            &payload(Stage::Rejected, Category::JobRejection),
            false,
        );
        assert!(rejected.rejected_at.is_some());
        assert!(rejected.offer_at.is_none());
        assert_eq!(rejected.rejected_at, msg.received);
        assert_eq!(rejected.status, AppStatus::Rejected);

        let offer = NewApplication::from_classification(
            1,
            &msg,
            &payload(Stage::Offer, Category::JobApplicationConfirmation),
            false,
        );
        assert_eq!(offer.offer_at, msg.received);
        assert_eq!(offer.status, AppStatus::Offer);

        let screening = NewApplication::from_classification(
            1,
            &msg,
            &payload(Stage::Screening, Category::InterviewAssessment),
            false,
        );
        assert_eq!(screening.interview_at, msg.received);
        assert_eq!(screening.status, AppStatus::Interviewing);

        let applied = NewApplication::from_classification(
            1,
            &msg,
            &payload(Stage::Applied, Category::JobApplicationConfirmation),
            false,
        );
        assert!(applied.interview_at.is_none());
        assert_eq!(applied.applied_at, msg.received);
    }
}
