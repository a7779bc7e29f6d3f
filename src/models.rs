//! Data transfer objects exposed by the API.
//!
//! Every struct in this module derives `JsonSchema` so `rocket_okapi` can describe
//! the payloads accurately in the generated OpenAPI document. The closed enums
//! (`Category`, `Stage`, `AppStatus`) also derive `sqlx::Type` and map onto the
//! Postgres enum types created by the initial migration.

use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::{self, FromRow};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of 14 classification classes produced by the graph.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, sqlx::Type,
)]
#[sqlx(type_name = "email_category", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Category {
    JobApplicationConfirmation,
    JobRejection,
    InterviewAssessment,
    ApplicationFollowup,
    RecruiterOutreach,
    TalentCommunity,
    LinkedinConnectionRequest,
    LinkedinMessage,
    LinkedinJobRecommendations,
    LinkedinProfileActivity,
    JobAlerts,
    VerificationSecurity,
    PromotionalMarketing,
    ReceiptsInvoices,
}

impl Category {
    pub const ALL: [Category; 14] = [
        Category::JobApplicationConfirmation,
        Category::JobRejection,
        Category::InterviewAssessment,
        Category::ApplicationFollowup,
        Category::RecruiterOutreach,
        Category::TalentCommunity,
        Category::LinkedinConnectionRequest,
        Category::LinkedinMessage,
        Category::LinkedinJobRecommendations,
        Category::LinkedinProfileActivity,
        Category::JobAlerts,
        Category::VerificationSecurity,
        Category::PromotionalMarketing,
        Category::ReceiptsInvoices,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::JobApplicationConfirmation => "job_application_confirmation",
            Category::JobRejection => "job_rejection",
            Category::InterviewAssessment => "interview_assessment",
            Category::ApplicationFollowup => "application_followup",
            Category::RecruiterOutreach => "recruiter_outreach",
            Category::TalentCommunity => "talent_community",
            Category::LinkedinConnectionRequest => "linkedin_connection_request",
            Category::LinkedinMessage => "linkedin_message",
            Category::LinkedinJobRecommendations => "linkedin_job_recommendations",
            Category::LinkedinProfileActivity => "linkedin_profile_activity",
            Category::JobAlerts => "job_alerts",
            Category::VerificationSecurity => "verification_security",
            Category::PromotionalMarketing => "promotional_marketing",
            Category::ReceiptsInvoices => "receipts_invoices",
        }
    }

    /// Parse a (possibly sloppy) model-produced label into the closed set.
    /// Whitespace and dashes collapse to underscores; unknown labels return `None`.
    pub fn parse(raw: &str) -> Option<Category> {
        let normalized = raw
            .trim()
            .to_lowercase()
            .replace([' ', '-'], "_")
            .replace("__", "_");
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == normalized)
    }

    /// Classes that represent an application the user actually made; only these
    /// participate in company/title duplicate detection.
    pub fn is_application_like(&self) -> bool {
        matches!(
            self,
            Category::JobApplicationConfirmation
                | Category::JobRejection
                | Category::InterviewAssessment
                | Category::ApplicationFollowup
        )
    }
}

/// Application stage derived from the classification class plus body overrides.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, sqlx::Type,
)]
#[sqlx(type_name = "application_stage", rename_all = "snake_case")]
#[serde(rename_all = "PascalCase")]
pub enum Stage {
    Applied,
    Screening,
    Interview,
    Offer,
    Rejected,
    Pipeline,
    Contacted,
    Other,
}

/// Coarse status shown in the tracker UI; a pure function of `Stage`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, sqlx::Type,
)]
#[sqlx(type_name = "application_status", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppStatus {
    Applied,
    Interviewing,
    Offer,
    Rejected,
}

impl AppStatus {
    pub fn from_stage(stage: Stage) -> AppStatus {
        match stage {
            Stage::Rejected => AppStatus::Rejected,
            Stage::Interview | Stage::Screening => AppStatus::Interviewing,
            Stage::Offer => AppStatus::Offer,
            _ => AppStatus::Applied,
        }
    }
}

/// Lifecycle status shared by the sync and reprocess state rows.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, sqlx::Type,
)]
#[sqlx(type_name = "pipeline_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Idle,
    Syncing,
    Error,
}

/// Decoded mailbox message fed into the classification pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EmailMessage {
    /// Provider-side message id.
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    /// Decoded body; `text/plain` preferred, HTML fallback stripped of tags.
    pub body: String,
    /// Parsed `Date` header, when present and valid.
    pub received: Option<DateTime<Utc>>,
}

/// One job-search event: a single (user, mailbox message) pair.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
pub struct Application {
    /// Database identifier.
    pub id: i32,
    /// Owning user.
    pub user_id: i32,
    /// Provider-side message id this record was created from.
    pub source_message_id: String,
    /// Canonicalized hiring company, `"Unknown"` when not extracted.
    pub company_name: String,
    /// Job title as written in the email, when extractable.
    pub job_title: Option<String>,
    /// Inferred seniority level (e.g. `senior`, `staff`), when known.
    pub seniority: Option<String>,
    /// Classification class.
    pub category: Category,
    /// Model confidence in [0, 1].
    pub confidence: f32,
    /// Derived application stage.
    pub stage: Stage,
    /// Coarse status; always `AppStatus::from_stage(stage)`.
    pub status: AppStatus,
    /// Whether the email asks the user to do something.
    pub requires_action: bool,
    /// Ordered action strings (JSON array).
    pub action_items: Value,
    /// Model reasoning for the classification.
    pub reasoning: Option<String>,
    /// Low-confidence or failed classifications are flagged for review.
    pub needs_review: bool,
    /// Identifier of the model that produced the classification.
    pub model: Option<String>,
    /// Original subject, truncated to 500 chars.
    pub email_subject: Option<String>,
    /// Original sender, truncated to 255 chars.
    pub email_from: Option<String>,
    /// Original body, truncated to 10 000 chars.
    pub email_body: Option<String>,
    /// Timestamp from the message `Date` header.
    pub received_date: Option<DateTime<Utc>>,
    pub applied_at: Option<DateTime<Utc>>,
    pub interview_at: Option<DateTime<Utc>>,
    pub offer_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Per-user sync state row; exactly one per user.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
pub struct SyncStateRecord {
    pub id: i32,
    pub user_id: i32,
    /// Opaque provider history cursor for incremental sync.
    pub last_history_id: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_full_sync_at: Option<DateTime<Utc>>,
    pub status: PipelineStatus,
    pub processed: i32,
    pub total: i32,
    pub created: i32,
    pub skipped: i32,
    pub errors: i32,
    pub message: String,
    pub error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Per-user reprocess state row; at most one per user.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
pub struct ReprocessStateRecord {
    pub id: i32,
    pub user_id: i32,
    pub status: PipelineStatus,
    pub processed: i32,
    pub total: i32,
    pub updated_count: i32,
    pub skipped: i32,
    pub errors: i32,
    pub message: String,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Registered principal.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
pub struct User {
    pub id: i32,
    pub email: String,
    #[serde(default, skip_serializing)]
    pub password_hash: Option<String>,
    /// Third-party identity subject, when the user signed in via OAuth.
    pub google_sub: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Pagination metadata accompanying list responses.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PageMetadata {
    /// One-based page index.
    pub page: i64,
    /// Page size.
    pub size: i64,
    /// Total number of pages.
    #[serde(rename = "totalPages")]
    pub total_pages: i64,
    /// Total number of matching records.
    #[serde(rename = "totalElements")]
    pub total_elements: i64,
}

/// Wrapper for paginated datasets.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PaginatedResponse<T> {
    /// Page content.
    pub data: Vec<T>,
    /// Associated pagination metadata.
    pub page: PageMetadata,
}

impl<T> PaginatedResponse<T> {
    /// Create a paginated response and compute pagination totals.
    pub fn new(data: Vec<T>, page: i64, size: i64, total_elements: i64) -> Self {
        let total_pages = if size > 0 {
            (total_elements + size - 1) / size
        } else {
            0
        };

        Self {
            data,
            page: PageMetadata {
                page,
                size,
                total_pages,
                total_elements,
            },
        }
    }
}

/// Generic wrapper used by endpoints that return simple payloads.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DataResponse<T> {
    /// Response payload.
    pub data: T,
}

impl<T> DataResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_a_pure_function_of_stage() {
        assert_eq!(AppStatus::from_stage(Stage::Rejected), AppStatus::Rejected);
        assert_eq!(
            AppStatus::from_stage(Stage::Interview),
            AppStatus::Interviewing
        );
        assert_eq!(
            AppStatus::from_stage(Stage::Screening),
            AppStatus::Interviewing
        );
        assert_eq!(AppStatus::from_stage(Stage::Offer), AppStatus::Offer);
        assert_eq!(AppStatus::from_stage(Stage::Applied), AppStatus::Applied);
        assert_eq!(AppStatus::from_stage(Stage::Pipeline), AppStatus::Applied);
        assert_eq!(AppStatus::from_stage(Stage::Contacted), AppStatus::Applied);
        assert_eq!(AppStatus::from_stage(Stage::Other), AppStatus::Applied);
    }

    #[test]
    fn category_parse_tolerates_model_formatting() {
        assert_eq!(
            Category::parse("Job Rejection"),
            Some(Category::JobRejection)
        );
        assert_eq!(
            Category::parse("interview-assessment"),
            Some(Category::InterviewAssessment)
        );
        assert_eq!(
            Category::parse("  job_alerts  "),
            Some(Category::JobAlerts)
        );
        assert_eq!(Category::parse("spam"), None);
    }

    #[test]
    fn application_like_set_is_exactly_four_classes() {
        let count = Category::ALL
            .iter()
            .filter(|c| c.is_application_like())
            .count();
        assert_eq!(count, 4);
        assert!(Category::ApplicationFollowup.is_application_like());
        assert!(!Category::RecruiterOutreach.is_application_like());
    }
}
