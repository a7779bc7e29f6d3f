//! Reclassification endpoints: start a reprocess job and observe its state.

use rocket::State;
use rocket::response::status::Accepted;
use rocket::serde::json::Json;
use rocket_db_pools::sqlx::PgPool;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::{DataResponse, PipelineStatus, ReprocessStateRecord};
use crate::reprocess::state;
use crate::sync::queue::{JobKind, JobQueue, SyncMode};

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartReprocessRequest {
    pub only_needs_review: Option<bool>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartReprocessResponse {
    pub job_id: i32,
}

#[openapi(tag = "Reprocess")]
#[post("/reprocess/start", data = "<request>")]
pub async fn start_reprocess(
    user: AuthUser,
    pool: &State<PgPool>,
    request: Option<Json<StartReprocessRequest>>,
) -> Result<Accepted<Json<DataResponse<StartReprocessResponse>>>, ApiError> {
    if let Some(record) = state::get(pool.inner(), user.id).await? {
        if record.status == PipelineStatus::Syncing {
            return Err(ApiError::Conflict("a reprocess is already running".into()));
        }
    }

    let request = request.map(|r| r.into_inner());
    let payload = serde_json::json!({
        "only_needs_review": request.as_ref().and_then(|r| r.only_needs_review).unwrap_or(true),
        "limit": request.as_ref().and_then(|r| r.limit).unwrap_or(500),
    });

    state::mark_running(pool.inner(), user.id, 0).await?;

    let queue = JobQueue::new(pool.inner().clone());
    let job_id = queue
        .enqueue(
            user.id,
            JobKind::Reprocess,
            SyncMode::Auto,
            None,
            None,
            payload,
        )
        .await?;

    log::info!("user {}: reprocess job {} enqueued", user.id, job_id);

    Ok(Accepted(Json(DataResponse::new(StartReprocessResponse {
        job_id,
    }))))
}

#[openapi(tag = "Reprocess")]
#[get("/reprocess/state")]
pub async fn reprocess_state(
    user: AuthUser,
    pool: &State<PgPool>,
) -> Result<Json<DataResponse<Option<ReprocessStateRecord>>>, ApiError> {
    let record = state::get(pool.inner(), user.id).await?;
    Ok(Json(DataResponse::new(record)))
}
