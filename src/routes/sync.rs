//! Sync coordination endpoints: start, observe, cancel.
//!
//! `start_sync` is the `StartSync` contract: it validates credentials and the
//! per-user status gate, flips the state row to `syncing`, enqueues a job,
//! and returns immediately. Progress is observable by polling `sync_state` or
//! subscribing to the SSE stream.

use chrono::NaiveDate;
use rocket::State;
use rocket::response::status::Accepted;
use rocket::response::stream::{Event, EventStream};
use rocket::serde::json::Json;
use rocket_db_pools::sqlx::PgPool;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::mailbox::TokenStore;
use crate::models::{DataResponse, PipelineStatus};
use crate::sync::progress::{ProgressHub, SyncSnapshot};
use crate::sync::queue::{JobKind, JobQueue, SyncMode};
use crate::sync::state;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartSyncRequest {
    #[serde(default)]
    pub mode: Option<SyncMode>,
    pub after_date: Option<NaiveDate>,
    pub before_date: Option<NaiveDate>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartSyncResponse {
    pub job_id: i32,
    pub mode: SyncMode,
}

#[openapi(tag = "Sync")]
#[post("/sync/start", data = "<request>")]
pub async fn start_sync(
    user: AuthUser,
    pool: &State<PgPool>,
    token_store: &State<TokenStore>,
    request: Option<Json<StartSyncRequest>>,
) -> Result<Accepted<Json<DataResponse<StartSyncResponse>>>, ApiError> {
    let request = request.map(|r| r.into_inner());
    let mode = request
        .as_ref()
        .and_then(|r| r.mode)
        .unwrap_or(SyncMode::Auto);

    // No usable credential: reject before touching any state.
    if !token_store.has_usable_token(Some(user.id)) {
        return Err(ApiError::Unauthorized(
            "mailbox not authorized; connect your mailbox first".into(),
        ));
    }

    // Per-user syncs are serialized by the status gate.
    if let Some(record) = state::get(pool.inner(), user.id).await? {
        if record.status == PipelineStatus::Syncing {
            return Err(ApiError::Conflict("a sync is already running".into()));
        }
    }

    state::mark_syncing(pool.inner(), user.id).await?;

    let queue = JobQueue::new(pool.inner().clone());
    let job_id = queue
        .enqueue(
            user.id,
            JobKind::Sync,
            mode,
            request.as_ref().and_then(|r| r.after_date),
            request.as_ref().and_then(|r| r.before_date),
            serde_json::json!({}),
        )
        .await?;

    log::info!("user {}: sync job {} enqueued ({:?})", user.id, job_id, mode);

    Ok(Accepted(Json(DataResponse::new(StartSyncResponse {
        job_id,
        mode,
    }))))
}

#[openapi(tag = "Sync")]
#[get("/sync/state")]
pub async fn sync_state(
    user: AuthUser,
    pool: &State<PgPool>,
) -> Result<Json<DataResponse<SyncSnapshot>>, ApiError> {
    let snapshot = match state::get(pool.inner(), user.id).await? {
        Some(record) => SyncSnapshot::from_record(&record),
        None => SyncSnapshot {
            user_id: user.id,
            status: PipelineStatus::Idle,
            message: String::new(),
            processed: 0,
            total: 0,
            created: 0,
            skipped: 0,
            errors: 0,
            error: None,
        },
    };
    Ok(Json(DataResponse::new(snapshot)))
}

#[openapi(tag = "Sync")]
#[post("/sync/cancel")]
pub async fn cancel_sync(
    user: AuthUser,
    pool: &State<PgPool>,
) -> Result<Json<DataResponse<u64>>, ApiError> {
    let queue = JobQueue::new(pool.inner().clone());
    let cancelled = queue.cancel_for_user(user.id).await?;
    Ok(Json(DataResponse::new(cancelled)))
}

/// Server-sent snapshot stream for the authenticated user's sync progress.
/// Mounted outside the OpenAPI route set; event payloads are JSON-encoded
/// [`SyncSnapshot`] values.
#[get("/sync/stream")]
pub async fn sync_stream(
    user: AuthUser,
    pool: &State<PgPool>,
    hub: &State<ProgressHub>,
) -> EventStream![Event] {
    let mut rx = hub.subscribe();
    let initial = state::get(pool.inner(), user.id)
        .await
        .ok()
        .flatten()
        .map(|record| SyncSnapshot::from_record(&record));
    let user_id = user.id;

    EventStream! {
        if let Some(snapshot) = initial {
            if let Ok(json) = serde_json::to_string(&snapshot) {
                yield Event::data(json).event("sync");
            }
        }

        loop {
            match rx.recv().await {
                Ok(snapshot) if snapshot.user_id == user_id => {
                    if let Ok(json) = serde_json::to_string(&snapshot) {
                        yield Event::data(json).event("sync");
                    }
                }
                Ok(_) => continue,
                // Lagged subscribers just resume with the next snapshot.
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
