//! Reclassification of existing applications.
//!
//! A long-running per-user job that re-runs the classification graph over
//! rows already in the database (by default only those flagged
//! `needs_review`) and updates them in place. Progress is tracked in
//! `reprocess_state`, which has the same shape and status gate as the sync
//! state: at most one reprocess runs per user.

pub mod state;

use rocket_db_pools::sqlx::PgPool;
use serde::Deserialize;

use crate::classify::ClassificationGraph;
use crate::cache::CachedClassification;
use crate::classify::NEEDS_REVIEW_THRESHOLD;
use crate::models::EmailMessage;
use crate::storage::applications;
use crate::sync::queue::{JobQueue, SyncJob};
use state::ReprocessCounts;

const DEFAULT_LIMIT: i64 = 500;
const BATCH_SIZE: usize = 25;

/// Options carried in the job payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ReprocessOptions {
    #[serde(default = "default_only_needs_review")]
    pub only_needs_review: bool,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_only_needs_review() -> bool {
    true
}

fn default_limit() -> i64 {
    DEFAULT_LIMIT
}

impl Default for ReprocessOptions {
    fn default() -> Self {
        Self {
            only_needs_review: true,
            limit: DEFAULT_LIMIT,
        }
    }
}

/// Run one reprocess job claimed from the queue.
pub async fn run_reprocess_job(
    pool: &PgPool,
    job: &SyncJob,
    graph: ClassificationGraph,
    queue: &JobQueue,
) -> Result<(), String> {
    let user_id = job.user_id;
    let options: ReprocessOptions =
        serde_json::from_value(job.payload.clone()).unwrap_or_default();

    let result = run_reprocess(pool, user_id, &options, &graph, queue, job.id).await;
    match result {
        Ok(counts) => {
            state::finish_idle(pool, user_id, &counts)
                .await
                .map_err(|e| format!("failed to finalize reprocess state: {}", e))?;
            queue
                .complete_job(job.id)
                .await
                .map_err(|e| format!("failed to mark reprocess job complete: {}", e))?;
            log::info!(
                "reprocess job {}: complete - processed={} updated={} errors={}",
                job.id,
                counts.processed,
                counts.updated,
                counts.errors
            );
            Ok(())
        }
        Err(error) => {
            if let Err(e) = state::finish_error(pool, user_id, &error).await {
                log::error!("failed to record reprocess error state: {}", e);
            }
            let _ = queue.fail_job(job.id, error.clone()).await;
            Err(error)
        }
    }
}

async fn run_reprocess(
    pool: &PgPool,
    user_id: i32,
    options: &ReprocessOptions,
    graph: &ClassificationGraph,
    queue: &JobQueue,
    job_id: i32,
) -> Result<ReprocessCounts, String> {
    let rows = applications::list_for_reprocess(
        pool,
        user_id,
        options.only_needs_review,
        options.limit.clamp(1, 5000),
    )
    .await
    .map_err(|e| format!("failed to load applications: {}", e))?;

    let mut counts = ReprocessCounts {
        total: rows.len() as i32,
        ..Default::default()
    };
    state::mark_running(pool, user_id, counts.total)
        .await
        .map_err(|e| format!("failed to mark reprocess running: {}", e))?;

    log::info!(
        "reprocess job {}: {} applications for user {}",
        job_id,
        rows.len(),
        user_id
    );

    for chunk in rows.chunks(BATCH_SIZE) {
        if queue.is_job_cancelled(job_id).await.unwrap_or(false) {
            log::warn!("reprocess job {}: cancelled, stopping", job_id);
            break;
        }

        // Rebuild graph inputs from the stored message fields.
        let inputs: Vec<EmailMessage> = chunk
            .iter()
            .map(|app| EmailMessage {
                message_id: app.source_message_id.clone(),
                subject: app.email_subject.clone().unwrap_or_default(),
                sender: app.email_from.clone().unwrap_or_default(),
                body: app.email_body.clone().unwrap_or_default(),
                received: app.received_date,
            })
            .collect();

        let states = graph.classify_batch(&inputs).await;

        for (app, state) in chunk.iter().zip(states.into_iter()) {
            counts.processed += 1;

            if state.llm_failed {
                // Keep the old record rather than overwrite it with the
                // fallback class.
                counts.errors += 1;
                continue;
            }

            let payload = CachedClassification::from_state(&state);
            let needs_review = state.confidence < NEEDS_REVIEW_THRESHOLD;
            match applications::update_classification(pool, app.id, &payload, needs_review).await {
                Ok(()) => counts.updated += 1,
                Err(e) => {
                    log::error!("reprocess update failed for application {}: {}", app.id, e);
                    counts.errors += 1;
                }
            }
        }

        state::update_progress(pool, user_id, &counts, "Reclassifying")
            .await
            .map_err(|e| format!("failed to persist reprocess progress: {}", e))?;
    }

    Ok(counts)
}
