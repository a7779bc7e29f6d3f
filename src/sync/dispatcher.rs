//! Sync job dispatcher and orchestration.
//!
//! A long-running worker that claims jobs from the queue and drives each one
//! through the full lifecycle:
//!
//! 1. **Credentials**: resolve a live access token from the vault
//!    (refresh-on-read); a missing or unrefreshable token fails the job with
//!    a reauthorize message and no writes.
//! 2. **Mode resolution**: `auto` becomes `incremental` only when a history
//!    cursor exists and the user already has applications; an incremental
//!    run whose cursor the provider rejects falls back to `full`
//!    transparently.
//! 3. **Fetch**: history delta for incremental; the parallel seven-query
//!    fetch (one client per task) for full, bounded by the resolved date
//!    window.
//! 4. **Ingestion**: the single-writer fan-out loop (see `ingest`).
//! 5. **Finalization**: persist the new history cursor and sync timestamps,
//!    transition the per-user state row back to `idle`/`error`, and complete
//!    or fail the job.
//!
//! Cancellation is polled from the job row and propagated to the pipeline as
//! a cooperative token; a cancelled run commits partial progress and lands on
//! `idle` with partial counts.

use chrono::{DateTime, NaiveDate, Utc};
use rocket_db_pools::sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::cache::ClassificationCache;
use crate::classify::{ChatModel, ClassificationGraph};
use crate::config::AppSettings;
use crate::mailbox::client::ClientFactory;
use crate::mailbox::fetch::{FetchLimits, fetch_delta, fetch_full};
use crate::mailbox::queries::full_sync_queries;
use crate::mailbox::token_store::TokenStore;
use crate::models::PipelineStatus;
use crate::reprocess;
use crate::storage::applications;
use crate::sync::ingest::IngestionPipeline;
use crate::sync::progress::{ProgressHub, SyncSnapshot};
use crate::sync::queue::{JobKind, JobQueue, SyncJob, SyncMode};
use crate::sync::state::{self, SyncCounts};

const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(5);
const ERROR_POLL_INTERVAL: Duration = Duration::from_secs(10);
const CANCEL_POLL_INTERVAL: Duration = Duration::from_secs(2);

struct SyncRunOutcome {
    counts: SyncCounts,
    cancelled: bool,
    full_sync: bool,
}

pub struct SyncDispatcher {
    pool: PgPool,
    queue: JobQueue,
    settings: AppSettings,
    cache: Arc<ClassificationCache>,
    chat: Arc<dyn ChatModel>,
    token_store: TokenStore,
    hub: ProgressHub,
}

impl SyncDispatcher {
    pub fn new(
        pool: PgPool,
        settings: AppSettings,
        cache: Arc<ClassificationCache>,
        chat: Arc<dyn ChatModel>,
        token_store: TokenStore,
        hub: ProgressHub,
    ) -> Self {
        let queue = JobQueue::new(pool.clone());
        Self {
            pool,
            queue,
            settings,
            cache,
            chat,
            token_store,
            hub,
        }
    }

    /// Run the dispatcher loop forever.
    pub async fn run(self) -> ! {
        log::info!("SyncDispatcher started");

        loop {
            let job = match self.queue.get_next_job().await {
                Ok(Some(job)) => {
                    log::info!(
                        "dispatcher: claimed job {} ({:?}) for user {}",
                        job.id,
                        job.kind,
                        job.user_id
                    );
                    job
                }
                Ok(None) => {
                    tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                    continue;
                }
                Err(e) => {
                    log::error!("dispatcher: failed to get job: {}", e);
                    tokio::time::sleep(ERROR_POLL_INTERVAL).await;
                    continue;
                }
            };

            let result = match job.kind {
                JobKind::Sync => self.process_sync_job(&job).await,
                JobKind::Reprocess => self.process_reprocess_job(&job).await,
            };

            if let Err(e) = result {
                log::error!("dispatcher: job {} failed: {}", job.id, e);
            }
        }
    }

    async fn process_sync_job(&self, job: &SyncJob) -> Result<(), String> {
        let user_id = job.user_id;

        match self.run_sync(job).await {
            Ok(outcome) => {
                let message = if outcome.cancelled { "Cancelled" } else { "Done" };
                state::finish_idle(
                    &self.pool,
                    user_id,
                    &outcome.counts,
                    outcome.full_sync,
                    message,
                )
                .await
                .map_err(|e| format!("failed to finalize sync state: {}", e))?;

                let mut snapshot = SyncSnapshot::running(user_id, &outcome.counts, message);
                snapshot.status = PipelineStatus::Idle;
                self.hub.publish(snapshot);

                self.queue
                    .complete_job(job.id)
                    .await
                    .map_err(|e| format!("failed to mark job complete: {}", e))?;

                log::info!(
                    "job {}: complete - processed={} created={} skipped={} errors={}",
                    job.id,
                    outcome.counts.processed,
                    outcome.counts.created,
                    outcome.counts.skipped(),
                    outcome.counts.errors
                );
                Ok(())
            }
            Err(error) => {
                if let Err(e) = state::finish_error(&self.pool, user_id, &error).await {
                    log::error!("failed to record sync error state: {}", e);
                }
                self.hub.publish(SyncSnapshot {
                    user_id,
                    status: PipelineStatus::Error,
                    message: String::new(),
                    processed: 0,
                    total: 0,
                    created: 0,
                    skipped: 0,
                    errors: 0,
                    error: Some(error.clone()),
                });
                let _ = self.queue.fail_job(job.id, error.clone()).await;
                Err(error)
            }
        }
    }

    async fn run_sync(&self, job: &SyncJob) -> Result<SyncRunOutcome, String> {
        let user_id = job.user_id;
        let mailbox = &self.settings.mailbox;

        // Credentials first; nothing is written when the user must reauthorize.
        let access_token = self
            .token_store
            .access_token(Some(user_id))
            .await
            .map_err(|e| e.to_string())?;

        let factory = ClientFactory::new(mailbox.base_url.clone(), access_token);
        let client = factory.client();

        let sync_state = state::get(&self.pool, user_id)
            .await
            .map_err(|e| format!("failed to load sync state: {}", e))?;
        let cursor = sync_state.as_ref().and_then(|s| s.last_history_id.clone());
        let has_apps = applications::count_for_user(&self.pool, user_id)
            .await
            .map_err(|e| format!("failed to count applications: {}", e))?
            > 0;

        let mut mode = resolve_mode(job.mode, cursor.is_some(), has_apps);
        log::info!("job {}: resolved mode {:?}", job.id, mode);

        self.report_fetching(user_id).await;

        let mut messages = Vec::new();
        let mut new_cursor: Option<String> = None;
        let mut full_sync = false;

        if mode == SyncMode::Incremental {
            match &cursor {
                Some(cursor) => {
                    let delta = fetch_delta(&client, cursor, mailbox.history_page_size)
                        .await
                        .map_err(|e| format!("delta fetch failed: {}", e))?;
                    if delta.cursor_too_old {
                        log::info!("job {}: history cursor too old, falling back to full sync", job.id);
                        mode = SyncMode::Full;
                    } else {
                        messages = delta.messages;
                        new_cursor = delta.new_cursor;
                    }
                }
                None => mode = SyncMode::Full,
            }
        }

        if mode == SyncMode::Full {
            full_sync = true;
            let (after, before) = full_sync_window(
                job.after_date,
                job.before_date,
                mailbox.full_sync_after_date.as_deref(),
                mailbox.ignore_last_synced,
                mailbox.full_sync_days_back,
                sync_state.as_ref().and_then(|s| s.last_full_sync_at),
                sync_state.as_ref().and_then(|s| s.last_synced_at),
                Utc::now(),
            );
            log::info!(
                "job {}: full sync window after={:?} before={:?}",
                job.id,
                after,
                before
            );

            let queries = full_sync_queries(after, before);
            let limits = FetchLimits {
                page_size: mailbox.list_page_size,
                max_results: mailbox.full_sync_max_per_query,
                max_pages: mailbox.max_pages,
            };
            messages = fetch_full(&factory, &queries, limits, mailbox.fetch_workers)
                .await
                .map_err(|e| format!("full fetch failed: {}", e))?;

            if new_cursor.is_none() {
                new_cursor = client
                    .get_profile()
                    .await
                    .ok()
                    .and_then(|profile| profile.history_id);
            }
        }

        log::info!("job {}: fetched {} messages", job.id, messages.len());

        // Cooperative cancellation: poll the job row, trip the token.
        let cancel = CancellationToken::new();
        let watcher = {
            let queue = JobQueue::new(self.pool.clone());
            let cancel = cancel.clone();
            let job_id = job.id;
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
                    if queue.is_job_cancelled(job_id).await.unwrap_or(false) {
                        log::warn!("job {}: cancellation requested", job_id);
                        cancel.cancel();
                        break;
                    }
                    if cancel.is_cancelled() {
                        break;
                    }
                }
            })
        };

        let graph = ClassificationGraph::new(self.chat.clone(), self.settings.classify.clone());
        let pipeline = IngestionPipeline::new(
            self.pool.clone(),
            self.cache.clone(),
            graph,
            self.settings.ingest.clone(),
            self.hub.clone(),
        );

        let outcome = pipeline
            .run(user_id, messages, cancel.clone())
            .await
            .map_err(|e| format!("ingestion failed: {}", e))?;

        cancel.cancel();
        watcher.abort();

        // Phase 3: persist the cursor so the next run can go incremental.
        if let Some(cursor) = &new_cursor {
            state::set_history_cursor(&self.pool, user_id, cursor)
                .await
                .map_err(|e| format!("failed to persist history cursor: {}", e))?;
        }

        Ok(SyncRunOutcome {
            counts: outcome.counts,
            cancelled: outcome.cancelled,
            full_sync,
        })
    }

    async fn report_fetching(&self, user_id: i32) {
        let counts = SyncCounts::default();
        self.hub
            .publish(SyncSnapshot::running(user_id, &counts, "Fetching messages"));
        if let Err(e) =
            state::update_progress(&self.pool, user_id, &counts, "Fetching messages").await
        {
            log::warn!("failed to persist fetch progress: {}", e);
        }
    }

    async fn process_reprocess_job(&self, job: &SyncJob) -> Result<(), String> {
        let graph = ClassificationGraph::new(self.chat.clone(), self.settings.classify.clone());
        reprocess::run_reprocess_job(&self.pool, job, graph, &self.queue).await
    }
}

/// `auto` resolves to incremental only when a delta is actually possible.
pub fn resolve_mode(requested: SyncMode, has_cursor: bool, has_apps: bool) -> SyncMode {
    match requested {
        SyncMode::Auto => {
            if has_cursor && has_apps {
                SyncMode::Incremental
            } else {
                SyncMode::Full
            }
        }
        other => other,
    }
}

fn parse_config_date(raw: Option<&str>) -> Option<NaiveDate> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y/%m/%d"))
        .ok()
}

/// Pick the full-sync date window.
///
/// `after` is the narrowest (most recent) of: the explicit request date, the
/// configured override, the last full/incremental sync timestamps (unless
/// ignored), or `now − days_back`.
#[allow(clippy::too_many_arguments)]
pub fn full_sync_window(
    job_after: Option<NaiveDate>,
    job_before: Option<NaiveDate>,
    config_after: Option<&str>,
    ignore_last_synced: bool,
    days_back: i64,
    last_full_sync_at: Option<DateTime<Utc>>,
    last_synced_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> (Option<NaiveDate>, Option<NaiveDate>) {
    let from_history = if ignore_last_synced {
        None
    } else {
        match (last_full_sync_at, last_synced_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
        .map(|dt| dt.date_naive())
    };

    let default_after = (now - chrono::Duration::days(days_back.max(1))).date_naive();

    let after = job_after
        .or_else(|| parse_config_date(config_after))
        .or(from_history)
        .unwrap_or(default_after);

    (Some(after), job_before)
}
