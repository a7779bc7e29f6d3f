//! Single-writer fan-out/fan-in ingestion loop.
//!
//! Given the fetched messages for one user:
//!
//! **Phase 1** (writer thread): decode each message, skip provider-id
//! duplicates, persist cache hits directly, and queue cache misses for
//! classification.
//!
//! **Phase 2**: shard the pending queue into batches, assign them round-robin
//! to a bounded pool of classification workers, and drain their results on a
//! single writer loop. Workers perform LLM calls concurrently and never touch
//! the database; the writer owns the storage session, the duplicate-detector
//! map, and all counter updates.
//!
//! Every result is persisted under an explicit savepoint so a unique-index
//! race or transient lock aborts one message, not the run. The outer
//! transaction is committed every `batch_commit_size` savepoints with
//! jittered exponential-backoff retry, so a long sync keeps its progress even
//! if it dies midway.
//!
//! Cancellation is cooperative: workers stop picking up batches, the writer
//! drains everything already in flight, commits, and reports partial counts.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use rand::Rng;
use rocket_db_pools::sqlx::{self, PgConnection, PgPool, pool::PoolConnection, Postgres};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cache::{self, CachedClassification, ClassificationCache, is_unique_violation};
use crate::classify::{ClassificationGraph, EmailState};
use crate::config::IngestSettings;
use crate::mailbox::RawMessage;
use crate::mailbox::decode::decode_message;
use crate::models::EmailMessage;
use crate::storage::{self, applications, email_log};
use crate::storage::applications::NewApplication;
use crate::sync::dedup::DuplicateDetector;
use crate::sync::progress::{ProgressHub, SyncSnapshot};
use crate::sync::state::{self, SyncCounts};

/// How many savepoints between persisted counter updates.
const PROGRESS_PERSIST_EVERY: i32 = 25;

/// Sleep between retries of a contended message.
const CONTENTION_RETRY_SLEEP: Duration = Duration::from_millis(50);

const COMMIT_RETRY_ATTEMPTS: u32 = 6;
const COMMIT_RETRY_BASE: Duration = Duration::from_millis(50);

/// Outcome of one ingestion run.
#[derive(Debug)]
pub struct IngestionOutcome {
    pub counts: SyncCounts,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Created,
    SkippedDuplicate,
    SkippedExisting,
    Contention,
}

/// One unit of work for the writer: a decoded message plus its classification.
struct PersistItem {
    message: EmailMessage,
    payload: CachedClassification,
    needs_review: bool,
    llm_failed: bool,
    attempts: u32,
}

impl PersistItem {
    fn from_state(state: EmailState) -> Self {
        Self {
            payload: CachedClassification::from_state(&state),
            needs_review: state.needs_review,
            llm_failed: state.llm_failed,
            message: state.input,
            attempts: 0,
        }
    }

    fn from_cache_hit(message: EmailMessage, payload: CachedClassification) -> Self {
        Self {
            needs_review: payload.needs_review(),
            llm_failed: false,
            message,
            payload,
            attempts: 0,
        }
    }
}

pub struct IngestionPipeline {
    pool: PgPool,
    cache: Arc<ClassificationCache>,
    graph: ClassificationGraph,
    settings: IngestSettings,
    hub: ProgressHub,
}

impl IngestionPipeline {
    pub fn new(
        pool: PgPool,
        cache: Arc<ClassificationCache>,
        graph: ClassificationGraph,
        settings: IngestSettings,
        hub: ProgressHub,
    ) -> Self {
        Self {
            pool,
            cache,
            graph,
            settings,
            hub,
        }
    }

    /// Run the full ingestion loop for one user's fetched messages.
    pub async fn run(
        &self,
        user_id: i32,
        raw_messages: Vec<RawMessage>,
        cancel: CancellationToken,
    ) -> Result<IngestionOutcome, sqlx::Error> {
        let mut counts = SyncCounts {
            total: raw_messages.len() as i32,
            ..Default::default()
        };
        let mut dedup = DuplicateDetector::load(&self.pool, user_id).await?;

        self.publish(user_id, &counts, "Classifying");
        state::update_progress(&self.pool, user_id, &counts, "Classifying").await?;

        // The writer transaction is managed with explicit statements; the
        // connection must never return to the pool with a transaction open.
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN").execute(&mut *conn).await?;

        let phases = self
            .run_phases(user_id, &raw_messages, &cancel, &mut conn, &mut dedup, &mut counts)
            .await;

        if let Err(err) = phases {
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            return Err(err);
        }

        // Final flush of the writer transaction.
        if let Err(err) = Self::commit_with_retry(&mut conn).await {
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            return Err(err);
        }

        state::update_progress(&self.pool, user_id, &counts, "Finalizing").await?;
        self.publish(user_id, &counts, "Finalizing");

        let cancelled = cancel.is_cancelled();
        log::info!(
            "ingestion complete for user {}: created={} skipped_existing={} skipped_duplicate={} errors={} cancelled={}",
            user_id,
            counts.created,
            counts.skipped_existing,
            counts.skipped_duplicate,
            counts.errors,
            cancelled
        );

        Ok(IngestionOutcome { counts, cancelled })
    }

    /// Phase 1 (parse and cache decisions) and Phase 2 (fan-out classify,
    /// single-writer persist), sharing one open writer transaction.
    async fn run_phases(
        &self,
        user_id: i32,
        raw_messages: &[RawMessage],
        cancel: &CancellationToken,
        conn: &mut PoolConnection<Postgres>,
        dedup: &mut DuplicateDetector,
        counts: &mut SyncCounts,
    ) -> Result<(), sqlx::Error> {
        let mut savepoints_since_commit: usize = 0;

        // Provider ids the writer has already resolved in this run. The
        // database exists-check cannot see rows still uncommitted in the
        // writer transaction, so the same raw message appearing twice in one
        // sync is caught here and absorbed as `skipped_existing`.
        let mut seen_ids: HashSet<String> = HashSet::new();

        // Phase 1: parse, provider-id dedup, cache decisions.
        let mut pending: Vec<EmailMessage> = Vec::new();
        for raw in raw_messages {
            let message = match decode_message(raw) {
                Ok(message) => message,
                Err(err) => {
                    log::error!("failed to decode message {}: {}", raw.id, err);
                    email_log::insert(conn, Some(user_id), &raw.id, None, Some(&err.to_string()))
                        .await?;
                    counts.errors += 1;
                    counts.processed += 1;
                    continue;
                }
            };

            if applications::exists_by_message_id(&self.pool, user_id, &message.message_id).await? {
                log::debug!("message {} already ingested", message.message_id);
                counts.skipped_existing += 1;
                counts.processed += 1;
                continue;
            }

            let hash = cache::content_hash(&message.subject, &message.sender, &message.body);
            match self.cache.lookup(&self.pool, user_id, &hash).await? {
                Some(payload) => {
                    if !seen_ids.insert(message.message_id.clone()) {
                        counts.skipped_existing += 1;
                        counts.processed += 1;
                        continue;
                    }
                    let item = PersistItem::from_cache_hit(message, payload);
                    self.persist_until_done(conn, user_id, item, dedup, counts)
                        .await?;
                    savepoints_since_commit += 1;
                    self.checkpoint(user_id, conn, &mut savepoints_since_commit, counts)
                        .await?;
                }
                None => pending.push(message),
            }
        }

        log::info!(
            "phase 1 complete for user {}: {} resolved, {} pending classification",
            user_id,
            counts.processed,
            pending.len()
        );

        // Phase 2: fan out classification, single writer persists.
        if !pending.is_empty() {
            let workers = self.settings.workers.max(1);
            let batch_size = self.settings.batch_size.max(1);
            let batches: Vec<Vec<EmailMessage>> = pending
                .chunks(batch_size)
                .map(|chunk| chunk.to_vec())
                .collect();

            let (tx_out, mut rx) = mpsc::channel::<EmailState>(workers * 2);

            for worker_idx in 0..workers {
                // Round-robin batch assignment by batch index.
                let my_batches: Vec<Vec<EmailMessage>> = batches
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| i % workers == worker_idx)
                    .map(|(_, b)| b.clone())
                    .collect();
                if my_batches.is_empty() {
                    continue;
                }

                let graph = self.graph.clone();
                let sender = tx_out.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    for batch in my_batches {
                        if cancel.is_cancelled() {
                            log::info!("classification worker {} stopping on cancel", worker_idx);
                            break;
                        }
                        let states = graph.classify_batch(&batch).await;
                        for state in states {
                            if sender.send(state).await.is_err() {
                                return;
                            }
                        }
                    }
                });
            }
            drop(tx_out);

            let mut retry_queue: VecDeque<PersistItem> = VecDeque::new();
            let mut channel_open = true;

            while channel_open || !retry_queue.is_empty() {
                let item = match retry_queue.pop_front() {
                    Some(item) => item,
                    None => match rx.recv().await {
                        Some(state) => PersistItem::from_state(state),
                        None => {
                            channel_open = false;
                            continue;
                        }
                    },
                };

                if item.attempts == 0 && seen_ids.contains(&item.message.message_id) {
                    counts.skipped_existing += 1;
                    counts.processed += 1;
                    continue;
                }

                match self.persist_one(conn, user_id, &item, dedup).await? {
                    Verdict::Contention => {
                        log::debug!(
                            "storage contention for {}, re-enqueueing (attempt {})",
                            item.message.message_id,
                            item.attempts + 1
                        );
                        let mut item = item;
                        item.attempts += 1;
                        retry_queue.push_back(item);
                        tokio::time::sleep(CONTENTION_RETRY_SLEEP).await;
                        continue;
                    }
                    verdict => {
                        seen_ids.insert(item.message.message_id.clone());
                        self.settle(verdict, &item, dedup, counts);
                        savepoints_since_commit += 1;
                        self.checkpoint(user_id, conn, &mut savepoints_since_commit, counts)
                            .await?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Apply a terminal verdict to the counters and duplicate map.
    fn settle(
        &self,
        verdict: Verdict,
        item: &PersistItem,
        dedup: &mut DuplicateDetector,
        counts: &mut SyncCounts,
    ) {
        match verdict {
            Verdict::Created => {
                dedup.record(&item.payload.company_name, item.payload.job_title.as_deref());
                counts.created += 1;
                log::info!(
                    "created application: {} / {:?} / {}",
                    item.payload.company_name,
                    item.payload.job_title,
                    item.payload.category.as_str()
                );
            }
            Verdict::SkippedDuplicate => {
                counts.skipped_duplicate += 1;
                log::info!(
                    "duplicate application skipped: {} / {:?}",
                    item.payload.company_name,
                    item.payload.job_title
                );
            }
            Verdict::SkippedExisting => {
                counts.skipped_existing += 1;
            }
            Verdict::Contention => unreachable!("contention is not a terminal verdict"),
        }
        if item.llm_failed {
            counts.errors += 1;
        }
        counts.processed += 1;
    }

    /// Persist a Phase-1 cache hit, retrying through transient contention.
    async fn persist_until_done(
        &self,
        conn: &mut PgConnection,
        user_id: i32,
        mut item: PersistItem,
        dedup: &mut DuplicateDetector,
        counts: &mut SyncCounts,
    ) -> Result<(), sqlx::Error> {
        loop {
            match self.persist_one(conn, user_id, &item, dedup).await? {
                Verdict::Contention => {
                    item.attempts += 1;
                    tokio::time::sleep(CONTENTION_RETRY_SLEEP).await;
                }
                verdict => {
                    self.settle(verdict, &item, dedup, counts);
                    return Ok(());
                }
            }
        }
    }

    /// Persist one result under an explicit savepoint.
    async fn persist_one(
        &self,
        conn: &mut PgConnection,
        user_id: i32,
        item: &PersistItem,
        dedup: &DuplicateDetector,
    ) -> Result<Verdict, sqlx::Error> {
        sqlx::query("SAVEPOINT msg_write").execute(&mut *conn).await?;

        match self.try_persist(conn, user_id, item, dedup).await {
            Ok(verdict) => {
                sqlx::query("RELEASE SAVEPOINT msg_write")
                    .execute(&mut *conn)
                    .await?;
                Ok(verdict)
            }
            Err(err) if is_unique_violation(&err) => {
                // Concurrent insert for (user_id, source_message_id).
                sqlx::query("ROLLBACK TO SAVEPOINT msg_write")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("RELEASE SAVEPOINT msg_write")
                    .execute(&mut *conn)
                    .await?;
                Ok(Verdict::SkippedExisting)
            }
            Err(err) if storage::is_transient_contention(&err) => {
                sqlx::query("ROLLBACK TO SAVEPOINT msg_write")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("RELEASE SAVEPOINT msg_write")
                    .execute(&mut *conn)
                    .await?;
                Ok(Verdict::Contention)
            }
            Err(err) => {
                sqlx::query("ROLLBACK TO SAVEPOINT msg_write")
                    .execute(&mut *conn)
                    .await?;
                Err(err)
            }
        }
    }

    async fn try_persist(
        &self,
        conn: &mut PgConnection,
        user_id: i32,
        item: &PersistItem,
        dedup: &DuplicateDetector,
    ) -> Result<Verdict, sqlx::Error> {
        let hash = cache::content_hash(
            &item.message.subject,
            &item.message.sender,
            &item.message.body,
        );
        self.cache.store(conn, user_id, &hash, &item.payload).await?;

        if item.payload.category.is_application_like()
            && dedup.is_duplicate(
                &item.payload.company_name,
                item.payload.job_title.as_deref(),
            )
        {
            return Ok(Verdict::SkippedDuplicate);
        }

        let app = NewApplication::from_classification(
            user_id,
            &item.message,
            &item.payload,
            item.needs_review,
        );
        applications::insert(conn, &app).await?;
        email_log::insert(
            conn,
            Some(user_id),
            &item.message.message_id,
            Some(item.payload.category),
            None,
        )
        .await?;

        Ok(Verdict::Created)
    }

    /// Commit the writer transaction every `batch_commit_size` savepoints and
    /// persist progress counters periodically.
    async fn checkpoint(
        &self,
        user_id: i32,
        conn: &mut PoolConnection<Postgres>,
        savepoints_since_commit: &mut usize,
        counts: &SyncCounts,
    ) -> Result<(), sqlx::Error> {
        self.publish(user_id, counts, "Classifying");

        if counts.processed % PROGRESS_PERSIST_EVERY == 0 {
            state::update_progress(&self.pool, user_id, counts, "Classifying").await?;
        }

        if *savepoints_since_commit >= self.settings.batch_commit_size.max(1) {
            Self::commit_with_retry(conn).await?;
            sqlx::query("BEGIN").execute(&mut **conn).await?;
            *savepoints_since_commit = 0;
        }

        Ok(())
    }

    /// Commit with jittered exponential backoff.
    ///
    /// Row-level contention is absorbed per message at the savepoint level;
    /// the retry here covers transient contention surfaced at the commit
    /// boundary. Exhausting the attempts fails the sync; data committed in
    /// earlier flushes is retained.
    async fn commit_with_retry(conn: &mut PoolConnection<Postgres>) -> Result<(), sqlx::Error> {
        let mut attempt: u32 = 0;
        loop {
            match sqlx::query("COMMIT").execute(&mut **conn).await {
                Ok(_) => return Ok(()),
                Err(err)
                    if storage::is_transient_contention(&err)
                        && attempt + 1 < COMMIT_RETRY_ATTEMPTS =>
                {
                    let base = COMMIT_RETRY_BASE * 2u32.pow(attempt);
                    let jitter =
                        Duration::from_millis(rand::thread_rng().gen_range(0..=25) as u64);
                    log::warn!(
                        "commit attempt {}/{} hit contention, retrying in {:?}: {}",
                        attempt + 1,
                        COMMIT_RETRY_ATTEMPTS,
                        base + jitter,
                        err
                    );
                    tokio::time::sleep(base + jitter).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn publish(&self, user_id: i32, counts: &SyncCounts, message: &str) {
        self.hub
            .publish(SyncSnapshot::running(user_id, counts, message));
    }
}
