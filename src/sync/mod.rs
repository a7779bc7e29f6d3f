//! Mailbox synchronization system.
//!
//! This module is the write path of the tracker: it pulls messages from the
//! user's mailbox, classifies them, and persists application records with
//! resumable, concurrency-safe per-user state.
//!
//! # Architecture Overview
//!
//! - **`queue`**: durable job queue; `StartSync` enqueues and returns, the
//!   dispatcher claims with `FOR UPDATE SKIP LOCKED`.
//! - **`dispatcher`**: orchestrates one job end to end — credentials, mode
//!   resolution, fetch, ingestion, finalization, cancellation.
//! - **`ingest`**: the single-writer fan-out/fan-in loop; N classification
//!   workers, one storage session, savepoint per message.
//! - **`dedup`**: in-memory (company, title) duplicate detection over a
//!   14-day window, owned by the writer.
//! - **`state`**: the one-row-per-user durable SyncState and its transitions.
//! - **`progress`**: read-only snapshot broadcast for SSE and polling
//!   observers.
//!
//! # Synchronization Modes
//!
//! - **Full**: the seven-query parallel fetch over a date window. Chosen for
//!   first syncs, on explicit request, or when the provider reports the
//!   history cursor is too old.
//! - **Incremental**: history-based delta from the stored cursor. Chosen by
//!   `auto` once a cursor exists and the user has applications.
//!
//! # Ordering
//!
//! Per-user syncs are serialized by the `syncing` status gate. Within one
//! sync, application creation order is result-arrival order, not message
//! order; `received_date` provides user-visible ordering.

pub mod dedup;
pub mod dispatcher;
pub mod ingest;
pub mod progress;
pub mod queue;
pub mod state;

pub use dispatcher::SyncDispatcher;
pub use ingest::{IngestionOutcome, IngestionPipeline};
pub use progress::{ProgressHub, SyncSnapshot};
pub use queue::{JobKind, JobQueue, SyncMode};
pub use state::SyncCounts;
