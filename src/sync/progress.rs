//! In-process fan-out of sync progress.
//!
//! The pipeline is the only publisher; subscribers (the SSE stream, tests)
//! receive read-only snapshots over a bounded broadcast channel and can never
//! mutate pipeline state. Slow subscribers lose intermediate snapshots, which
//! is fine: each snapshot is complete.

use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::{PipelineStatus, SyncStateRecord};
use crate::sync::state::SyncCounts;

const CHANNEL_CAPACITY: usize = 64;

/// Read-only projection of `SyncState` pushed to observers.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SyncSnapshot {
    pub user_id: i32,
    pub status: PipelineStatus,
    pub message: String,
    pub processed: i32,
    pub total: i32,
    pub created: i32,
    pub skipped: i32,
    pub errors: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncSnapshot {
    pub fn running(user_id: i32, counts: &SyncCounts, message: &str) -> Self {
        Self {
            user_id,
            status: PipelineStatus::Syncing,
            message: message.to_string(),
            processed: counts.processed,
            total: counts.total,
            created: counts.created,
            skipped: counts.skipped(),
            errors: counts.errors,
            error: None,
        }
    }

    pub fn from_record(record: &SyncStateRecord) -> Self {
        Self {
            user_id: record.user_id,
            status: record.status,
            message: record.message.clone(),
            processed: record.processed,
            total: record.total,
            created: record.created,
            skipped: record.skipped,
            errors: record.errors,
            error: record.error.clone(),
        }
    }
}

/// Broadcast hub owned by the server; cheap to clone into tasks.
#[derive(Debug, Clone)]
pub struct ProgressHub {
    tx: broadcast::Sender<SyncSnapshot>,
}

impl ProgressHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish a snapshot. Lagging or absent subscribers are not an error.
    pub fn publish(&self, snapshot: SyncSnapshot) {
        let _ = self.tx.send(snapshot);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncSnapshot> {
        self.tx.subscribe()
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_snapshots() {
        let hub = ProgressHub::new();
        let mut rx = hub.subscribe();

        let counts = SyncCounts {
            processed: 3,
            total: 10,
            created: 2,
            skipped_existing: 1,
            skipped_duplicate: 0,
            errors: 0,
        };
        hub.publish(SyncSnapshot::running(7, &counts, "Classifying"));

        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.user_id, 7);
        assert_eq!(snapshot.processed, 3);
        assert_eq!(snapshot.skipped, 1);
        assert_eq!(snapshot.status, PipelineStatus::Syncing);
    }

    #[test]
    fn publish_without_subscribers_is_a_noop() {
        let hub = ProgressHub::new();
        hub.publish(SyncSnapshot::running(1, &SyncCounts::default(), "x"));
    }
}
