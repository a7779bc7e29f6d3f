//! In-process L1 tier for classification results.
//!
//! Best-effort only: the durable tier is the source of truth, and every code
//! path must behave identically with this tier disabled. Entries expire after
//! seven days and are purged lazily on read.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::cache::CachedClassification;

const L1_TTL_DAYS: i64 = 7;

struct Entry {
    payload: CachedClassification,
    expires_at: DateTime<Utc>,
}

pub struct MemoryCache {
    entries: DashMap<(i32, String), Entry>,
    enabled: bool,
}

impl MemoryCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            entries: DashMap::new(),
            enabled,
        }
    }

    pub fn get(&self, user_id: i32, content_hash: &str) -> Option<CachedClassification> {
        if !self.enabled {
            return None;
        }
        let key = (user_id, content_hash.to_string());
        if let Some(entry) = self.entries.get(&key) {
            if entry.expires_at > Utc::now() {
                return Some(entry.payload.clone());
            }
        }
        // Expired or absent; drop any stale entry.
        self.entries.remove(&key);
        None
    }

    pub fn put(&self, user_id: i32, content_hash: &str, payload: CachedClassification) {
        if !self.enabled {
            return;
        }
        self.entries.insert(
            (user_id, content_hash.to_string()),
            Entry {
                payload,
                expires_at: Utc::now() + Duration::days(L1_TTL_DAYS),
            },
        );
    }

    pub fn invalidate(&self, user_id: i32, content_hash: &str) {
        self.entries.remove(&(user_id, content_hash.to_string()));
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Stage};

    fn payload() -> CachedClassification {
        CachedClassification {
            category: Category::JobAlerts,
            company_name: "Unknown".into(),
            job_title: None,
            seniority: None,
            confidence: 0.9,
            stage: Stage::Other,
            requires_action: false,
            action_items: vec![],
            reasoning: String::new(),
            model: Some("test".into()),
        }
    }

    #[test]
    fn hit_and_miss() {
        let cache = MemoryCache::new(true);
        assert!(cache.get(1, "abc").is_none());
        cache.put(1, "abc", payload());
        assert!(cache.get(1, "abc").is_some());
        assert!(cache.get(2, "abc").is_none(), "entries are user-scoped");
    }

    #[test]
    fn disabled_cache_never_stores() {
        let cache = MemoryCache::new(false);
        cache.put(1, "abc", payload());
        assert!(cache.get(1, "abc").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = MemoryCache::new(true);
        cache.put(1, "abc", payload());
        cache.invalidate(1, "abc");
        assert!(cache.get(1, "abc").is_none());
    }
}
