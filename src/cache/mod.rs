//! Two-tier, user-scoped classification cache.
//!
//! Keyed by `(user_id, content_hash)` where the hash is SHA-256 over
//! `subject | sender | body[:5000]`. User scoping is mandatory: the same
//! content may classify differently under different user contexts, and a
//! cross-user read would leak one user's data into another's records.
//!
//! L1 is an in-process map with a 7-day TTL and purely a performance feature.
//! L2 is a durable row with a composite unique index and is the source of
//! truth. Writes go to both; reads check L1 first and repopulate it on an L2
//! hit.

pub mod memory;

use rocket_db_pools::sqlx::{self, PgConnection, PgPool, Row};
use sha2::{Digest, Sha256};

use crate::classify::EmailState;
use crate::models::{Category, Stage};
use memory::MemoryCache;

/// Characters of body included in the content hash. Intentionally smaller than
/// the stored body truncation (10 000): bodies differing only past this point
/// collide by design.
const HASH_BODY_CHARS: usize = 5000;

/// Compute the cache key hash for one message.
pub fn content_hash(subject: &str, sender: &str, body: &str) -> String {
    let body_sample: String = body.chars().take(HASH_BODY_CHARS).collect();
    let content = format!("{}|{}|{}", subject, sender, body_sample);
    let digest = Sha256::digest(content.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// The classification payload stored in (and read back from) the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedClassification {
    pub category: Category,
    pub company_name: String,
    pub job_title: Option<String>,
    pub seniority: Option<String>,
    pub confidence: f32,
    pub stage: Stage,
    pub requires_action: bool,
    pub action_items: Vec<String>,
    pub reasoning: String,
    pub model: Option<String>,
}

impl CachedClassification {
    pub fn from_state(state: &EmailState) -> Self {
        Self {
            category: state.category,
            company_name: state.company.clone(),
            job_title: state.job_title.clone(),
            seniority: state.seniority.clone(),
            confidence: state.confidence,
            stage: state.stage,
            requires_action: state.requires_action,
            action_items: state.action_items.clone(),
            reasoning: state.reasoning.clone(),
            model: Some(state.model.clone()),
        }
    }

    /// Low-confidence cached payloads stay flagged on replay.
    pub fn needs_review(&self) -> bool {
        self.confidence < crate::classify::NEEDS_REVIEW_THRESHOLD
    }

    fn raw_json(&self) -> String {
        serde_json::json!({
            "category": self.category.as_str(),
            "company_name": self.company_name,
            "job_title": self.job_title,
            "seniority": self.seniority,
            "confidence": self.confidence,
            "stage": self.stage,
            "requires_action": self.requires_action,
            "action_items": self.action_items,
            "reasoning": self.reasoning,
            "model": self.model,
        })
        .to_string()
    }
}

/// Two-tier cache service. Shared across the pipeline; the underlying map is
/// concurrency-safe and L2 access goes through whatever connection the caller
/// provides.
pub struct ClassificationCache {
    l1: MemoryCache,
}

impl ClassificationCache {
    pub fn new() -> Self {
        Self {
            l1: MemoryCache::new(true),
        }
    }

    /// Build a cache with the in-memory tier disabled; correctness tests run
    /// against this configuration too.
    pub fn without_l1() -> Self {
        Self {
            l1: MemoryCache::new(false),
        }
    }

    /// Look up a cached classification: L1 first, then L2 with repopulation.
    pub async fn lookup(
        &self,
        pool: &PgPool,
        user_id: i32,
        hash: &str,
    ) -> Result<Option<CachedClassification>, sqlx::Error> {
        if let Some(hit) = self.l1.get(user_id, hash) {
            log::trace!("cache l1 hit for user {}", user_id);
            return Ok(Some(hit));
        }

        let row = sqlx::query(
            r#"SELECT category, company_name, job_title, seniority, confidence, stage,
                      requires_action, action_items, reasoning, model
               FROM classification_cache
               WHERE user_id = $1 AND content_hash = $2"#,
        )
        .bind(user_id)
        .bind(hash)
        .fetch_optional(pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload = Self::payload_from_row(&row)?;
        self.l1.put(user_id, hash, payload.clone());
        Ok(Some(payload))
    }

    fn payload_from_row(row: &sqlx::postgres::PgRow) -> Result<CachedClassification, sqlx::Error> {
        let action_items: serde_json::Value = row.try_get("action_items")?;
        let action_items = action_items
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Ok(CachedClassification {
            category: row.try_get("category")?,
            company_name: row
                .try_get::<Option<String>, _>("company_name")?
                .unwrap_or_else(|| "Unknown".to_string()),
            job_title: row.try_get("job_title")?,
            seniority: row.try_get("seniority")?,
            confidence: row.try_get("confidence")?,
            stage: row.try_get("stage")?,
            requires_action: row.try_get("requires_action")?,
            action_items,
            reasoning: row
                .try_get::<Option<String>, _>("reasoning")?
                .unwrap_or_default(),
            model: row.try_get("model")?,
        })
    }

    /// Upsert a classification into both tiers.
    ///
    /// Runs inside whatever transaction the caller holds, using an explicit
    /// `SAVEPOINT` around the insert: update-if-present, else insert. A
    /// concurrent writer producing the same key surfaces as a unique
    /// violation; only the savepoint rolls back, then the row is re-read and
    /// updated in place. The surrounding transaction is never aborted by a
    /// cache write. The caller must be inside a transaction (the writer loop
    /// always is).
    pub async fn store(
        &self,
        conn: &mut PgConnection,
        user_id: i32,
        hash: &str,
        payload: &CachedClassification,
    ) -> Result<(), sqlx::Error> {
        let updated = Self::update_row(conn, user_id, hash, payload).await?;

        if !updated {
            sqlx::query("SAVEPOINT cache_upsert")
                .execute(&mut *conn)
                .await?;

            let insert_result = Self::insert_row(conn, user_id, hash, payload).await;
            match insert_result {
                Ok(()) => {
                    sqlx::query("RELEASE SAVEPOINT cache_upsert")
                        .execute(&mut *conn)
                        .await?;
                }
                Err(err) if is_unique_violation(&err) => {
                    // Concurrent writer got there first; update its row.
                    sqlx::query("ROLLBACK TO SAVEPOINT cache_upsert")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("RELEASE SAVEPOINT cache_upsert")
                        .execute(&mut *conn)
                        .await?;
                    Self::update_row(conn, user_id, hash, payload).await?;
                }
                Err(err) => {
                    sqlx::query("ROLLBACK TO SAVEPOINT cache_upsert")
                        .execute(&mut *conn)
                        .await?;
                    return Err(err);
                }
            }
        }

        self.l1.put(user_id, hash, payload.clone());
        Ok(())
    }

    async fn insert_row(
        conn: &mut PgConnection,
        user_id: i32,
        hash: &str,
        payload: &CachedClassification,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO classification_cache
               (user_id, content_hash, category, company_name, job_title, seniority,
                confidence, stage, requires_action, action_items, reasoning, model, raw_json)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"#,
        )
        .bind(user_id)
        .bind(hash)
        .bind(payload.category)
        .bind(&payload.company_name)
        .bind(&payload.job_title)
        .bind(&payload.seniority)
        .bind(payload.confidence)
        .bind(payload.stage)
        .bind(payload.requires_action)
        .bind(serde_json::json!(payload.action_items))
        .bind(&payload.reasoning)
        .bind(&payload.model)
        .bind(payload.raw_json())
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn update_row(
        conn: &mut PgConnection,
        user_id: i32,
        hash: &str,
        payload: &CachedClassification,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE classification_cache SET
                   category = $3, company_name = $4, job_title = $5, seniority = $6,
                   confidence = $7, stage = $8, requires_action = $9, action_items = $10,
                   reasoning = $11, model = $12, raw_json = $13, updated_at = NOW()
               WHERE user_id = $1 AND content_hash = $2"#,
        )
        .bind(user_id)
        .bind(hash)
        .bind(payload.category)
        .bind(&payload.company_name)
        .bind(&payload.job_title)
        .bind(&payload.seniority)
        .bind(payload.confidence)
        .bind(payload.stage)
        .bind(payload.requires_action)
        .bind(serde_json::json!(payload.action_items))
        .bind(&payload.reasoning)
        .bind(&payload.model)
        .bind(payload.raw_json())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

impl Default for ClassificationCache {
    fn default() -> Self {
        Self::new()
    }
}

/// True for Postgres unique-constraint violations (SQLSTATE 23505).
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err)
            if db_err.code().map(|code| code == "23505").unwrap_or(false)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_hex() {
        let a = content_hash("Subject", "from@x.com", "body");
        let b = content_hash("Subject", "from@x.com", "body");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_depends_on_every_component() {
        let base = content_hash("Subject", "from@x.com", "body");
        assert_ne!(base, content_hash("Other", "from@x.com", "body"));
        assert_ne!(base, content_hash("Subject", "other@x.com", "body"));
        assert_ne!(base, content_hash("Subject", "from@x.com", "other"));
    }

    #[test]
    fn bodies_differing_past_5000_chars_collide() {
        let mut long_a = "x".repeat(5000);
        let mut long_b = long_a.clone();
        long_a.push_str("AAAA");
        long_b.push_str("BBBB");
        assert_eq!(
            content_hash("S", "f@x.com", &long_a),
            content_hash("S", "f@x.com", &long_b)
        );

        // A difference inside the window still changes the hash.
        let mut early_diff = "x".repeat(4999);
        early_diff.push('y');
        assert_ne!(
            content_hash("S", "f@x.com", &"x".repeat(5000)),
            content_hash("S", "f@x.com", &early_diff)
        );
    }
}
