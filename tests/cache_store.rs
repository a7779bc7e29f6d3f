//! Durable-tier cache behavior: upsert semantics, user scoping, and
//! correctness with the in-memory tier disabled.

use rocket_db_pools::sqlx;

use jobtrack::cache::{CachedClassification, ClassificationCache, content_hash};
use jobtrack::models::{Category, Stage};
use jobtrack::test_support::{TestDatabase, TestFixtures};

fn payload(category: Category, confidence: f32) -> CachedClassification {
    CachedClassification {
        category,
        company_name: "Acme".into(),
        job_title: Some("Engineer".into()),
        seniority: None,
        confidence,
        stage: Stage::Applied,
        requires_action: false,
        action_items: vec![],
        reasoning: "r".into(),
        model: Some("m".into()),
    }
}

async fn store_committed(
    db: &TestDatabase,
    cache: &ClassificationCache,
    user_id: i32,
    hash: &str,
    payload: &CachedClassification,
) {
    let mut conn = db.pool().acquire().await.expect("conn");
    sqlx::query("BEGIN").execute(&mut *conn).await.expect("begin");
    cache
        .store(&mut conn, user_id, hash, payload)
        .await
        .expect("store");
    sqlx::query("COMMIT").execute(&mut *conn).await.expect("commit");
}

#[tokio::test]
async fn store_then_lookup_roundtrips() {
    let db = TestDatabase::new().await.expect("test database");
    let user_id = TestFixtures::new(db.pool())
        .insert_user("cache@example.com", None)
        .await
        .unwrap();

    let cache = ClassificationCache::new();
    let hash = content_hash("Subject", "from@x.com", "body");
    let original = payload(Category::JobApplicationConfirmation, 0.9);

    store_committed(&db, &cache, user_id, &hash, &original).await;

    let hit = cache
        .lookup(db.pool(), user_id, &hash)
        .await
        .expect("lookup")
        .expect("cache hit");
    assert_eq!(hit, original);
}

#[tokio::test]
async fn second_store_overwrites_in_place() {
    let db = TestDatabase::new().await.expect("test database");
    let user_id = TestFixtures::new(db.pool())
        .insert_user("cache2@example.com", None)
        .await
        .unwrap();

    let cache = ClassificationCache::new();
    let hash = content_hash("Subject", "from@x.com", "body");

    store_committed(&db, &cache, user_id, &hash, &payload(Category::JobAlerts, 0.5)).await;
    store_committed(
        &db,
        &cache,
        user_id,
        &hash,
        &payload(Category::JobRejection, 0.95),
    )
    .await;

    // Last writer wins, and the unique index holds one row.
    let rows: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM classification_cache WHERE user_id = $1 AND content_hash = $2",
    )
    .bind(user_id)
    .bind(&hash)
    .fetch_one(db.pool())
    .await
    .unwrap();
    assert_eq!(rows, 1);

    let hit = cache
        .lookup(db.pool(), user_id, &hash)
        .await
        .expect("lookup")
        .expect("cache hit");
    assert_eq!(hit.category, Category::JobRejection);
}

#[tokio::test]
async fn lookups_are_user_scoped() {
    let db = TestDatabase::new().await.expect("test database");
    let fixtures = TestFixtures::new(db.pool());
    let user_a = fixtures.insert_user("a@example.com", None).await.unwrap();
    let user_b = fixtures.insert_user("b@example.com", None).await.unwrap();

    let cache = ClassificationCache::new();
    let hash = content_hash("Subject", "from@x.com", "body");

    store_committed(&db, &cache, user_a, &hash, &payload(Category::JobAlerts, 0.8)).await;

    // Identical content under another user must miss.
    let other = cache.lookup(db.pool(), user_b, &hash).await.expect("lookup");
    assert!(other.is_none());
}

#[tokio::test]
async fn l2_serves_lookups_with_l1_disabled() {
    let db = TestDatabase::new().await.expect("test database");
    let user_id = TestFixtures::new(db.pool())
        .insert_user("cache3@example.com", None)
        .await
        .unwrap();

    let writer = ClassificationCache::without_l1();
    let hash = content_hash("Subject", "from@x.com", "body");
    store_committed(&db, &writer, user_id, &hash, &payload(Category::JobAlerts, 0.7)).await;

    // A completely separate cache instance with L1 disabled still hits L2.
    let reader = ClassificationCache::without_l1();
    let hit = reader
        .lookup(db.pool(), user_id, &hash)
        .await
        .expect("lookup")
        .expect("durable tier hit");
    assert_eq!(hit.category, Category::JobAlerts);
}

#[tokio::test]
async fn store_conflict_with_preexisting_row_updates_it() {
    let db = TestDatabase::new().await.expect("test database");
    let user_id = TestFixtures::new(db.pool())
        .insert_user("cache4@example.com", None)
        .await
        .unwrap();

    let hash = content_hash("Subject", "from@x.com", "body");

    // Another writer's row lands first.
    let other_writer = ClassificationCache::without_l1();
    store_committed(
        &db,
        &other_writer,
        user_id,
        &hash,
        &payload(Category::JobAlerts, 0.5),
    )
    .await;

    // A second cache instance (cold L1) upserts the same key inside its own
    // transaction; the surrounding transaction must survive and the row must
    // be updated in place.
    let cache = ClassificationCache::new();
    let mut conn = db.pool().acquire().await.expect("conn");
    sqlx::query("BEGIN").execute(&mut *conn).await.unwrap();
    cache
        .store(&mut conn, user_id, &hash, &payload(Category::JobRejection, 0.9))
        .await
        .expect("store over existing row");
    // The transaction is still usable after the upsert.
    sqlx::query("SELECT 1").execute(&mut *conn).await.unwrap();
    sqlx::query("COMMIT").execute(&mut *conn).await.unwrap();

    let hit = cache
        .lookup(db.pool(), user_id, &hash)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hit.category, Category::JobRejection);
}
