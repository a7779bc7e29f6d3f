//! StartSync contract tests: the credential gate, the `syncing` status gate,
//! and the enqueue-and-return behavior.

use chrono::{Duration, Utc};
use rocket::http::{ContentType, Header, Status};
use rocket::routes;
use rocket_db_pools::sqlx;
use serde_json::Value;
use tempfile::TempDir;

use jobtrack::mailbox::{StoredToken, TokenStore};
use jobtrack::routes::sync::{cancel_sync, start_sync, sync_state};
use jobtrack::test_support::{TestDatabase, TestFixtures, TestRocketBuilder, test_auth_state};

fn usable_token() -> StoredToken {
    StoredToken {
        access_token: "at".into(),
        refresh_token: Some("rt".into()),
        expiry: Some(Utc::now() + Duration::hours(1)),
        client_id: "cid".into(),
        client_secret: "secret".into(),
        scopes: vec![],
    }
}

struct Harness {
    client: rocket::local::asynchronous::Client,
    db: TestDatabase,
    user_id: i32,
    bearer: String,
    token_store: TokenStore,
    _token_dir: TempDir,
}

async fn harness() -> Harness {
    let db = TestDatabase::new().await.expect("test database");
    let auth_state = test_auth_state();
    let fixtures = TestFixtures::new(db.pool());
    let user_id = fixtures
        .insert_user("sync@example.com", None)
        .await
        .expect("insert user");
    let bearer = fixtures.bearer_token(&auth_state, user_id, "sync@example.com");

    let token_dir = TempDir::new().expect("temp dir");
    let token_store = TokenStore::new(
        Some(token_dir.path().to_path_buf()),
        token_dir.path().join("legacy.json"),
        "http://localhost/token",
    );

    let client = TestRocketBuilder::new()
        .mount_api_routes(routes![start_sync, sync_state, cancel_sync])
        .manage_pg_pool(db.pool_clone())
        .manage_auth_state(auth_state)
        .manage_token_store(token_store.clone())
        .async_client()
        .await;

    Harness {
        client,
        db,
        user_id,
        bearer,
        token_store,
        _token_dir: token_dir,
    }
}

#[tokio::test]
async fn start_without_mailbox_token_is_rejected() {
    let h = harness().await;

    let response = h
        .client
        .post("/api/v1/sync/start")
        .header(Header::new("Authorization", h.bearer.clone()))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Unauthorized);

    // Nothing was enqueued and no state row was created.
    let jobs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_jobs")
        .fetch_one(h.db.pool())
        .await
        .unwrap();
    assert_eq!(jobs, 0);
}

#[tokio::test]
async fn start_enqueues_job_and_marks_syncing() {
    let h = harness().await;
    h.token_store
        .put(Some(h.user_id), &usable_token())
        .expect("store token");

    let response = h
        .client
        .post("/api/v1/sync/start")
        .header(Header::new("Authorization", h.bearer.clone()))
        .header(ContentType::JSON)
        .body(r#"{"mode":"full","afterDate":"2025-05-01"}"#)
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Accepted);
    let body: Value = response.into_json().await.expect("json body");
    assert_eq!(body["data"]["mode"], "full");
    let job_id = body["data"]["jobId"].as_i64().expect("job id");

    let (mode, status, after): (String, String, Option<chrono::NaiveDate>) = sqlx::query_as(
        "SELECT mode::text, status::text, after_date FROM sync_jobs WHERE id = $1",
    )
    .bind(job_id as i32)
    .fetch_one(h.db.pool())
    .await
    .unwrap();
    assert_eq!(mode, "full");
    assert_eq!(status, "queued");
    assert_eq!(after, chrono::NaiveDate::from_ymd_opt(2025, 5, 1));

    // The state row flipped to syncing with cleared counters.
    let response = h
        .client
        .get("/api/v1/sync/state")
        .header(Header::new("Authorization", h.bearer.clone()))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let body: Value = response.into_json().await.expect("json body");
    assert_eq!(body["data"]["status"], "syncing");
    assert_eq!(body["data"]["processed"], 0);
}

#[tokio::test]
async fn concurrent_start_is_rejected_while_syncing() {
    let h = harness().await;
    h.token_store
        .put(Some(h.user_id), &usable_token())
        .expect("store token");

    let first = h
        .client
        .post("/api/v1/sync/start")
        .header(Header::new("Authorization", h.bearer.clone()))
        .dispatch()
        .await;
    assert_eq!(first.status(), Status::Accepted);

    let second = h
        .client
        .post("/api/v1/sync/start")
        .header(Header::new("Authorization", h.bearer.clone()))
        .dispatch()
        .await;
    assert_eq!(second.status(), Status::Conflict);

    let jobs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_jobs WHERE user_id = $1")
        .bind(h.user_id)
        .fetch_one(h.db.pool())
        .await
        .unwrap();
    assert_eq!(jobs, 1);
}

#[tokio::test]
async fn cancel_flips_active_jobs() {
    let h = harness().await;
    h.token_store
        .put(Some(h.user_id), &usable_token())
        .expect("store token");

    let response = h
        .client
        .post("/api/v1/sync/start")
        .header(Header::new("Authorization", h.bearer.clone()))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Accepted);

    let response = h
        .client
        .post("/api/v1/sync/cancel")
        .header(Header::new("Authorization", h.bearer.clone()))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let body: Value = response.into_json().await.expect("json body");
    assert_eq!(body["data"], 1);

    let status: String =
        sqlx::query_scalar("SELECT status::text FROM sync_jobs WHERE user_id = $1")
            .bind(h.user_id)
            .fetch_one(h.db.pool())
            .await
            .unwrap();
    assert_eq!(status, "cancelled");
}

#[tokio::test]
async fn state_defaults_to_idle_for_new_users() {
    let h = harness().await;

    let response = h
        .client
        .get("/api/v1/sync/state")
        .header(Header::new("Authorization", h.bearer.clone()))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let body: Value = response.into_json().await.expect("json body");
    assert_eq!(body["data"]["status"], "idle");
}
