//! Ingestion endpoint integration tests.
//!
//! Exercise the producer contract: idempotency-key enforcement, validation,
//! 202 semantics on both fresh and duplicate keys, and exactly-once fan-out
//! enqueue under concurrent inserts.

use relay_testing::TestEnv;
use serde_json::json;

#[tokio::test]
async fn health_endpoint_reports_uptime() {
    let Some(env) = TestEnv::new().await.expect("test env setup") else { return };
    let app = env.spawn_app().await.expect("app should start");

    let response = app.client.get(app.url("/health")).send().await.expect("request");

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("json body");
    assert_eq!(body["status"], "ok");
    assert!(body["uptime"].is_u64());
}

#[tokio::test]
async fn missing_idempotency_key_is_rejected() {
    let Some(env) = TestEnv::new().await.expect("test env setup") else { return };
    let app = env.spawn_app().await.expect("app should start");

    let response = app
        .client
        .post(app.url("/api/v1/events"))
        .json(&json!({"eventType": "user.created", "payload": {"x": 1}}))
        .send()
        .await
        .expect("request");

    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.expect("json body");
    assert_eq!(body["error"]["code"], "MISSING_IDEMPOTENCY_KEY");
}

#[tokio::test]
async fn invalid_event_type_is_rejected() {
    let Some(env) = TestEnv::new().await.expect("test env setup") else { return };
    let app = env.spawn_app().await.expect("app should start");

    for event_type in ["", "user created", "a/b"] {
        let response = app
            .client
            .post(app.url("/api/v1/events"))
            .header("X-Idempotency-Key", format!("key-{}", uuid::Uuid::new_v4()))
            .json(&json!({"eventType": event_type, "payload": {}}))
            .send()
            .await
            .expect("request");

        assert_eq!(response.status(), 400, "{event_type:?} should be rejected");
        let body: serde_json::Value = response.json().await.expect("json body");
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }
}

#[tokio::test]
async fn accepted_event_is_stored_and_fanned_out() {
    let Some(env) = TestEnv::new().await.expect("test env setup") else { return };
    let app = env.spawn_app().await.expect("app should start");

    let response = app
        .client
        .post(app.url("/api/v1/events"))
        .header("X-Idempotency-Key", "k-accept-1")
        .json(&json!({"eventType": "user.created", "payload": {"x": 1}}))
        .send()
        .await
        .expect("request");

    assert_eq!(response.status(), 202);
    let body: serde_json::Value = response.json().await.expect("json body");
    assert_eq!(body["duplicate"], false);
    let event_id: uuid::Uuid =
        body["eventId"].as_str().expect("eventId present").parse().expect("uuid");

    let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events WHERE id = $1")
        .bind(event_id)
        .fetch_one(&env.pool)
        .await
        .expect("count query");
    assert_eq!(stored, 1);

    let fanout_jobs: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM queue_jobs WHERE topic = 'fanout'")
            .fetch_one(&env.pool)
            .await
            .expect("count query");
    assert_eq!(fanout_jobs, 1);
}

#[tokio::test]
async fn duplicate_key_returns_prior_event_without_new_fanout() {
    let Some(env) = TestEnv::new().await.expect("test env setup") else { return };
    let app = env.spawn_app().await.expect("app should start");

    let first = app
        .client
        .post(app.url("/api/v1/events"))
        .header("X-Idempotency-Key", "k-dup-1")
        .json(&json!({"eventType": "user.created", "payload": {"x": 1}}))
        .send()
        .await
        .expect("request");
    assert_eq!(first.status(), 202);
    let first_body: serde_json::Value = first.json().await.expect("json body");

    // Same key, different body: still 202, referencing the prior event.
    let second = app
        .client
        .post(app.url("/api/v1/events"))
        .header("X-Idempotency-Key", "k-dup-1")
        .json(&json!({"eventType": "user.created", "payload": {"entirely": "different"}}))
        .send()
        .await
        .expect("request");
    assert_eq!(second.status(), 202);
    let second_body: serde_json::Value = second.json().await.expect("json body");

    assert_eq!(second_body["eventId"], first_body["eventId"]);
    assert_eq!(second_body["duplicate"], true);

    let events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
        .fetch_one(&env.pool)
        .await
        .expect("count query");
    assert_eq!(events, 1);

    let fanout_jobs: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM queue_jobs WHERE topic = 'fanout'")
            .fetch_one(&env.pool)
            .await
            .expect("count query");
    assert_eq!(fanout_jobs, 1, "duplicate must not enqueue a second fan-out");
}

#[tokio::test]
async fn concurrent_posts_with_same_key_store_one_event() {
    let Some(env) = TestEnv::new().await.expect("test env setup") else { return };
    let app = env.spawn_app().await.expect("app should start");

    let mut handles = Vec::new();
    for _ in 0..10 {
        let client = app.client.clone();
        let url = app.url("/api/v1/events");
        handles.push(tokio::spawn(async move {
            client
                .post(url)
                .header("X-Idempotency-Key", "k-race-1")
                .json(&json!({"eventType": "order.paid", "payload": {"n": 1}}))
                .send()
                .await
                .expect("request")
                .status()
                .as_u16()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.expect("task"), 202);
    }

    let events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
        .fetch_one(&env.pool)
        .await
        .expect("count query");
    assert_eq!(events, 1, "unique index must serialize concurrent inserts");

    let fanout_jobs: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM queue_jobs WHERE topic = 'fanout'")
            .fetch_one(&env.pool)
            .await
            .expect("count query");
    assert_eq!(fanout_jobs, 1, "only the winning insert enqueues fan-out");
}

#[tokio::test]
async fn event_detail_includes_delivery_history() {
    let Some(env) = TestEnv::new().await.expect("test env setup") else { return };
    let app = env.spawn_app().await.expect("app should start");

    let response = app
        .client
        .post(app.url("/api/v1/events"))
        .header("X-Idempotency-Key", "k-detail-1")
        .json(&json!({"eventType": "user.created", "payload": {"x": 1}}))
        .send()
        .await
        .expect("request");
    let body: serde_json::Value = response.json().await.expect("json body");
    let event_id = body["eventId"].as_str().expect("eventId");

    let detail = app
        .client
        .get(app.url(&format!("/api/v1/events/{event_id}")))
        .send()
        .await
        .expect("request");
    assert_eq!(detail.status(), 200);
    let detail_body: serde_json::Value = detail.json().await.expect("json body");

    assert_eq!(detail_body["id"], body["eventId"]);
    assert_eq!(detail_body["eventType"], "user.created");
    assert_eq!(detail_body["idempotencyKey"], "k-detail-1");
    assert!(detail_body["deliveryLogs"].is_array());
}

#[tokio::test]
async fn unknown_event_is_404() {
    let Some(env) = TestEnv::new().await.expect("test env setup") else { return };
    let app = env.spawn_app().await.expect("app should start");

    let response = app
        .client
        .get(app.url(&format!("/api/v1/events/{}", uuid::Uuid::new_v4())))
        .send()
        .await
        .expect("request");

    assert_eq!(response.status(), 404);
    let body: serde_json::Value = response.json().await.expect("json body");
    assert_eq!(body["error"]["code"], "EVENT_NOT_FOUND");
}
