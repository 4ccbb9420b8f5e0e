//! End-to-end delivery pipeline tests.
//!
//! Drive the fan-out processor and delivery worker one batch at a time so
//! retry sequences are deterministic. Subscriber endpoints are wiremock
//! servers; retry scenarios use an instant-retry queue policy so nothing
//! sleeps.

use relay_delivery::signer;
use relay_testing::TestEnv;
use serde_json::json;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

async fn ingest(app: &relay_testing::TestApp, key: &str, event_type: &str) -> serde_json::Value {
    let response = app
        .client
        .post(app.url("/api/v1/events"))
        .header("X-Idempotency-Key", key)
        .json(&json!({"eventType": event_type, "payload": {"x": 1}}))
        .send()
        .await
        .expect("ingest request");
    assert_eq!(response.status(), 202);
    response.json().await.expect("ingest body")
}

#[tokio::test]
async fn happy_path_delivers_once_with_success_log() {
    let Some(env) = TestEnv::new().await.expect("test env setup") else { return };
    let app = env.spawn_app().await.expect("app should start");

    let sink = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/ok"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(1)
        .mount(&sink)
        .await;

    env.create_subscription("user.created", &format!("{}/ok", sink.uri()))
        .await
        .expect("subscription");

    ingest(&app, "k1", "user.created").await;
    env.drain_pipeline().await.expect("pipeline");

    let rows: Vec<(String, i32, Option<i32>)> = sqlx::query_as(
        "SELECT status, attempt_count, response_status_code FROM delivery_logs",
    )
    .fetch_all(&env.pool)
    .await
    .expect("log query");

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0], ("success".to_string(), 1, Some(200)));

    // Stats reflect the one successful delivery.
    let stats: serde_json::Value = app
        .client
        .get(app.url("/api/v1/admin/stats"))
        .send()
        .await
        .expect("stats request")
        .json()
        .await
        .expect("stats body");
    assert_eq!(stats["deliveries"]["successRate"], 100.0);

    sink.verify().await;
}

#[tokio::test]
async fn retry_to_failure_produces_exactly_max_attempts_rows() {
    let Some(env) = TestEnv::new_instant_retry().await.expect("test env setup") else { return };
    let app = env.spawn_app().await.expect("app should start");

    let sink = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&sink)
        .await;

    env.create_subscription("order.paid", &format!("{}/hook", sink.uri()))
        .await
        .expect("subscription");

    ingest(&app, "k-retry", "order.paid").await;
    env.run_fanout_once().await.expect("fanout");

    // Default policy allows 3 attempts total; each run claims the job once.
    for _ in 0..3 {
        let handled = env.run_delivery_once().await.expect("delivery batch");
        assert_eq!(handled, 1);
    }

    let rows: Vec<(String, i32, Option<i32>, Option<String>)> = sqlx::query_as(
        "SELECT status, attempt_count, response_status_code, error_message
         FROM delivery_logs ORDER BY attempt_count",
    )
    .fetch_all(&env.pool)
    .await
    .expect("log query");

    assert_eq!(rows.len(), 3);
    for (index, row) in rows.iter().enumerate() {
        assert_eq!(row.0, "failed");
        assert_eq!(row.1, i32::try_from(index).unwrap() + 1);
        assert_eq!(row.2, Some(500));
        assert_eq!(row.3.as_deref(), Some("HTTP 500"));
    }

    // The job is permanently failed: no fourth dispatch.
    let handled = env.run_delivery_once().await.expect("delivery batch");
    assert_eq!(handled, 0);

    let failed_jobs: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM queue_jobs WHERE status = 'failed'")
            .fetch_one(&env.pool)
            .await
            .expect("count query");
    assert_eq!(failed_jobs, 1);
}

#[tokio::test]
async fn single_attempt_budget_fails_after_one_try() {
    let queue_config = relay_queue::QueueConfig {
        max_delivery_attempts: 1,
        base_delay: std::time::Duration::ZERO,
        jitter_factor: 0.0,
        ..relay_queue::QueueConfig::default()
    };
    let Some(env) = TestEnv::with_queue_config(queue_config).await.expect("test env setup")
    else {
        return;
    };
    let app = env.spawn_app().await.expect("app should start");

    let sink = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&sink)
        .await;

    env.create_subscription("order.paid", &format!("{}/hook", sink.uri()))
        .await
        .expect("subscription");

    ingest(&app, "k-one-shot", "order.paid").await;
    env.run_fanout_once().await.expect("fanout");

    let handled = env.run_delivery_once().await.expect("delivery batch");
    assert_eq!(handled, 1);

    let rows: Vec<(String, i32)> =
        sqlx::query_as("SELECT status, attempt_count FROM delivery_logs")
            .fetch_all(&env.pool)
            .await
            .expect("log query");
    assert_eq!(rows, vec![("failed".to_string(), 1)]);

    // No second dispatch: the budget was a single attempt.
    let handled = env.run_delivery_once().await.expect("delivery batch");
    assert_eq!(handled, 0);
}

#[tokio::test]
async fn admin_retry_starts_a_fresh_attempt_trail() {
    let Some(env) = TestEnv::new_instant_retry().await.expect("test env setup") else { return };
    let app = env.spawn_app().await.expect("app should start");

    let sink = MockServer::start().await;
    // Fails three times, then recovers.
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .up_to_n_times(3)
        .mount(&sink)
        .await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
        .mount(&sink)
        .await;

    env.create_subscription("order.paid", &format!("{}/hook", sink.uri()))
        .await
        .expect("subscription");

    ingest(&app, "k-recover", "order.paid").await;
    env.run_fanout_once().await.expect("fanout");
    for _ in 0..3 {
        env.run_delivery_once().await.expect("delivery batch");
    }

    let last_log_id: uuid::Uuid = sqlx::query_scalar(
        "SELECT id FROM delivery_logs ORDER BY attempt_count DESC LIMIT 1",
    )
    .fetch_one(&env.pool)
    .await
    .expect("last log");

    let retry = app
        .client
        .post(app.url(&format!("/api/v1/admin/delivery-logs/{last_log_id}/retry")))
        .send()
        .await
        .expect("retry request");
    assert_eq!(retry.status(), 200);

    let handled = env.run_delivery_once().await.expect("delivery batch");
    assert_eq!(handled, 1);

    let rows: Vec<(String, i32)> = sqlx::query_as(
        "SELECT status, attempt_count FROM delivery_logs ORDER BY attempted_at",
    )
    .fetch_all(&env.pool)
    .await
    .expect("log query");

    assert_eq!(rows.len(), 4);
    // Original trail unchanged, new trail restarts at attempt 1.
    assert_eq!(rows[0], ("failed".to_string(), 1));
    assert_eq!(rows[1], ("failed".to_string(), 2));
    assert_eq!(rows[2], ("failed".to_string(), 3));
    assert_eq!(rows[3], ("success".to_string(), 1));
}

#[tokio::test]
async fn fanout_reaches_every_active_subscriber() {
    let Some(env) = TestEnv::new().await.expect("test env setup") else { return };
    let app = env.spawn_app().await.expect("app should start");

    let sink = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/first"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&sink)
        .await;
    Mock::given(matchers::method("POST"))
        .and(matchers::path("/second"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&sink)
        .await;

    let first = env
        .create_subscription("order.paid", &format!("{}/first", sink.uri()))
        .await
        .expect("subscription");
    let second = env
        .create_subscription("order.paid", &format!("{}/second", sink.uri()))
        .await
        .expect("subscription");

    ingest(&app, "k-fanout", "order.paid").await;
    env.drain_pipeline().await.expect("pipeline");

    let rows: Vec<(uuid::Uuid, String)> =
        sqlx::query_as("SELECT subscription_id, status FROM delivery_logs")
            .fetch_all(&env.pool)
            .await
            .expect("log query");

    assert_eq!(rows.len(), 2);
    let delivered: std::collections::HashSet<uuid::Uuid> =
        rows.iter().map(|(id, _)| *id).collect();
    assert!(delivered.contains(&first.id.0));
    assert!(delivered.contains(&second.id.0));
    assert!(rows.iter().all(|(_, status)| status == "success"));

    sink.verify().await;
}

#[tokio::test]
async fn inactive_subscription_is_dropped_without_audit_row() {
    let Some(env) = TestEnv::new().await.expect("test env setup") else { return };
    let app = env.spawn_app().await.expect("app should start");

    let sink = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&sink)
        .await;

    let subscription = env
        .create_subscription("user.deleted", &format!("{}/hook", sink.uri()))
        .await
        .expect("subscription");

    // Deactivate after fan-out targets it: delivery must drop silently.
    ingest(&app, "k-inactive", "user.deleted").await;
    env.run_fanout_once().await.expect("fanout");

    sqlx::query("UPDATE subscriptions SET is_active = FALSE WHERE id = $1")
        .bind(subscription.id.0)
        .execute(&env.pool)
        .await
        .expect("deactivate");

    let handled = env.run_delivery_once().await.expect("delivery batch");
    assert_eq!(handled, 1);

    let logs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM delivery_logs")
        .fetch_one(&env.pool)
        .await
        .expect("count query");
    assert_eq!(logs, 0, "dropped deliveries must not create audit rows");

    // Job completed, not failed.
    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_jobs")
        .fetch_one(&env.pool)
        .await
        .expect("count query");
    assert_eq!(remaining, 0);

    sink.verify().await;
}

#[tokio::test]
async fn transport_error_is_logged_without_status_code() {
    let Some(env) = TestEnv::new_instant_retry().await.expect("test env setup") else { return };
    let app = env.spawn_app().await.expect("app should start");

    // Nothing listens on port 1; every attempt is a connection failure.
    env.create_subscription("user.created", "http://127.0.0.1:1/hook")
        .await
        .expect("subscription");

    ingest(&app, "k-transport", "user.created").await;
    env.run_fanout_once().await.expect("fanout");
    env.run_delivery_once().await.expect("delivery batch");

    let rows: Vec<(String, Option<i32>, Option<String>, Option<String>)> = sqlx::query_as(
        "SELECT status, response_status_code, response_body, error_message FROM delivery_logs",
    )
    .fetch_all(&env.pool)
    .await
    .expect("log query");

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, "failed");
    assert_eq!(rows[0].1, None);
    assert_eq!(rows[0].2, None);
    assert!(rows[0].3.as_deref().unwrap_or_default().contains("network error"));
}

#[tokio::test]
async fn outbound_body_is_signed_with_subscriber_secret() {
    let Some(env) = TestEnv::new().await.expect("test env setup") else { return };
    let app = env.spawn_app().await.expect("app should start");

    let sink = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&sink)
        .await;

    let subscription = env
        .create_subscription("user.created", &format!("{}/hook", sink.uri()))
        .await
        .expect("subscription");

    let ingest_body = ingest(&app, "k-signed", "user.created").await;
    env.drain_pipeline().await.expect("pipeline");

    let requests = sink.received_requests().await.expect("recorded requests");
    assert_eq!(requests.len(), 1);
    let request = &requests[0];

    let signature =
        request.headers.get("X-Signature").expect("signature header").to_str().unwrap();
    assert!(signer::verify(&subscription.secret_key, &request.body, signature));

    // Envelope carries the event in its canonical wire form.
    let envelope: serde_json::Value = serde_json::from_slice(&request.body).expect("envelope");
    assert_eq!(envelope["id"], ingest_body["eventId"]);
    assert_eq!(envelope["eventType"], "user.created");
    assert_eq!(envelope["idempotencyKey"], "k-signed");
    assert_eq!(envelope["payload"], json!({"x": 1}));

    let event_id_header =
        request.headers.get("X-Event-Id").expect("event id header").to_str().unwrap();
    assert_eq!(event_id_header, ingest_body["eventId"].as_str().unwrap());
    assert!(request.headers.get("X-Timestamp").is_some());
    assert_eq!(
        request.headers.get("X-Event-Type").expect("event type header").to_str().unwrap(),
        "user.created"
    );
    assert_eq!(
        request.headers.get("User-Agent").expect("user agent").to_str().unwrap(),
        "webhook-relay/1.0"
    );
}
