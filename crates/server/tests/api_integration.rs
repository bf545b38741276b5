//! API integration tests.
//!
//! Each test builds the full router over a real store, processor and
//! orchestrator, with the mock provider standing in for the batch API.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;

use batchgate_core::{fingerprint, BatchStatus, BatchStore, ServingMode};
use common::{fixtures, TestConfig, TestFixture};

async fn wait_for_cached(fixture: &TestFixture, content: &str) {
    let fp = fingerprint(&fixtures::chat_request(content)).unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while fixture.store.get_cached_response(&fp).unwrap().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Timed out waiting for cached response");
}

async fn wait_for_logged(fixture: &TestFixture, batch_id: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while fixture.store.get_latest_status(batch_id).unwrap().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Timed out waiting for status log entry");
}

// =============================================================================
// Health, config, status, metrics
// =============================================================================

#[tokio::test]
async fn test_health() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/health").await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
}

#[tokio::test]
async fn test_config_is_sanitized() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/config").await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["provider"]["api_key_configured"], true);
    assert_eq!(response.body["serving"]["mode"], "sync");
    assert!(!response.body.to_string().contains("sk-test-secret"));
}

#[tokio::test]
async fn test_orchestrator_status() {
    let fixture = TestFixture::with_config(TestConfig::with_mode(ServingMode::Async)).await;

    let response = fixture.get("/orchestrator/status").await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["running"], true);
    assert_eq!(response.body["serving_mode"], "async");
    assert_eq!(response.body["pending_count"], 0);
    assert_eq!(response.body["in_flight_count"], 0);
    assert_eq!(response.body["waiter_count"], 0);
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_gauges_and_http_counters() {
    let fixture = TestFixture::new().await;
    fixture.get("/health").await;

    let (status, body) = fixture.get_text("/metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("batchgate_orchestrator_running"));
    assert!(body.contains("batchgate_orchestrator_waiters"));
    assert!(body.contains("batchgate_cached_responses"));
    assert!(body.contains("batchgate_http_requests_total"));
}

// =============================================================================
// Chat completions
// =============================================================================

#[tokio::test]
async fn test_sync_chat_completes_through_a_batch() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post("/v1/chat/completions", fixtures::chat_request_json("hello"))
        .await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(
        response.body["choices"][0]["message"]["content"],
        "echo: hello"
    );
    assert_eq!(fixture.provider.submission_count().await, 1);
    assert_eq!(fixture.store.count_cached_responses().unwrap(), 1);
}

#[tokio::test]
async fn test_repeated_chat_is_served_from_cache() {
    let fixture = TestFixture::new().await;

    let first = fixture
        .post("/v1/chat/completions", fixtures::chat_request_json("again"))
        .await;
    let second = fixture
        .post("/v1/chat/completions", fixtures::chat_request_json("again"))
        .await;

    assert_status!(first, StatusCode::OK);
    assert_status!(second, StatusCode::OK);
    assert_eq!(first.body, second.body);
    assert_eq!(fixture.provider.submission_count().await, 1);
}

#[tokio::test]
async fn test_concurrent_identical_chats_share_one_line_item() {
    let fixture = TestFixture::new().await;

    let (a, b, c) = tokio::join!(
        fixture.post("/v1/chat/completions", fixtures::chat_request_json("same")),
        fixture.post("/v1/chat/completions", fixtures::chat_request_json("same")),
        fixture.post("/v1/chat/completions", fixtures::chat_request_json("other")),
    );

    assert_status!(a, StatusCode::OK);
    assert_status!(b, StatusCode::OK);
    assert_status!(c, StatusCode::OK);
    assert_eq!(a.body["choices"][0]["message"]["content"], "echo: same");
    assert_eq!(c.body["choices"][0]["message"]["content"], "echo: other");

    let submissions = fixture.provider.submissions().await;
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].len(), 2);
}

#[tokio::test]
async fn test_async_chat_is_accepted_and_lands_in_cache() {
    let fixture = TestFixture::with_config(TestConfig::with_mode(ServingMode::Async)).await;
    let expected = fingerprint(&fixtures::chat_request("later")).unwrap();

    let response = fixture
        .post("/v1/chat/completions", fixtures::chat_request_json("later"))
        .await;

    assert_status!(response, StatusCode::ACCEPTED);
    assert_eq!(response.body["status"], "accepted");
    assert_eq!(response.body["fingerprint"], expected.as_str());

    wait_for_cached(&fixture, "later").await;

    let cached = fixture
        .post("/v1/chat/completions", fixtures::chat_request_json("later"))
        .await;
    assert_status!(cached, StatusCode::OK);
    assert_eq!(cached.body["choices"][0]["message"]["content"], "echo: later");
    assert_eq!(fixture.provider.submission_count().await, 1);
}

#[tokio::test]
async fn test_cache_only_miss_is_not_found() {
    let fixture = TestFixture::with_config(TestConfig::with_mode(ServingMode::CacheOnly)).await;

    let response = fixture
        .post("/v1/chat/completions", fixtures::chat_request_json("unknown"))
        .await;

    assert_status!(response, StatusCode::NOT_FOUND);
    assert_eq!(response.body["error"]["type"], "not_found");
    assert!(response.body["error"]["message"].is_string());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fixture.provider.submission_count().await, 0);
}

#[tokio::test]
async fn test_cache_only_hit_returns_cached_response() {
    let fixture = TestFixture::with_config(TestConfig::with_mode(ServingMode::CacheOnly)).await;
    let request = fixtures::chat_request("known");
    let fp = fingerprint(&request).unwrap();
    fixture
        .store
        .put_cached_response(&fp, &request, &fixtures::chat_response("from cache"))
        .unwrap();

    let response = fixture
        .post("/v1/chat/completions", fixtures::chat_request_json("known"))
        .await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(
        response.body["choices"][0]["message"]["content"],
        "from cache"
    );
}

#[tokio::test]
async fn test_failed_batch_returns_server_error() {
    let fixture = TestFixture::new().await;
    fixture
        .provider
        .set_status_script(vec![BatchStatus::InProgress, BatchStatus::Failed])
        .await;

    let response = fixture
        .post("/v1/chat/completions", fixtures::chat_request_json("doomed"))
        .await;

    assert_status!(response, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.body["error"]["type"], "batch_failed");
    assert_eq!(fixture.store.count_cached_responses().unwrap(), 0);
}

#[tokio::test]
async fn test_slow_batch_times_out() {
    let fixture = TestFixture::with_config(TestConfig {
        mode: ServingMode::Sync,
        request_timeout_secs: 1,
    })
    .await;
    fixture
        .provider
        .set_status_script(vec![BatchStatus::InProgress])
        .await;

    let response = fixture
        .post("/v1/chat/completions", fixtures::chat_request_json("slow"))
        .await;

    assert_status!(response, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(response.body["error"]["type"], "timeout");
}

#[tokio::test]
async fn test_chat_without_model_is_rejected() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post(
            "/v1/chat/completions",
            json!({"messages": [{"role": "user", "content": "hi"}]}),
        )
        .await;

    assert!(response.status.is_client_error());
    assert_eq!(fixture.provider.submission_count().await, 0);
}

// =============================================================================
// Batch status log
// =============================================================================

#[tokio::test]
async fn test_list_and_get_batches() {
    let fixture = TestFixture::new().await;
    fixture
        .post("/v1/chat/completions", fixtures::chat_request_json("listed"))
        .await;

    let list = fixture.get("/v1/batches").await;
    assert_status!(list, StatusCode::OK);
    assert_eq!(list.body["object"], "list");
    let data = list.body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["status"], "completed");

    let batch_id = data[0]["id"].as_str().unwrap().to_string();
    assert!(batch_id.starts_with("batch_mock_"));

    let single = fixture.get(&format!("/v1/batches/{}", batch_id)).await;
    assert_status!(single, StatusCode::OK);
    assert_eq!(single.body["id"], batch_id.as_str());
    assert_eq!(single.body["status"], "completed");
    assert!(single.body["output_file_id"].is_string());
    assert!(single.body["logged_at"].is_string());
}

#[tokio::test]
async fn test_get_unknown_batch_is_not_found() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/v1/batches/batch_missing").await;

    assert_status!(response, StatusCode::NOT_FOUND);
    assert!(response.body["error"]
        .as_str()
        .unwrap()
        .contains("batch_missing"));
}

#[tokio::test]
async fn test_cancel_running_batch() {
    let fixture = TestFixture::with_config(TestConfig::with_mode(ServingMode::Async)).await;
    fixture
        .provider
        .set_status_script(vec![BatchStatus::InProgress])
        .await;

    let accepted = fixture
        .post("/v1/chat/completions", fixtures::chat_request_json("cancel me"))
        .await;
    assert_status!(accepted, StatusCode::ACCEPTED);

    fixture.wait_for_submissions(1).await;
    let batch_id = fixture.provider.batch_ids().await.remove(0);
    wait_for_logged(&fixture, &batch_id).await;

    let cancelled = fixture
        .post_empty(&format!("/v1/batches/{}/cancel", batch_id))
        .await;
    assert_status!(cancelled, StatusCode::OK);
    assert_eq!(cancelled.body["status"], "cancelled");

    // The poll loop may log one more in-flight observation before it sees the cancel.
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let latest = fixture.store.get_latest_status(&batch_id).unwrap().unwrap();
            if latest.status == BatchStatus::Cancelled {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Timed out waiting for cancelled status");

    let again = fixture
        .post_empty(&format!("/v1/batches/{}/cancel", batch_id))
        .await;
    assert_status!(again, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cancel_unknown_batch_is_not_found() {
    let fixture = TestFixture::new().await;

    let response = fixture.post_empty("/v1/batches/batch_nope/cancel").await;

    assert_status!(response, StatusCode::NOT_FOUND);
}
