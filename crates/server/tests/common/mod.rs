//! Common test utilities for in-process API testing with mocks.
//!
//! This module provides a test fixture that builds the real router, store,
//! processor and orchestrator with the mock provider injected, so the HTTP
//! surface can be exercised end to end without network access.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use batchgate_core::{
    testing::MockProvider, BatchOrchestrator, BatchingConfig, Config, DatabaseConfig,
    ProviderBatchProcessor, RecoveryConfig, ServerConfig, ServingMode, SqliteStore,
    StoreBackedCache,
};
use batchgate_server::state::AppState;

/// Re-export fixtures for test convenience
pub use batchgate_core::testing::fixtures;

/// Test fixture for API testing with a mock provider.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_chat() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture
///         .post("/v1/chat/completions", fixtures::chat_request_json("hi"))
///         .await;
///
///     assert_eq!(response.status, 200);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Mock provider - script batch statuses and inspect submissions
    pub provider: MockProvider,
    /// Store behind the cache and the status log
    pub store: Arc<SqliteStore>,
    pub orchestrator: Arc<BatchOrchestrator>,
    /// Temporary directory for the test database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Create a new sync-mode test fixture.
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    /// Create a test fixture with custom configuration.
    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let provider = MockProvider::new();

        let mut config = Config {
            server: ServerConfig {
                host: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
                port: 0, // Not used for in-process testing
                request_timeout_secs: test_config.request_timeout_secs,
            },
            database: DatabaseConfig {
                path: db_path.clone(),
            },
            batching: BatchingConfig {
                collation_window_ms: 20,
                poll_initial_interval_ms: 5,
                poll_max_interval_ms: 20,
            },
            recovery: RecoveryConfig {
                on_startup: false,
                in_cache_only_mode: false,
            },
            ..Default::default()
        };
        config.serving.mode = test_config.mode;
        config.provider.api_key = "sk-test-secret".to_string();

        let store = Arc::new(SqliteStore::new(&db_path).expect("Failed to create store"));

        let processor = Arc::new(ProviderBatchProcessor::new(
            Arc::new(provider.clone()),
            store.clone(),
            config.batching.clone(),
            config.provider.endpoint.clone(),
        ));
        let cache = Arc::new(StoreBackedCache::new(store.clone()));

        let orchestrator = Arc::new(BatchOrchestrator::new(
            processor,
            cache,
            store.clone(),
            config.serving.mode,
            config.batching.clone(),
            config.recovery.clone(),
        ));
        orchestrator.start();

        let state = Arc::new(AppState::new(
            config,
            orchestrator.clone(),
            store.clone(),
            Arc::new(provider.clone()),
        ));

        let router = batchgate_server::api::create_router(state);

        Self {
            router,
            provider,
            store,
            orchestrator,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a GET request and return the raw body as text.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        (status, String::from_utf8_lossy(&body_bytes).into_owned())
    }

    /// Wait until the mock provider has received `count` submissions.
    pub async fn wait_for_submissions(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.provider.submission_count().await < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("Timed out waiting for provider submissions");
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// Configuration for test fixture.
#[derive(Debug, Clone)]
pub struct TestConfig {
    pub mode: ServingMode,
    pub request_timeout_secs: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            mode: ServingMode::Sync,
            request_timeout_secs: 10,
        }
    }
}

impl TestConfig {
    pub fn with_mode(mode: ServingMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
