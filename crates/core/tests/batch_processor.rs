//! Batch processor integration tests against the mock provider.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use batchgate_core::{
    batch::{BatchItem, ProcessError},
    fingerprint,
    testing::{fixtures, MockProvider},
    BatchProcessor, BatchStatus, BatchStore, BatchingConfig, ProviderBatchProcessor, SqliteStore,
};

fn create_processor(
    provider: &MockProvider,
    store: &Arc<SqliteStore>,
    config: BatchingConfig,
) -> ProviderBatchProcessor {
    ProviderBatchProcessor::new(
        Arc::new(provider.clone()),
        store.clone(),
        config,
        "/v1/chat/completions",
    )
}

fn fast_config() -> BatchingConfig {
    BatchingConfig {
        collation_window_ms: 20,
        poll_initial_interval_ms: 5,
        poll_max_interval_ms: 20,
    }
}

fn item(content: &str) -> BatchItem {
    let request = fixtures::chat_request(content);
    BatchItem::new(fingerprint(&request).unwrap(), request)
}

#[tokio::test]
async fn test_process_batch_uses_fingerprints_as_correlation_ids() {
    let provider = MockProvider::new();
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let processor = create_processor(&provider, &store, fast_config());

    let items = vec![item("one"), item("two")];
    let outcome = processor
        .process_batch(&items, &CancellationToken::new())
        .await
        .unwrap();

    let submitted = &provider.submissions().await[0];
    assert_eq!(submitted.len(), 2);
    for (line, item) in submitted.iter().zip(&items) {
        assert_eq!(line.custom_id, item.fingerprint.as_str());
        assert_eq!(line.method, "POST");
        assert_eq!(line.url, "/v1/chat/completions");
    }

    assert_eq!(outcome.len(), 2);
    assert_eq!(
        fixtures::response_text(&outcome[&items[1].fingerprint]),
        Some("echo: two")
    );

    // validating (submit), in_progress, completed
    let batch_id = &provider.batch_ids().await[0];
    let latest = store.get_latest_status(batch_id).unwrap().unwrap();
    assert_eq!(latest.status, BatchStatus::Completed);
    assert_eq!(store.list_latest_statuses(10).unwrap().len(), 1);
}

#[tokio::test]
async fn test_poll_backoff_doubles_up_to_cap() {
    let provider = MockProvider::new();
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let config = BatchingConfig {
        collation_window_ms: 20,
        poll_initial_interval_ms: 10,
        poll_max_interval_ms: 40,
    };
    let processor = create_processor(&provider, &store, config);

    let lines = vec![fixtures::input_line(fixtures::chat_request("slow"))];
    let mut script = vec![BatchStatus::InProgress; 5];
    script.push(BatchStatus::Completed);
    provider
        .insert_batch("batch_1", lines, BatchStatus::InProgress, script)
        .await;

    let started = Instant::now();
    let outcome = processor
        .poll_and_collect("batch_1", &CancellationToken::new())
        .await
        .unwrap();

    // 10 + 20 + 40 + 40 + 40
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(outcome.len(), 1);
    assert_eq!(provider.retrieve_count("batch_1").await, 6);
}

#[tokio::test]
async fn test_item_error_fails_whole_batch() {
    let provider = MockProvider::new();
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let processor = create_processor(&provider, &store, fast_config());

    let good = fixtures::input_line(fixtures::chat_request("good"));
    let bad = fixtures::input_line(fixtures::chat_request("bad"));
    provider
        .insert_batch(
            "batch_1",
            vec![good.clone(), bad.clone()],
            BatchStatus::InProgress,
            vec![BatchStatus::Completed],
        )
        .await;
    provider
        .set_output(
            "batch_1",
            vec![
                fixtures::output_line(&good.custom_id, "fine"),
                fixtures::error_output_line(&bad.custom_id, 400, "context length exceeded"),
            ],
        )
        .await;

    let err = processor
        .poll_and_collect("batch_1", &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ProcessError::ItemFailed {
            custom_id,
            status_code,
            message,
            ..
        } => {
            assert_eq!(custom_id, bad.custom_id);
            assert_eq!(status_code, 400);
            assert_eq!(message, "context length exceeded");
        }
        other => panic!("Unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_output_order_does_not_matter() {
    let provider = MockProvider::new();
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let processor = create_processor(&provider, &store, fast_config());

    let first = fixtures::input_line(fixtures::chat_request("first"));
    let second = fixtures::input_line(fixtures::chat_request("second"));
    provider
        .insert_batch(
            "batch_1",
            vec![first.clone(), second.clone()],
            BatchStatus::InProgress,
            vec![BatchStatus::Completed],
        )
        .await;
    provider
        .set_output(
            "batch_1",
            vec![
                fixtures::output_line(&second.custom_id, "for second"),
                fixtures::output_line(&first.custom_id, "for first"),
            ],
        )
        .await;

    let outcome = processor
        .poll_and_collect("batch_1", &CancellationToken::new())
        .await
        .unwrap();

    let first_fp = fingerprint(&first.body).unwrap();
    assert_eq!(fixtures::response_text(&outcome[&first_fp]), Some("for first"));
}

#[tokio::test]
async fn test_terminal_status_is_an_error() {
    let provider = MockProvider::new();
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let processor = create_processor(&provider, &store, fast_config());

    provider
        .insert_batch(
            "batch_1",
            vec![fixtures::input_line(fixtures::chat_request("x"))],
            BatchStatus::InProgress,
            vec![BatchStatus::Cancelling, BatchStatus::Cancelled],
        )
        .await;

    let err = processor
        .poll_and_collect("batch_1", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProcessError::Terminal {
            status: BatchStatus::Cancelled,
            ..
        }
    ));

    let latest = store.get_latest_status("batch_1").unwrap().unwrap();
    assert_eq!(latest.status, BatchStatus::Cancelled);
}

#[tokio::test]
async fn test_cancellation_stops_polling() {
    let provider = MockProvider::new();
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let config = BatchingConfig {
        collation_window_ms: 20,
        poll_initial_interval_ms: 60_000,
        poll_max_interval_ms: 60_000,
    };
    let processor = create_processor(&provider, &store, config);

    provider
        .insert_batch(
            "batch_1",
            vec![fixtures::input_line(fixtures::chat_request("x"))],
            BatchStatus::InProgress,
            vec![],
        )
        .await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        processor.poll_and_collect("batch_1", &cancel),
    )
    .await
    .expect("Polling did not stop");

    assert!(matches!(result, Err(ProcessError::Cancelled { .. })));
}

#[tokio::test]
async fn test_load_batch_input_recomputes_fingerprints() {
    let provider = MockProvider::new();
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let processor = create_processor(&provider, &store, fast_config());

    let line = fixtures::input_line(fixtures::chat_request("recover me"));
    provider
        .insert_batch("batch_1", vec![line.clone()], BatchStatus::InProgress, vec![])
        .await;

    let (batch, items) = processor.load_batch_input("batch_1").await.unwrap();
    assert_eq!(batch.status, BatchStatus::InProgress);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].fingerprint.as_str(), line.custom_id);
    assert_eq!(items[0].request, line.body);
}

#[tokio::test]
async fn test_load_batch_input_keeps_mismatched_custom_id() {
    let provider = MockProvider::new();
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let processor = create_processor(&provider, &store, fast_config());

    // Submitted under a correlation ID that no longer matches its body
    let keyed_as = fingerprint(&fixtures::chat_request("earlier encoding")).unwrap();
    let mut line = fixtures::input_line(fixtures::chat_request("recover me"));
    line.custom_id = keyed_as.as_str().to_string();
    provider
        .insert_batch("batch_1", vec![line], BatchStatus::Completed, vec![])
        .await;

    let (_, items) = processor.load_batch_input("batch_1").await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].fingerprint, keyed_as);

    let outcome = processor
        .poll_and_collect("batch_1", &CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.contains_key(&items[0].fingerprint));
}
